// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, io::Write, path::PathBuf, process, str::FromStr};

use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Builder;
use log::{info, LevelFilter};
use strum::VariantArray;

use rbdcrypt::{
    engine::{
        abort_migration, cleanup_image, encrypt_image, migrate_and_check_consistency,
        random_string, scenarios, select_scenarios, test_encryption_between_image_and_clone,
        test_mirrored_encryption, unique_file_path, CliHost, EncryptionFormat, FormatPair, Host,
        ImageSpec, LayeredImages, PipelineStep, ScenarioExecutor, ScenarioTarget, SimCluster,
        SimHost, Stage,
    },
    rbdcrypt::{HarnessConfig, RbdCryptError, RbdCryptResult, VERSION},
};

#[derive(Debug, Parser)]
#[command(name = "rbdcrypt-qe", version = VERSION)]
#[command(about = "Layered encryption tests for Ceph RBD images")]
struct Cli {
    /// Run against simulated clusters instead of the configured hosts
    #[arg(long, global = true)]
    sim: bool,

    /// JSON configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, global = true, value_name = "LEVEL", value_parser = parse_level)]
    log_level: Option<LevelFilter>,

    /// Pool to create images in, overriding the configuration
    #[arg(long, global = true)]
    pool: Option<String>,

    #[command(subcommand)]
    command: QeCommand,
}

#[derive(Debug, Subcommand)]
enum QeCommand {
    /// Print the negative scenarios and the stages that run them
    Scenarios,
    /// Encrypt a parent and a clone and check the clone reads the parent's data
    Clone(PairArgs),
    /// Run negative scenarios against a freshly encrypted image
    Negative(NegativeArgs),
    /// Mirror an encrypted parent and flattened clone and run every stage
    Mirror(PairArgs),
    /// Live-migrate an encrypted image and check its data
    Migrate(MigrateArgs),
}

#[derive(Args, Debug)]
struct PairArgs {
    /// "parent,clone" formats, e.g. luks2,luks1; all configured pairs if
    /// omitted
    #[arg(long, value_parser = parse_pair)]
    pair: Option<FormatPair>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
    Parent,
    Clone,
}

#[derive(Args, Debug)]
struct NegativeArgs {
    #[arg(long, value_parser = parse_pair, default_value = "luks1,luks1")]
    pair: FormatPair,

    /// Image of the encrypted pair the scenarios run against
    #[arg(long, value_enum, default_value = "clone")]
    target: Target,

    /// Scenario ids; those fitting the target if omitted
    #[arg(long, value_delimiter = ',')]
    ids: Vec<u8>,
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[arg(long, default_value = "luks1")]
    format: EncryptionFormat,

    /// Abort the prepared migration instead of committing it
    #[arg(long)]
    abort: bool,
}

fn parse_pair(s: &str) -> Result<FormatPair, String> {
    FormatPair::from_str(s).map_err(|e| e.to_string())
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(s).map_err(|_| format!("unknown log level {s}"))
}

/// Configure and initialize the logger. RUST_LOG takes precedence over
/// --log-level; without either only errors are logged.
fn initialize_log(level: Option<LevelFilter>) {
    let mut builder = Builder::new();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Ok(s) = env::var("RUST_LOG") {
        builder.parse_filters(&s);
    } else {
        builder.filter_level(level.unwrap_or(LevelFilter::Error));
    }

    builder.init()
}

fn load_config(cli: &Cli) -> RbdCryptResult<HarnessConfig> {
    let mut config = match cli.config {
        Some(ref path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(ref pool) = cli.pool {
        config.pool = pool.clone();
    }
    Ok(config)
}

fn pairs(config: &HarnessConfig, pair: Option<FormatPair>) -> Vec<FormatPair> {
    match pair {
        Some(pair) => vec![pair],
        None => config.formats.clone(),
    }
}

fn fresh_image(config: &HarnessConfig, prefix: &str) -> RbdCryptResult<ImageSpec> {
    ImageSpec::new(&config.pool, &format!("{prefix}_{}", random_string(5)))
}

fn print_scenarios() {
    for scenario in scenarios() {
        println!("{scenario}");
        println!("    expected: {}", scenario.expected);
        if let Some(ref alternate) = scenario.alternate {
            println!("    or:       {alternate}");
        }
    }
    println!();
    for stage in Stage::VARIANTS {
        for (parent, clone) in [(true, true), (true, false), (false, true), (false, false)] {
            println!(
                "{stage} (parent {}, clone {}): {:?}",
                if parent { "encrypted" } else { "NA" },
                if clone { "encrypted" } else { "NA" },
                select_scenarios(*stage, parent, clone)
            );
        }
    }
}

fn run_clone<H>(host: &H, config: &HarnessConfig, args: &PairArgs) -> RbdCryptResult<()>
where
    H: Host + ?Sized,
{
    for pair in pairs(config, args.pair) {
        let parent = fresh_image(config, "parent")?;
        let clone = fresh_image(config, "clone")?;
        let images = test_encryption_between_image_and_clone(host, config, pair, &parent, &clone)?;
        cleanup_image(host, &images.clone);
        cleanup_image(host, &images.parent);
        println!("format pair {pair}: {clone} reads the data of {parent}");
    }
    Ok(())
}

fn negative_target(
    images: &LayeredImages,
    pair: FormatPair,
    target: Target,
) -> RbdCryptResult<(Stage, ScenarioTarget)> {
    Ok(match target {
        Target::Parent => (
            Stage::Parent,
            ScenarioTarget {
                image: images.parent.image.clone(),
                parent: None,
                chain: images.parent.chain.clone(),
                read_only: false,
            },
        ),
        Target::Clone => {
            let chain = if pair.parent.is_luks() {
                images.clone.chain.clone()
            } else {
                images.clone.chain.clone().with_unencrypted_parent()?
            };
            (
                Stage::Clone,
                ScenarioTarget {
                    image: images.clone.image.clone(),
                    parent: Some(images.parent.image.clone()),
                    chain,
                    read_only: false,
                },
            )
        }
    })
}

fn run_negative<H>(host: &H, config: &HarnessConfig, args: &NegativeArgs) -> RbdCryptResult<()>
where
    H: Host + ?Sized,
{
    let parent = fresh_image(config, "parent")?;
    let clone = fresh_image(config, "clone")?;
    let images =
        test_encryption_between_image_and_clone(host, config, args.pair, &parent, &clone)?;

    let result = negative_target(&images, args.pair, args.target).and_then(|(stage, target)| {
        let ids = if args.ids.is_empty() {
            select_scenarios(stage, args.pair.parent.is_luks(), args.pair.clone.is_luks())
        } else {
            args.ids.clone()
        };
        info!("Running negative scenarios {ids:?} against {}", target.image);
        ScenarioExecutor::new(host, config).run(&target, &ids)
    });

    cleanup_image(host, &images.clone);
    cleanup_image(host, &images.parent);

    for outcome in result? {
        println!("{}. {}: failed as expected", outcome.id, outcome.description);
    }
    Ok(())
}

fn run_mirror<P, M>(
    config: &HarnessConfig,
    primary: &P,
    mirror: &M,
    args: &PairArgs,
) -> RbdCryptResult<()>
where
    P: Host + ?Sized,
    M: Host + ?Sized,
{
    for pair in pairs(config, args.pair) {
        let parent = fresh_image(config, "parent")?;
        let clone = fresh_image(config, "clone")?;
        let report = test_mirrored_encryption(config, primary, mirror, pair, &parent, &clone)?;
        print!("{report}");
    }
    Ok(())
}

fn run_migrate<H>(host: &H, config: &HarnessConfig, args: &MigrateArgs) -> RbdCryptResult<()>
where
    H: Host + ?Sized,
{
    let source = fresh_image(config, "source")?;
    let target = fresh_image(config, "target")?;
    let create = host.create(&source, config.image_size)?;
    if !create.is_success() {
        return Err(RbdCryptError::PipelineStep {
            step: PipelineStep::Create,
            image: source.to_string(),
            output: create.text(),
        });
    }
    let encrypted = encrypt_image(
        host,
        config,
        &source,
        args.format,
        unique_file_path(&config.workdir),
    )?;

    let remounted = if args.abort {
        abort_migration(host, config, &encrypted, &target)?
    } else {
        migrate_and_check_consistency(host, config, &encrypted, &target)?
    };
    cleanup_image(host, &remounted);
    if args.abort {
        println!("aborted migration of {source} to {target}; {source} is intact");
    } else {
        println!("migrated {source} to {target}; data is consistent");
    }
    Ok(())
}

fn run(cli: Cli) -> RbdCryptResult<()> {
    initialize_log(cli.log_level);
    let config = load_config(&cli)?;

    if cli.sim {
        info!("Using simulated clusters");
        let primary_cluster = SimCluster::new("site-a");
        let mirror_cluster = SimCluster::new("site-b");
        primary_cluster.set_peer(&mirror_cluster);
        let primary = SimHost::new("client-a", &primary_cluster);
        let mirror = SimHost::new("client-b", &mirror_cluster);
        dispatch(&cli.command, &config, &primary, &mirror)
    } else {
        let primary = CliHost::new(config.client.clone(), config.device_type);
        let mirror = match config.mirror_client {
            Some(ref client) => CliHost::new(client.clone(), config.device_type),
            None if matches!(cli.command, QeCommand::Mirror(_)) => {
                return Err(RbdCryptError::Msg(
                    "the mirror workflow needs mirror_client in the configuration".to_string(),
                ))
            }
            None => CliHost::new(config.client.clone(), config.device_type),
        };
        dispatch(&cli.command, &config, &primary, &mirror)
    }
}

fn dispatch<P, M>(
    command: &QeCommand,
    config: &HarnessConfig,
    primary: &P,
    mirror: &M,
) -> RbdCryptResult<()>
where
    P: Host + ?Sized,
    M: Host + ?Sized,
{
    match command {
        QeCommand::Scenarios => {
            print_scenarios();
            Ok(())
        }
        QeCommand::Clone(args) => run_clone(primary, config, args),
        QeCommand::Negative(args) => run_negative(primary, config, args),
        QeCommand::Mirror(args) => run_mirror(config, primary, mirror, args),
        QeCommand::Migrate(args) => run_migrate(primary, config, args),
    }
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
