// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde_derive::{Deserialize, Serialize};

use crate::{
    engine::{DeviceType, EncryptionFormat, FormatPair, IoProfile, Size},
    rbdcrypt::errors::{RbdCryptError, RbdCryptResult},
};

const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// How to reach one host of the cluster.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// ssh destination; None runs commands on the local machine.
    pub host: Option<String>,
    pub sudo: bool,
    pub timeout_secs: u64,
}

impl HostConfig {
    pub fn local() -> HostConfig {
        HostConfig::default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn name(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }
}

impl Default for HostConfig {
    fn default() -> HostConfig {
        HostConfig {
            host: None,
            sudo: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub client: HostConfig,
    pub mirror_client: Option<HostConfig>,
    pub device_type: DeviceType,
    pub filesystem: String,
    pub workdir: PathBuf,
    pub pool: String,
    pub image_size: Size,
    pub io: IoProfile,
    pub formats: Vec<FormatPair>,
    pub scenarios: Vec<u8>,
    pub mirror_mode: String,
}

impl Default for HarnessConfig {
    fn default() -> HarnessConfig {
        HarnessConfig {
            client: HostConfig::default(),
            mirror_client: None,
            device_type: DeviceType::Nbd,
            filesystem: "ext4".to_string(),
            workdir: PathBuf::from("/tmp"),
            pool: "rbd".to_string(),
            image_size: Size::from_gib(1),
            io: IoProfile::default(),
            formats: vec![
                FormatPair::new(EncryptionFormat::Luks1, EncryptionFormat::Luks1),
                FormatPair::new(EncryptionFormat::Luks2, EncryptionFormat::Luks1),
                FormatPair::new(EncryptionFormat::Luks1, EncryptionFormat::Luks2),
                FormatPair::new(EncryptionFormat::Luks2, EncryptionFormat::Luks2),
            ],
            scenarios: (1..=16).collect(),
            mirror_mode: "snapshot".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn from_file(path: &Path) -> RbdCryptResult<HarnessConfig> {
        let text = fs::read_to_string(path).map_err(|e| {
            RbdCryptError::Chained(
                format!("Failed to read configuration file {}", path.display()),
                Box::new(RbdCryptError::from(e)),
            )
        })?;
        HarnessConfig::from_json(&text)
    }

    pub fn from_json(text: &str) -> RbdCryptResult<HarnessConfig> {
        let config: HarnessConfig = serde_json::from_str(text)?;
        if config.pool.is_empty() {
            return Err(RbdCryptError::Msg(
                "pool name in configuration must not be empty".to_string(),
            ));
        }
        if config.client.timeout_secs == 0 {
            return Err(RbdCryptError::Msg(
                "command timeout in configuration must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = HarnessConfig::from_json("{}").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.client.timeout(), Duration::from_secs(600));
        assert_eq!(config.client.name(), "localhost");
    }

    #[test]
    fn test_partial_override() {
        let config = HarnessConfig::from_json(
            r#"{
                "client": {"host": "ceph-client-1", "sudo": true},
                "pool": "qe_pool",
                "image_size": "2G",
                "formats": ["luks2,luks1", "NA,luks2"],
                "scenarios": [3, 16]
            }"#,
        )
        .unwrap();
        assert_eq!(config.client.name(), "ceph-client-1");
        assert!(config.client.sudo);
        assert_eq!(config.client.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.image_size, Size::from_gib(2));
        assert_eq!(
            config.formats[1],
            FormatPair::new(EncryptionFormat::None, EncryptionFormat::Luks2)
        );
        assert_eq!(config.scenarios, vec![3, 16]);
        assert_eq!(config.filesystem, "ext4");
    }

    #[test]
    fn test_bad_format_pair_rejected() {
        assert_matches!(
            HarnessConfig::from_json(r#"{"formats": ["luks3,luks1"]}"#),
            Err(RbdCryptError::Serde(_))
        );
        assert_matches!(
            HarnessConfig::from_json(r#"{"pool": ""}"#),
            Err(RbdCryptError::Msg(_))
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"workdir": "/var/tmp/qe"}}"#).unwrap();
        let config = HarnessConfig::from_file(file.path()).unwrap();
        assert_eq!(config.workdir, PathBuf::from("/var/tmp/qe"));

        assert_matches!(
            HarnessConfig::from_file(Path::new("/nonexistent/rbdcrypt.json")),
            Err(RbdCryptError::Chained(_, _))
        );
    }
}
