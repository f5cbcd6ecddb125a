// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod clone;
mod compensate;
mod device;
mod keys;
mod verify;

pub use self::{
    clone::{
        create_and_encrypt_clone, encrypt_image, flatten_clone,
        test_encryption_between_image_and_clone, CloneRequest, LayeredImages,
    },
    compensate::{compensate, SIZE_UNCHANGED},
    device::{cleanup_image, device_cleanup, map_and_mount, map_request, EncryptedImage},
    keys::{
        clone_passphrase_file_name, copy_passphrase, create_passphrase_file, generate_secret,
        passphrase_file_name, wrong_passphrase,
    },
    verify::{mount_image_and_mirror_and_check_data, verify_consistency, Artifact, MountPolicy},
};
