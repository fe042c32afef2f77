//! The key format is recorded in the master boot record of the whole disk.
//!
//! Legacy keys boot with GRUB, whose stage1 stores its major and minor version
//! at offsets `0x3e` and `0x3f`. Loader keys carry the pmbr major version at
//! offset `0xfa`. Both keep the standard `0xaa55` signature at `0x1fe`.

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const MBR_SIZE: usize = 512;

const SIGNATURE_OFFSET: usize = 0x1fe;
const SIGNATURE: u16 = 0xaa55;

const GRUB_MAJOR_OFFSET: usize = 0x3e;
const GRUB_MINOR_OFFSET: usize = 0x3f;
const GRUB_VERSION: (u8, u8) = (3, 2);

const LOADER_MAJOR_OFFSET: usize = 0xfa;
const LOADER_MAJOR: u8 = 2;

#[derive(Debug, Error, PartialEq)]
pub enum MbrError {
    #[error("unrecognised key version")]
    UnrecognisedVersion,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BootRecord {
    /// Not a boot record at all; the device is not a key.
    Unknown,
    Legacy { major: u8, minor: u8 },
    Loader { major: u8 },
}

impl BootRecord {
    pub fn parse(buf: &[u8; MBR_SIZE]) -> Result<Self, MbrError> {
        let signature = u16::from_le_bytes([buf[SIGNATURE_OFFSET], buf[SIGNATURE_OFFSET + 1]]);
        if signature != SIGNATURE {
            return Ok(BootRecord::Unknown);
        }

        let (major, minor) = (buf[GRUB_MAJOR_OFFSET], buf[GRUB_MINOR_OFFSET]);
        if (major, minor) == GRUB_VERSION {
            return Ok(BootRecord::Legacy { major, minor });
        }

        let major = buf[LOADER_MAJOR_OFFSET];
        if major == LOADER_MAJOR {
            return Ok(BootRecord::Loader { major });
        }

        Err(MbrError::UnrecognisedVersion)
    }

    pub fn version(self) -> Option<KeyVersion> {
        match self {
            BootRecord::Unknown => None,
            BootRecord::Legacy { .. } => Some(KeyVersion::Legacy),
            BootRecord::Loader { .. } => Some(KeyVersion::Loader),
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyVersion {
    /// GRUB on a legacy BIOS key.
    Legacy = 1,
    /// loader(8) on a key that boots under either BIOS or UEFI.
    Loader = 2,
}

impl KeyVersion {
    /// The partition holding the pcfs file system.
    pub fn partition_suffix(self) -> &'static str {
        match self {
            KeyVersion::Legacy => "p1",
            KeyVersion::Loader => "s2",
        }
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result { write!(fmt, "{}", *self as u8) }
}

impl Serialize for KeyVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[cfg(test)]
pub(crate) fn record(grub: (u8, u8), loader: u8, signature: u16) -> [u8; MBR_SIZE] {
    let mut buf = [0u8; MBR_SIZE];
    buf[GRUB_MAJOR_OFFSET] = grub.0;
    buf[GRUB_MINOR_OFFSET] = grub.1;
    buf[LOADER_MAJOR_OFFSET] = loader;
    buf[SIGNATURE_OFFSET..].copy_from_slice(&signature.to_le_bytes());
    buf
}
