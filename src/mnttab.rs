//! The kernel publishes the list of mounted file systems in `/etc/mnttab`, as
//! documented in mnttab(4): one tab-separated line of special, mount point,
//! file system type, options and mount time per mount.

use crate::options::MountOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MNTTAB: &str = "/etc/mnttab";

#[derive(Debug, Error)]
pub enum MnttabError {
    #[error("invalid mnttab line: {}", _0)]
    InvalidLine(String),

    #[error("invalid mount time in mnttab line: {}", _0)]
    InvalidTime(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MountEntry {
    pub special:    String,
    pub mountpoint: PathBuf,
    pub fstype:     String,
    pub options:    MountOptions,
    pub time:       u64,
}

impl MountEntry {
    fn parse(line: &str) -> Result<Self, MnttabError> {
        let fields = line.split('\t').collect::<Vec<_>>();

        if fields.len() != 5 {
            return Err(MnttabError::InvalidLine(line.to_owned()));
        }

        let time =
            fields[4].trim().parse::<u64>().map_err(|_| MnttabError::InvalidTime(line.to_owned()))?;

        Ok(MountEntry {
            special: fields[0].to_owned(),
            mountpoint: PathBuf::from(fields[1]),
            fstype: fields[2].to_owned(),
            options: MountOptions::parse(fields[3]),
            time,
        })
    }
}

/// The parsed contents of the mount table.
#[derive(Clone, Debug, Default)]
pub struct MountTable(Vec<MountEntry>);

impl MountTable {
    pub fn parse(contents: &str) -> Result<Self, MnttabError> {
        contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(MountEntry::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(MountTable)
    }

    /// The first entry mounted at `mountpoint`, if any.
    pub fn find<P: AsRef<Path>>(&self, mountpoint: P) -> Option<&MountEntry> {
        let mountpoint = mountpoint.as_ref();
        self.0.iter().find(|entry| entry.mountpoint == mountpoint)
    }

    pub fn entries(&self) -> &[MountEntry] { &self.0 }
}
