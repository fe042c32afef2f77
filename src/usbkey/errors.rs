use crate::{
    mbr::MbrError,
    mnttab::MnttabError,
    oscmds::{CommandError, MountError, UmountError},
};
use std::{io, path::PathBuf};
use thiserror::Error;

pub type UsbkeyResult<T> = Result<T, UsbkeyError>;

#[derive(Debug, Error)]
pub enum UsbkeyError {
    #[error("could not read mount configuration")]
    MountConfig(#[source] CommandError),

    #[error("could not inspect mounted filesystems")]
    Mnttab(#[source] io::Error),

    #[error("could not parse mounted filesystems")]
    MnttabParse(#[from] MnttabError),

    #[error("could not read boot record of {}", device)]
    BootRecord {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("could not determine key version of {}", device)]
    Version {
        device: String,
        #[source]
        source: MbrError,
    },

    #[error("failed to locate marker file under {:?}", mountpoint)]
    Marker {
        mountpoint: PathBuf,
        #[source]
        source:     io::Error,
    },

    #[error("could not create mountpoint directory {:?}", path)]
    Mountpoint {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not scan for pcfs")]
    Scan(#[source] CommandError),

    #[error("could not mount filesystem")]
    Mount(#[source] MountError),

    #[error("could not unmount filesystem")]
    Unmount(#[source] UmountError),

    #[error("{}", _0)]
    Missing(&'static str),

    #[error("mount timeout expired")]
    MountTimeout,

    #[error("unmount timeout expired")]
    UnmountTimeout,
}
