//! Systems booted from a ZFS pool have no key. Instead, the pool's `bootfs`
//! dataset is lofs-mounted where the key would be, so that consumers of the
//! key's contents need not care.

use crate::{
    mbr::KeyVersion,
    oscmds::{CommandError, MountError, MountRequest, Platform},
    usbkey::{mount_table, unmount_at, Checkpoint, MountStatus, UsbkeyError},
};
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootpoolError {
    #[error("cannot find bootfs for {}", pool)]
    Bootfs {
        pool:   String,
        #[source]
        source: CommandError,
    },

    #[error("could not create mountpoint directory {:?}", path)]
    Mountpoint {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot lofs mount {:?}", bootfs)]
    Mount {
        bootfs: PathBuf,
        #[source]
        source: MountError,
    },

    #[error(transparent)]
    Usbkey(#[from] UsbkeyError),
}

pub async fn get_bootfs_mount_status(
    platform: &dyn Platform,
    mountpoint: &Path,
) -> Result<MountStatus, BootpoolError> {
    debug!("fetching pool mount status for {:?}", mountpoint);

    let table = mount_table(platform).await?;
    let entry = match table.find(mountpoint) {
        Some(entry) => entry,
        None => {
            debug!("ok, nothing is mounted at {:?}", mountpoint);
            return Ok(MountStatus::new(Checkpoint::Unmounted));
        }
    };

    let mut status = if entry.fstype == "lofs" {
        MountStatus::new(Checkpoint::MarkerFile)
    } else {
        let mut status = MountStatus::new(Checkpoint::Mounted);
        status.message = fomat!("Something not lofs-mounted on " (mountpoint.display()));
        status
    };

    // Pool boots always use loader.
    status.version = Some(KeyVersion::Loader);
    status.mountpoint = Some(mountpoint.to_owned());
    status.device = Some(entry.special.clone());
    status.options = Some(entry.options.clone());

    Ok(status)
}

/// Lofs-mounts the `bootfs` dataset of `pool` at `mountpoint`, replacing
/// whatever is mounted there.
pub async fn ensure_bootfs_mounted(
    platform: &dyn Platform,
    pool: &str,
    mountpoint: &Path,
    timeout: Option<Duration>,
) -> Result<PathBuf, BootpoolError> {
    debug!("ensuring bootfs of {} is mounted at {:?}", pool, mountpoint);

    let bootfs = platform
        .pool_bootfs(pool)
        .await
        .map_err(|source| BootpoolError::Bootfs { pool: pool.to_owned(), source })?;
    let bootfs = Path::new("/").join(bootfs.trim_start_matches('/'));

    platform
        .ensure_directory(mountpoint)
        .await
        .map_err(|source| BootpoolError::Mountpoint { path: mountpoint.to_owned(), source })?;

    if let Some(entry) = mount_table(platform).await?.find(mountpoint) {
        if entry.fstype == "lofs" && Path::new(&entry.special) == bootfs {
            debug!("ok, {:?} is already mounted", bootfs);
            return Ok(mountpoint.to_owned());
        }

        debug!("replacing {} mounted at {:?}", entry.special, mountpoint);
        unmount_at(platform, mountpoint, timeout).await?;
    }

    let special = bootfs.to_string_lossy();
    let request =
        MountRequest { fstype: "lofs", special: &special, mountpoint, options: None };

    platform
        .mount(&request)
        .await
        .map_err(|source| BootpoolError::Mount { bootfs: bootfs.clone(), source })?;

    Ok(mountpoint.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{Call, FakePlatform};

    const MOUNTPOINT: &str = "/mnt/usbkey";

    #[tokio::test]
    async fn status_of_lofs_mount() {
        let platform = FakePlatform::new(vec![]);
        platform.mount_existing("/zones/boot", MOUNTPOINT, "lofs", "dev=3cd0007");

        let status = get_bootfs_mount_status(&platform, Path::new(MOUNTPOINT)).await.unwrap();
        assert!(status.ok);
        assert!(status.steps.marker_file());
        assert_eq!(status.message, "mounted");
        assert_eq!(status.version, Some(KeyVersion::Loader));
        assert_eq!(status.device.as_deref(), Some("/zones/boot"));
    }

    #[tokio::test]
    async fn status_of_something_else() {
        let platform = FakePlatform::new(vec![]);
        platform.mount_existing("/dev/dsk/c1t0d0s2", MOUNTPOINT, "pcfs", "rw,foldcase");

        let status = get_bootfs_mount_status(&platform, Path::new(MOUNTPOINT)).await.unwrap();
        assert!(!status.ok);
        assert!(status.steps.mounted());
        assert!(!status.steps.options_ok());
        assert_eq!(status.message, "Something not lofs-mounted on /mnt/usbkey");
    }

    #[tokio::test]
    async fn status_when_unmounted() {
        let platform = FakePlatform::new(vec![]);
        let status = get_bootfs_mount_status(&platform, Path::new(MOUNTPOINT)).await.unwrap();
        assert!(!status.ok);
        assert_eq!(status.message, "not mounted");
        assert_eq!(status.version, None);
    }

    #[tokio::test]
    async fn mounts_bootfs() {
        let platform = FakePlatform::new(vec![]);
        platform.set_bootpool("zones", "zones/boot");

        let mountpoint =
            ensure_bootfs_mounted(&platform, "zones", Path::new(MOUNTPOINT), None).await.unwrap();
        assert_eq!(mountpoint, PathBuf::from(MOUNTPOINT));
        assert_eq!(
            platform.mounts(),
            vec![(
                "/zones/boot".to_owned(),
                PathBuf::from(MOUNTPOINT),
                "lofs".to_owned(),
                String::new()
            )]
        );

        ensure_bootfs_mounted(&platform, "zones", Path::new(MOUNTPOINT), None).await.unwrap();
        assert_eq!(platform.mount_calls(), 1);
    }

    #[tokio::test]
    async fn replaces_other_mount() {
        let platform = FakePlatform::new(vec![]);
        platform.set_bootpool("zones", "zones/boot");
        platform.mount_existing("/dev/dsk/c1t0d0s2", MOUNTPOINT, "pcfs", "rw");

        ensure_bootfs_mounted(&platform, "zones", Path::new(MOUNTPOINT), None).await.unwrap();

        let calls = platform.calls();
        assert!(calls.contains(&Call::Umount(MOUNTPOINT.into())));
        assert_eq!(platform.mounts()[0].2, "lofs");
    }

    #[tokio::test]
    async fn unknown_pool() {
        let platform = FakePlatform::new(vec![]);
        assert!(matches!(
            ensure_bootfs_mounted(&platform, "zones", Path::new(MOUNTPOINT), None).await,
            Err(BootpoolError::Bootfs { .. })
        ));
    }
}
