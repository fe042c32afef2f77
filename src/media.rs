use crate::{
    bootpool::{ensure_bootfs_mounted, get_bootfs_mount_status, BootpoolError},
    bootvars::{self, BootVarError},
    mbr::KeyVersion,
    options::MountOptions,
    oscmds::Platform,
    update::{Action, Update, UpdateError},
    usbkey::{
        default_mountpoint, ensure_usbkey_mounted, ensure_usbkey_unmounted,
        get_usbkey_mount_status, unmount_at, EnsureMounted, MountStatus, UsbkeyError,
    },
    MOUNT_TIMEOUT, UNMOUNT_TIMEOUT,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("this command must be used in the global zone")]
    NotGlobalZone,

    #[error(transparent)]
    Usbkey(#[from] UsbkeyError),

    #[error(transparent)]
    Bootpool(#[from] BootpoolError),

    #[error("boot media not found")]
    Missing,

    #[error("boot media mounted at {:?} has no recognised version", _0)]
    UnknownVersion(PathBuf),

    #[error(transparent)]
    BootVar(#[from] BootVarError),

    #[error("update of boot media failed")]
    Update {
        /// What was completed before the failure.
        actions: Vec<Action>,
        #[source]
        source:  UpdateError,
    },
}

/// Refuses to continue in a non-global zone. When the zone name cannot be
/// determined, the global zone is assumed.
pub async fn ensure_global_zone(platform: &dyn Platform) -> Result<(), MediaError> {
    match platform.zonename().await {
        Ok(ref zone) if zone != "global" => Err(MediaError::NotGlobalZone),
        Ok(_) => Ok(()),
        Err(why) => {
            warn!("could not determine zone name: {}", why);
            Ok(())
        }
    }
}

/// Media mounted on behalf of an operation.
struct Mounted {
    mountpoint: PathBuf,
    version:    Option<KeyVersion>,
    /// Left mounted when the operation completes.
    already:    bool,
}

/// What the system boots from.
#[derive(Clone, Debug, PartialEq)]
pub enum Media {
    Usbkey,
    /// The `bootfs` of this ZFS pool.
    Bootpool(String),
}

impl Media {
    /// Falls back to the USB key when the boot parameters cannot be read.
    pub async fn detect(platform: &dyn Platform, force_usb: bool) -> Self {
        if force_usb {
            return Media::Usbkey;
        }

        let media = match platform.bootpool().await {
            Ok(Some(pool)) => Media::Bootpool(pool),
            Ok(None) => Media::Usbkey,
            Err(why) => {
                warn!("could not read boot parameters; assuming usb key: {}", why);
                Media::Usbkey
            }
        };

        debug!("boot media: {:?}", media);
        media
    }

    pub async fn status(
        &self,
        platform: &dyn Platform,
        alt_mount_options: Option<&MountOptions>,
    ) -> Result<MountStatus, MediaError> {
        match self {
            Media::Usbkey => Ok(get_usbkey_mount_status(platform, alt_mount_options).await?),
            Media::Bootpool(_) => {
                let mountpoint = default_mountpoint(platform).await?;
                Ok(get_bootfs_mount_status(platform, &mountpoint).await?)
            }
        }
    }

    pub async fn mount(
        &self,
        platform: &dyn Platform,
        request: &EnsureMounted,
    ) -> Result<Option<PathBuf>, MediaError> {
        match self {
            Media::Usbkey => Ok(ensure_usbkey_mounted(platform, request).await?),
            Media::Bootpool(pool) => {
                if request.alt_mount_options.is_some() {
                    debug!("ignoring alternate mount options for bootfs");
                }

                let mountpoint = default_mountpoint(platform).await?;
                ensure_bootfs_mounted(platform, pool, &mountpoint, request.timeout)
                    .await
                    .map(Some)
                    .map_err(MediaError::from)
            }
        }
    }

    pub async fn unmount(
        &self,
        platform: &dyn Platform,
        timeout: Option<Duration>,
    ) -> Result<(), MediaError> {
        match self {
            Media::Usbkey => Ok(ensure_usbkey_unmounted(platform, timeout).await?),
            Media::Bootpool(_) => {
                let mountpoint = default_mountpoint(platform).await?;
                Ok(unmount_at(platform, &mountpoint, timeout).await?)
            }
        }
    }

    pub async fn get_variable(
        &self,
        platform: &dyn Platform,
        name: &str,
    ) -> Result<Option<String>, MediaError> {
        let mounted = self.acquire(platform, false).await?.ok_or(MediaError::Missing)?;

        let result = mounted
            .version
            .ok_or_else(|| MediaError::UnknownVersion(mounted.mountpoint.clone()))
            .and_then(|version| {
                bootvars::get_variable(&mounted.mountpoint, version, name).map_err(MediaError::from)
            });

        self.release(platform, &mounted).await?;
        result
    }

    pub async fn set_variable(
        &self,
        platform: &dyn Platform,
        name: &str,
        value: &str,
    ) -> Result<(), MediaError> {
        let mounted = self.acquire(platform, false).await?.ok_or(MediaError::Missing)?;

        let result = mounted
            .version
            .ok_or_else(|| MediaError::UnknownVersion(mounted.mountpoint.clone()))
            .and_then(|version| {
                bootvars::set_variable(&mounted.mountpoint, version, name, value)
                    .map_err(MediaError::from)
            });

        self.release(platform, &mounted).await?;
        result
    }

    /// Copies new and changed files from `source` onto the media. Returns
    /// `None` if there is no media and `ignore_missing` was requested. A
    /// failed update leaves the media mounted.
    pub async fn update(
        &self,
        platform: &dyn Platform,
        source: &Path,
        dryrun: bool,
        ignore_missing: bool,
    ) -> Result<Option<Update>, MediaError> {
        let mounted = match self.acquire(platform, ignore_missing).await? {
            Some(mounted) => mounted,
            None => {
                info!("no boot media found; skipping update");
                return Ok(None);
            }
        };

        let mut update = Update::new(source, &mounted.mountpoint, dryrun);
        if let Err(source) = update.run(platform).await {
            return Err(MediaError::Update { actions: update.actions().to_vec(), source });
        }

        self.release(platform, &mounted).await?;
        Ok(Some(update))
    }

    async fn acquire(
        &self,
        platform: &dyn Platform,
        ignore_missing: bool,
    ) -> Result<Option<Mounted>, MediaError> {
        let status = self.status(platform, None).await?;
        if status.ok {
            if let Some(mountpoint) = status.mountpoint {
                debug!("boot media already mounted at {:?}", mountpoint);
                return Ok(Some(Mounted { mountpoint, version: status.version, already: true }));
            }
        }

        let request = EnsureMounted {
            timeout: Some(MOUNT_TIMEOUT),
            ignore_missing,
            alt_mount_options: None,
        };

        let mountpoint = match self.mount(platform, &request).await? {
            Some(mountpoint) => mountpoint,
            None => return Ok(None),
        };

        let version = self.status(platform, None).await?.version;
        Ok(Some(Mounted { mountpoint, version, already: false }))
    }

    async fn release(&self, platform: &dyn Platform, mounted: &Mounted) -> Result<(), MediaError> {
        if mounted.already {
            return Ok(());
        }

        self.unmount(platform, Some(UNMOUNT_TIMEOUT)).await
    }
}
