mod errors;
mod mount;

pub use self::{
    errors::{UsbkeyError, UsbkeyResult},
    mount::{ensure_usbkey_mounted, locate_pcfs_devices, Candidates, EnsureMounted},
};

use crate::{
    mbr::{BootRecord, KeyVersion},
    mnttab::MountTable,
    options::MountOptions,
    oscmds::{Platform, UmountError},
    DEFAULT_MOUNTPOINT_NAME,
};
use serde_derive::Serialize;
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

/// Delay before retrying an unmount of a busy file system.
const BUSY_BACKOFF: Duration = Duration::from_secs(1);

/// How far the inspection of a mount got. Each checkpoint implies the ones
/// before it.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum Checkpoint {
    Unmounted,
    Mounted,
    OptionsOk,
    MarkerFile,
}

impl From<Checkpoint> for &'static str {
    fn from(checkpoint: Checkpoint) -> Self {
        match checkpoint {
            Checkpoint::Unmounted => "not mounted",
            Checkpoint::Mounted => "mounted, but with incorrect options",
            Checkpoint::OptionsOk => "mounted, but marker file not found",
            Checkpoint::MarkerFile => "mounted",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Steps {
    mounted:     bool,
    options_ok:  bool,
    marker_file: bool,
}

impl Steps {
    pub fn mounted(self) -> bool { self.mounted }

    pub fn options_ok(self) -> bool { self.options_ok }

    pub fn marker_file(self) -> bool { self.marker_file }
}

impl From<Checkpoint> for Steps {
    fn from(checkpoint: Checkpoint) -> Self {
        Steps {
            mounted:     checkpoint >= Checkpoint::Mounted,
            options_ok:  checkpoint >= Checkpoint::OptionsOk,
            marker_file: checkpoint >= Checkpoint::MarkerFile,
        }
    }
}

/// The state of the boot media compared against where and how it should be
/// mounted.
#[derive(Clone, Debug, Serialize)]
pub struct MountStatus {
    pub mountpoint: Option<PathBuf>,
    pub device:     Option<String>,
    pub version:    Option<KeyVersion>,
    pub options:    Option<MountOptions>,
    pub steps:      Steps,
    pub ok:         bool,
    pub message:    String,
}

impl MountStatus {
    pub fn new(checkpoint: Checkpoint) -> Self {
        MountStatus {
            mountpoint: None,
            device:     None,
            version:    None,
            options:    None,
            steps:      Steps::from(checkpoint),
            ok:         checkpoint == Checkpoint::MarkerFile,
            message:    <&'static str>::from(checkpoint).to_owned(),
        }
    }
}

/// Where the key is expected to be mounted, and with which options.
#[derive(Clone, Debug)]
pub struct MountTarget {
    pub mountpoint: PathBuf,
    pub options:    MountOptions,
    /// The mountpoint used by the other option set, probed for diagnostics.
    pub other:      PathBuf,
}

impl MountTarget {
    /// Non-default options are mounted on the alternate mountpoint, so that
    /// consumers of the default mountpoint never see them.
    pub async fn resolve(
        platform: &dyn Platform,
        alt_mount_options: Option<&MountOptions>,
    ) -> UsbkeyResult<Self> {
        let default = default_mountpoint(platform).await?;
        let alternate = alternate_mountpoint(&default);
        debug!("configured usbkey mountpoint: {:?}", default);

        let target = match alt_mount_options.filter(|options| !options.is_empty()) {
            Some(overrides) => MountTarget {
                mountpoint: alternate,
                options:    MountOptions::defaults().overlay(overrides),
                other:      default,
            },
            None => MountTarget {
                mountpoint: default,
                options:    MountOptions::defaults(),
                other:      alternate,
            },
        };

        Ok(target)
    }
}

/// The mountpoint is configured as a property on the `filesystem/smartdc`
/// SMF service.
pub async fn default_mountpoint(platform: &dyn Platform) -> UsbkeyResult<PathBuf> {
    platform
        .mountpoint_property()
        .await
        .map(|value| mountpoint_from_property(&platform.mount_root(), &value))
        .map_err(UsbkeyError::MountConfig)
}

fn mountpoint_from_property(root: &Path, value: &str) -> PathBuf {
    match value.trim().trim_start_matches('/') {
        "" => root.join(DEFAULT_MOUNTPOINT_NAME),
        name => root.join(name),
    }
}

fn alternate_mountpoint(default: &Path) -> PathBuf {
    let mut path = default.as_os_str().to_owned();
    path.push("-alt");
    PathBuf::from(path)
}

pub async fn get_usbkey_mount_status(
    platform: &dyn Platform,
    alt_mount_options: Option<&MountOptions>,
) -> UsbkeyResult<MountStatus> {
    debug!("determining usb key mount status");
    let target = MountTarget::resolve(platform, alt_mount_options).await?;
    status_of(platform, &target).await
}

pub(crate) async fn mount_table(platform: &dyn Platform) -> UsbkeyResult<MountTable> {
    let contents = platform.read_mnttab().await.map_err(UsbkeyError::Mnttab)?;
    Ok(MountTable::parse(&contents)?)
}

pub(crate) async fn status_of(
    platform: &dyn Platform,
    target: &MountTarget,
) -> UsbkeyResult<MountStatus> {
    debug!("fetching mount information for {:?}", target.mountpoint);
    let table = mount_table(platform).await?;

    let entry = match table.find(&target.mountpoint) {
        Some(entry) => entry,
        None => {
            debug!("{:?} is not mounted", target.mountpoint);
            let mut status = MountStatus::new(Checkpoint::Unmounted);

            if let Some(entry) = table.find(&target.other) {
                debug!("{} is mounted at {:?} instead", entry.special, entry.mountpoint);
                status.mountpoint = Some(entry.mountpoint.clone());
                status.device = Some(entry.special.clone());
                status.version =
                    key_version(platform, &entry.special).await.unwrap_or_else(|why| {
                        debug!("ignoring version of {}: {}", entry.special, why);
                        None
                    });
            }

            return Ok(status);
        }
    };

    let version = key_version(platform, &entry.special).await?;

    let mut checkpoint = Checkpoint::Mounted;
    if entry.fstype == "pcfs" && target.options.equivalent(&entry.options) {
        checkpoint = Checkpoint::OptionsOk;

        debug!("checking marker file");
        let marker = platform.marker_exists(&entry.mountpoint).await.map_err(|source| {
            UsbkeyError::Marker { mountpoint: entry.mountpoint.clone(), source }
        })?;

        if marker {
            checkpoint = Checkpoint::MarkerFile;
        }
    } else {
        debug!(
            "{:?} is mounted as {}, but with incorrect options: {}",
            entry.mountpoint, entry.fstype, entry.options
        );
    }

    let mut status = MountStatus::new(checkpoint);
    status.mountpoint = Some(entry.mountpoint.clone());
    status.device = Some(entry.special.clone());
    status.version = version;
    status.options = Some(entry.options.clone());

    Ok(status)
}

/// Reads the boot record of the disk holding `special`. Specials which are
/// not disk slices or partitions have no version.
pub(crate) async fn key_version(
    platform: &dyn Platform,
    special: &str,
) -> UsbkeyResult<Option<KeyVersion>> {
    let disk = match whole_disk(special) {
        Some(disk) => disk,
        None => return Ok(None),
    };

    let record = platform
        .read_boot_record(&disk)
        .await
        .map_err(|source| UsbkeyError::BootRecord { device: disk.clone(), source })?;

    BootRecord::parse(&record)
        .map(BootRecord::version)
        .map_err(|source| UsbkeyError::Version { device: disk, source })
}

/// `/dev/dsk/c1t0d0s2` and `/dev/dsk/c1t0d0p1` both live on `/dev/dsk/c1t0d0p0`.
fn whole_disk(special: &str) -> Option<String> {
    if !special.starts_with("/dev/dsk/") {
        return None;
    }

    let trimmed = special.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() == special.len() {
        return None;
    }

    let base = trimmed.strip_suffix('p').or_else(|| trimmed.strip_suffix('s'))?;
    Some(fomat!((base) "p0"))
}

pub(crate) fn timeout_has_passed(epoch: Instant, timeout: Option<Duration>) -> bool {
    timeout.map_or(false, |timeout| epoch.elapsed() > timeout)
}

/// Unmounts the key from wherever a status probe last saw it.
pub async fn ensure_usbkey_unmounted(
    platform: &dyn Platform,
    timeout: Option<Duration>,
) -> UsbkeyResult<()> {
    debug!("ensuring usb key is not mounted");

    match get_usbkey_mount_status(platform, None).await?.mountpoint {
        Some(mountpoint) => unmount_at(platform, &mountpoint, timeout).await,
        None => {
            debug!("ok, usb key is not mounted");
            Ok(())
        }
    }
}

/// Unmounts `mountpoint` until the mount table no longer lists it.
pub(crate) async fn unmount_at(
    platform: &dyn Platform,
    mountpoint: &Path,
    timeout: Option<Duration>,
) -> UsbkeyResult<()> {
    let epoch = Instant::now();

    loop {
        if timeout_has_passed(epoch, timeout) {
            return Err(UsbkeyError::UnmountTimeout);
        }

        if mount_table(platform).await?.find(mountpoint).is_none() {
            debug!("ok, {:?} is not mounted", mountpoint);
            return Ok(());
        }

        unmount_once(platform, mountpoint).await?;
    }
}

/// Issues a single unmount. A busy file system is not an error: the caller
/// is expected to probe again after the backoff.
pub(crate) async fn unmount_once(platform: &dyn Platform, mountpoint: &Path) -> UsbkeyResult<()> {
    debug!("unmounting {:?}", mountpoint);
    match platform.umount(mountpoint).await {
        Ok(()) => Ok(()),
        Err(UmountError::Busy(_)) => {
            debug!("filesystem busy, retrying");
            platform.sleep(BUSY_BACKOFF).await;
            Ok(())
        }
        Err(why) => Err(UsbkeyError::Unmount(why)),
    }
}
