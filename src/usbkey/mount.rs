use super::{
    status_of, timeout_has_passed, unmount_once, MountStatus, MountTarget, UsbkeyError,
    UsbkeyResult,
};
use crate::{
    mbr::BootRecord,
    options::MountOptions,
    oscmds::{MountError, MountRequest, Platform},
};
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

const NO_PCFS_DEVICES: &str = "no pcfs devices found";
const NO_SUITABLE_DEVICES: &str = "no suitable devices found for usbkey mount";

/// The pcfs slices which may hold the key, in the order diskinfo listed
/// their disks. Devices are removed as they are disqualified.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidates(Vec<String>);

impl Candidates {
    pub fn first(&self) -> Option<&str> { self.0.first().map(String::as_str) }

    pub fn remove(&mut self, device: &str) { self.0.retain(|candidate| candidate != device); }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn as_slice(&self) -> &[String] { &self.0 }
}

/// Finds every disk whose boot record identifies a key, and whose key
/// partition holds a pcfs file system. Disks that cannot be read or carry an
/// unrecognised boot record are skipped.
pub async fn locate_pcfs_devices(platform: &dyn Platform) -> UsbkeyResult<Candidates> {
    let disks = platform.diskinfo().await.map_err(UsbkeyError::Scan)?;
    let mut candidates = Vec::new();

    for disk in disks {
        let whole = fomat!("/dev/dsk/" (disk.device) "p0");

        let record = match platform.read_boot_record(&whole).await {
            Ok(record) => record,
            Err(why) => {
                debug!("skipping {}: {}", whole, why);
                continue;
            }
        };

        let version = match BootRecord::parse(&record).map(BootRecord::version) {
            Ok(Some(version)) => version,
            Ok(None) => {
                debug!("skipping {}: no boot record", whole);
                continue;
            }
            Err(why) => {
                debug!("skipping {}: {}", whole, why);
                continue;
            }
        };

        let special = fomat!("/dev/dsk/" (disk.device) (version.partition_suffix()));
        match platform.fstyp(&special).await.map_err(UsbkeyError::Scan)? {
            Some(ref fstype) if fstype == "pcfs" => {
                debug!("found version {} key candidate {}", version, special);
                candidates.push(special);
            }
            fstype => debug!("skipping {}: file system is {:?}", special, fstype),
        }
    }

    Ok(Candidates(candidates))
}

#[derive(Clone, Debug, Default)]
pub struct EnsureMounted {
    /// Give up if the key is not mounted within this time.
    pub timeout:           Option<Duration>,
    /// A system without a key is not an error.
    pub ignore_missing:    bool,
    /// Mount with these options on the alternate mountpoint instead.
    pub alt_mount_options: Option<MountOptions>,
}

enum State {
    /// Prepare the mountpoint and scan for candidate devices.
    Idle,
    /// Re-read the mount status and decide what to do next.
    Probing,
    Mounting(String),
    Unmounting(PathBuf),
    /// Mounted correctly, but without the marker file.
    Disqualifying { mountpoint: PathBuf, device: String },
    Succeeded(PathBuf),
    Failed(UsbkeyError),
}

impl State {
    fn after_probe(status: MountStatus, candidates: &Candidates) -> Self {
        let steps = status.steps;

        let mountpoint = match status.mountpoint {
            Some(mountpoint) => mountpoint,
            None => {
                return match candidates.first() {
                    Some(device) => State::Mounting(device.to_owned()),
                    None => State::Failed(UsbkeyError::Missing(NO_SUITABLE_DEVICES)),
                };
            }
        };

        if !steps.mounted() {
            debug!("key is mounted at {:?} instead", mountpoint);
            State::Unmounting(mountpoint)
        } else if !steps.options_ok() {
            State::Unmounting(mountpoint)
        } else if !steps.marker_file() {
            State::Disqualifying { mountpoint, device: status.device.unwrap_or_default() }
        } else {
            State::Succeeded(mountpoint)
        }
    }
}

/// Mounts the key at its expected mountpoint with the expected options,
/// returning the mountpoint. Returns `None` when no key is present and
/// `ignore_missing` was requested.
///
/// Every mount or unmount is followed by a fresh status probe before the next
/// action, so changes made behind our back are picked up.
pub async fn ensure_usbkey_mounted(
    platform: &dyn Platform,
    request: &EnsureMounted,
) -> UsbkeyResult<Option<PathBuf>> {
    debug!("ensuring usb key is mounted");

    let target = MountTarget::resolve(platform, request.alt_mount_options.as_ref()).await?;
    let mut candidates = Candidates::default();
    let mut state = State::Idle;
    let mut epoch = Instant::now();

    loop {
        state = match state {
            State::Idle => {
                platform.ensure_directory(&target.mountpoint).await.map_err(|source| {
                    UsbkeyError::Mountpoint { path: target.mountpoint.clone(), source }
                })?;

                candidates = locate_pcfs_devices(platform).await?;
                epoch = Instant::now();

                if candidates.is_empty() {
                    State::Failed(UsbkeyError::Missing(NO_PCFS_DEVICES))
                } else {
                    State::Probing
                }
            }

            State::Probing => {
                if timeout_has_passed(epoch, request.timeout) {
                    return Err(UsbkeyError::MountTimeout);
                }

                State::after_probe(status_of(platform, &target).await?, &candidates)
            }

            State::Mounting(device) => {
                debug!("mounting {} at {:?}", device, target.mountpoint);

                let mount = MountRequest {
                    fstype:     "pcfs",
                    special:    &device,
                    mountpoint: &target.mountpoint,
                    options:    Some(&target.options),
                };

                match platform.mount(&mount).await {
                    Ok(()) => (),
                    Err(MountError::ReadOnly { .. }) => {
                        info!("{} is read-only; trying another device", device);
                        candidates.remove(&device);
                    }
                    Err(why) => return Err(UsbkeyError::Mount(why)),
                }

                State::Probing
            }

            State::Unmounting(mountpoint) => {
                unmount_once(platform, &mountpoint).await?;
                State::Probing
            }

            State::Disqualifying { mountpoint, device } => {
                info!("{} has no marker file; trying another device", device);
                candidates.remove(&device);
                unmount_once(platform, &mountpoint).await?;
                State::Probing
            }

            State::Succeeded(mountpoint) => {
                debug!("ok, usb key is mounted at {:?}", mountpoint);
                return Ok(Some(mountpoint));
            }

            State::Failed(UsbkeyError::Missing(message)) if request.ignore_missing => {
                debug!("{}; ignoring", message);
                return Ok(None);
            }

            State::Failed(why) => return Err(why),
        };
    }
}
