//! An in-memory [`Platform`] for exercising the mount logic without disks.

use crate::{
    mbr::{self, MBR_SIZE},
    oscmds::{CommandError, Disk, MountError, MountRequest, Platform, UmountError},
};
use async_trait::async_trait;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

const SIGNATURE: u16 = 0xaa55;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Mount { special: String, mountpoint: PathBuf },
    Umount(PathBuf),
    Sleep(Duration),
    Sync,
    EnsureDirectory(PathBuf),
}

#[derive(Clone, Debug)]
pub struct FakeDevice {
    name:          String,
    record:        [u8; MBR_SIZE],
    fstype:        Option<String>,
    read_only:     bool,
    failing_mount: bool,
    marker:        bool,
}

impl FakeDevice {
    fn new(name: &str, record: [u8; MBR_SIZE]) -> Self {
        FakeDevice {
            name: name.to_owned(),
            record,
            fstype: Some("pcfs".into()),
            read_only: false,
            failing_mount: false,
            marker: true,
        }
    }

    pub fn loader(name: &str) -> Self { Self::new(name, mbr::record((0, 0), 2, SIGNATURE)) }

    pub fn legacy(name: &str) -> Self { Self::new(name, mbr::record((3, 2), 0, SIGNATURE)) }

    /// Has a boot signature, but neither a grub nor a loader version.
    pub fn unrecognised(name: &str) -> Self { Self::new(name, mbr::record((1, 1), 1, SIGNATURE)) }

    pub fn blank(name: &str) -> Self { Self::new(name, [0u8; MBR_SIZE]) }

    pub fn with_fstype(mut self, fstype: Option<&str>) -> Self {
        self.fstype = fstype.map(String::from);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn failing_mount(mut self) -> Self {
        self.failing_mount = true;
        self
    }

    pub fn without_marker(mut self) -> Self {
        self.marker = false;
        self
    }

    fn whole_disk(&self) -> String { fomat!("/dev/dsk/" (self.name) "p0") }

    /// Whether `special` is the pcfs partition or slice of this disk.
    fn holds(&self, special: &str) -> bool {
        special
            .strip_prefix("/dev/dsk/")
            .and_then(|rest| rest.strip_prefix(self.name.as_str()))
            .map_or(false, |suffix| suffix == "p1" || suffix == "s2")
    }
}

#[derive(Clone, Debug, PartialEq)]
struct FakeMount {
    special:    String,
    mountpoint: PathBuf,
    fstype:     String,
    options:    String,
}

#[derive(Debug, Default)]
struct FakeState {
    devices:   Vec<FakeDevice>,
    mounts:    Vec<FakeMount>,
    busy:      usize,
    property:  String,
    zone:      String,
    bootpool:  Option<String>,
    bootfs:    Option<String>,
    /// `bootparams` fails when set.
    no_params: bool,
    root:      PathBuf,
    calls:     Vec<Call>,
}

#[derive(Debug)]
pub struct FakePlatform(Mutex<FakeState>);

impl FakePlatform {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        FakePlatform(Mutex::new(FakeState {
            devices,
            zone: "global".into(),
            root: PathBuf::from(crate::MOUNT_ROOT),
            ..FakeState::default()
        }))
    }

    fn with<T>(&self, func: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.0.lock().unwrap();
        func(&mut *state)
    }

    pub fn mount_existing<P: AsRef<Path>>(
        &self,
        special: &str,
        mountpoint: P,
        fstype: &str,
        options: &str,
    ) {
        self.with(|state| {
            state.mounts.push(FakeMount {
                special:    special.into(),
                mountpoint: mountpoint.as_ref().to_owned(),
                fstype:     fstype.into(),
                options:    options.into(),
            })
        });
    }

    /// The next `count` unmounts fail with a busy file system.
    pub fn set_busy(&self, count: usize) { self.with(|state| state.busy = count); }

    pub fn set_property(&self, value: &str) { self.with(|state| state.property = value.into()); }

    pub fn set_zone(&self, zone: &str) { self.with(|state| state.zone = zone.into()); }

    /// Resolve mountpoints under `root` rather than `/mnt`.
    pub fn set_mount_root<P: AsRef<Path>>(&self, root: P) {
        let root = root.as_ref().to_owned();
        self.with(|state| state.root = root);
    }

    pub fn fail_bootparams(&self) { self.with(|state| state.no_params = true); }

    pub fn set_bootpool(&self, pool: &str, bootfs: &str) {
        self.with(|state| {
            state.bootpool = Some(pool.into());
            state.bootfs = Some(bootfs.into());
        });
    }

    pub fn calls(&self) -> Vec<Call> { self.with(|state| state.calls.clone()) }

    pub fn mount_calls(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, Call::Mount { .. })).count()
    }

    pub fn umount_calls(&self) -> usize {
        self.calls().iter().filter(|call| matches!(call, Call::Umount(_))).count()
    }

    /// Current mounts as `(special, mountpoint, fstype, options)`.
    pub fn mounts(&self) -> Vec<(String, PathBuf, String, String)> {
        self.with(|state| {
            state
                .mounts
                .iter()
                .map(|m| {
                    (m.special.clone(), m.mountpoint.clone(), m.fstype.clone(), m.options.clone())
                })
                .collect()
        })
    }

    pub fn is_mounted<P: AsRef<Path>>(&self, mountpoint: P) -> bool {
        let mountpoint = mountpoint.as_ref();
        self.with(|state| state.mounts.iter().any(|m| m.mountpoint == mountpoint))
    }

    fn record(&self, call: Call) { self.with(|state| state.calls.push(call)); }
}

fn failed(program: &'static str, stderr: &str) -> CommandError {
    CommandError::Failed { program, args: String::new(), code: Some(1), stderr: stderr.into() }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn mountpoint_property(&self) -> Result<String, CommandError> {
        Ok(self.with(|state| state.property.clone()))
    }

    fn mount_root(&self) -> PathBuf { self.with(|state| state.root.clone()) }

    async fn zonename(&self) -> Result<String, CommandError> {
        Ok(self.with(|state| state.zone.clone()))
    }

    async fn bootpool(&self) -> Result<Option<String>, CommandError> {
        self.with(|state| {
            if state.no_params {
                Err(failed("/usr/bin/bootparams", "bootparams: cannot open /dev/openprom"))
            } else {
                Ok(state.bootpool.clone())
            }
        })
    }

    async fn pool_bootfs(&self, pool: &str) -> Result<String, CommandError> {
        self.with(|state| state.bootfs.clone()).ok_or_else(|| {
            failed("/usr/sbin/zpool", &fomat!("cannot open '" (pool) "': no such pool"))
        })
    }

    async fn diskinfo(&self) -> Result<Vec<Disk>, CommandError> {
        Ok(self.with(|state| {
            state
                .devices
                .iter()
                .map(|device| Disk {
                    kind:      "USB".into(),
                    device:    device.name.clone(),
                    vendor:    "SanDisk".into(),
                    product:   "Cruzer".into(),
                    size:      8_004_304_896,
                    removable: true,
                    ssd:       false,
                })
                .collect()
        }))
    }

    async fn fstyp(&self, device: &str) -> Result<Option<String>, CommandError> {
        Ok(self.with(|state| {
            state.devices.iter().find(|d| d.holds(device)).and_then(|d| d.fstype.clone())
        }))
    }

    async fn mount(&self, request: &MountRequest<'_>) -> Result<(), MountError> {
        self.record(Call::Mount {
            special:    request.special.to_owned(),
            mountpoint: request.mountpoint.to_owned(),
        });

        self.with(|state| {
            let device = state.devices.iter().find(|d| d.holds(request.special));

            if device.map_or(false, |d| d.read_only) {
                return Err(MountError::ReadOnly {
                    special:    request.special.to_owned(),
                    fstype:     request.fstype.to_owned(),
                    mountpoint: request.mountpoint.to_owned(),
                });
            }

            let in_use = state.mounts.iter().any(|m| m.mountpoint == request.mountpoint);
            if in_use || device.map_or(false, |d| d.failing_mount) {
                return Err(MountError::Failed {
                    special:    request.special.to_owned(),
                    fstype:     request.fstype.to_owned(),
                    mountpoint: request.mountpoint.to_owned(),
                    source:     failed("/sbin/mount", "mount: device busy"),
                });
            }

            state.mounts.push(FakeMount {
                special:    request.special.to_owned(),
                mountpoint: request.mountpoint.to_owned(),
                fstype:     request.fstype.to_owned(),
                options:    request.options.map(ToString::to_string).unwrap_or_default(),
            });

            Ok(())
        })
    }

    async fn umount(&self, mountpoint: &Path) -> Result<(), UmountError> {
        self.record(Call::Umount(mountpoint.to_owned()));

        self.with(|state| {
            if state.busy > 0 {
                state.busy -= 1;
                return Err(UmountError::Busy(mountpoint.to_owned()));
            }

            match state.mounts.iter().position(|m| m.mountpoint == mountpoint) {
                Some(pos) => {
                    state.mounts.remove(pos);
                    Ok(())
                }
                None => Err(UmountError::Failed {
                    mountpoint: mountpoint.to_owned(),
                    source:     failed("/sbin/umount", "umount: warning: not in mnttab"),
                }),
            }
        })
    }

    async fn sync(&self) -> Result<(), CommandError> {
        self.record(Call::Sync);
        Ok(())
    }

    async fn read_mnttab(&self) -> io::Result<String> {
        Ok(self.with(|state| {
            state.mounts.iter().fold(String::new(), |mut table, m| {
                table.push_str(&fomat!(
                    (m.special) "\t" (m.mountpoint.display()) "\t" (m.fstype) "\t"
                    (m.options) "\t" "1589300000\n"
                ));
                table
            })
        }))
    }

    async fn read_boot_record(&self, device: &str) -> io::Result<[u8; MBR_SIZE]> {
        self.with(|state| {
            state
                .devices
                .iter()
                .find(|d| d.whole_disk() == device)
                .map(|d| d.record)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such device"))
        })
    }

    async fn marker_exists(&self, mountpoint: &Path) -> io::Result<bool> {
        Ok(self.with(|state| {
            state
                .mounts
                .iter()
                .find(|m| m.mountpoint == mountpoint)
                .and_then(|m| state.devices.iter().find(|d| d.holds(&m.special)))
                .map_or(false, |d| d.marker)
        }))
    }

    async fn ensure_directory(&self, path: &Path) -> io::Result<()> {
        self.record(Call::EnsureDirectory(path.to_owned()));
        Ok(())
    }

    async fn sleep(&self, duration: Duration) {
        self.record(Call::Sleep(duration));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
