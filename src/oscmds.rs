//! Everything the boot media logic needs from the operating system.
//!
//! The [`Platform`] trait covers two groups of operations: process-level
//! wrappers around illumos commands (`mount`, `umount`, `fstyp`, `diskinfo`,
//! `sync`, `zonename`, `svcprop`, `bootparams`, `zpool`), and probes of the
//! file system (the mount table, boot records, the marker file). [`Host`]
//! implements it against the running system.

use crate::{
    mbr::MBR_SIZE,
    mnttab::MNTTAB,
    options::MountOptions,
    MARKER_FILE, MOUNT_ROOT,
};
use async_trait::async_trait;
use std::{
    io,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{io::AsyncReadExt, process::Command};

const BOOTPARAMS: &str = "/usr/bin/bootparams";
const DISKINFO: &str = "/usr/bin/diskinfo";
const FSTYP: &str = "/usr/sbin/fstyp";
const MOUNT: &str = "/sbin/mount";
const SVCPROP: &str = "/bin/svcprop";
const SYNC: &str = "/usr/bin/sync";
const UMOUNT: &str = "/sbin/umount";
const ZONENAME: &str = "/usr/bin/zonename";
const ZPOOL: &str = "/usr/sbin/zpool";

const SMARTDC_FMRI: &str = "svc:/system/filesystem/smartdc:default";
const MOUNTPOINT_PROPERTY: &str = "joyentfs/usb_mountpoint";

/// fstyp(1M) diagnostics which mean that no file system was detected.
const FSTYP_IGNORE_MESSAGES: &[&str] =
    &["unknown_fstyp (cannot open device)", "unknown_fstyp (no matches)"];

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to execute {}", program)]
    Spawn {
        program: &'static str,
        #[source]
        source:  io::Error,
    },

    #[error("{} {} exited with status {:?}: {}", program, args, code, stderr)]
    Failed { program: &'static str, args: String, code: Option<i32>, stderr: String },

    #[error("invalid {} output line: {}", program, line)]
    Output { program: &'static str, line: String },
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error(
        "mount of {:?} (fstyp {}) at {:?} failed: read-only device",
        special, fstype, mountpoint
    )]
    ReadOnly { special: String, fstype: String, mountpoint: PathBuf },

    #[error("mount of {:?} (fstyp {}) at {:?} failed", special, fstype, mountpoint)]
    Failed {
        special:    String,
        fstype:     String,
        mountpoint: PathBuf,
        #[source]
        source:     CommandError,
    },
}

#[derive(Debug, Error)]
pub enum UmountError {
    #[error("umount {:?} failed, filesystem busy", _0)]
    Busy(PathBuf),

    #[error("umount {:?} failed", mountpoint)]
    Failed {
        mountpoint: PathBuf,
        #[source]
        source:     CommandError,
    },
}

/// A block device as reported by diskinfo(1M).
#[derive(Clone, Debug, PartialEq)]
pub struct Disk {
    pub kind:      String,
    pub device:    String,
    pub vendor:    String,
    pub product:   String,
    pub size:      u64,
    pub removable: bool,
    pub ssd:       bool,
}

#[derive(Clone, Copy, Debug)]
pub struct MountRequest<'a> {
    pub fstype:     &'a str,
    pub special:    &'a str,
    pub mountpoint: &'a Path,
    pub options:    Option<&'a MountOptions>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// The raw value of the SMF property naming the key's mountpoint.
    async fn mountpoint_property(&self) -> Result<String, CommandError>;

    /// The directory that mountpoint names from SMF are resolved under.
    fn mount_root(&self) -> PathBuf { PathBuf::from(MOUNT_ROOT) }

    async fn zonename(&self) -> Result<String, CommandError>;

    /// The ZFS pool the system booted from, if it did not boot from a key.
    async fn bootpool(&self) -> Result<Option<String>, CommandError>;

    /// The `bootfs` property of `pool`.
    async fn pool_bootfs(&self, pool: &str) -> Result<String, CommandError>;

    async fn diskinfo(&self) -> Result<Vec<Disk>, CommandError>;

    /// The file system type on `device`, or `None` when nothing is detected.
    async fn fstyp(&self, device: &str) -> Result<Option<String>, CommandError>;

    async fn mount(&self, request: &MountRequest<'_>) -> Result<(), MountError>;

    async fn umount(&self, mountpoint: &Path) -> Result<(), UmountError>;

    async fn sync(&self) -> Result<(), CommandError>;

    async fn read_mnttab(&self) -> io::Result<String>;

    /// Reads the first sector of `device`.
    async fn read_boot_record(&self, device: &str) -> io::Result<[u8; MBR_SIZE]>;

    /// Whether the marker file exists as a regular file under `mountpoint`.
    async fn marker_exists(&self, mountpoint: &Path) -> io::Result<bool>;

    /// Creates `path` with mode 0755 if it does not exist.
    async fn ensure_directory(&self, path: &Path) -> io::Result<()>;

    async fn sleep(&self, duration: Duration);
}

/// The running system.
#[derive(Clone, Copy, Debug, Default)]
pub struct Host;

impl Host {
    /// Invokes a program with the POSIX locale forced, so that diagnostics
    /// are presented consistently.
    fn command(program: &'static str) -> Command {
        let mut cmd = Command::new(program);

        for (name, _) in std::env::vars_os() {
            if name.to_str().map_or(false, |name| name == "LANG" || name.starts_with("LC_")) {
                cmd.env_remove(name);
            }
        }

        cascade! {
            cmd;
            ..env("LANG", "C");
            ..env("LC_ALL", "C");
            ..kill_on_drop(true);
        }
    }

    async fn run(program: &'static str, args: &[&str]) -> Result<String, CommandError> {
        debug!("executing {} {}", program, args.join(" "));

        let output = Self::command(program)
            .args(args)
            .output()
            .await
            .map_err(|source| CommandError::Spawn { program, source })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program,
                args: args.join(" "),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Platform for Host {
    async fn mountpoint_property(&self) -> Result<String, CommandError> {
        Self::run(SVCPROP, &["-p", MOUNTPOINT_PROPERTY, SMARTDC_FMRI])
            .await
            .map(|stdout| stdout.trim().to_owned())
    }

    async fn zonename(&self) -> Result<String, CommandError> {
        Self::run(ZONENAME, &[]).await.map(|stdout| stdout.trim().to_owned())
    }

    async fn bootpool(&self) -> Result<Option<String>, CommandError> {
        Self::run(BOOTPARAMS, &[]).await.map(|stdout| parse_bootpool(&stdout))
    }

    async fn pool_bootfs(&self, pool: &str) -> Result<String, CommandError> {
        Self::run(ZPOOL, &["list", "-Ho", "bootfs", pool])
            .await
            .map(|stdout| stdout.trim().to_owned())
    }

    async fn diskinfo(&self) -> Result<Vec<Disk>, CommandError> {
        let stdout = Self::run(DISKINFO, &["-Hp"]).await?;
        parse_diskinfo(&stdout)
    }

    async fn fstyp(&self, device: &str) -> Result<Option<String>, CommandError> {
        match Self::run(FSTYP, &[device]).await {
            Ok(stdout) => Ok(Some(stdout.trim().to_owned())),
            Err(CommandError::Failed { code: Some(_), ref stderr, .. })
                if FSTYP_IGNORE_MESSAGES.contains(&stderr.as_str()) =>
            {
                Ok(None)
            }
            Err(why) => Err(why),
        }
    }

    async fn mount(&self, request: &MountRequest<'_>) -> Result<(), MountError> {
        let options = request.options.map(MountOptions::to_string).filter(|opts| !opts.is_empty());
        let mountpoint = request.mountpoint.to_string_lossy();

        let mut args = vec!["-F", request.fstype];
        if let Some(ref options) = options {
            args.extend_from_slice(&["-o", options.as_str()]);
        }
        args.extend_from_slice(&[request.special, &*mountpoint]);

        Self::run(MOUNT, &args).await.map(|_| ()).map_err(|source| match source {
            CommandError::Failed { ref stderr, .. } if stderr == "mount: Read-only file system" => {
                MountError::ReadOnly {
                    special:    request.special.to_owned(),
                    fstype:     request.fstype.to_owned(),
                    mountpoint: request.mountpoint.to_owned(),
                }
            }
            source => MountError::Failed {
                special: request.special.to_owned(),
                fstype: request.fstype.to_owned(),
                mountpoint: request.mountpoint.to_owned(),
                source,
            },
        })
    }

    async fn umount(&self, mountpoint: &Path) -> Result<(), UmountError> {
        let path = mountpoint.to_string_lossy();
        let busy = fomat!("umount: " (path) " busy");

        Self::run(UMOUNT, &[&*path]).await.map(|_| ()).map_err(|source| match source {
            CommandError::Failed { code: Some(1), ref stderr, .. } if *stderr == busy => {
                UmountError::Busy(mountpoint.to_owned())
            }
            source => UmountError::Failed { mountpoint: mountpoint.to_owned(), source },
        })
    }

    async fn sync(&self) -> Result<(), CommandError> { Self::run(SYNC, &[]).await.map(|_| ()) }

    async fn read_mnttab(&self) -> io::Result<String> { tokio::fs::read_to_string(MNTTAB).await }

    async fn read_boot_record(&self, device: &str) -> io::Result<[u8; MBR_SIZE]> {
        let mut buf = [0u8; MBR_SIZE];
        let mut file = tokio::fs::File::open(device).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn marker_exists(&self, mountpoint: &Path) -> io::Result<bool> {
        match tokio::fs::symlink_metadata(mountpoint.join(MARKER_FILE)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(why) if why.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(why) => Err(why),
        }
    }

    async fn ensure_directory(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{:?} is not a directory", path),
            )),
            Err(why) if why.kind() == io::ErrorKind::NotFound => {
                info!("directory {:?} does not exist; creating", path);
                let path = path.to_owned();
                tokio::task::spawn_blocking(move || {
                    std::fs::DirBuilder::new().mode(0o755).create(&path)
                })
                .await
                .map_err(|why| io::Error::new(io::ErrorKind::Other, why.to_string()))?
            }
            Err(why) => Err(why),
        }
    }

    async fn sleep(&self, duration: Duration) { tokio::time::sleep(duration).await }
}

fn parse_bootpool(bootparams: &str) -> Option<String> {
    bootparams
        .lines()
        .find_map(|line| line.strip_prefix("triton_bootpool="))
        .map(str::trim)
        .filter(|pool| !pool.is_empty())
        .map(String::from)
}

fn parse_diskinfo(stdout: &str) -> Result<Vec<Disk>, CommandError> {
    let invalid = |line: &str| CommandError::Output { program: DISKINFO, line: line.to_owned() };

    let yes_no = |field: &str, line: &str| match field {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(invalid(line)),
    };

    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields = line.split('\t').collect::<Vec<_>>();
            if fields.len() != 7 {
                return Err(invalid(line));
            }

            Ok(Disk {
                kind:      fields[0].to_owned(),
                device:    fields[1].to_owned(),
                vendor:    fields[2].to_owned(),
                product:   fields[3].to_owned(),
                size:      fields[4].parse::<u64>().map_err(|_| invalid(line))?,
                removable: yes_no(fields[5], line)?,
                ssd:       yes_no(fields[6], line)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diskinfo_lines() {
        let stdout = "USB\tc1t0d0\tSanDisk\tCruzer\t8004304896\tyes\tno\n\
                      SCSI\tc2t0d0\tATA\tINTEL SSDSC2BB48\t480103981056\tno\tyes\n";

        let disks = parse_diskinfo(stdout).unwrap();
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].device, "c1t0d0");
        assert!(disks[0].removable);
        assert!(!disks[0].ssd);
        assert_eq!(disks[1].product, "INTEL SSDSC2BB48");
        assert_eq!(disks[1].size, 480103981056);
        assert!(disks[1].ssd);
    }

    #[test]
    fn diskinfo_rejects_garbage() {
        assert!(parse_diskinfo("USB\tc1t0d0\tSanDisk\n").is_err());
        assert!(parse_diskinfo("USB\tc1t0d0\tSanDisk\tCruzer\t8004304896\tmaybe\tno\n").is_err());
    }

    #[test]
    fn bootpool_from_bootparams() {
        let params = "console=text\ntriton_bootpool=zones\nsmt_enabled=true\n";
        assert_eq!(parse_bootpool(params), Some("zones".into()));
        assert_eq!(parse_bootpool("console=text\ntriton_bootpool=\n"), None);
        assert_eq!(parse_bootpool("console=text\n"), None);
    }
}
