#![deny(clippy::all)]

#[macro_use]
extern crate cascade;

#[macro_use]
extern crate fomat_macros;

#[macro_use]
extern crate log;

/// Boot loader variables stored in `loader.conf` and `menu.lst`
pub mod bootvars;

/// Boot media backed by a ZFS boot pool rather than a USB key
pub mod bootpool;

/// SHA-1 checksums of files on the key
pub mod checksum;

/// Key format detection from the master boot record
pub mod mbr;

/// Selection between USB key and boot pool media
pub mod media;

/// Miscellaneous functions used throughout the library.
pub mod misc;

/// Parsing of the kernel mount table
pub mod mnttab;

/// Typed pcfs mount options
pub mod options;

/// Wrappers around the OS commands and probes that the mount logic relies on
pub mod oscmds;

/// Synchronise the key with the contents shipped in the platform
pub mod update;

/// Mount status inspection and the mount/unmount state machine
pub mod usbkey;

#[cfg(test)]
mod fakes;

use std::time::Duration;

/// Configured mountpoint names are resolved under this directory.
pub const MOUNT_ROOT: &str = "/mnt";
/// Used when no mountpoint name is configured.
pub const DEFAULT_MOUNTPOINT_NAME: &str = "usbkey";
pub const MARKER_FILE: &str = ".joyliveusb";
pub const CONTENTS_DIR: &str = "/opt/smartdc/share/usbkey/contents";

pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(45);
pub const UNMOUNT_TIMEOUT: Duration = Duration::from_secs(45);
