//! Variables handed to the kernel by the boot loader on the key.
//!
//! Loader keys keep them as `name="value"` assignments in `boot/loader.conf`,
//! with `boot/loader.conf.local` layered on top. Legacy keys keep them as
//! `variable name value` lines in the grub menu and its template.

mod grub;
mod loader;

use crate::{mbr::KeyVersion, misc::write_atomic};
use regex::Regex;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootVarError {
    #[error("could not read {:?}", path)]
    Read {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not write {:?}", path)]
    Write {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no grub menu found under {:?}", _0)]
    NoMenu(PathBuf),

    #[error("variable \"{}\" is not supported on grub keys", _0)]
    Unsupported(String),

    #[error("invalid value for \"{}\": {}", name, value)]
    InvalidValue { name: String, value: String },

    #[error("invalid variable name \"{}\"", _0)]
    Pattern(String, #[source] regex::Error),
}

pub fn get_variable(
    mountpoint: &Path,
    version: KeyVersion,
    name: &str,
) -> Result<Option<String>, BootVarError> {
    debug!("reading version {} variable {} under {:?}", version, name, mountpoint);
    match version {
        KeyVersion::Loader => loader::get(mountpoint, name),
        KeyVersion::Legacy => grub::get(mountpoint, name),
    }
}

pub fn set_variable(
    mountpoint: &Path,
    version: KeyVersion,
    name: &str,
    value: &str,
) -> Result<(), BootVarError> {
    info!("setting version {} variable {}={} under {:?}", version, name, value, mountpoint);
    match version {
        KeyVersion::Loader => loader::set(mountpoint, name, value),
        KeyVersion::Legacy => grub::set(mountpoint, name, value),
    }
}

fn pattern(name: &str, expr: &str) -> Result<Regex, BootVarError> {
    Regex::new(expr).map_err(|why| BootVarError::Pattern(name.to_owned(), why))
}

/// Reads `path`, treating a missing file as `None`.
fn read_optional(path: &Path) -> Result<Option<String>, BootVarError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(why) if why.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(BootVarError::Read { path: path.to_owned(), source }),
    }
}

fn write(path: &Path, contents: &str) -> Result<(), BootVarError> {
    debug!("rewriting {:?}", path);
    write_atomic(path, contents.as_bytes())
        .map_err(|source| BootVarError::Write { path: path.to_owned(), source })
}

/// The first capture of the last line matching `pattern`.
fn lookup(contents: &str, pattern: &Regex) -> Option<String> {
    contents
        .lines()
        .filter_map(|line| pattern.captures(line))
        .last()
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_owned())
}

/// Replaces every line matching `pattern` with `replacement`. Returns `None`
/// when nothing matched.
fn replace_lines(contents: &str, pattern: &Regex, replacement: &str) -> Option<String> {
    let mut matched = false;
    let mut new = String::with_capacity(contents.len());

    for line in contents.lines() {
        if pattern.is_match(line) {
            matched = true;
            new.push_str(replacement);
        } else {
            new.push_str(line);
        }
        new.push('\n');
    }

    if matched {
        Some(new)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_takes_last_match() {
        let re = Regex::new(r"^a=(\w+)$").unwrap();
        assert_eq!(lookup("a=1\nb=2\na=3\n", &re), Some("3".into()));
        assert_eq!(lookup("b=2\n", &re), None);
    }

    #[test]
    fn replace_every_match() {
        let re = Regex::new(r"^a=").unwrap();
        assert_eq!(replace_lines("a=1\nb=2\na=3", &re, "a=4"), Some("a=4\nb=2\na=4\n".into()));
        assert_eq!(replace_lines("b=2\n", &re, "a=4"), None);
    }

    #[test]
    fn dispatch_on_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        fs::write(dir.path().join("boot/loader.conf"), "os_console=\"ttyb\"\n").unwrap();
        fs::write(dir.path().join("boot/grub/menu.lst"), "variable os_console vga\n").unwrap();

        assert_eq!(
            get_variable(dir.path(), KeyVersion::Loader, "os_console").unwrap(),
            Some("ttyb".into())
        );
        assert_eq!(
            get_variable(dir.path(), KeyVersion::Legacy, "os_console").unwrap(),
            Some("vga".into())
        );
    }
}
