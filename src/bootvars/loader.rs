use super::{lookup, pattern, read_optional, replace_lines, write, BootVarError};
use regex::Regex;
use std::path::Path;

const LOADER_CONF: &str = "boot/loader.conf";
const LOADER_CONF_LOCAL: &str = "boot/loader.conf.local";

fn assignment(name: &str) -> Result<Regex, BootVarError> {
    pattern(name, &fomat!(r#"^\s*"# (regex::escape(name)) r#"\s*=\s*"?([^"]*?)"?\s*$"#))
}

/// `loader.conf.local` overrides `loader.conf`.
pub fn get(mountpoint: &Path, name: &str) -> Result<Option<String>, BootVarError> {
    let conf_path = mountpoint.join(LOADER_CONF);
    let conf = read_optional(&conf_path)?.ok_or_else(|| BootVarError::Read {
        path:   conf_path.clone(),
        source: std::io::ErrorKind::NotFound.into(),
    })?;

    let local = read_optional(&mountpoint.join(LOADER_CONF_LOCAL))?;
    let re = assignment(name)?;

    Ok(local.and_then(|local| lookup(&local, &re)).or_else(|| lookup(&conf, &re)))
}

pub fn set(mountpoint: &Path, name: &str, value: &str) -> Result<(), BootVarError> {
    let re = assignment(name)?;
    let line = fomat!((name) "=\"" (value) "\"");

    let conf_path = mountpoint.join(LOADER_CONF);
    let conf = read_optional(&conf_path)?.unwrap_or_default();

    let new = replace_lines(&conf, &re, &line).unwrap_or_else(|| {
        let mut new = conf;
        if !new.is_empty() && !new.ends_with('\n') {
            new.push('\n');
        }
        new.push_str(&line);
        new.push('\n');
        new
    });

    write(&conf_path, &new)?;

    // A stale override would mask the new value.
    let local_path = mountpoint.join(LOADER_CONF_LOCAL);
    if let Some(local) = read_optional(&local_path)? {
        if let Some(new) = replace_lines(&local, &re, &line) {
            write(&local_path, &new)?;
        }
    }

    Ok(())
}
