use super::{lookup, pattern, read_optional, replace_lines, write, BootVarError};
use regex::Regex;
use std::path::{Path, PathBuf};

const MENU_LST: &str = "boot/grub/menu.lst";
const MENU_LST_TMPL: &str = "boot/grub/menu.lst.tmpl";

/// Selected by the default menu entry: entry 0 chainloads iPXE.
const IPXE: &str = "ipxe";
const SMT_ENABLED: &str = "smt_enabled";

fn variable(name: &str) -> Result<Regex, BootVarError> {
    pattern(name, &fomat!(r"^\s*variable\s+" (regex::escape(name)) r"\s+(.*?)\s*$"))
}

fn default_entry() -> Result<Regex, BootVarError> { pattern(IPXE, r"^\s*default\s+(\d+)\s*$") }

fn menus(mountpoint: &Path) -> [PathBuf; 2] {
    [mountpoint.join(MENU_LST), mountpoint.join(MENU_LST_TMPL)]
}

pub fn get(mountpoint: &Path, name: &str) -> Result<Option<String>, BootVarError> {
    if name == SMT_ENABLED {
        return Err(BootVarError::Unsupported(name.to_owned()));
    }

    let re = if name == IPXE { default_entry()? } else { variable(name)? };
    let mut found_menu = false;
    let mut value = None;

    // The template is read last, so its value overrides the menu's.
    for path in menus(mountpoint).iter() {
        let contents = match read_optional(path)? {
            Some(contents) => contents,
            None => continue,
        };

        found_menu = true;
        if let Some(found) = lookup(&contents, &re) {
            value = Some(found);
        }
    }

    if !found_menu {
        return Err(BootVarError::NoMenu(mountpoint.to_owned()));
    }

    if name == IPXE {
        return Ok(value.map(|entry| if entry == "0" { "true" } else { "false" }.to_owned()));
    }

    Ok(value)
}

pub fn set(mountpoint: &Path, name: &str, value: &str) -> Result<(), BootVarError> {
    let (re, line) = match name {
        SMT_ENABLED => return Err(BootVarError::Unsupported(name.to_owned())),
        IPXE => {
            let entry = match value {
                "true" => "0",
                "false" => "1",
                _ => {
                    return Err(BootVarError::InvalidValue {
                        name:  name.to_owned(),
                        value: value.to_owned(),
                    })
                }
            };

            (default_entry()?, fomat!("default " (entry)))
        }
        _ => (variable(name)?, fomat!("variable " (name) " " (value))),
    };

    let mut found_menu = false;

    for path in menus(mountpoint).iter() {
        let contents = match read_optional(path)? {
            Some(contents) => contents,
            None => continue,
        };

        found_menu = true;
        let new = match replace_lines(&contents, &re, &line) {
            Some(new) => new,
            None => insert(&contents, &line),
        };

        write(path, &new)?;
    }

    if found_menu {
        Ok(())
    } else {
        Err(BootVarError::NoMenu(mountpoint.to_owned()))
    }
}

/// New lines go after the last `variable` line, or at the top of the menu.
fn insert(contents: &str, line: &str) -> String {
    let mut lines = contents.lines().collect::<Vec<_>>();
    let position = lines
        .iter()
        .rposition(|existing| existing.trim_start().starts_with("variable "))
        .map_or(0, |pos| pos + 1);

    lines.insert(position, line);

    let mut new = lines.join("\n");
    new.push('\n');
    new
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MENU: &str = "default 0
timeout 5
variable os_console ttyb
variable os_console_speed 115200
title Triton (iPXE)
  kernel /boot/ipxe.lkrn
title Triton (Live 64-bit)
  kernel$ /os/${platform}/platform/i86pc/kernel/amd64/unix -B console=${os_console}
";

    fn key(menu: Option<&str>, tmpl: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        if let Some(menu) = menu {
            fs::write(dir.path().join(MENU_LST), menu).unwrap();
        }
        if let Some(tmpl) = tmpl {
            fs::write(dir.path().join(MENU_LST_TMPL), tmpl).unwrap();
        }
        dir
    }

    #[test]
    fn reads_variables() {
        let dir = key(Some(MENU), None);
        assert_eq!(get(dir.path(), "os_console").unwrap(), Some("ttyb".into()));
        assert_eq!(get(dir.path(), "os_console_speed").unwrap(), Some("115200".into()));
        assert_eq!(get(dir.path(), "ipxe").unwrap(), Some("true".into()));
        assert_eq!(get(dir.path(), "rootpool").unwrap(), None);
    }

    #[test]
    fn falls_back_to_template() {
        let dir = key(None, Some("variable os_console vga\n"));
        assert_eq!(get(dir.path(), "os_console").unwrap(), Some("vga".into()));
    }

    #[test]
    fn template_overrides_menu() {
        let dir = key(Some("variable os_console ttyb\n"), Some("variable os_console vga\n"));
        assert_eq!(get(dir.path(), "os_console").unwrap(), Some("vga".into()));

        let dir = key(Some("default 0\n"), Some("default 1\n"));
        assert_eq!(get(dir.path(), "ipxe").unwrap(), Some("false".into()));

        let dir = key(Some("variable os_console ttyb\n"), Some("timeout 5\n"));
        assert_eq!(get(dir.path(), "os_console").unwrap(), Some("ttyb".into()));
    }

    #[test]
    fn smt_is_unsupported() {
        let dir = key(Some(MENU), None);
        assert!(matches!(get(dir.path(), "smt_enabled"), Err(BootVarError::Unsupported(_))));
        assert!(matches!(
            set(dir.path(), "smt_enabled", "true"),
            Err(BootVarError::Unsupported(_))
        ));
    }

    #[test]
    fn no_menu() {
        let dir = key(None, None);
        assert!(matches!(get(dir.path(), "os_console"), Err(BootVarError::NoMenu(_))));
        assert!(matches!(set(dir.path(), "os_console", "vga"), Err(BootVarError::NoMenu(_))));
    }

    #[test]
    fn set_updates_menu_and_template() {
        let dir = key(Some(MENU), Some(MENU));

        set(dir.path(), "os_console", "vga").unwrap();
        set(dir.path(), "ipxe", "false").unwrap();

        for name in &[MENU_LST, MENU_LST_TMPL] {
            let contents = fs::read_to_string(dir.path().join(name)).unwrap();
            assert!(contents.starts_with("default 1\ntimeout 5\nvariable os_console vga\n"));
        }

        assert_eq!(get(dir.path(), "ipxe").unwrap(), Some("false".into()));
    }

    #[test]
    fn set_inserts_after_last_variable() {
        let dir = key(Some(MENU), None);
        set(dir.path(), "rootpool", "zones").unwrap();

        let contents = fs::read_to_string(dir.path().join(MENU_LST)).unwrap();
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines[4], "variable rootpool zones");
        assert_eq!(lines[5], "title Triton (iPXE)");
    }

    #[test]
    fn ipxe_requires_boolean() {
        let dir = key(Some(MENU), None);
        assert!(matches!(
            set(dir.path(), "ipxe", "maybe"),
            Err(BootVarError::InvalidValue { .. })
        ));
    }
}
