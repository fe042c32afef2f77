//! Mount options for the pcfs(7FS) file system on the key.
//!
//! The kernel reports options as a comma-separated string in which boolean
//! flags appear either as `name` or `noname`. The flags we care about are
//! lifted into typed fields; everything else is kept verbatim.

use serde_derive::Serialize;
use std::{collections::BTreeMap, fmt};

/// An option the kernel reported that has no typed field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtraOption {
    Flag(bool),
    Value(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MountOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foldcase: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub atime: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clamptime: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rw: Option<bool>,

    #[serde(flatten)]
    pub other: BTreeMap<String, ExtraOption>,
}

impl MountOptions {
    /// The options the key is mounted with unless the caller asks otherwise.
    ///
    /// `foldcase` gives a consistent view of file names, `hidden` exposes files
    /// with the system or hidden bits set, and `clamptime` keeps timestamps
    /// within a 32-bit `time_t`.
    pub fn defaults() -> Self {
        MountOptions {
            foldcase: Some(true),
            atime: Some(false),
            hidden: Some(true),
            clamptime: Some(true),
            rw: Some(true),
            other: BTreeMap::new(),
        }
    }

    /// Parses an option string such as `rw,foldcase,noatime,dev=1a80001`.
    pub fn parse(optstr: &str) -> Self {
        let mut options = MountOptions::default();

        for pair in optstr.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            if let Some(eqidx) = pair.find('=') {
                let (name, value) = (pair[..eqidx].trim(), pair[eqidx + 1..].trim());
                options.other.insert(name.to_owned(), ExtraOption::Value(value.to_owned()));
                continue;
            }

            match pair {
                "ro" => options.rw = Some(false),
                "rw" => options.rw = Some(true),
                name => {
                    let (flag, value) = match name.strip_prefix("no") {
                        Some(flag) => (flag, false),
                        None => (name, true),
                    };

                    match options.flag_mut(flag) {
                        Some(field) => *field = Some(value),
                        None => {
                            options.other.insert(name.to_owned(), ExtraOption::Flag(true));
                        }
                    }
                }
            }
        }

        options
    }

    /// Options in `overrides` replace those in `self`.
    pub fn overlay(&self, overrides: &MountOptions) -> Self {
        let mut merged = self.clone();
        let pick = |base: Option<bool>, over: Option<bool>| over.or(base);

        merged.foldcase = pick(self.foldcase, overrides.foldcase);
        merged.atime = pick(self.atime, overrides.atime);
        merged.hidden = pick(self.hidden, overrides.hidden);
        merged.clamptime = pick(self.clamptime, overrides.clamptime);
        merged.rw = pick(self.rw, overrides.rw);
        merged.other.extend(overrides.other.iter().map(|(k, v)| (k.clone(), v.clone())));

        merged
    }

    pub fn is_empty(&self) -> bool {
        self.foldcase.is_none()
            && self.atime.is_none()
            && self.hidden.is_none()
            && self.clamptime.is_none()
            && self.rw.is_none()
            && self.other.is_empty()
    }

    /// Two option sets are equivalent when both explicitly agree on `hidden`,
    /// `foldcase` and `clamptime`. A flag missing from either side never
    /// compares equal, since pcfs defaults differ between releases.
    pub fn equivalent(&self, other: &MountOptions) -> bool {
        [
            (self.hidden, other.hidden),
            (self.foldcase, other.foldcase),
            (self.clamptime, other.clamptime),
        ]
        .iter()
        .all(|pair| matches!(pair, (Some(a), Some(b)) if a == b))
    }

    fn flag_mut(&mut self, name: &str) -> Option<&mut Option<bool>> {
        match name {
            "foldcase" => Some(&mut self.foldcase),
            "atime" => Some(&mut self.atime),
            "hidden" => Some(&mut self.hidden),
            "clamptime" => Some(&mut self.clamptime),
            _ => None,
        }
    }
}

/// Renders the options as the argument to `mount -o`.
impl fmt::Display for MountOptions {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut args = Vec::new();

        let flags = [
            ("foldcase", self.foldcase),
            ("atime", self.atime),
            ("hidden", self.hidden),
            ("clamptime", self.clamptime),
        ];

        for (name, value) in flags.iter() {
            match value {
                Some(true) => args.push((*name).to_owned()),
                Some(false) => args.push(["no", *name].concat()),
                None => (),
            }
        }

        match self.rw {
            Some(true) => args.push("rw".into()),
            Some(false) => args.push("ro".into()),
            None => (),
        }

        for (name, value) in &self.other {
            match value {
                ExtraOption::Flag(true) => args.push(name.clone()),
                ExtraOption::Flag(false) => args.push(["no", name.as_str()].concat()),
                ExtraOption::Value(value) => args.push(fomat!((name) "=" (value))),
            }
        }

        fmt.write_str(&args.join(","))
    }
}
