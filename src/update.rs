//! Brings the files on the key in line with the copy shipped in the platform
//! image. Files are compared by SHA-1 and replaced atomically; nothing on the
//! key is ever removed.

use crate::{
    checksum::sha1_file,
    misc::copy_atomic,
    oscmds::{CommandError, Platform},
};
use serde_derive::Serialize;
use std::{
    fmt,
    fs::{FileType, Metadata},
    io,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use walkdir::WalkDir;

/// Time given to the key to settle after the file systems are synced.
const SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("directory {:?} does not exist", _0)]
    NoDirectory(PathBuf),

    #[error("path {:?} should be a directory, but is {}", path, kind)]
    NotDirectory { path: PathBuf, kind: &'static str },

    #[error("path {:?} exists, but is of type {}, not file", path, kind)]
    NotFile { path: PathBuf, kind: &'static str },

    #[error("source {:?} is of unsupported type {}", path, kind)]
    Unsupported { path: PathBuf, kind: &'static str },

    #[error("could not inspect {:?}", path)]
    Stat {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not walk source tree")]
    Walk(#[source] walkdir::Error),

    #[error("could not shasum file {:?}", path)]
    Checksum {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to mkdir {:?}", path)]
    Mkdir {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not copy {:?} to {:?}", src, dst)]
    Copy {
        src:    PathBuf,
        dst:    PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not sync file systems")]
    Sync(#[source] CommandError),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    CreateFile,
    UpdateFile,
    CreateDirectory,
}

/// A change made, or in a dry run one that would be made, to the key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Action {
    pub action:   ActionKind,
    /// Relative to the top of both trees.
    pub path:     PathBuf,
    pub src:      PathBuf,
    pub dst:      PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_sha1: Option<String>,
}

impl fmt::Display for Action {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.action {
            ActionKind::CreateDirectory => write!(fmt, "mkdir {:?}", self.path),
            ActionKind::CreateFile => write!(fmt, "create file {:?}", self.path),
            ActionKind::UpdateFile => write!(fmt, "update file {:?}", self.path),
        }?;

        if let Some(ref sum) = self.old_sha1 {
            write!(fmt, "\n\told shasum: {}", sum)?;
        }

        if let Some(ref sum) = self.new_sha1 {
            write!(fmt, "\n\tnew shasum: {}", sum)?;
        }

        Ok(())
    }
}

/// Copies new and changed files from `source` onto `destination`.
#[derive(Debug)]
pub struct Update {
    source:      PathBuf,
    destination: PathBuf,
    dryrun:      bool,
    actions:     Vec<Action>,
}

impl Update {
    pub fn new<S: Into<PathBuf>, D: Into<PathBuf>>(
        source: S,
        destination: D,
        dryrun: bool,
    ) -> Self {
        Update {
            source: source.into(),
            destination: destination.into(),
            dryrun,
            actions: Vec::new(),
        }
    }

    /// Everything done so far. After a failure, this is exactly what was
    /// completed before it.
    pub fn actions(&self) -> &[Action] { &self.actions }

    pub async fn run(&mut self, platform: &dyn Platform) -> Result<(), UpdateError> {
        info!("updating {:?} from {:?}", self.destination, self.source);

        check_directory(&self.source).await?;
        check_directory(&self.destination).await?;

        let entries = WalkDir::new(&self.source)
            .min_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(UpdateError::Walk)?;

        for entry in entries {
            let relative = entry.path().strip_prefix(&self.source).unwrap_or_else(|_| entry.path());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                self.directory(relative).await?;
            } else if file_type.is_file() {
                self.file(relative).await?;
            } else {
                return Err(UpdateError::Unsupported {
                    path: entry.path().to_owned(),
                    kind: kind_of(file_type),
                });
            }
        }

        if !self.dryrun && !self.actions.is_empty() {
            debug!("syncing file systems");
            platform.sync().await.map_err(UpdateError::Sync)?;
            platform.sleep(SETTLE_DELAY).await;
        }

        Ok(())
    }

    async fn directory(&mut self, relative: &Path) -> Result<(), UpdateError> {
        let dst = self.destination.join(relative);

        match lstat(&dst).await? {
            None => (),
            Some(ref meta) if meta.is_dir() => return Ok(()),
            Some(meta) => {
                return Err(UpdateError::NotDirectory { path: dst, kind: kind_of(meta.file_type()) })
            }
        }

        if !self.dryrun {
            tokio::fs::DirBuilder::new()
                .mode(0o755)
                .create(&dst)
                .await
                .map_err(|source| UpdateError::Mkdir { path: dst.clone(), source })?;
        }

        self.record(Action {
            action:   ActionKind::CreateDirectory,
            path:     relative.to_owned(),
            src:      self.source.join(relative),
            dst,
            old_sha1: None,
            new_sha1: None,
        });

        Ok(())
    }

    async fn file(&mut self, relative: &Path) -> Result<(), UpdateError> {
        let src = self.source.join(relative);
        let dst = self.destination.join(relative);

        let new = sha1_file(&src)
            .await
            .map_err(|source| UpdateError::Checksum { path: src.clone(), source })?;

        let (action, old) = match lstat(&dst).await? {
            None => (ActionKind::CreateFile, None),
            Some(ref meta) if meta.is_file() => {
                let old = sha1_file(&dst)
                    .await
                    .map_err(|source| UpdateError::Checksum { path: dst.clone(), source })?;

                if old == new {
                    return Ok(());
                }

                (ActionKind::UpdateFile, Some(old))
            }
            Some(meta) => {
                return Err(UpdateError::NotFile { path: dst, kind: kind_of(meta.file_type()) })
            }
        };

        if !self.dryrun {
            let (from, to) = (src.clone(), dst.clone());
            tokio::task::spawn_blocking(move || copy_atomic(&from, &to))
                .await
                .map_err(|why| io::Error::new(io::ErrorKind::Other, why.to_string()))
                .and_then(|result| result)
                .map_err(|source| UpdateError::Copy {
                    src: src.clone(),
                    dst: dst.clone(),
                    source,
                })?;
        }

        self.record(Action {
            action,
            path: relative.to_owned(),
            src,
            dst,
            old_sha1: old,
            new_sha1: Some(new),
        });

        Ok(())
    }

    fn record(&mut self, action: Action) {
        debug!("{}", action);
        self.actions.push(action);
    }
}

async fn lstat(path: &Path) -> Result<Option<Metadata>, UpdateError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(why) if why.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(UpdateError::Stat { path: path.to_owned(), source }),
    }
}

async fn check_directory(path: &Path) -> Result<(), UpdateError> {
    match lstat(path).await? {
        None => Err(UpdateError::NoDirectory(path.to_owned())),
        Some(ref meta) if meta.is_dir() => Ok(()),
        Some(meta) => {
            let kind = kind_of(meta.file_type());
            Err(UpdateError::NotDirectory { path: path.to_owned(), kind })
        }
    }
}

fn kind_of(file_type: FileType) -> &'static str {
    if file_type.is_file() {
        "file"
    } else if file_type.is_dir() {
        "dir"
    } else if file_type.is_symlink() {
        "link"
    } else if file_type.is_block_device() {
        "block"
    } else if file_type.is_char_device() {
        "char"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else {
        "unknown"
    }
}
