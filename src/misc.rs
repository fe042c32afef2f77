use std::{
    fs,
    io::{self, Write},
    path::Path,
};
use tempfile::NamedTempFile;

pub fn format_error(source: &(dyn std::error::Error + 'static)) -> String {
    let mut out = fomat!((source));

    let mut source = source.source();
    while let Some(why) = source {
        out.push_str(&fomat!(": "(why)));
        source = why.source();
    }

    out
}

/// Replaces `path` with `contents` by writing a temporary file beside it and
/// renaming it into place. An existing file keeps its permissions.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    match fs::metadata(path) {
        Ok(meta) => fs::set_permissions(temp.path(), meta.permissions())?,
        Err(why) if why.kind() == io::ErrorKind::NotFound => (),
        Err(why) => return Err(why),
    }

    temp.persist(path).map(|_| ()).map_err(|why| why.error)
}

/// Copies `src` over `dst` through a temporary file beside `dst`, so that
/// readers never observe a partial file. The copy takes the mode of `src`.
pub fn copy_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    let parent = match dst.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut input = fs::File::open(src)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    io::copy(&mut input, &mut temp)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), input.metadata()?.permissions())?;

    temp.persist(dst).map(|_| ()).map_err(|why| why.error)
}
