use sha1::{Digest, Sha1};
use std::{io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};

/// The hex SHA-1 digest of the file at `path`.
pub async fn sha1_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; 8 * 1024];

    loop {
        match file.read(&mut buffer).await? {
            0 => break,
            read => hasher.update(&buffer[..read]),
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}
