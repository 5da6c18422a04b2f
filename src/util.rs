use std::path::{Path, PathBuf};

use base64::prelude::*;
use eyre::WrapErr as _;
use rand::{distributions::Alphanumeric, Rng as _};
use tokio::io::AsyncWriteExt as _;

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// Random base62 string, used for renewal ids.
pub(crate) fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Replaces characters that are not valid in file names on common platforms.
pub(crate) fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '*' => '_',
            '/' | '\\' | ':' | '?' | '"' | '<' | '>' | '|' => '-',
            c => c,
        })
        .collect()
}

/// Writes `contents` next to `path` and renames it into place, so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> eyre::Result<()> {
    write_replacing(path, contents.as_ref(), 0o644).await
}

/// Like [`write_atomic`], but the file is only accessible by its owner. Used for private keys.
pub(crate) async fn write_private(path: &Path, contents: impl AsRef<[u8]>) -> eyre::Result<()> {
    write_replacing(path, contents.as_ref(), 0o600).await
}

async fn write_replacing(path: &Path, contents: &[u8], mode: u32) -> eyre::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .wrap_err_with(|| format!("creating {}", dir.display()))?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    // the mode only applies when the file is created
    match tokio::fs::remove_file(&temp_path).await {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            return Err(err).wrap_err_with(|| format!("removing {}", temp_path.display()));
        }
        _ => {}
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let written = async {
        let mut file = options.open(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await
    }
    .await;

    if let Err(err) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err).wrap_err_with(|| format!("writing {}", path.display()));
    }

    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err).wrap_err_with(|| format!("replacing {}", path.display()));
    }

    Ok(())
}
