//! Placing final job outputs and fingerprinting them.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{AppError, Result};

const BUFFER_SIZE: usize = 64 * 1024;

/// Copies `source` to `destination` while hashing it.
///
/// Returns the number of bytes written and the hex SHA-256 of the content.
pub async fn copy_with_checksum(source: &Path, destination: &Path) -> Result<(u64, String)> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::io(parent, e))?;
    }

    let source_file = File::open(source).await.map_err(|e| AppError::io(source, e))?;
    let dest_file = File::create(destination)
        .await
        .map_err(|e| AppError::io(destination, e))?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);
    let mut hasher = Sha256::new();
    let mut total_bytes = 0u64;
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| AppError::io(source, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        writer
            .write_all(&buffer[..bytes_read])
            .await
            .map_err(|e| AppError::io(destination, e))?;
        total_bytes += bytes_read as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| AppError::io(destination, e))?;

    Ok((total_bytes, format!("{:x}", hasher.finalize())))
}

/// File name for a final artifact: the input's stem with the output format.
///
/// `taken` holds names already used by the job; clashes get a numeric suffix.
pub fn artifact_name(input: &Path, format: &str, taken: &[String]) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());

    let mut name = format!("{}.{}", stem, format);
    let mut n = 1;
    while taken.contains(&name) {
        name = format!("{}-{}.{}", stem, n, format);
        n += 1;
    }
    name
}

/// Removes a job's scratch directory, ignoring a directory that is already gone.
pub async fn remove_workspace(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::io(dir, e)),
    }
}

/// Where a job keeps its final artifacts when no output directory is set.
pub fn default_output_dir(workspace: &Path) -> PathBuf {
    workspace.join("output")
}
