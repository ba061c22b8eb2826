//! Conditional gzip of a single file.
//!
//! [`compress_and_choose`] writes `<source>.zip` next to the source, compares
//! sizes, and picks whichever payload is smaller. The temp file is owned by a
//! [`TempPayload`] from the moment it is created: it is unlinked when the guard
//! drops, so an error, a panic or a cancelled deploy never leaves it behind.
//! Callers that want the removal logged call [`TempPayload::remove`].

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::BlobMetadata;
use crate::error::{DeployError, DeployResult};

pub const GZIP_ENCODING: &str = "gzip";
pub const TEMP_SUFFIX: &str = ".zip";

/// Temp file that is deleted when dropped.
#[derive(Debug, PartialEq, Eq)]
pub struct TempPayload {
    path: PathBuf,
    armed: bool,
}

impl TempPayload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file now, logging instead of failing.
    pub async fn remove(mut self) {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(temp = %self.path.display(), "[COMPRESS] temp file removed"),
            Err(e) => {
                warn!(temp = %self.path.display(), error = ?e, "[COMPRESS] failed to remove temp file")
            }
        }
    }
}

impl Drop for TempPayload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(temp = %self.path.display(), "[COMPRESS] temp file dropped"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(temp = %self.path.display(), error = ?e, "[COMPRESS] failed to drop temp file")
            }
        }
    }
}

/// Outcome of compressing one file.
#[derive(Debug, PartialEq, Eq)]
pub struct CompressedChoice {
    /// File to upload: the original or the temp file.
    pub payload: PathBuf,
    /// Metadata to upload with; `content_encoding` is `gzip` when the temp file won.
    pub metadata: BlobMetadata,
    /// The temp file that was written; it lives as long as this guard.
    pub temp_file: TempPayload,
}

impl CompressedChoice {
    pub fn is_compressed(&self) -> bool {
        self.payload == self.temp_file.path()
    }
}

/// Sibling temp path for `source`: the full file name with `.zip` appended.
pub fn temp_path_for(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Sizes of the original and of the gzip output.
struct Written {
    temp: TempPayload,
    original_size: u64,
    compressed_size: u64,
}

fn gzip_file(source: &Path, target: PathBuf) -> Result<Written, (PathBuf, io::Error)> {
    let input = File::open(source).map_err(|e| (source.to_path_buf(), e))?;
    let original_size = input
        .metadata()
        .map_err(|e| (source.to_path_buf(), e))?
        .len();

    let output = File::create(&target).map_err(|e| (target.clone(), e))?;
    let temp = TempPayload::new(target);
    let fail = |e: io::Error| (temp.path().to_path_buf(), e);

    let mut reader = BufReader::new(input);
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::best());
    io::copy(&mut reader, &mut encoder).map_err(fail)?;
    let mut writer = encoder.finish().map_err(fail)?;
    writer.flush().map_err(fail)?;
    drop(writer);
    let compressed_size = std::fs::metadata(temp.path()).map_err(fail)?.len();

    Ok(Written {
        temp,
        original_size,
        compressed_size,
    })
}

/// Chooses between `original_size` and `compressed_size`. Ties go to the compressed payload.
pub fn prefer_original(original_size: u64, compressed_size: u64) -> bool {
    original_size < compressed_size
}

/// Gzip `source` into its temp sibling and choose the smaller payload.
///
/// Any failure after the temp file was created removes it again before returning.
pub async fn compress_and_choose(
    source: &Path,
    metadata: &BlobMetadata,
) -> DeployResult<CompressedChoice> {
    let target = temp_path_for(source);
    debug!(source = %source.display(), temp = %target.display(), "[COMPRESS] gzip start");

    // The guard is created on the blocking thread; if this future is dropped
    // mid-gzip, the runtime drops the task output and with it the temp file.
    let src = source.to_path_buf();
    let written = tokio::task::spawn_blocking(move || gzip_file(&src, target))
        .await
        .map_err(|join| DeployError::compression(source, io::Error::other(join)))?;

    let Written {
        temp,
        original_size,
        compressed_size,
    } = match written {
        Ok(written) => written,
        Err((path, e)) => {
            warn!(source = %source.display(), path = %path.display(), error = ?e, "[COMPRESS] gzip failed");
            return Err(DeployError::compression(source, e));
        }
    };

    let mut metadata = metadata.clone();
    let payload = if prefer_original(original_size, compressed_size) {
        source.to_path_buf()
    } else {
        metadata.content_encoding = Some(GZIP_ENCODING.to_string());
        temp.path().to_path_buf()
    };

    info!(
        source = %source.display(),
        original_size,
        compressed_size,
        compressed = payload == temp.path(),
        "[COMPRESS] payload chosen"
    );

    Ok(CompressedChoice {
        payload,
        metadata,
        temp_file: temp,
    })
}
