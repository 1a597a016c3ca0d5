//! Streaming uploads into the session directory.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{create_unique_file, ensure_directory};
use crate::error::{StorageError, UploadError};
use crate::sanitize::redact_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Started { name: String },
    Progress { name: String, bytes: u64 },
    Completed { name: String, bytes: u64 },
    Failed { name: String, error: String },
}

pub trait UploadProgress: Send + Sync {
    fn report(&self, event: UploadEvent);

    fn is_canceled(&self) -> bool {
        false
    }
}

/// Ignores all events.
pub struct NoopUploadProgress;

impl UploadProgress for NoopUploadProgress {
    fn report(&self, _event: UploadEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSettings {
    pub buffer_size: usize,
    /// Minimum time between two `Progress` events.
    pub progress_interval: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            progress_interval: Duration::from_millis(1000),
        }
    }
}

/// The name an upload is stored under. Directory parts are dropped, and a
/// name without extension gets one derived from the content type so that
/// extension based discovery works.
pub fn upload_file_name(name: &str, content_type: Option<&str>) -> String {
    let base = Path::new(&name.replace('\\', "/"))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string());

    if Path::new(&base).extension().is_some() {
        return base;
    }
    let extension = content_type
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|extensions| extensions.first());
    match extension {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

/// Copies `reader` into a new file in `dir`. Returns the path and the
/// number of bytes written. A canceled upload leaves no file behind.
pub fn write_upload<R: Read>(
    dir: &Path,
    name: &str,
    content_type: Option<&str>,
    mut reader: R,
    settings: UploadSettings,
    progress: &dyn UploadProgress,
) -> Result<(PathBuf, u64), UploadError> {
    ensure_directory(dir)?;
    let file_name = upload_file_name(name, content_type);
    let guessed = content_type
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(&file_name).first().map(|m| m.to_string()));
    info!(
        "Uploading {} ({})",
        file_name,
        guessed.as_deref().unwrap_or("unknown type")
    );
    progress.report(UploadEvent::Started {
        name: file_name.clone(),
    });

    let (mut file, path) = create_unique_file(dir, &file_name)?;
    let result = copy_throttled(
        &mut reader,
        &mut file,
        &path,
        &file_name,
        settings,
        progress,
    );
    drop(file);

    match result {
        Ok(bytes) => {
            debug!("Upload of {} complete: {} bytes", redact_path(&path), bytes);
            progress.report(UploadEvent::Completed {
                name: file_name,
                bytes,
            });
            Ok((path, bytes))
        }
        Err(e) => {
            if let Err(remove_error) = std::fs::remove_file(&path) {
                warn!(
                    "Failed to remove partial upload {}: {}",
                    redact_path(&path),
                    remove_error
                );
            }
            progress.report(UploadEvent::Failed {
                name: file_name,
                error: e.to_string(),
            });
            Err(e)
        }
    }
}

fn copy_throttled(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    path: &Path,
    name: &str,
    settings: UploadSettings,
    progress: &dyn UploadProgress,
) -> Result<u64, UploadError> {
    let mut buffer = vec![0u8; settings.buffer_size.max(1)];
    let mut total: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        if progress.is_canceled() {
            return Err(UploadError::Canceled(name.to_string()));
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(UploadError::Read {
                    name: name.to_string(),
                    source: e,
                });
            }
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|e| StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        total += read as u64;

        if last_report.elapsed() >= settings.progress_interval {
            progress.report(UploadEvent::Progress {
                name: name.to_string(),
                bytes: total,
            });
            last_report = Instant::now();
        }
    }

    writer.flush().map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(total)
}
