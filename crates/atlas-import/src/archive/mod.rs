//! Recursive extraction of zip, tar and gzip containers into a directory.
//!
//! Containers may nest (`.tar.gz`, a zip inside a tar, ...). Every plain
//! file ends up in the target directory with the relative path it had
//! inside its container; the list of written files is the result.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::charset::Charset;
use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::importer::ImporterMonitor;
use crate::sanitize::{is_unsafe_entry_name, redact_path, relative_entry_path};

/// File extensions offered for unpacking. `.tgz` and `.gzip` are still
/// decoded when met inside a container or given as a stream name.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "jar", "kmz", "tar", "gz"];

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Zip,
    Tar,
    Gzip,
    Plain,
}

impl ContainerKind {
    /// The file name decides first, the content type is a fallback for names
    /// without a known extension.
    fn detect(name: &str, content_type: Option<&str>) -> Self {
        let lower = name.to_lowercase();
        let content_type = content_type.unwrap_or("").to_lowercase();
        if [".zip", ".jar", ".kmz"].iter().any(|ext| lower.ends_with(ext))
            || content_type == "application/zip"
        {
            ContainerKind::Zip
        } else if lower.ends_with(".tar")
            || content_type == "application/tar"
            || content_type == "application/x-tar"
        {
            ContainerKind::Tar
        } else if [".gz", ".tgz", ".gzip"].iter().any(|ext| lower.ends_with(ext))
            || content_type == "application/gzip"
            || content_type == "application/x-gzip"
        {
            ContainerKind::Gzip
        } else {
            ContainerKind::Plain
        }
    }
}

/// Name of the stream inside a gzip file: `.gz` and `.gzip` are stripped,
/// `.tgz` becomes `.tar`.
pub fn gunzipped_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let stripped = if lower.ends_with(".tgz") {
        format!("{}tar", &name[..name.len() - 3])
    } else if lower.ends_with(".gzip") {
        name[..name.len() - 5].to_string()
    } else if lower.ends_with(".gz") {
        name[..name.len() - 3].to_string()
    } else {
        name.to_string()
    };
    if stripped.is_empty() {
        "unnamed".to_string()
    } else {
        stripped
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveReader {
    target_dir: PathBuf,
    overwrite: bool,
    charset: Charset,
    sanitize_entry_paths: bool,
}

impl ArchiveReader {
    pub fn new<P: AsRef<Path>>(target_dir: P) -> Self {
        Self {
            target_dir: target_dir.as_ref().to_path_buf(),
            overwrite: false,
            charset: Charset::default(),
            sanitize_entry_paths: true,
        }
    }

    pub fn from_config<P: AsRef<Path>>(
        target_dir: P,
        config: &ArchiveConfig,
    ) -> Result<Self, ArchiveError> {
        Ok(Self::new(target_dir)
            .overwrite(config.overwrite)
            .charset(Charset::for_label(&config.charset)?)
            .sanitize_entry_paths(config.sanitize_entry_paths))
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn sanitize_entry_paths(mut self, sanitize: bool) -> Self {
        self.sanitize_entry_paths = sanitize;
        self
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Whether a file name looks like a container this reader can unpack.
    pub fn can_handle(name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                ARCHIVE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// Extracts the file at `path`. On cancellation the files written so far
    /// are returned.
    pub fn run(&self, path: &Path, monitor: &ImporterMonitor) -> Result<Vec<PathBuf>, ArchiveError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();
        info!("Unpacking {} into {}", redact_path(path), redact_path(&self.target_dir));
        monitor.begin_task(&format!("Unpacking {}", name), None);

        let file = File::open(path).map_err(|e| ArchiveError::ReadArchive {
            name: name.clone(),
            source: e,
        })?;

        let mut extraction = Extraction::new(self, monitor);
        self.ensure_dir(&self.target_dir)?;

        // A seekable zip is read through its central directory, which also
        // covers entries written with data descriptors.
        if ContainerKind::detect(&name, None) == ContainerKind::Zip {
            let mut archive = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Zip {
                name: name.clone(),
                message: e.to_string(),
            })?;
            extraction.zip_archive(&self.target_dir, &name, &mut archive)?;
            monitor.worked(1);
        } else {
            let mut input = io::BufReader::new(file);
            extraction.handle(&self.target_dir, &name, None, &mut input)?;
        }

        monitor.done();
        Ok(extraction.finish())
    }

    /// Extracts a stream. `name` and `content_type` decide how the stream
    /// is decoded.
    pub fn run_stream<R: Read>(
        &self,
        mut input: R,
        name: &str,
        content_type: Option<&str>,
        monitor: &ImporterMonitor,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        monitor.begin_task(&format!("Unpacking {}", name), None);
        self.ensure_dir(&self.target_dir)?;
        let mut extraction = Extraction::new(self, monitor);
        extraction.handle(&self.target_dir, name, content_type, &mut input)?;
        monitor.done();
        Ok(extraction.finish())
    }

    fn ensure_dir(&self, dir: &Path) -> Result<(), ArchiveError> {
        std::fs::create_dir_all(dir).map_err(|e| ArchiveError::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })
    }

    fn entry_path(&self, entry_name: &str) -> PathBuf {
        if !self.sanitize_entry_paths {
            return PathBuf::from(entry_name);
        }
        if is_unsafe_entry_name(entry_name) {
            warn!("Archive entry '{}' points outside its container, stripping", entry_name);
        }
        relative_entry_path(entry_name)
    }
}

struct Extraction<'a> {
    reader: &'a ArchiveReader,
    monitor: &'a ImporterMonitor,
    results: Vec<PathBuf>,
}

impl<'a> Extraction<'a> {
    fn new(reader: &'a ArchiveReader, monitor: &'a ImporterMonitor) -> Self {
        Self {
            reader,
            monitor,
            results: Vec::new(),
        }
    }

    fn finish(self) -> Vec<PathBuf> {
        if self.monitor.is_canceled() {
            info!("Unpacking canceled after {} file(s)", self.results.len());
        }
        self.results
    }

    fn handle(
        &mut self,
        dir: &Path,
        name: &str,
        content_type: Option<&str>,
        input: &mut dyn Read,
    ) -> Result<(), ArchiveError> {
        if self.monitor.is_canceled() {
            return Ok(());
        }
        self.monitor.sub_task(name);

        match ContainerKind::detect(name, content_type) {
            ContainerKind::Zip => self.zip_stream(dir, name, input)?,
            ContainerKind::Tar => self.tar(dir, name, input)?,
            ContainerKind::Gzip => self.gzip(dir, name, input)?,
            ContainerKind::Plain => self.plain_file(dir, name, input)?,
        }
        self.monitor.worked(1);
        Ok(())
    }

    fn zip_archive<R: Read + Seek>(
        &mut self,
        dir: &Path,
        name: &str,
        archive: &mut zip::ZipArchive<R>,
    ) -> Result<(), ArchiveError> {
        debug!("ZIP: {}", name);
        for index in 0..archive.len() {
            if self.monitor.is_canceled() {
                break;
            }
            let mut entry = archive.by_index(index).map_err(|e| ArchiveError::Zip {
                name: name.to_string(),
                message: e.to_string(),
            })?;
            let entry_name = self.reader.charset.decode_name(entry.name_raw())?;
            let is_dir = entry.is_dir();
            self.entry(dir, &entry_name, is_dir, &mut entry)?;
        }
        Ok(())
    }

    fn zip_stream(&mut self, dir: &Path, name: &str, mut input: &mut dyn Read) -> Result<(), ArchiveError> {
        debug!("ZIP: {}", name);
        loop {
            if self.monitor.is_canceled() {
                break;
            }
            let next = zip::read::read_zipfile_from_stream(&mut input).map_err(|e| {
                ArchiveError::Zip {
                    name: name.to_string(),
                    message: e.to_string(),
                }
            })?;
            let Some(mut entry) = next else {
                break;
            };
            let entry_name = self.reader.charset.decode_name(entry.name_raw())?;
            let is_dir = entry.is_dir();
            self.entry(dir, &entry_name, is_dir, &mut entry)?;
        }
        Ok(())
    }

    fn tar(&mut self, dir: &Path, name: &str, input: &mut dyn Read) -> Result<(), ArchiveError> {
        debug!("TAR: {}", name);
        let read_error = |e: io::Error| ArchiveError::ReadArchive {
            name: name.to_string(),
            source: e,
        };
        let mut archive = tar::Archive::new(input);
        for entry in archive.entries().map_err(read_error)? {
            if self.monitor.is_canceled() {
                break;
            }
            let mut entry = entry.map_err(read_error)?;
            let entry_name = self.reader.charset.decode_name(&entry.path_bytes())?;
            let entry_type = entry.header().entry_type();
            if !entry_type.is_dir() && !entry_type.is_file() {
                debug!("Skipping tar entry '{}' of type {:?}", entry_name, entry_type);
                continue;
            }
            self.entry(dir, &entry_name, entry_type.is_dir(), &mut entry)?;
        }
        Ok(())
    }

    fn gzip(&mut self, dir: &Path, name: &str, input: &mut dyn Read) -> Result<(), ArchiveError> {
        debug!("GZIP: {}", name);
        let mut decoder = flate2::read::GzDecoder::new(input);
        let inner = gunzipped_name(name);
        self.handle(dir, &inner, None, &mut decoder)
    }

    /// Places one container entry below `dir` and dispatches on its name.
    fn entry(
        &mut self,
        dir: &Path,
        entry_name: &str,
        is_dir: bool,
        input: &mut dyn Read,
    ) -> Result<(), ArchiveError> {
        let relative = self.reader.entry_path(entry_name);
        if relative.as_os_str().is_empty() {
            debug!("Skipping archive entry with empty path: '{}'", entry_name);
            return Ok(());
        }

        if is_dir {
            self.reader.ensure_dir(&dir.join(&relative))?;
            return Ok(());
        }

        let file_dir = match relative.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                let file_dir = dir.join(parent);
                self.reader.ensure_dir(&file_dir)?;
                file_dir
            }
            _ => dir.to_path_buf(),
        };
        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry_name.to_string());
        self.handle(&file_dir, &file_name, None, input)
    }

    fn plain_file(&mut self, dir: &Path, name: &str, input: &mut dyn Read) -> Result<(), ArchiveError> {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "unnamed".into());
        let target = dir.join(file_name);
        debug!("FILE: {}", redact_path(&target));

        let mut options = OpenOptions::new();
        options.write(true);
        if self.reader.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut output = match options.open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::FileExists(target));
            }
            Err(e) => {
                return Err(ArchiveError::WriteFile {
                    path: target,
                    source: e,
                });
            }
        };

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            if self.monitor.is_canceled() {
                drop(output);
                if let Err(e) = std::fs::remove_file(&target) {
                    warn!("Failed to remove partial file {}: {}", redact_path(&target), e);
                }
                return Ok(());
            }
            let read = match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ArchiveError::Extract {
                        path: target,
                        source: e,
                    });
                }
            };
            output
                .write_all(&buffer[..read])
                .map_err(|e| ArchiveError::WriteFile {
                    path: target.clone(),
                    source: e,
                })?;
        }

        self.results.push(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_handle() {
        assert!(ArchiveReader::can_handle("data.zip"));
        assert!(ArchiveReader::can_handle("DATA.ZIP"));
        assert!(ArchiveReader::can_handle("doc.kmz"));
        assert!(ArchiveReader::can_handle("lib.jar"));
        assert!(ArchiveReader::can_handle("bundle.tar"));
        assert!(ArchiveReader::can_handle("bundle.tar.gz"));
        assert!(!ArchiveReader::can_handle("bundle.tgz"));
        assert!(!ArchiveReader::can_handle("points.csv.gzip"));
        assert!(!ArchiveReader::can_handle("points.csv"));
        assert!(!ArchiveReader::can_handle("zip"));
    }

    #[test]
    fn test_detect_prefers_name() {
        assert_eq!(ContainerKind::detect("a.zip", None), ContainerKind::Zip);
        assert_eq!(ContainerKind::detect("a.tar", None), ContainerKind::Tar);
        assert_eq!(ContainerKind::detect("a.tar.gz", None), ContainerKind::Gzip);
        assert_eq!(ContainerKind::detect("a.csv", None), ContainerKind::Plain);
        assert_eq!(
            ContainerKind::detect("upload", Some("application/zip")),
            ContainerKind::Zip
        );
        assert_eq!(
            ContainerKind::detect("upload", Some("application/gzip")),
            ContainerKind::Gzip
        );
    }

    #[test]
    fn test_gunzipped_name() {
        assert_eq!(gunzipped_name("data.tar.gz"), "data.tar");
        assert_eq!(gunzipped_name("data.tgz"), "data.tar");
        assert_eq!(gunzipped_name("points.csv.gzip"), "points.csv");
        assert_eq!(gunzipped_name("POINTS.CSV.GZ"), "POINTS.CSV");
        assert_eq!(gunzipped_name(".gz"), "unnamed");
    }
}
