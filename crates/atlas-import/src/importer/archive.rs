//! Offers to unpack zip, tar and gzip files. Its output is the list of
//! unpacked files, which later stages pick up.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use super::factory::FileImporterFactory;
use super::files::{bind_file, file_name, FILE_SLOT};
use super::prompts::CharsetPrompt;
use super::{Importer, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite, Preview, Verdict};
use crate::archive::{ArchiveReader, ARCHIVE_EXTENSIONS};
use crate::context::{ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use crate::error::{ContextError, ImporterError};
use crate::storage::ImportTempDir;

pub const CHARSET_PROMPT: &str = "charset";

const OUTPUT_SLOTS: &[Slot] = &[Slot::new("files", TypeTag::Files)];

pub fn factory(env: &ImporterEnv) -> Box<dyn ImporterFactory> {
    FileImporterFactory::boxed("archive", ARCHIVE_EXTENSIONS, env, |env| {
        Box::new(ArchiveFileImporter::new(env.clone()))
    })
}

pub struct ArchiveFileImporter {
    env: ImporterEnv,
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    charset: Option<CharsetPrompt>,
    unpacked: Option<ImportTempDir>,
    files: Vec<PathBuf>,
}

impl ArchiveFileImporter {
    pub fn new(env: ImporterEnv) -> Self {
        Self {
            env,
            site: None,
            file: None,
            charset: None,
            unpacked: None,
            files: Vec::new(),
        }
    }

    fn relative_names(&self) -> Vec<String> {
        let Some(root) = self.unpacked.as_ref().map(|dir| dir.path()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .files
            .iter()
            .map(|path| {
                path.strip_prefix(root)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        names.sort();
        names
    }
}

impl Inbound for ArchiveFileImporter {
    fn input_slots(&self) -> &'static [Slot] {
        FILE_SLOT
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        bind_file(&mut self.file, slot, value)
    }

    fn owner_name(&self) -> &'static str {
        "ArchiveFileImporter"
    }
}

impl Outbound for ArchiveFileImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        let files = (!self.files.is_empty()).then(|| ContextValue::Files(self.files.clone()));
        vec![OutputValue::new(OUTPUT_SLOTS[0], files)]
    }
}

impl Importer for ArchiveFileImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.set_summary(format!("Archive: {}", file_name(file)));
        site.set_description("Unpacks the archive and offers importers for the files it contains.");
        site.set_icon("archive");
        site.set_terminal(false);
        self.site = Some(site);
        Ok(())
    }

    fn create_prompts(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let site = self.site.as_ref().ok_or(ImporterError::NotInitialized)?;
        self.charset = Some(CharsetPrompt::new(
            site,
            CHARSET_PROMPT,
            &self.env.config.archive.charset,
        )?);
        Ok(())
    }

    fn verify(&mut self, monitor: &ImporterMonitor) -> Result<Verdict, ImporterError> {
        self.files.clear();
        self.unpacked = None;

        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        let charset = self
            .charset
            .as_ref()
            .ok_or(ImporterError::NotInitialized)?
            .charset()?;

        let target = ImportTempDir::create_in(&self.env.work_dir, "archive")?
            .keep(self.env.config.keep_temp_files);
        let reader = ArchiveReader::new(target.path())
            .charset(charset)
            .overwrite(self.env.config.archive.overwrite)
            .sanitize_entry_paths(self.env.config.archive.sanitize_entry_paths);
        let files = reader.run(file, monitor)?;

        if monitor.is_canceled() {
            return Ok(Verdict::NotOk("Unpacking was canceled.".to_string()));
        }
        info!("Unpacked {} file(s) from {}", files.len(), file_name(file));
        self.files = files;
        self.unpacked = Some(target);

        if self.files.is_empty() {
            Ok(Verdict::NotOk("The archive contains no files.".to_string()))
        } else {
            Ok(Verdict::Ok)
        }
    }

    fn preview(&self) -> Preview {
        if self.files.is_empty() {
            return Preview::message("The archive has not been unpacked yet.");
        }
        Preview::Files {
            names: self.relative_names(),
        }
    }

    fn execute(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        if self.files.is_empty() {
            return Err(ImporterError::NotVerified(
                "the archive has not been unpacked".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::context::{collect_outputs, inject_inputs, ContextMap};
    use crate::pipeline::{ChangeSignal, ContextEventBroadcaster, ContextId};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &std::path::Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn importer_for(temp_dir: &TempDir, archive: &std::path::Path) -> ArchiveFileImporter {
        let env = ImporterEnv::new(Arc::new(ImportConfig::default()), temp_dir.path());
        let mut importer = ArchiveFileImporter::new(env);
        let values = ContextMap::from_values(vec![ContextValue::File(archive.to_path_buf())]);
        inject_inputs(&mut importer, &values).unwrap();
        let site = Arc::new(ImporterSite::new(
            ContextId::new(),
            ChangeSignal::detached(),
            ContextEventBroadcaster::default(),
        ));
        let monitor = ImporterMonitor::new();
        importer.init(site, &monitor).unwrap();
        importer.create_prompts(&monitor).unwrap();
        importer
    }

    #[test]
    fn test_verify_unpacks_and_previews_sorted_names() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("data.zip");
        write_zip(&archive, &[("readme.txt", "hello"), ("dir/a.csv", "x,y\n1,2\n")]);

        let mut importer = importer_for(&temp_dir, &archive);
        let verdict = importer.verify(&ImporterMonitor::new()).unwrap();
        assert_eq!(verdict, Verdict::Ok);
        assert_eq!(
            importer.preview(),
            Preview::Files {
                names: vec!["dir/a.csv".into(), "readme.txt".into()]
            }
        );

        importer.execute(&ImporterMonitor::new()).unwrap();
        let outputs = collect_outputs(&importer).unwrap();
        assert_eq!(outputs.files().map(<[PathBuf]>::len), Some(2));
    }

    #[test]
    fn test_verify_twice_does_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("data.zip");
        write_zip(&archive, &[("a.txt", "a")]);

        let mut importer = importer_for(&temp_dir, &archive);
        assert!(importer.verify(&ImporterMonitor::new()).unwrap().is_ok());
        assert!(importer.verify(&ImporterMonitor::new()).unwrap().is_ok());
    }

    #[test]
    fn test_summary_and_prompt() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("data.zip");
        write_zip(&archive, &[("a.txt", "a")]);
        let importer = importer_for(&temp_dir, &archive);
        let site = importer.site().unwrap();
        assert_eq!(site.summary(), "Archive: data.zip");
        assert!(!site.is_terminal());
        assert_eq!(site.prompt_value(CHARSET_PROMPT).unwrap(), "UTF-8");
    }

    #[test]
    fn test_execute_before_verify_fails() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("data.zip");
        write_zip(&archive, &[("a.txt", "a")]);
        let mut importer = importer_for(&temp_dir, &archive);
        assert!(matches!(
            importer.execute(&ImporterMonitor::new()),
            Err(ImporterError::NotVerified(_))
        ));
        assert!(collect_outputs(&importer).unwrap().is_empty());
    }
}
