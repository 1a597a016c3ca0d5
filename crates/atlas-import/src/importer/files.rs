use std::path::{Path, PathBuf};

use crate::context::{expect_tag, ContextValue, Slot, TypeTag};
use crate::error::ContextError;

/// Case-insensitive extension check.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// The `file` and `files` inputs shared by all file based factories.
#[derive(Debug, Clone, Default)]
pub struct FileInputs {
    file: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl FileInputs {
    pub const SLOTS: &'static [Slot] = &[
        Slot::new("file", TypeTag::File),
        Slot::new("files", TypeTag::Files),
    ];

    pub fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        expect_tag(slot, &value)?;
        match value {
            ContextValue::File(path) => self.file = Some(path),
            ContextValue::Files(paths) => self.files = paths,
            _ => {}
        }
        Ok(())
    }

    /// The single file first, then each element of the file list, without
    /// duplicates.
    pub fn all(&self) -> Vec<&PathBuf> {
        let mut result: Vec<&PathBuf> = Vec::new();
        for path in self.file.iter().chain(self.files.iter()) {
            if !result.contains(&path) {
                result.push(path);
            }
        }
        result
    }

    pub fn matching(&self, extensions: &[&str]) -> Vec<&PathBuf> {
        self.all()
            .into_iter()
            .filter(|path| has_extension(path, extensions))
            .collect()
    }
}

/// A single `file` input, for importers.
pub(crate) const FILE_SLOT: &[Slot] = &[Slot::new("file", TypeTag::File)];

pub(crate) fn bind_file(
    target: &mut Option<PathBuf>,
    slot: &Slot,
    value: ContextValue,
) -> Result<(), ContextError> {
    expect_tag(slot, &value)?;
    if let ContextValue::File(path) = value {
        *target = Some(path);
    }
    Ok(())
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string())
}
