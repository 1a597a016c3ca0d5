mod tempdir;
mod upload;

pub use tempdir::ImportTempDir;
pub use upload::{
    upload_file_name, write_upload, NoopUploadProgress, UploadEvent, UploadProgress, UploadSettings,
};

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Creates `filename` in `dir` exclusively. If the name is taken, tries
/// `name_2.ext`, `name_3.ext`, ... up to 1000.
pub fn create_unique_file(dir: &Path, filename: &str) -> Result<(File, PathBuf), StorageError> {
    let (base, ext) = match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => (&filename[..dot_pos], Some(&filename[dot_pos..])),
        _ => (filename, None),
    };

    for counter in 1..=1000 {
        let candidate = if counter == 1 {
            filename.to_string()
        } else {
            match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            }
        };
        let path = dir.join(&candidate);

        // create_new is O_CREAT | O_EXCL
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(StorageError::WriteFile { path, source: e });
            }
        }
    }

    Err(StorageError::FileExists(dir.join(filename)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_directory_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        ensure_directory(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_directory(&nested).unwrap();
    }

    #[test]
    fn test_create_unique_file_numbers_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let (_, first) = create_unique_file(temp_dir.path(), "data.zip").unwrap();
        let (_, second) = create_unique_file(temp_dir.path(), "data.zip").unwrap();
        let (_, third) = create_unique_file(temp_dir.path(), "data.zip").unwrap();
        assert_eq!(first.file_name().unwrap(), "data.zip");
        assert_eq!(second.file_name().unwrap(), "data_2.zip");
        assert_eq!(third.file_name().unwrap(), "data_3.zip");
    }

    #[test]
    fn test_create_unique_file_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        create_unique_file(temp_dir.path(), "README").unwrap();
        let (_, second) = create_unique_file(temp_dir.path(), "README").unwrap();
        assert_eq!(second.file_name().unwrap(), "README_2");
    }

    #[test]
    fn test_create_unique_file_dotfile() {
        let temp_dir = TempDir::new().unwrap();
        create_unique_file(temp_dir.path(), ".hidden").unwrap();
        let (_, second) = create_unique_file(temp_dir.path(), ".hidden").unwrap();
        assert_eq!(second.file_name().unwrap(), ".hidden_2");
    }
}
