use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RasterFormat {
    GeoTiff,
    Png,
    Jpeg,
}

impl RasterFormat {
    /// Detects the format from the first bytes of a file.
    pub fn sniff(header: &[u8]) -> Option<RasterFormat> {
        if header.starts_with(b"II*\0") || header.starts_with(b"MM\0*") {
            Some(RasterFormat::GeoTiff)
        } else if header.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(RasterFormat::Png)
        } else if header.starts_with(&[0xff, 0xd8, 0xff]) {
            Some(RasterFormat::Jpeg)
        } else {
            None
        }
    }

    /// World file extensions to look for next to an image, most specific
    /// first.
    pub fn world_file_extensions(self) -> &'static [&'static str] {
        match self {
            RasterFormat::GeoTiff => &["tfw", "tifw", "wld"],
            RasterFormat::Png => &["pgw", "pngw", "wld"],
            RasterFormat::Jpeg => &["jgw", "jpgw", "wld"],
        }
    }

    /// GeoTIFF carries its georeference inline.
    pub fn is_self_referenced(self) -> bool {
        matches!(self, RasterFormat::GeoTiff)
    }

    pub fn name(self) -> &'static str {
        match self {
            RasterFormat::GeoTiff => "GeoTIFF",
            RasterFormat::Png => "PNG",
            RasterFormat::Jpeg => "JPEG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterSource {
    pub path: PathBuf,
    pub format: RasterFormat,
    pub world_file: Option<PathBuf>,
    pub crs: Option<String>,
    pub size_bytes: u64,
}

/// Finds the world file belonging to `image`, if one exists.
pub fn find_world_file(image: &Path, format: RasterFormat) -> Option<PathBuf> {
    format
        .world_file_extensions()
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_uppercase()])
        .map(|ext| image.with_extension(ext))
        .find(|candidate| candidate.is_file())
}
