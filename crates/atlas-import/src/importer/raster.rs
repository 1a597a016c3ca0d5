//! Georeferenced images: GeoTIFF, or PNG/JPEG with a world file.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::factory::FileImporterFactory;
use super::files::{bind_file, file_name, FILE_SLOT};
use super::prompts::CrsPrompt;
use super::{Importer, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite, Preview, Verdict};
use crate::context::{ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use crate::error::{ContextError, ImporterError};
use crate::model::{find_world_file, RasterFormat, RasterSource};

const OUTPUT_SLOTS: &[Slot] = &[Slot::new("raster", TypeTag::Raster)];

pub fn factory(env: &ImporterEnv) -> Box<dyn ImporterFactory> {
    FileImporterFactory::boxed("raster", &["tif", "tiff", "png", "jpg", "jpeg"], env, |env| {
        Box::new(RasterFileImporter::new(env.clone()))
    })
}

fn read_header(path: &Path) -> Result<Vec<u8>, ImporterError> {
    let read_error = |e| ImporterError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    };
    let mut header = Vec::with_capacity(16);
    std::fs::File::open(path)
        .map_err(read_error)?
        .take(16)
        .read_to_end(&mut header)
        .map_err(read_error)?;
    Ok(header)
}

pub struct RasterFileImporter {
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    crs: Option<CrsPrompt>,
    source: Option<Arc<RasterSource>>,
    raster: Option<Arc<RasterSource>>,
}

impl RasterFileImporter {
    pub fn new(_env: ImporterEnv) -> Self {
        Self {
            site: None,
            file: None,
            crs: None,
            source: None,
            raster: None,
        }
    }
}

impl Inbound for RasterFileImporter {
    fn input_slots(&self) -> &'static [Slot] {
        FILE_SLOT
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        bind_file(&mut self.file, slot, value)
    }

    fn owner_name(&self) -> &'static str {
        "RasterFileImporter"
    }
}

impl Outbound for RasterFileImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        vec![OutputValue::new(
            OUTPUT_SLOTS[0],
            self.raster.clone().map(ContextValue::Raster),
        )]
    }
}

impl Importer for RasterFileImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.set_summary(format!("Image: {}", file_name(file)));
        site.set_description("Imports a georeferenced image as a raster layer.");
        site.set_icon("raster");
        site.set_terminal(true);
        self.site = Some(site);
        Ok(())
    }

    fn create_prompts(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let site = self.site.as_ref().ok_or(ImporterError::NotInitialized)?;
        self.crs = Some(CrsPrompt::new(site, "EPSG:4326")?);
        Ok(())
    }

    fn verify(&mut self, _monitor: &ImporterMonitor) -> Result<Verdict, ImporterError> {
        self.source = None;
        let file = self.file.clone().ok_or(ImporterError::NotInitialized)?;

        let header = read_header(&file)?;
        let Some(format) = RasterFormat::sniff(&header) else {
            return Ok(Verdict::NotOk(format!(
                "{} is not a GeoTIFF, PNG or JPEG image.",
                file_name(&file)
            )));
        };
        let world_file = find_world_file(&file, format);
        if world_file.is_none() && !format.is_self_referenced() {
            return Ok(Verdict::NotOk(format!(
                "The {} image has no world file ({}).",
                format.name(),
                format.world_file_extensions().join(", ")
            )));
        }
        let crs_value = self
            .crs
            .as_ref()
            .map(|p| p.prompt().current_value())
            .unwrap_or_default();
        let Some(crs) = self.crs.as_ref().and_then(CrsPrompt::crs) else {
            return Ok(Verdict::NotOk(format!(
                "'{}' is not a valid coordinate reference system.",
                crs_value
            )));
        };
        let size_bytes = std::fs::metadata(&file)
            .map_err(|e| ImporterError::ReadFile {
                path: file.clone(),
                source: e,
            })?
            .len();

        self.source = Some(Arc::new(RasterSource {
            path: file,
            format,
            world_file,
            crs: Some(crs),
            size_bytes,
        }));
        Ok(Verdict::Ok)
    }

    fn preview(&self) -> Preview {
        match &self.source {
            Some(source) => Preview::raster(source),
            None => Preview::message("The image has not been checked yet."),
        }
    }

    fn execute(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| ImporterError::NotVerified("the image has not been checked".to_string()))?;
        self.raster = Some(source);
        Ok(())
    }
}
