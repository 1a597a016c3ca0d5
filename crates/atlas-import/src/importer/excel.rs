//! Spreadsheets (xlsx, xls, ods). One sheet is imported as a table.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use calamine::{open_workbook_auto, Reader};
use log::debug;

use super::factory::FileImporterFactory;
use super::files::{bind_file, file_name, file_stem, FILE_SLOT};
use super::prompts::SchemaNamePrompt;
use super::tabular::{build_features, NumberFormat, TableLayout};
use super::{
    ChoiceEditor, Importer, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite,
    NumberEditor, Preview, Severity, Verdict,
};
use crate::context::{ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use crate::error::{ContextError, ImporterError};
use crate::model::FeatureCollection;

pub const SHEET: &str = "sheet";
pub const IGNORE_BEFORE_HEADLINE: &str = "ignoreBeforeHeadline";
pub const HEADLINES: &str = "headlines";

const OUTPUT_SLOTS: &[Slot] = &[Slot::new("features", TypeTag::Features)];

pub fn factory(env: &ImporterEnv) -> Box<dyn ImporterFactory> {
    FileImporterFactory::boxed("excel", &["xlsx", "xlsm", "xls", "ods"], env, |env| {
        Box::new(ExcelFileImporter::new(env.clone()))
    })
}

fn open_error(path: &Path, e: impl std::fmt::Display) -> ImporterError {
    ImporterError::Format(format!("Failed to open spreadsheet {}: {}", file_name(path), e))
}

/// Reads all rows of `sheet` as text cells.
pub fn read_sheet(path: &Path, sheet: &str) -> Result<Vec<Vec<String>>, ImporterError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| open_error(path, e))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| ImporterError::Format(format!("Failed to read sheet '{}': {}", sheet, e)))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect())
}

pub fn sheet_names(path: &Path) -> Result<Vec<String>, ImporterError> {
    let workbook = open_workbook_auto(path).map_err(|e| open_error(path, e))?;
    Ok(workbook.sheet_names())
}

pub struct ExcelFileImporter {
    env: ImporterEnv,
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    schema_name: Option<SchemaNamePrompt>,
    parsed: Option<Arc<FeatureCollection>>,
    features: Option<Arc<FeatureCollection>>,
}

impl ExcelFileImporter {
    pub fn new(env: ImporterEnv) -> Self {
        Self {
            env,
            site: None,
            file: None,
            schema_name: None,
            parsed: None,
            features: None,
        }
    }

    fn lines(site: &ImporterSite, id: &str) -> Result<usize, ImporterError> {
        let value = site.prompt_value(id)?;
        value
            .trim()
            .parse()
            .map_err(|_| ImporterError::Format(format!("'{}' is not a valid number of lines", value)))
    }
}

impl Inbound for ExcelFileImporter {
    fn input_slots(&self) -> &'static [Slot] {
        FILE_SLOT
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        bind_file(&mut self.file, slot, value)
    }

    fn owner_name(&self) -> &'static str {
        "ExcelFileImporter"
    }
}

impl Outbound for ExcelFileImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        vec![OutputValue::new(
            OUTPUT_SLOTS[0],
            self.features.clone().map(ContextValue::Features),
        )]
    }
}

impl Importer for ExcelFileImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.set_summary(format!("Spreadsheet: {}", file_name(file)));
        site.set_description("Reads one sheet of a spreadsheet as a table.");
        site.set_icon("table");
        site.set_terminal(true);
        self.site = Some(site);
        Ok(())
    }

    fn create_prompts(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let site = Arc::clone(self.site.as_ref().ok_or(ImporterError::NotInitialized)?);
        let file = self.file.clone().ok_or(ImporterError::NotInitialized)?;

        let sheets = sheet_names(&file)?;
        let first = sheets
            .first()
            .cloned()
            .ok_or_else(|| ImporterError::Format("The spreadsheet has no sheets.".to_string()))?;
        let severity = if sheets.len() > 1 {
            Severity::Verify
        } else {
            Severity::Info
        };
        site.new_prompt(SHEET)?
            .summary("Sheet")
            .description("The sheet to import.")
            .value(first)
            .severity(severity)
            .editor(ChoiceEditor::new(sheets));
        site.new_prompt(IGNORE_BEFORE_HEADLINE)?
            .summary("Lines before the headline")
            .value("0")
            .editor(NumberEditor::new(0, 1000));
        site.new_prompt(HEADLINES)?
            .summary("Headlines")
            .value("1")
            .editor(NumberEditor::new(0, 10));
        self.schema_name = Some(SchemaNamePrompt::new(&site, &file_stem(&file))?);
        Ok(())
    }

    fn verify(&mut self, monitor: &ImporterMonitor) -> Result<Verdict, ImporterError> {
        self.parsed = None;
        let site = Arc::clone(self.site.as_ref().ok_or(ImporterError::NotInitialized)?);
        let file = self.file.clone().ok_or(ImporterError::NotInitialized)?;

        let sheet = site.prompt_value(SHEET)?;
        monitor.begin_task(&format!("Reading sheet {}", sheet), None);
        let rows = read_sheet(&file, &sheet)?;
        debug!("Read {} rows from sheet '{}'", rows.len(), sheet);

        let layout = TableLayout {
            ignore_before_headline: Self::lines(&site, IGNORE_BEFORE_HEADLINE)?,
            headlines: Self::lines(&site, HEADLINES)?,
            ignore_after_headline: 0,
            // Cell values are rendered without grouping
            number_format: NumberFormat {
                decimal: '.',
                grouping: None,
            },
        };
        let name = self
            .schema_name
            .as_ref()
            .map(SchemaNamePrompt::value)
            .unwrap_or_else(|| file_stem(&file));
        let collection = build_features(
            &name,
            rows,
            &layout,
            self.env.config.limits.import_features,
            monitor,
        )?;
        monitor.done();

        if collection.is_empty() {
            return Ok(Verdict::NotOk(format!("The sheet '{}' contains no data rows.", sheet)));
        }
        self.parsed = Some(Arc::new(collection));
        Ok(Verdict::Ok)
    }

    fn preview(&self) -> Preview {
        match &self.parsed {
            Some(features) => Preview::table(features, self.env.config.limits.preview_features),
            None => Preview::message("The sheet has not been read yet."),
        }
    }

    fn execute(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let parsed = self
            .parsed
            .as_ref()
            .ok_or_else(|| ImporterError::NotVerified("the sheet has not been read".to_string()))?;
        let name = self
            .schema_name
            .as_ref()
            .map(SchemaNamePrompt::value)
            .unwrap_or_else(|| parsed.schema.name.clone());
        self.features = Some(Arc::new(parsed.renamed(&name)));
        Ok(())
    }
}
