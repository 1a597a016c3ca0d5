//! Delimited text files with optional coordinate columns.

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use super::factory::FileImporterFactory;
use super::files::{bind_file, file_name, file_stem, FILE_SLOT};
use super::prompts::{CharsetPrompt, SchemaNamePrompt};
use super::tabular::{build_features, NumberFormat, TableLayout, NUMBER_FORMATS};
use super::{
    ChoiceEditor, Importer, ImporterEnv, ImporterFactory, ImporterMonitor, ImporterSite,
    NumberEditor, Preview, Verdict,
};
use crate::context::{ContextValue, Inbound, Outbound, OutputValue, Slot, TypeTag};
use crate::error::{ContextError, ImporterError};
use crate::model::FeatureCollection;

pub const IGNORE_BEFORE_HEADLINE: &str = "ignoreBeforeHeadline";
pub const HEADLINES: &str = "headlines";
pub const IGNORE_AFTER_HEADLINE: &str = "ignoreAfterHeadline";
pub const SEPARATOR: &str = "separator";
pub const QUOTE_CHARACTER: &str = "quoteCharacter";
pub const ENCODING: &str = "encoding";
pub const NUMBER_FORMAT: &str = "numberFormat";

/// Separators offered to the user. `\t` stands for a tab.
pub const SEPARATORS: &[&str] = &[",", "|", ";", "\\t", " "];
pub const QUOTES: &[&str] = &["\"", "'"];

const OUTPUT_SLOTS: &[Slot] = &[Slot::new("features", TypeTag::Features)];

pub fn factory(env: &ImporterEnv) -> Box<dyn ImporterFactory> {
    FileImporterFactory::boxed("csv", &["csv", "tsv"], env, |env| {
        Box::new(CsvFileImporter::new(env.clone()))
    })
}

/// Parses a separator value as shown in the prompt into a byte.
pub fn separator_byte(value: &str) -> Option<u8> {
    match value {
        "\\t" | "\t" => Some(b'\t'),
        other => single_ascii(other),
    }
}

fn single_ascii(value: &str) -> Option<u8> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Some(c as u8),
        _ => None,
    }
}

pub struct CsvFileImporter {
    env: ImporterEnv,
    site: Option<Arc<ImporterSite>>,
    file: Option<PathBuf>,
    encoding: Option<CharsetPrompt>,
    schema_name: Option<SchemaNamePrompt>,
    parsed: Option<Arc<FeatureCollection>>,
    features: Option<Arc<FeatureCollection>>,
}

impl CsvFileImporter {
    pub fn new(env: ImporterEnv) -> Self {
        Self {
            env,
            site: None,
            file: None,
            encoding: None,
            schema_name: None,
            parsed: None,
            features: None,
        }
    }

    fn site_ref(&self) -> Result<&Arc<ImporterSite>, ImporterError> {
        self.site.as_ref().ok_or(ImporterError::NotInitialized)
    }

    fn number_prompt(&self, id: &str) -> Result<usize, ImporterError> {
        let value = self.site_ref()?.prompt_value(id)?;
        value
            .trim()
            .parse()
            .map_err(|_| ImporterError::Format(format!("'{}' is not a valid number of lines", value)))
    }

    fn layout(&self) -> Result<TableLayout, ImporterError> {
        let site = self.site_ref()?;
        let pattern = site.prompt_value(NUMBER_FORMAT)?;
        let number_format = NumberFormat::parse(&pattern)
            .ok_or_else(|| ImporterError::Format(format!("Unknown number format '{}'", pattern)))?;
        Ok(TableLayout {
            ignore_before_headline: self.number_prompt(IGNORE_BEFORE_HEADLINE)?,
            headlines: self.number_prompt(HEADLINES)?,
            ignore_after_headline: self.number_prompt(IGNORE_AFTER_HEADLINE)?,
            number_format,
        })
    }
}

impl Inbound for CsvFileImporter {
    fn input_slots(&self) -> &'static [Slot] {
        FILE_SLOT
    }

    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError> {
        bind_file(&mut self.file, slot, value)
    }

    fn owner_name(&self) -> &'static str {
        "CsvFileImporter"
    }
}

impl Outbound for CsvFileImporter {
    fn output_values(&self) -> Vec<OutputValue> {
        vec![OutputValue::new(
            OUTPUT_SLOTS[0],
            self.features.clone().map(ContextValue::Features),
        )]
    }
}

impl Importer for CsvFileImporter {
    fn site(&self) -> Option<&Arc<ImporterSite>> {
        self.site.as_ref()
    }

    fn init(&mut self, site: Arc<ImporterSite>, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let file = self.file.as_ref().ok_or(ImporterError::NotInitialized)?;
        site.set_summary(format!("CSV: {}", file_name(file)));
        site.set_description(
            "Reads a delimited text file. Columns named lon/lat or x/y become point geometries.",
        );
        site.set_icon("table");
        site.set_terminal(true);
        self.site = Some(site);
        Ok(())
    }

    fn create_prompts(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let site = Arc::clone(self.site_ref()?);
        let defaults = &self.env.config.csv;

        site.new_prompt(IGNORE_BEFORE_HEADLINE)?
            .summary("Lines before the headline")
            .description("Number of lines to skip before the headline.")
            .value("0")
            .editor(NumberEditor::new(0, 1000));
        site.new_prompt(HEADLINES)?
            .summary("Headlines")
            .description("Number of lines holding column names. Zero generates names.")
            .value("1")
            .editor(NumberEditor::new(0, 10));
        site.new_prompt(IGNORE_AFTER_HEADLINE)?
            .summary("Lines after the headline")
            .description("Number of lines to skip between the headline and the data.")
            .value("0")
            .editor(NumberEditor::new(0, 1000));
        site.new_prompt(SEPARATOR)?
            .summary("Separator")
            .description("The character separating the columns.")
            .value(defaults.separator.as_str())
            .editor(ChoiceEditor::new(SEPARATORS.iter().copied()).free_text(true));
        site.new_prompt(QUOTE_CHARACTER)?
            .summary("Quote character")
            .description("The character enclosing values that contain the separator.")
            .value(defaults.quote.as_str())
            .editor(ChoiceEditor::new(QUOTES.iter().copied()).free_text(true));
        self.encoding = Some(CharsetPrompt::new(&site, ENCODING, &defaults.encoding)?);
        site.new_prompt(NUMBER_FORMAT)?
            .summary("Number format")
            .description("How decimal and thousands separators are written.")
            .value(defaults.number_format.as_str())
            .editor(ChoiceEditor::new(NUMBER_FORMATS.iter().copied()));

        let stem = self
            .file
            .as_deref()
            .map(file_stem)
            .unwrap_or_else(|| "csv".to_string());
        self.schema_name = Some(SchemaNamePrompt::new(&site, &stem)?);
        Ok(())
    }

    fn verify(&mut self, monitor: &ImporterMonitor) -> Result<Verdict, ImporterError> {
        self.parsed = None;
        let file = self.file.clone().ok_or(ImporterError::NotInitialized)?;
        let site = Arc::clone(self.site_ref()?);

        let separator_value = site.prompt_value(SEPARATOR)?;
        let Some(separator) = separator_byte(&separator_value) else {
            return Ok(Verdict::NotOk(format!(
                "The separator must be a single character, got '{}'.",
                separator_value
            )));
        };
        let quote_value = site.prompt_value(QUOTE_CHARACTER)?;
        let Some(quote) = single_ascii(&quote_value) else {
            return Ok(Verdict::NotOk(format!(
                "The quote character must be a single character, got '{}'.",
                quote_value
            )));
        };
        let charset = self
            .encoding
            .as_ref()
            .ok_or(ImporterError::NotInitialized)?
            .charset()?;
        let layout = self.layout()?;

        monitor.begin_task(&format!("Reading {}", file_name(&file)), None);
        let bytes = std::fs::read(&file).map_err(|e| ImporterError::ReadFile {
            path: file.clone(),
            source: e,
        })?;
        let text = charset.decode(&bytes).ok_or_else(|| ImporterError::WrongCharset {
            charset: charset.label().to_string(),
        })?;

        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(separator)
            .quote(quote)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            if index % 1000 == 0 && monitor.is_canceled() {
                return Ok(Verdict::NotOk("Reading was canceled.".to_string()));
            }
            let record = record.map_err(|e| ImporterError::Format(format!("CSV error: {}", e)))?;
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }
        debug!("Read {} CSV rows from {}", rows.len(), file_name(&file));

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
            return Ok(Verdict::NotOk("The file contains no data rows.".to_string()));
        }
        self.parsed = Some(Arc::new(collection));
        Ok(Verdict::Ok)
    }

    fn preview(&self) -> Preview {
        match &self.parsed {
            Some(features) => Preview::table(features, self.env.config.limits.preview_features),
            None => Preview::message("The file has not been read yet."),
        }
    }

    fn execute(&mut self, _monitor: &ImporterMonitor) -> Result<(), ImporterError> {
        let parsed = self
            .parsed
            .as_ref()
            .ok_or_else(|| ImporterError::NotVerified("the file has not been read".to_string()))?;
        let name = self
            .schema_name
            .as_ref()
            .map(SchemaNamePrompt::value)
            .unwrap_or_else(|| parsed.schema.name.clone());
        self.features = Some(Arc::new(parsed.renamed(&name)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::context::{collect_outputs, inject_inputs, ContextMap};
    use crate::model::GeometryKind;
    use crate::pipeline::{ChangeSignal, ContextEventBroadcaster, ContextId};
    use tempfile::TempDir;

    fn importer_for(temp_dir: &TempDir, name: &str, content: &[u8]) -> CsvFileImporter {
        let path = temp_dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        let env = ImporterEnv::new(Arc::new(ImportConfig::default()), temp_dir.path());
        let mut importer = CsvFileImporter::new(env);
        inject_inputs(
            &mut importer,
            &ContextMap::from_values(vec![ContextValue::File(path)]),
        )
        .unwrap();
        let site = Arc::new(ImporterSite::new(
            ContextId::new(),
            ChangeSignal::detached(),
            ContextEventBroadcaster::default(),
        ));
        importer.init(site, &ImporterMonitor::new()).unwrap();
        importer.create_prompts(&ImporterMonitor::new()).unwrap();
        importer
    }

    #[test]
    fn test_separator_byte() {
        assert_eq!(separator_byte(","), Some(b','));
        assert_eq!(separator_byte("\\t"), Some(b'\t'));
        assert_eq!(separator_byte(" "), Some(b' '));
        assert_eq!(separator_byte(";;"), None);
        assert_eq!(separator_byte("ä"), None);
    }

    #[test]
    fn test_prompts_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let importer = importer_for(&temp_dir, "points.csv", b"a\n1\n");
        let ids: Vec<String> = importer
            .site()
            .unwrap()
            .prompts()
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(
            ids,
            vec![
                IGNORE_BEFORE_HEADLINE,
                HEADLINES,
                IGNORE_AFTER_HEADLINE,
                SEPARATOR,
                QUOTE_CHARACTER,
                ENCODING,
                NUMBER_FORMAT,
                SchemaNamePrompt::ID,
            ]
        );
    }

    #[test]
    fn test_verify_and_execute_points() {
        let temp_dir = TempDir::new().unwrap();
        let mut importer =
            importer_for(&temp_dir, "points.csv", b"name,lon,lat\nA,13.4,52.5\nB,11.6,48.1\n");
        assert_eq!(importer.verify(&ImporterMonitor::new()).unwrap(), Verdict::Ok);
        match importer.preview() {
            Preview::Table { total, columns, .. } => {
                assert_eq!(total, 2);
                assert_eq!(columns.last().map(String::as_str), Some("geometry"));
            }
            other => panic!("unexpected preview {:?}", other),
        }

        importer
            .site()
            .unwrap()
            .prompt(SchemaNamePrompt::ID)
            .unwrap()
            .value("stations");
        importer.execute(&ImporterMonitor::new()).unwrap();
        let outputs = collect_outputs(&importer).unwrap();
        let features = outputs.features().unwrap();
        assert_eq!(features.schema.name, "stations");
        assert_eq!(features.schema.geometry, Some(GeometryKind::Point));
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn test_semicolon_and_german_numbers() {
        let temp_dir = TempDir::new().unwrap();
        let mut importer =
            importer_for(&temp_dir, "orte.csv", "ort;x;y\nKöln;6,96;50,94\n".as_bytes());
        let site = Arc::clone(importer.site().unwrap());
        site.prompt(SEPARATOR).unwrap().value(";");
        site.prompt(NUMBER_FORMAT).unwrap().value("1.234,56");

        assert_eq!(importer.verify(&ImporterMonitor::new()).unwrap(), Verdict::Ok);
        importer.execute(&ImporterMonitor::new()).unwrap();
        let outputs = collect_outputs(&importer).unwrap();
        let feature = &outputs.features().unwrap().features[0];
        assert_eq!(feature.properties["ort"], serde_json::json!("Köln"));
        assert!(feature.geometry.is_some());
    }

    #[test]
    fn test_wrong_encoding_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut importer = importer_for(&temp_dir, "latin.csv", b"name\nK\xf6ln\n");
        let err = importer.verify(&ImporterMonitor::new()).unwrap_err();
        assert_eq!(err.to_string(), "Wrong charset: UTF-8");

        importer
            .site()
            .unwrap()
            .prompt(ENCODING)
            .unwrap()
            .value("ISO-8859-1");
        assert_eq!(importer.verify(&ImporterMonitor::new()).unwrap(), Verdict::Ok);
    }

    #[test]
    fn test_bad_separator_is_not_ok() {
        let temp_dir = TempDir::new().unwrap();
        let mut importer = importer_for(&temp_dir, "a.csv", b"a\n1\n");
        importer
            .site()
            .unwrap()
            .prompt(SEPARATOR)
            .unwrap()
            .value("::");
        assert!(matches!(
            importer.verify(&ImporterMonitor::new()).unwrap(),
            Verdict::NotOk(_)
        ));
    }

    #[test]
    fn test_only_header_is_not_ok() {
        let temp_dir = TempDir::new().unwrap();
        let mut importer = importer_for(&temp_dir, "empty.csv", b"a,b\n");
        assert_eq!(
            importer.verify(&ImporterMonitor::new()).unwrap(),
            Verdict::NotOk("The file contains no data rows.".into())
        );
    }
}
