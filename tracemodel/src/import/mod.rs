//! Importers turn raw trace data into model content.
//!
//! Each input is handed to the first importer that claims it. Importers run
//! in stages driven by [`TraceModel::from_traces`]: events first, then
//! finalization (anything that needs every event seen), then reference
//! joining once the model bounds are final.

pub mod linux_perf;
pub mod trace_event;
pub mod v8_log;

use flate2::read::GzDecoder;
use log::debug;
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::domain::ImportError;
use crate::model::TraceModel;

pub use linux_perf::LinuxPerfImporter;
pub use trace_event::TraceEventImporter;
pub use v8_log::V8LogImporter;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Raw trace data, either still text or already-parsed JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceInput {
    Text(String),
    Json(Value),
}

impl From<String> for TraceInput {
    fn from(text: String) -> Self {
        TraceInput::Text(text)
    }
}

impl From<&str> for TraceInput {
    fn from(text: &str) -> Self {
        TraceInput::Text(text.to_string())
    }
}

impl From<Value> for TraceInput {
    fn from(value: Value) -> Self {
        TraceInput::Json(value)
    }
}

pub trait Importer {
    fn name(&self) -> &'static str;

    /// Lower priorities import first; the first importer is the primary one.
    fn import_priority(&self) -> u32;

    /// Traces embedded in this one (e.g. ftrace text inside a JSON trace).
    fn extract_subtraces(&mut self) -> Vec<TraceInput> {
        Vec::new()
    }

    fn import_events(&mut self, model: &mut TraceModel, is_secondary: bool);

    /// Runs after every importer has imported and slices are nested.
    fn finalize_import(&mut self, _model: &mut TraceModel) {}

    /// Runs once the model bounds are final.
    fn join_refs(&mut self, _model: &mut TraceModel) {}
}

/// Accepts empty input so that an empty trace yields an empty model.
#[derive(Debug, Default)]
pub struct EmptyImporter;

impl EmptyImporter {
    pub fn can_import(input: &TraceInput) -> bool {
        match input {
            TraceInput::Text(text) => text.trim().is_empty(),
            TraceInput::Json(Value::Array(events)) => events.is_empty(),
            TraceInput::Json(_) => false,
        }
    }
}

impl Importer for EmptyImporter {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn import_priority(&self) -> u32 {
        0
    }

    fn import_events(&mut self, _model: &mut TraceModel, _is_secondary: bool) {}
}

/// Picks the importer for `input`.
///
/// # Errors
/// [`ImportError::NoImporter`] when nothing recognises the data, or a parse
/// error from the importer that claimed it.
pub fn create_importer(input: TraceInput) -> Result<Box<dyn Importer>, ImportError> {
    if EmptyImporter::can_import(&input) {
        debug!("using empty importer");
        return Ok(Box::new(EmptyImporter));
    }
    if TraceEventImporter::can_import(&input) {
        debug!("using trace event importer");
        return Ok(Box::new(TraceEventImporter::new(input)?));
    }
    if V8LogImporter::can_import(&input) {
        debug!("using v8 log importer");
        if let TraceInput::Text(text) = input {
            return Ok(Box::new(V8LogImporter::new(&text)));
        }
        return Err(ImportError::NoImporter);
    }
    if LinuxPerfImporter::can_import(&input) {
        debug!("using linux perf importer");
        if let TraceInput::Text(text) = input {
            return Ok(Box::new(LinuxPerfImporter::new(&text)));
        }
    }
    Err(ImportError::NoImporter)
}

/// Reads a trace file, gunzipping it when it carries the gzip magic bytes.
pub fn load_trace_file(path: impl AsRef<Path>) -> Result<TraceInput, ImportError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let bytes = if bytes.starts_with(&GZIP_MAGIC) {
        debug!("decompressing {}", path.display());
        let mut decoded = Vec::new();
        GzDecoder::new(bytes.as_slice()).read_to_end(&mut decoded)?;
        decoded
    } else {
        bytes
    };
    Ok(TraceInput::Text(String::from_utf8(bytes)?))
}
