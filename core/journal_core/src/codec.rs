//! Export and import of the whole journal as one JSON document.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{error, info};

use crate::model::{AttributeSet, Entry, ExportDocument};

const ENTRIES_FIELD: &str = "allEntries";
const STATS_FIELD: &str = "playerStats";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid journal document: {0}")]
    Format(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("permission denied writing {}", .path.display())]
    PermissionDenied { path: PathBuf },
    #[error("export to {} failed: {reason}", .path.display())]
    Failed { path: PathBuf, reason: String },
}

pub fn export_file_name(day: NaiveDate) -> String {
    format!("persona_data_{}.json", day.format("%Y-%m-%d"))
}

pub fn encode_export(doc: &ExportDocument) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Write `doc` to `<dir>/persona_data_<day>.json`, creating `dir` if needed.
/// Returns the path written.
pub fn write_export(dir: &Path, day: NaiveDate, doc: &ExportDocument) -> Result<PathBuf, ExportError> {
    let path = dir.join(export_file_name(day));
    let classify = |err: std::io::Error| classify_io_error(&path, err);

    let body = encode_export(doc).map_err(|e| ExportError::Failed {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    std::fs::create_dir_all(dir).map_err(classify)?;
    std::fs::write(&path, body).map_err(classify)?;

    info!(
        "exported {} entries to {}",
        doc.all_entries.len(),
        path.display()
    );
    Ok(path)
}

/// Permission problems are reported apart from every other write failure.
pub fn classify_io_error(path: &Path, err: std::io::Error) -> ExportError {
    if err.kind() == ErrorKind::PermissionDenied {
        ExportError::PermissionDenied {
            path: path.to_path_buf(),
        }
    } else {
        ExportError::Failed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }
}

/// Parse an import file. Only the presence of both top-level fields is
/// checked before they are deserialized; no version or deep schema check.
pub fn decode_import(raw: &str) -> Result<(Vec<Entry>, AttributeSet), CodecError> {
    let mut v: Value = serde_json::from_str(raw)?;
    let Some(obj) = v.as_object_mut() else {
        return Err(CodecError::Format("top level is not an object".to_string()));
    };
    let (Some(entries), Some(stats)) = (obj.remove(ENTRIES_FIELD), obj.remove(STATS_FIELD)) else {
        return Err(CodecError::Format(format!(
            "missing '{ENTRIES_FIELD}' or '{STATS_FIELD}'"
        )));
    };

    let entries: Vec<Entry> = serde_json::from_value(entries).map_err(|e| {
        error!("import: {ENTRIES_FIELD} unreadable: {e}");
        CodecError::Format(format!("{ENTRIES_FIELD}: {e}"))
    })?;
    let stats: AttributeSet = serde_json::from_value(stats).map_err(|e| {
        error!("import: {STATS_FIELD} unreadable: {e}");
        CodecError::Format(format!("{STATS_FIELD}: {e}"))
    })?;
    Ok((entries, stats))
}
