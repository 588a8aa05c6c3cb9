use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs;

use crate::codec::{self, Rounding};
use crate::model::{DateRange, Row};
use crate::pipeline::process::merge::{OutputLevel, ProcessedOutput};
use crate::platform::Platform;
use crate::telemetry::{self};

/// What happened to one CSV artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ExportOutcome {
    Saved {
        path: String,
        file_name: String,
        size_bytes: usize,
        row_count: usize,
        columns: Vec<String>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportEntry {
    pub kind: String,
    #[serde(flatten)]
    pub outcome: ExportOutcome,
}

impl ExportEntry {
    pub fn is_saved(&self) -> bool { matches!(self.outcome, ExportOutcome::Saved { .. }) }
}

pub fn file_name(prefix: &str, range: &DateRange, run_id: &str) -> String {
    format!("{}_{}_to_{}_{}.csv", prefix, range.start(), range.end(), run_id)
}

async fn write_csv(dir: &Path, name: &str, text: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).await.with_context(|| format!("create output dir {}", dir.display()))?;
    let path = dir.join(name);
    fs::write(&path, text.as_bytes()).await.with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Serialize and persist one row set. Never fails: problems land in the returned entry.
pub async fn export_rows(dir: &Path, kind: &str, prefix: &str, rows: &[Row], rounding: Rounding, range: &DateRange, run_id: &str) -> ExportEntry {
    let log = telemetry::process();
    let outcome = if rows.is_empty() {
        ExportOutcome::Skipped { reason: "no rows".into() }
    } else {
        let name = file_name(prefix, range, run_id);
        let written = async {
            let csv = codec::to_csv(rows, rounding)?;
            let path = write_csv(dir, &name, &csv.text).await?;
            Ok::<_, anyhow::Error>((path, csv.byte_len))
        }
        .await;
        match written {
            Ok((path, size_bytes)) => {
                log.info(format!("💾 {} → {} ({} rows, {} bytes)", kind, path.display(), rows.len(), size_bytes));
                ExportOutcome::Saved {
                    path: path.display().to_string(),
                    file_name: name,
                    size_bytes,
                    row_count: rows.len(),
                    columns: codec::columns(rows),
                }
            }
            Err(e) => {
                log.warn(format!("⚠️  export {} failed: {:#}", kind, e));
                ExportOutcome::Failed { error: format!("{:#}", e) }
            }
        }
    };
    ExportEntry { kind: kind.to_string(), outcome }
}

/// One rounded CSV per output level.
pub async fn export_levels(dir: &Path, out: &ProcessedOutput, range: &DateRange, run_id: &str) -> Vec<ExportEntry> {
    let mut entries = Vec::with_capacity(OutputLevel::ALL.len());
    for level in OutputLevel::ALL {
        entries.push(export_rows(dir, level.key(), level.file_prefix(), out.level(level), Rounding::ByFieldName, range, run_id).await);
    }
    entries
}

/// Unrounded dump of one platform's retrieved rows.
pub async fn export_raw(dir: &Path, platform: Platform, rows: &[Row], range: &DateRange, run_id: &str) -> ExportEntry {
    let prefix = format!("{}_raw", platform.key());
    export_rows(dir, &prefix, &prefix, rows, Rounding::None, range, run_id).await
}
