//! Per-document JSON archive. A completed `uploads/aps_1042.txt` lands at
//! `summaries/uploads/aps_1042.txt_summary.json`, a failed one at
//! `failed/uploads/aps_1042.txt_error.json`. The id's directories are
//! mirrored so distinct ids never share a file.

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use lifeproof_core::{DocumentRecord, DocumentStatus};
use serde_json::json;

/// Archive location of `document_id` under `dir`, with `suffix` appended to
/// the file name. Only plain path components of the id are kept.
fn archived_under(dir: PathBuf, document_id: &str, suffix: &str) -> PathBuf {
    let parts: Vec<String> = Path::new(document_id)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let Some((name, parents)) = parts.split_last() else {
        return dir.join(format!("_{suffix}"));
    };
    let mut path = dir;
    for parent in parents {
        path.push(parent);
    }
    path.join(format!("{name}_{suffix}"))
}

pub fn archive_path(out_dir: &Path, record: &DocumentRecord) -> Option<PathBuf> {
    let id = &record.document_id;
    match record.status {
        DocumentStatus::Completed => {
            Some(archived_under(out_dir.join("summaries"), id, "summary.json"))
        }
        DocumentStatus::Failed => Some(archived_under(out_dir.join("failed"), id, "error.json")),
        _ => None,
    }
}

/// Write the archive file for a terminal record. Active records are skipped.
pub fn archive_record(out_dir: &Path, record: &DocumentRecord) -> anyhow::Result<Option<PathBuf>> {
    let Some(path) = archive_path(out_dir, record) else {
        return Ok(None);
    };
    let body = match record.status {
        DocumentStatus::Completed => json!({
            "document_id": record.document_id,
            "processing_id": record.processing_id,
            "generation": record.generation,
            "model_tier": record.model_tier,
            "model_used": record.model_used,
            "processed_at": record.updated_at,
            "summary": record.result,
        }),
        _ => json!({
            "document_id": record.document_id,
            "processing_id": record.processing_id,
            "generation": record.generation,
            "model_tier": record.model_tier,
            "model_used": record.model_used,
            "failed_at": record.updated_at,
            "error": record.error_detail,
        }),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(&body)?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(Some(path))
}
