//! ZIP assembly: one folder per division, plus a machine-readable
//! `summary.json` manifest at the archive root.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::model::BatchResult;
use crate::settings::TemplateSettings;
use crate::util;

/// Deflate level: a middle ground, PNG payloads barely compress further and
/// thousands of files at maximum level would burn CPU for nothing.
const COMPRESSION_LEVEL: i64 = 6;
const MANIFEST_MAX_ERRORS: usize = 50;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip assembly failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("zip write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DivisionSummary<'a> {
    name: &'a str,
    file_count: usize,
    fallback_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    generated_at: String,
    processed_count: usize,
    success_count: usize,
    fallback_count: usize,
    error_count: usize,
    divisions: Vec<DivisionSummary<'a>>,
    settings: &'a TemplateSettings,
    /// First [`MANIFEST_MAX_ERRORS`] messages only; see `total_error_count`.
    errors: &'a [String],
    total_error_count: usize,
    skipped_participant_ids: &'a [String],
    processing_ms: u64,
}

/// Build the final archive. Any failure here is fatal for the whole batch; a
/// truncated ZIP must never leave this function.
pub fn package(
    result: &BatchResult,
    settings: &TemplateSettings,
    processing_ms: u64,
) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let mut folder_names: HashSet<String> = HashSet::new();
    for division in &result.images_by_division {
        // Empty divisions appear in the manifest but get no folder.
        if division.images.is_empty() {
            continue;
        }

        let mut folder = util::sanitize_for_filename(&division.division);
        let mut n = 2;
        while !folder_names.insert(folder.clone()) {
            folder = format!("{}_{n}", util::sanitize_for_filename(&division.division));
            n += 1;
        }

        writer.add_directory(folder.as_str(), options)?;
        for image in &division.images {
            writer.start_file(format!("{folder}/{}", image.filename), options)?;
            writer.write_all(&image.bytes)?;
        }
    }

    let error_head = &result.errors[..result.errors.len().min(MANIFEST_MAX_ERRORS)];
    let manifest = Manifest {
        generated_at: Utc::now().to_rfc3339(),
        processed_count: result.processed_count,
        success_count: result.success_count,
        fallback_count: result.fallback_count,
        error_count: result.error_count,
        divisions: result
            .images_by_division
            .iter()
            .map(|d| DivisionSummary {
                name: &d.division,
                file_count: d.images.len(),
                fallback_count: d.images.iter().filter(|i| i.fallback).count(),
            })
            .collect(),
        settings,
        errors: error_head,
        total_error_count: result.errors.len(),
        skipped_participant_ids: &result.skipped_participant_ids,
        processing_ms,
    };

    writer.start_file("summary.json", options)?;
    writer.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}
