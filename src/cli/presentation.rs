//! CLI presentation: text tables and JSON for operator commands.

use crate::error::{PrivacyError, StorageError};
use crate::privacy::archive::{ArchiveKey, StoredArchive};
use crate::queue::{JobRecord, JobState, QueueStats};
use crate::request::model::{DataRequest, RequestContext};
use chrono::{DateTime, TimeZone, Utc};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, PrivacyError> {
    serde_json::to_string_pretty(value).map_err(|e| {
        PrivacyError::Storage(StorageError::Corrupt {
            key: "cli-output".to_string(),
            message: e.to_string(),
        })
    })
}

fn format_millis(ms: u64) -> String {
    match Utc.timestamp_millis_opt(ms as i64).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn format_section_heading(title: &str) -> String {
    format!("{}\n{}", title, "-".repeat(title.len()))
}

pub fn format_request_list(requests: &[DataRequest], format: &str) -> Result<String, PrivacyError> {
    if format == "json" {
        return to_json(requests);
    }
    if requests.is_empty() {
        return Ok("No data requests.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Id", "Type", "Status", "Subject", "Requested by", "DPO", "Updated"]);
    for request in requests {
        table.add_row(vec![
            request.id.to_string(),
            request.request_type.to_string(),
            request.status.to_string(),
            request.subject.to_string(),
            request.requested_by.to_string(),
            request
                .dpo
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format_millis(request.updated_at_ms),
        ]);
    }
    Ok(format!("{}\n{} request(s)", table, requests.len()))
}

#[derive(Serialize)]
struct RequestDetail<'a> {
    request: &'a DataRequest,
    contexts: &'a [RequestContext],
}

pub fn format_request_detail(
    request: &DataRequest,
    contexts: &[RequestContext],
    format: &str,
) -> Result<String, PrivacyError> {
    if format == "json" {
        return to_json(&RequestDetail { request, contexts });
    }
    let mut out = format!("{}\n\n", format_section_heading(&format!("Request {}", request.id)));
    out.push_str(&format!("  Type: {}\n", request.request_type));
    out.push_str(&format!("  Status: {}\n", request.status));
    out.push_str(&format!("  Subject: {}\n", request.subject));
    out.push_str(&format!("  Requested by: {}\n", request.requested_by));
    if let Some(dpo) = request.dpo {
        out.push_str(&format!("  DPO: {}\n", dpo));
    }
    if !request.comments.is_empty() {
        out.push_str(&format!("  Comments: {}\n", request.comments));
    }
    if !request.dpo_comment.is_empty() {
        out.push_str(&format!("  DPO comment: {}\n", request.dpo_comment));
    }
    out.push_str(&format!("  Created: {}\n", format_millis(request.created_at_ms)));
    out.push_str(&format!("  Updated: {}\n\n", format_millis(request.updated_at_ms)));

    out.push_str(&format!("{}\n\n", format_section_heading("Contexts")));
    if contexts.is_empty() {
        out.push_str("No contexts discovered yet.\n");
        return Ok(out);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Component", "Context", "Status"]);
    for context in contexts {
        table.add_row(vec![
            context.component.clone(),
            context.context.to_string(),
            format!("{:?}", context.status).to_lowercase(),
        ]);
    }
    out.push_str(&format!("{}\n", table));
    Ok(out)
}

pub fn format_job_list(jobs: &[JobRecord], format: &str) -> Result<String, PrivacyError> {
    if format == "json" {
        return to_json(jobs);
    }
    if jobs.is_empty() {
        return Ok("No jobs.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Id", "Kind", "Request", "State", "Attempts", "Detail"]);
    for job in jobs {
        let detail = match &job.state {
            JobState::Queued => format!("available {}", format_millis(job.available_at_ms)),
            JobState::Claimed {
                worker,
                lease_expires_ms,
            } => format!("{} until {}", worker, format_millis(*lease_expires_ms)),
            JobState::Failed { error } => error.clone(),
        };
        table.add_row(vec![
            job.id.to_string(),
            job.kind.to_string(),
            job.request.to_string(),
            job.state.label().to_string(),
            job.attempts.to_string(),
            detail,
        ]);
    }
    Ok(table.to_string())
}

pub fn format_queue_stats(stats: &QueueStats, format: &str) -> Result<String, PrivacyError> {
    if format == "json" {
        return to_json(stats);
    }
    Ok(format!(
        "Queued: {}\nClaimed: {}\nFailed: {}",
        stats.queued, stats.claimed, stats.failed
    ))
}

pub fn format_archive_list(archives: &[StoredArchive], format: &str) -> Result<String, PrivacyError> {
    if format == "json" {
        return to_json(archives);
    }
    if archives.is_empty() {
        return Ok("No stored archives.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Archive", "Size", "SHA-256", "Created"]);
    for archive in archives {
        table.add_row(vec![
            archive.key.to_string(),
            archive.size.to_string(),
            archive.sha256.chars().take(12).collect::<String>(),
            archive.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    Ok(table.to_string())
}

pub fn format_purge_result(keys: &[ArchiveKey], cutoff: DateTime<Utc>, dry_run: bool) -> String {
    let verb = if dry_run { "Would purge" } else { "Purged" };
    let mut out = format!(
        "{} {} archive(s) created before {}",
        verb,
        keys.len(),
        cutoff.format("%Y-%m-%d %H:%M:%S")
    );
    for key in keys {
        out.push_str(&format!("\n  - {}", key));
    }
    out
}
