//! Rendering of comparison results for stdout.

use crate::config::ReportFormat;
use crate::manifest::{Changes, DiffEntry, DiffKind};
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::io::Write;

/// Counts per entry kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffTally {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl DiffTally {
    pub fn of(entries: &[DiffEntry]) -> Self {
        let mut tally = Self::default();
        for entry in entries {
            match entry.kind {
                DiffKind::Added => tally.added += 1,
                DiffKind::Removed => tally.removed += 1,
                DiffKind::Modified(_) => tally.modified += 1,
            }
        }
        tally
    }

    pub fn total(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

/// Render `entries` in the requested format
pub fn render(entries: &[DiffEntry], format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(entries)),
        ReportFormat::Json => {
            let mut json = serde_json::to_string_pretty(entries)?;
            json.push('\n');
            Ok(json)
        }
    }
}

/// Render and write to `out`
pub fn write_report<W: Write>(
    entries: &[DiffEntry],
    format: ReportFormat,
    mut out: W,
) -> Result<()> {
    out.write_all(render(entries, format)?.as_bytes())?;
    out.flush()?;
    Ok(())
}

pub fn render_text(entries: &[DiffEntry]) -> String {
    let mut text = String::new();
    for entry in entries {
        let _ = match &entry.kind {
            DiffKind::Added => writeln!(text, "[+] {}", entry.path),
            DiffKind::Removed => writeln!(text, "[-] {}", entry.path),
            DiffKind::Modified(changes) => {
                writeln!(text, "[M] {}: {}", entry.path, describe_changes(changes))
            }
        };
    }

    let tally = DiffTally::of(entries);
    if tally.total() == 0 {
        text.push_str("No differences\n");
    } else {
        let _ = writeln!(
            text,
            "{} added, {} removed, {} modified",
            tally.added, tally.removed, tally.modified
        );
    }
    text
}

fn describe_changes(changes: &Changes) -> String {
    let mut reasons = Vec::new();
    if let Some(size) = &changes.size {
        reasons.push(format!("size {} -> {}", size.before, size.after));
    }
    if let Some(mtime) = &changes.modified_time {
        reasons.push(format!(
            "mtime {} -> {}",
            format_timestamp(mtime.before),
            format_timestamp(mtime.after)
        ));
    }
    if changes.content {
        reasons.push("content differs".to_string());
    }
    reasons.join(", ")
}

/// UTC date-time, or the raw seconds if out of range
pub fn format_timestamp(seconds: i64) -> String {
    match DateTime::<Utc>::from_timestamp(seconds, 0) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => seconds.to_string(),
    }
}
