//! Audit command - show recent audit records.

use std::path::PathBuf;

use anyhow::Context;
use teller_core::{AuditStatus, CredentialStore};

use crate::ui;

/// Audit command arguments.
#[derive(Debug, Clone)]
pub struct AuditArgs {
    /// Maximum number of records.
    pub limit: usize,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

/// Print the most recent audit records, newest first.
///
/// # Errors
///
/// Returns error if the store cannot be read.
pub fn run_audit(args: &AuditArgs) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(args.data_dir.clone(), &config)?;

    let records = store
        .recent_audit_records(args.limit)
        .context("Failed to read audit log")?;

    if records.is_empty() {
        ui::info("No audit records.");
        return Ok(());
    }

    ui::table_header(&format!(
        "{:<20} {:<15} {:<14} {:<8} {:<8} {:<16} {}",
        "TIME", "CATEGORY", "ACTION", "STATUS", "ACTOR", "IP", "DETAIL"
    ));

    for record in records {
        let status = match record.status {
            AuditStatus::Success => "ok",
            AuditStatus::Failed => "failed",
        };
        let actor = record
            .actor_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        println!(
            "{:<20} {:<15} {:<14} {:<8} {:<8} {:<16} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", record.category),
            format!("{:?}", record.action),
            status,
            actor,
            record.ip,
            record.detail
        );
    }

    Ok(())
}
