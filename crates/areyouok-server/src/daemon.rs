//! Daemon loop: periodically reports journal activity and deadline status.

use crate::config::ServerConfig;
use crate::db::SqliteStore;
use anyhow::{Context, Result};
use areyouok_core::heartbeat::{self, HeartbeatAction, HeartbeatStatus};
use areyouok_core::{format_units, Amount, EventRecord, Registry, SwitchEvent, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Run the daemon loop. Blocks forever (until shutdown signal).
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("AreYouOK server starting…");
    log::info!(
        "  Interval:   {} seconds ({:.1} hours)",
        config.server.check_interval_secs,
        config.server.check_interval_secs as f64 / 3600.0
    );
    log::info!("  Data dir:   {}", config.server.data_dir.display());

    let interval = Duration::from_secs(config.server.check_interval_secs);

    // Run first check immediately, then loop
    let mut cursor = 0;
    let mut first = true;
    loop {
        if !first {
            log::info!(
                "Sleeping {} seconds until next check…",
                config.server.check_interval_secs
            );
            tokio::time::sleep(interval).await;
        }
        first = false;

        match run_check_cycle(&config, cursor).await {
            Ok(next) => {
                cursor = next;
                log::info!("Check cycle completed successfully.");
            }
            Err(e) => log::error!("Check cycle failed: {:#}", e),
        }
    }
}

/// Execute a single check cycle: open the registry, report events newer than
/// `cursor`, evaluate every funded switch. Returns the new cursor.
pub async fn run_check_cycle(config: &ServerConfig, cursor: u64) -> Result<u64> {
    log::info!("Starting check cycle…");

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data dir: {}",
            config.server.data_dir.display()
        )
    })?;

    let db_path = config.db_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let registry =
        Registry::open(store, Arc::new(SystemClock)).context("Failed to load registry")?;

    let events = registry
        .events_since(cursor)
        .context("Failed to read journal")?;
    log::info!(
        "Switches: {}  |  New events: {}",
        registry.get_total_switches(),
        events.len()
    );
    for record in &events {
        log_event(record);
    }
    let next_cursor = events.last().map(|r| r.seq).unwrap_or(cursor);

    let funded: Vec<_> = registry
        .snapshots()
        .into_iter()
        .filter(|(_, snapshot)| snapshot.balance > 0)
        .collect();
    if funded.is_empty() {
        log::info!("No funded switches, nothing to evaluate.");
        return Ok(next_cursor);
    }

    let balances: HashMap<_, _> = funded.iter().map(|(id, s)| (*id, s.balance)).collect();
    let statuses = heartbeat::evaluate_batch(&funded, registry.now(), &config.heartbeat);
    for status in &statuses {
        let balance = balances.get(&status.switch_id).copied().unwrap_or_default();
        log_status(status, balance);
    }

    Ok(next_cursor)
}

fn log_event(record: &EventRecord) {
    let id = record.switch_id;
    match &record.event {
        SwitchEvent::SwitchCreated {
            owner, beneficiary, ..
        } => log::info!("[{}] #{} created by {} for {}", id, record.seq, owner, beneficiary),
        SwitchEvent::CheckedIn { owner, .. } => {
            log::info!("[{}] #{} {} checked in", id, record.seq, owner)
        }
        SwitchEvent::Deposited { from, amount } => log::info!(
            "[{}] #{} {} deposited {}",
            id,
            record.seq,
            from,
            format_units(*amount)
        ),
        SwitchEvent::Withdrawn {
            beneficiary,
            amount,
        } => log::warn!(
            "[{}] #{} swept: {} withdrew {}",
            id,
            record.seq,
            beneficiary,
            format_units(*amount)
        ),
        SwitchEvent::BeneficiaryChanged { old, new } => {
            log::info!("[{}] #{} beneficiary {} -> {}", id, record.seq, old, new)
        }
        SwitchEvent::OwnershipTransferred { old, new } => {
            log::info!("[{}] #{} owner {} -> {}", id, record.seq, old, new)
        }
    }
}

fn log_status(status: &HeartbeatStatus, balance: Amount) {
    let remaining = heartbeat::format_remaining(status.remaining_secs);
    let balance = format_units(balance);
    match status.action {
        HeartbeatAction::Healthy => log::info!(
            "[{}] healthy: {} remaining, balance {}",
            status.switch_id,
            remaining,
            balance
        ),
        HeartbeatAction::CheckinRecommended => log::warn!(
            "[{}] check-in recommended: {} remaining ({:.0}% elapsed), balance {}",
            status.switch_id,
            remaining,
            status.elapsed_fraction * 100.0,
            balance
        ),
        HeartbeatAction::CheckinRequired => log::warn!(
            "[{}] CHECK-IN REQUIRED: {} remaining, balance {}",
            status.switch_id,
            remaining,
            balance
        ),
        HeartbeatAction::Expired => log::warn!(
            "[{}] expired: balance {} claimable by the beneficiary",
            status.switch_id,
            balance
        ),
    }
}
