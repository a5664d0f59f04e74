//! Heartbeat evaluation for switches.
//!
//! Pure logic, no I/O. Takes a switch snapshot and the current time, returns
//! a recommendation. The caller (daemon, UI) decides whether to act on it.
//!
//! ```text
//! |--- Healthy ---|--- CheckinRecommended ---|--- CheckinRequired ---|--- Expired
//! 0%             50%                        67%                    100%
//! ```
//!
//! With the default 3-day interval the critical band is the last day.

use crate::clock::{Timestamp, SECS_PER_DAY};
use crate::identity::SwitchId;
use crate::switch::SwitchSnapshot;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// When to recommend a check-in, as fractions of the interval elapsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Fraction elapsed before recommending check-in (0.0–1.0).
    /// Default: 0.5.
    pub checkin_threshold: f64,

    /// Fraction elapsed before check-in is critical (0.0–1.0).
    /// Default: 2/3.
    pub critical_threshold: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            checkin_threshold: 0.5,
            critical_threshold: 2.0 / 3.0,
        }
    }
}

impl HeartbeatConfig {
    /// Validate that thresholds are sensible.
    pub fn validate(&self) -> Result<(), HeartbeatError> {
        if !(self.checkin_threshold > 0.0 && self.checkin_threshold < 1.0) {
            return Err(HeartbeatError::InvalidThreshold(
                "checkin_threshold must be between 0.0 and 1.0 exclusive".into(),
            ));
        }
        if !(self.critical_threshold > self.checkin_threshold && self.critical_threshold < 1.0) {
            return Err(HeartbeatError::InvalidThreshold(
                "critical_threshold must be between checkin_threshold and 1.0 exclusive".into(),
            ));
        }
        Ok(())
    }
}

/// What the heartbeat recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatAction {
    /// Deadline is far away. No action needed.
    Healthy,
    /// Passed the check-in threshold. Should check in soon.
    CheckinRecommended,
    /// Passed the critical threshold. Must check in now.
    CheckinRequired,
    /// Deadline passed. The beneficiary can sweep unless the owner checks in first.
    Expired,
}

impl HeartbeatAction {
    fn priority(self) -> u8 {
        match self {
            HeartbeatAction::Expired => 0,
            HeartbeatAction::CheckinRequired => 1,
            HeartbeatAction::CheckinRecommended => 2,
            HeartbeatAction::Healthy => 3,
        }
    }
}

/// Heartbeat status for one switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub switch_id: SwitchId,
    /// Seconds until the deadline (0 once expired).
    pub remaining_secs: u64,
    /// Fraction of the interval elapsed (0.0–1.0+).
    pub elapsed_fraction: f64,
    pub action: HeartbeatAction,
}

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
}

/// Evaluate how close a switch is to its deadline.
pub fn evaluate(
    switch_id: SwitchId,
    snapshot: &SwitchSnapshot,
    now: Timestamp,
    config: &HeartbeatConfig,
) -> HeartbeatStatus {
    let elapsed = now.saturating_sub(snapshot.last_check_in);
    let elapsed_fraction = if snapshot.check_in_interval == 0 {
        1.0 // zero interval is always expired
    } else {
        elapsed as f64 / snapshot.check_in_interval as f64
    };

    let action = if snapshot.is_expired(now) {
        HeartbeatAction::Expired
    } else if elapsed_fraction >= config.critical_threshold {
        HeartbeatAction::CheckinRequired
    } else if elapsed_fraction >= config.checkin_threshold {
        HeartbeatAction::CheckinRecommended
    } else {
        HeartbeatAction::Healthy
    };

    HeartbeatStatus {
        switch_id,
        remaining_secs: snapshot.remaining_time(now),
        elapsed_fraction,
        action,
    }
}

/// Evaluate many switches, most urgent first.
pub fn evaluate_batch(
    switches: &[(SwitchId, SwitchSnapshot)],
    now: Timestamp,
    config: &HeartbeatConfig,
) -> Vec<HeartbeatStatus> {
    let mut statuses: Vec<HeartbeatStatus> = switches
        .iter()
        .map(|(id, snapshot)| evaluate(*id, snapshot, now, config))
        .collect();

    statuses.sort_by(|a, b| {
        a.action.priority().cmp(&b.action.priority()).then(
            a.elapsed_fraction
                .partial_cmp(&b.elapsed_fraction)
                .unwrap_or(Ordering::Equal)
                .reverse(),
        )
    });

    statuses
}

/// Countdown text: `expired`, `HH:MM:SS` within the last day, `{d}d HH:MM` otherwise.
pub fn format_remaining(secs: u64) -> String {
    if secs == 0 {
        return "expired".to_string();
    }
    let days = secs / SECS_PER_DAY;
    let hours = (secs % SECS_PER_DAY) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if days < 1 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}d {:02}:{:02}", days, hours, minutes)
    }
}
