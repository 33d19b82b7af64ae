//! Anti-Cheat Detection
//!
//! Inline input validation (rate, displacement, score ceilings) plus
//! post-match statistical anomaly checks. Every finding becomes an
//! [`AntiCheatFlag`] persisted through the external flag store; accumulating
//! critical flags triggers a best-effort automatic suspension.

pub mod analysis;
pub mod service;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::state::PlayerId;

pub use analysis::PostMatchAnalyzer;
pub use service::{AntiCheatConfig, AntiCheatService, CheatRejection};

/// Flag severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Suspicious but tolerated.
    Warning,
    /// Input rejected / strong cheat signal.
    Critical,
}

/// What the flag is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Input rate over the rolling per-second limit.
    InputSpam,
    /// Movement displacement over the per-tick maximum.
    SpeedHack,
    /// Displacement far beyond the maximum relative to last known position.
    Teleport,
    /// Score delta over the per-action ceiling.
    ScoreHack,
    /// Match finished abnormally fast.
    ShortMatch,
    /// Improbable lifetime win rate.
    WinRate,
    /// Wins exceeding the trailing-window ceilings.
    WinFrequency,
}

impl FlagKind {
    /// Stable tag for persistence, logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagKind::InputSpam => "input_spam",
            FlagKind::SpeedHack => "speed_hack",
            FlagKind::Teleport => "teleport",
            FlagKind::ScoreHack => "score_hack",
            FlagKind::ShortMatch => "short_match",
            FlagKind::WinRate => "win_rate",
            FlagKind::WinFrequency => "win_frequency",
        }
    }
}

/// One recorded anti-cheat finding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AntiCheatFlag {
    /// Flagged player.
    pub player_id: PlayerId,
    /// Finding kind.
    pub kind: FlagKind,
    /// Severity.
    pub severity: Severity,
    /// Human-readable details.
    pub details: String,
    /// Match the finding belongs to, when applicable.
    pub match_id: Option<String>,
    /// When the finding was made.
    pub at: DateTime<Utc>,
}

impl AntiCheatFlag {
    /// Build a critical flag stamped now.
    pub fn critical(player_id: PlayerId, kind: FlagKind, details: impl Into<String>) -> Self {
        Self {
            player_id,
            kind,
            severity: Severity::Critical,
            details: details.into(),
            match_id: None,
            at: Utc::now(),
        }
    }

    /// Build a warning flag stamped now.
    pub fn warning(player_id: PlayerId, kind: FlagKind, details: impl Into<String>) -> Self {
        Self {
            player_id,
            kind,
            severity: Severity::Warning,
            details: details.into(),
            match_id: None,
            at: Utc::now(),
        }
    }

    /// Attach the match id.
    pub fn in_match(mut self, match_id: &str) -> Self {
        self.match_id = Some(match_id.to_string());
        self
    }
}
