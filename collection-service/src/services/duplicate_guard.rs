//! Duplicate collection guard.
//!
//! A pure function of (policy, payment history, now). The ledger feeds it
//! the history it read inside the collection transaction and acts on the
//! decision; nothing here touches storage.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::PriorPayment;

/// What to do with a repeat inside / outside the guard window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// Block inside the window, warn after it.
    Standard,
    /// Warn inside and after the window, never block.
    WarnOnly,
    /// Block inside the window, allow after it.
    BlockOnly,
}

impl GuardMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::WarnOnly => "warn_only",
            Self::BlockOnly => "block_only",
        }
    }
}

impl std::str::FromStr for GuardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "warn_only" | "warn-only" => Ok(Self::WarnOnly),
            "block_only" | "block-only" => Ok(Self::BlockOnly),
            other => Err(format!("unknown duplicate guard mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicatePolicy {
    pub window: Duration,
    pub mode: GuardMode,
    /// Also warn about a payment for the same vehicle with a different
    /// movement or amount taken inside the window.
    pub cross_movement: bool,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(10),
            mode: GuardMode::Standard,
            cross_movement: false,
        }
    }
}

/// The collection being attempted.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub vehicle_id: i64,
    pub movement_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Warn { last_payment_at: DateTime<Utc> },
    Block { last_payment_at: DateTime<Utc> },
}

impl DuplicatePolicy {
    /// Earliest payment time that can still matter for a decision at `now`.
    pub fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// Decide whether `candidate` may be collected given the vehicle's
    /// `history`. Reverted entries are ignored.
    pub fn evaluate(
        &self,
        candidate: &Candidate,
        history: &[PriorPayment],
        now: DateTime<Utc>,
    ) -> Decision {
        let live = || history.iter().filter(|p| !p.is_reverted);

        let last_exact = live()
            .filter(|p| p.movement_id == candidate.movement_id && p.amount == candidate.amount)
            .map(|p| p.paid_at)
            .max();

        if let Some(last) = last_exact {
            let within = now - last < self.window;
            return match (self.mode, within) {
                (GuardMode::Standard, true) | (GuardMode::BlockOnly, true) => Decision::Block {
                    last_payment_at: last,
                },
                (GuardMode::Standard, false) | (GuardMode::WarnOnly, _) => Decision::Warn {
                    last_payment_at: last,
                },
                (GuardMode::BlockOnly, false) => Decision::Allow,
            };
        }

        if self.cross_movement {
            let horizon = self.horizon(now);
            if let Some(last) = live()
                .filter(|p| p.paid_at > horizon)
                .map(|p| p.paid_at)
                .max()
            {
                return Decision::Warn {
                    last_payment_at: last,
                };
            }
        }

        Decision::Allow
    }
}
