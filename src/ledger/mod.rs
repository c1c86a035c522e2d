use core::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;

pub mod memory;
pub mod models;
pub mod postgres;

pub use models::Member;

pub type LedgerResult<T> = core::result::Result<T, LedgerErr>;

#[derive(Debug, Error)]
pub enum LedgerErr {
    #[error("user {0} is not registered")]
    NotFound(i64),

    #[error("ledger store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// One calendar-month scoring window, keyed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        let (year, month) = key.split_once('-')?;
        let year = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        (1..=12).contains(&month).then_some(Self { year, month })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverOutcome {
    /// Number of member rows archived and zeroed.
    pub affected: u64,
    /// True when the period was already rolled over and nothing changed.
    pub already_done: bool,
}

/// The durable per-user point table. The sole shared mutable resource of the
/// service: both the event dispatcher and the reset scheduler hold a handle.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert-if-absent registration. Refreshes display metadata on conflict
    /// (last-write-wins) and leaves every counter untouched. Returns whether
    /// a new row was created.
    async fn upsert_user(
        &self,
        user_id: i64,
        display_name: &str,
        handle: Option<&str>,
    ) -> LedgerResult<bool>;

    /// Atomically increments `points` and `invited_count` by 1, returning the
    /// new point total. Concurrent awards to the same user must all land.
    async fn award_point(&self, user_id: i64) -> LedgerResult<i64>;

    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<Member>>;

    /// Top `n` members by points descending, ties broken by join order.
    async fn top_n(&self, n: i64) -> LedgerResult<Vec<Member>>;

    /// Archives every member's `points` into `last_period_points` and zeroes
    /// the active counters, all-or-nothing. A repeat call for a period that
    /// already completed is a no-op reporting `already_done`.
    async fn rollover_period(&self, period: Period) -> LedgerResult<RolloverOutcome>;

    async fn last_completed_period(&self) -> LedgerResult<Option<Period>>;
}
