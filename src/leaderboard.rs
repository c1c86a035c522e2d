use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::instrument;

use crate::ledger::{Ledger, LedgerResult};
use crate::reset::{FirstOfMonth, MonthlyTrigger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedRow {
    pub rank: usize,
    pub label: String,
    pub points: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub points: i64,
    pub invited_count: i64,
    pub last_period_points: i64,
    pub days_until_reset: i64,
}

pub struct LeaderboardQuery {
    ledger: Arc<dyn Ledger>,
    reset_time: NaiveTime,
}

impl LeaderboardQuery {
    pub fn new(ledger: Arc<dyn Ledger>, reset_time: NaiveTime) -> Self {
        Self { ledger, reset_time }
    }

    #[instrument(skip(self))]
    pub async fn top(&self, n: i64) -> LedgerResult<Vec<RankedRow>> {
        let rows = self.ledger.top_n(n).await?;

        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, member)| RankedRow {
                rank: i + 1,
                label: member.display_label(),
                points: member.points,
            })
            .collect())
    }

    /// Current-period stats for one member; `None` when unregistered.
    #[instrument(skip(self, now), fields(target_id = user_id))]
    pub async fn stats(&self, user_id: i64, now: DateTime<Utc>) -> LedgerResult<Option<Stats>> {
        let Some(member) = self.ledger.get_user(user_id).await? else {
            return Ok(None);
        };

        Ok(Some(Stats {
            points: member.points,
            invited_count: member.invited_count,
            last_period_points: member.last_period_points,
            days_until_reset: days_until_reset(now, self.reset_time),
        }))
    }
}

/// Whole days from `now` until the next reset fire. Pure wall-clock math,
/// never stored.
pub fn days_until_reset(now: DateTime<Utc>, reset_time: NaiveTime) -> i64 {
    let fire_at = FirstOfMonth { at: reset_time }.next_fire(now);
    (fire_at - now).num_days()
}
