use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{Ledger, LedgerErr, LedgerResult, Member, Period, RolloverOutcome};

/// In-memory ledger, used when no `DATABASE_URL` is configured and throughout
/// the test suite. One lock over the whole table: the write path is a handful
/// of map operations, so per-row locking buys nothing here.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    members: HashMap<i64, Member>,
    // registration order, for deterministic leaderboard tie-breaks
    join_order: Vec<i64>,
    completed_period: Option<Period>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Ledger for MemoryLedger {
    #[instrument(skip(self, display_name, handle), fields(target_id = user_id))]
    async fn upsert_user(
        &self,
        user_id: i64,
        display_name: &str,
        handle: Option<&str>,
    ) -> LedgerResult<bool> {
        let mut inner = self.inner.write().await;
        let now = Utc::now().naive_utc();

        match inner.members.get_mut(&user_id) {
            Some(member) => {
                member.display_name = display_name.to_string();
                member.handle = handle.map(str::to_string);
                member.updated_at = now;
                Ok(false)
            }
            None => {
                inner.members.insert(
                    user_id,
                    Member {
                        user_id,
                        display_name: display_name.to_string(),
                        handle: handle.map(str::to_string),
                        points: 0,
                        invited_count: 0,
                        last_period_points: 0,
                        joined_at: now,
                        updated_at: now,
                    },
                );
                inner.join_order.push(user_id);
                Ok(true)
            }
        }
    }

    #[instrument(skip(self), fields(target_id = user_id))]
    async fn award_point(&self, user_id: i64) -> LedgerResult<i64> {
        let mut inner = self.inner.write().await;
        let member = inner
            .members
            .get_mut(&user_id)
            .ok_or(LedgerErr::NotFound(user_id))?;

        member.points += 1;
        member.invited_count += 1;
        member.updated_at = Utc::now().naive_utc();

        Ok(member.points)
    }

    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<Member>> {
        Ok(self.inner.read().await.members.get(&user_id).cloned())
    }

    async fn top_n(&self, n: i64) -> LedgerResult<Vec<Member>> {
        let inner = self.inner.read().await;

        // join_order is insertion-ordered, so walking it and sorting stably
        // by points keeps the join-order tie-break
        let mut rows: Vec<Member> = inner
            .join_order
            .iter()
            .filter_map(|id| inner.members.get(id).cloned())
            .collect();
        rows.sort_by(|a, b| b.points.cmp(&a.points));
        rows.truncate(n.max(0) as usize);

        Ok(rows)
    }

    #[instrument(skip(self), fields(period = %period))]
    async fn rollover_period(&self, period: Period) -> LedgerResult<RolloverOutcome> {
        let mut inner = self.inner.write().await;

        if inner.completed_period == Some(period) {
            tracing::info!("period already rolled over, skipping");
            return Ok(RolloverOutcome {
                affected: 0,
                already_done: true,
            });
        }

        let now = Utc::now().naive_utc();
        for member in inner.members.values_mut() {
            member.last_period_points = member.points;
            member.points = 0;
            member.invited_count = 0;
            member.updated_at = now;
        }

        let affected = inner.members.len() as u64;
        inner.completed_period = Some(period);

        tracing::info!(affected, "period rollover committed");
        Ok(RolloverOutcome {
            affected,
            already_done: false,
        })
    }

    async fn last_completed_period(&self) -> LedgerResult<Option<Period>> {
        Ok(self.inner.read().await.completed_period)
    }
}
