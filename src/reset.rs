use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use tracing::instrument;

use crate::ledger::{Ledger, Period};
use crate::messages;
use crate::telegram::Outbound;

/// Calendar trigger seam: pure "when do I fire next" math, so the scheduler
/// is testable without waiting on wall-clock time.
pub trait MonthlyTrigger: Send + Sync {
    fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc>;
}

/// Fires at a fixed time-of-day (UTC) on the first day of each month.
#[derive(Debug, Clone, Copy)]
pub struct FirstOfMonth {
    pub at: NaiveTime,
}

impl MonthlyTrigger for FirstOfMonth {
    fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();

        // a restart on the 1st before the fire time must still fire today,
        // not slip a whole month
        if today.day() == 1 {
            let today_fire = Utc.from_utc_datetime(&today.and_time(self.at));
            if today_fire > now {
                return today_fire;
            }
        }

        let (year, month) = match today.month() {
            12 => (today.year() + 1, 1),
            m => (today.year(), m + 1),
        };

        // the first of a month always exists
        let first = chrono::NaiveDate::from_ymd_opt(year, month, 1)
            .expect("first of month is a valid date");

        Utc.from_utc_datetime(&first.and_time(self.at))
    }
}

/// Monthly rollover driver: Idle, fire once, back to Idle. Duplicate fires
/// within one period (restart right after firing, operator force-reset the
/// same month) are suppressed by the store's period marker, so the fire path
/// is safe to call more than once.
pub struct ResetScheduler {
    ledger: Arc<dyn Ledger>,
    outbound: Arc<dyn Outbound>,
    trigger: Box<dyn MonthlyTrigger>,
    channel_id: i64,
}

impl ResetScheduler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        outbound: Arc<dyn Outbound>,
        trigger: Box<dyn MonthlyTrigger>,
        channel_id: i64,
    ) -> Self {
        Self {
            ledger,
            outbound,
            trigger,
            channel_id,
        }
    }

    pub async fn run(self) {
        match self.ledger.last_completed_period().await {
            Ok(Some(period)) => tracing::info!(period = %period, "last completed rollover"),
            Ok(None) => tracing::info!("no rollover has completed yet"),
            Err(e) => tracing::warn!(error = ?e, "could not read the rollover marker"),
        }

        loop {
            let now = Utc::now();
            let fire_at = self.trigger.next_fire(now);
            let wait = (fire_at - now).to_std().unwrap_or_default();

            tracing::info!(fire_at = %fire_at, "scheduler sleeping until next rollover");
            tokio::time::sleep(wait).await;

            self.fire(Utc::now()).await;
        }
    }

    /// One rollover attempt. On store failure the announcement is withheld
    /// and nothing is rescheduled: the next natural trigger retries, which
    /// avoids hammering a store that is already struggling.
    #[instrument(skip(self))]
    pub async fn fire(&self, now: DateTime<Utc>) {
        let period = Period::of(now);

        match self.ledger.rollover_period(period).await {
            Ok(outcome) if outcome.already_done => {
                tracing::info!(period = %period, "rollover already completed for this period");
            }
            Ok(outcome) => {
                tracing::info!(period = %period, affected = outcome.affected, "rollover complete");
                if let Err(e) = self
                    .outbound
                    .send_channel_message(self.channel_id, &messages::reset_announcement())
                    .await
                {
                    // the rollover itself is committed; the announcement is
                    // fire-and-forget
                    tracing::error!(error = ?e, "reset announcement failed to send");
                }
            }
            Err(e) => {
                tracing::error!(error = ?e, period = %period, "rollover failed, retrying next period");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::{LedgerErr, LedgerResult, Member, RolloverOutcome};
    use crate::telegram::TelegramResult;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, 0)
                .unwrap(),
        )
    }

    fn midnight() -> NaiveTime {
        NaiveTime::from_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn next_fire_hits_first_of_next_month() {
        let trigger = FirstOfMonth { at: midnight() };
        assert_eq!(
            trigger.next_fire(utc(2026, 8, 29, 15, 30)),
            utc(2026, 9, 1, 0, 0)
        );
    }

    #[test]
    fn next_fire_crosses_year_boundary() {
        let trigger = FirstOfMonth { at: midnight() };
        assert_eq!(
            trigger.next_fire(utc(2026, 12, 31, 23, 59)),
            utc(2027, 1, 1, 0, 0)
        );
    }

    #[test]
    fn next_fire_on_the_first_before_fire_time_stays_in_the_month() {
        let trigger = FirstOfMonth {
            at: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        };
        // restart at 02:00 on the 1st: this month's fire is still ahead
        assert_eq!(
            trigger.next_fire(utc(2026, 9, 1, 2, 0)),
            utc(2026, 9, 1, 6, 0)
        );
        // exactly at the fire instant counts as past, the marker dedupes the
        // fire that just ran
        assert_eq!(
            trigger.next_fire(utc(2026, 9, 1, 6, 0)),
            utc(2026, 10, 1, 6, 0)
        );
    }

    #[test]
    fn next_fire_on_the_first_points_at_the_following_month() {
        let trigger = FirstOfMonth {
            at: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        };
        // already past this month's fire; leap-year February ends on the 29th
        assert_eq!(
            trigger.next_fire(utc(2028, 2, 1, 7, 0)),
            utc(2028, 3, 1, 6, 0)
        );
    }

    #[derive(Default)]
    struct RecordingOutbound {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_channel_message(&self, chat_id: i64, text: &str) -> TelegramResult<()> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }

        async fn send_direct_message(&self, user_id: i64, text: &str) -> TelegramResult<()> {
            self.sent.lock().unwrap().push((user_id, text.to_string()));
            Ok(())
        }
    }

    /// Store whose rollover always fails, for the degraded path.
    struct BrokenLedger;

    #[async_trait]
    impl Ledger for BrokenLedger {
        async fn upsert_user(&self, _: i64, _: &str, _: Option<&str>) -> LedgerResult<bool> {
            Err(LedgerErr::Unavailable(sqlx::Error::PoolTimedOut))
        }
        async fn award_point(&self, _: i64) -> LedgerResult<i64> {
            Err(LedgerErr::Unavailable(sqlx::Error::PoolTimedOut))
        }
        async fn get_user(&self, _: i64) -> LedgerResult<Option<Member>> {
            Err(LedgerErr::Unavailable(sqlx::Error::PoolTimedOut))
        }
        async fn top_n(&self, _: i64) -> LedgerResult<Vec<Member>> {
            Err(LedgerErr::Unavailable(sqlx::Error::PoolTimedOut))
        }
        async fn rollover_period(&self, _: Period) -> LedgerResult<RolloverOutcome> {
            Err(LedgerErr::Unavailable(sqlx::Error::PoolTimedOut))
        }
        async fn last_completed_period(&self) -> LedgerResult<Option<Period>> {
            Err(LedgerErr::Unavailable(sqlx::Error::PoolTimedOut))
        }
    }

    fn scheduler_with(ledger: Arc<dyn Ledger>) -> (Arc<RecordingOutbound>, ResetScheduler) {
        let outbound = Arc::new(RecordingOutbound::default());
        let scheduler = ResetScheduler::new(
            ledger,
            outbound.clone(),
            Box::new(FirstOfMonth { at: midnight() }),
            -100,
        );
        (outbound, scheduler)
    }

    #[tokio::test]
    async fn fire_rolls_over_and_announces_once() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_user(1, "ada", None).await.unwrap();
        ledger.award_point(1).await.unwrap();

        let (outbound, scheduler) = scheduler_with(ledger.clone());
        scheduler.fire(utc(2026, 9, 1, 0, 0)).await;

        let ada = ledger.get_user(1).await.unwrap().unwrap();
        assert_eq!(ada.points, 0);
        assert_eq!(ada.last_period_points, 1);

        let sent = outbound.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, -100);
    }

    #[tokio::test]
    async fn duplicate_fire_in_the_same_period_stays_silent() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_user(1, "ada", None).await.unwrap();

        let (outbound, scheduler) = scheduler_with(ledger);
        scheduler.fire(utc(2026, 9, 1, 0, 0)).await;
        // process restart shortly after firing
        scheduler.fire(utc(2026, 9, 1, 0, 5)).await;

        assert_eq!(outbound.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_rollover_withholds_the_announcement() {
        let (outbound, scheduler) = scheduler_with(Arc::new(BrokenLedger));
        scheduler.fire(utc(2026, 9, 1, 0, 0)).await;

        assert!(outbound.sent.lock().unwrap().is_empty());
    }
}
