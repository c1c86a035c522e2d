use std::collections::HashSet;
use std::sync::Arc;

use tracing::instrument;

use crate::ledger::{Ledger, LedgerResult};

/// A participant in a join event, already lifted out of the transport types.
#[derive(Debug, Clone)]
pub struct JoinActor {
    pub id: i64,
    pub is_bot: bool,
    pub display_name: String,
    pub handle: Option<String>,
}

/// Outcome of one attribution pass. The skips are expected branches, not
/// failures; only the store can actually error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    Awarded { new_points: i64 },
    SkippedBot,
    SkippedNoInviter,
    SkippedSelfInvite,
    SkippedAdminInviter,
}

pub struct AttributionEngine {
    ledger: Arc<dyn Ledger>,
    admins: HashSet<i64>,
}

impl AttributionEngine {
    pub fn new(ledger: Arc<dyn Ledger>, admins: HashSet<i64>) -> Self {
        Self { ledger, admins }
    }

    /// Decides whether a join earns the inviter a point. Policy, in order:
    /// bot invitees are ignored entirely; the invitee is registered before
    /// anything else so every member eventually has a ledger row; then
    /// missing inviter, self-invite, and admin-inviter each skip the award.
    #[instrument(skip(self, inviter, invitee), fields(invitee_id = invitee.id))]
    pub async fn attribute(
        &self,
        inviter: Option<&JoinActor>,
        invitee: &JoinActor,
    ) -> LedgerResult<Attribution> {
        if invitee.is_bot {
            return Ok(Attribution::SkippedBot);
        }

        self.ledger
            .upsert_user(invitee.id, &invitee.display_name, invitee.handle.as_deref())
            .await?;

        let Some(inviter) = inviter else {
            return Ok(Attribution::SkippedNoInviter);
        };

        if inviter.id == invitee.id {
            tracing::debug!(inviter_id = inviter.id, "self-invite, no award");
            return Ok(Attribution::SkippedSelfInvite);
        }

        if self.admins.contains(&inviter.id) {
            tracing::debug!(inviter_id = inviter.id, "admin inviter, no award");
            return Ok(Attribution::SkippedAdminInviter);
        }

        self.ledger
            .upsert_user(inviter.id, &inviter.display_name, inviter.handle.as_deref())
            .await?;
        let new_points = self.ledger.award_point(inviter.id).await?;

        tracing::info!(inviter_id = inviter.id, new_points, "referral awarded");
        Ok(Attribution::Awarded { new_points })
    }
}
