use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use tracing::instrument;

use crate::attribution::{Attribution, AttributionEngine, JoinActor};
use crate::leaderboard::LeaderboardQuery;
use crate::ledger::{Ledger, Period};
use crate::messages;
use crate::telegram::types::{Message, Update, User};
use crate::telegram::{BotApi, Outbound};

const LONG_POLL_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Routes inbound updates to the attribution engine, the leaderboard and the
/// ledger. Every update is handled in isolation: one bad event can be logged
/// away without taking the loop down.
pub struct Dispatcher {
    ledger: Arc<dyn Ledger>,
    attribution: AttributionEngine,
    leaderboard: LeaderboardQuery,
    outbound: Arc<dyn Outbound>,
    operator_id: Option<i64>,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        outbound: Arc<dyn Outbound>,
        admins: HashSet<i64>,
        operator_id: Option<i64>,
        reset_time: NaiveTime,
    ) -> Self {
        Self {
            attribution: AttributionEngine::new(ledger.clone(), admins),
            leaderboard: LeaderboardQuery::new(ledger.clone(), reset_time),
            ledger,
            outbound,
            operator_id,
        }
    }

    pub async fn run(self, api: Arc<BotApi>) {
        let mut offset = 0i64;

        loop {
            let updates = match api.get_updates(offset, LONG_POLL_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::error!(error = ?e, "update poll failed, backing off");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                self.handle_update(update).await;
            }
        }
    }

    #[instrument(skip(self, update), fields(update_id = update.update_id))]
    pub async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };

        if !message.new_chat_members.is_empty() {
            self.handle_join(&message).await;
        } else if let Some((name, _args)) = message.text.as_deref().and_then(parse_command) {
            self.handle_command(&name, &message).await;
        }
    }

    /// One chat event can carry several simultaneous joins; each member gets
    /// its own attribution pass and a failure for one never aborts the rest.
    #[instrument(skip(self, message), fields(chat_id = message.chat.id, member_count = message.new_chat_members.len()))]
    async fn handle_join(&self, message: &Message) {
        let inviter = message.from.as_ref().map(join_actor);

        for member in &message.new_chat_members {
            let invitee = join_actor(member);

            match self.attribution.attribute(inviter.as_ref(), &invitee).await {
                Ok(Attribution::SkippedBot) => continue,
                Ok(outcome) => {
                    tracing::debug!(invitee_id = invitee.id, ?outcome, "join attributed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, invitee_id = invitee.id, "attribution failed");
                    continue;
                }
            }

            // the point (if any) is already committed; the welcome is
            // fire-and-forget
            let label = invitee_label(member);
            self.say(message.chat.id, &messages::welcome(Utc::now(), &label))
                .await;
        }
    }

    #[instrument(skip(self, message), fields(command = name, chat_id = message.chat.id))]
    async fn handle_command(&self, name: &str, message: &Message) {
        let Some(sender) = message.from.as_ref() else {
            return;
        };
        let chat_id = message.chat.id;

        match name {
            "register" => {
                let created = self
                    .ledger
                    .upsert_user(sender.id, &sender.display_name(), sender.username.as_deref())
                    .await;

                let reply = match created {
                    Ok(true) => messages::registered(),
                    Ok(false) => messages::already_registered(),
                    Err(e) => {
                        tracing::error!(error = ?e, "registration failed");
                        messages::store_trouble()
                    }
                };
                self.say(chat_id, &reply).await;
            }

            "stats" => {
                // stats go to the sender directly, not the whole chat
                let reply = match self.leaderboard.stats(sender.id, Utc::now()).await {
                    Ok(Some(stats)) => messages::stats(&stats),
                    Ok(None) => messages::not_registered(),
                    Err(e) => {
                        tracing::error!(error = ?e, "stats lookup failed");
                        messages::store_trouble()
                    }
                };
                if let Err(e) = self.outbound.send_direct_message(sender.id, &reply).await {
                    tracing::warn!(error = ?e, target_id = sender.id, "stats dm failed");
                }
            }

            "leaderboard" => {
                let reply = match self.leaderboard.top(10).await {
                    Ok(rows) => messages::leaderboard(&rows),
                    Err(e) => {
                        tracing::error!(error = ?e, "leaderboard query failed");
                        messages::store_trouble()
                    }
                };
                self.say(chat_id, &reply).await;
            }

            "rules" => {
                self.say(chat_id, &messages::rules()).await;
            }

            // undocumented operator escape hatch; anyone else gets the same
            // answer as a typo
            "forcereset" if self.operator_id == Some(sender.id) => {
                let reply = match self.ledger.rollover_period(Period::of(Utc::now())).await {
                    Ok(outcome) if outcome.already_done => messages::forced_reset_already_done(),
                    Ok(outcome) => messages::forced_reset_done(outcome.affected),
                    Err(e) => {
                        tracing::error!(error = ?e, "forced rollover failed");
                        messages::store_trouble()
                    }
                };
                self.say(chat_id, &reply).await;
            }

            _ => {
                self.say(chat_id, &messages::unknown_command()).await;
            }
        }
    }

    async fn say(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.outbound.send_channel_message(chat_id, text).await {
            tracing::warn!(error = ?e, chat_id, "reply failed to send");
        }
    }
}

fn join_actor(user: &User) -> JoinActor {
    JoinActor {
        id: user.id,
        is_bot: user.is_bot,
        display_name: user.display_name(),
        handle: user.username.clone(),
    }
}

fn invitee_label(user: &User) -> String {
    match &user.username {
        Some(handle) => format!("@{handle}"),
        None => user.display_name(),
    }
}

/// Pulls a `(command, args)` pair out of a `/command@botname arg…` text.
fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?;

    // group chats suffix commands with the bot's handle
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    let args = parts.map(str::to_string).collect();

    Some((name, args))
}
