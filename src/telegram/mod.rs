use async_trait::async_trait;
use thiserror::Error;

pub mod api;
pub mod types;

pub use api::BotApi;

pub type TelegramResult<T> = core::result::Result<T, TelegramErr>;

#[derive(Debug, Error)]
pub enum TelegramErr {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("bot api rejected the call: {0}")]
    Api(String),
}

/// Outbound half of the chat transport. Fire-and-forget from the core's
/// perspective: a failed send never rolls back the ledger mutation that
/// preceded it.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_channel_message(&self, chat_id: i64, text: &str) -> TelegramResult<()>;
    async fn send_direct_message(&self, user_id: i64, text: &str) -> TelegramResult<()>;
}
