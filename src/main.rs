use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, EnvErr};
use crate::dispatch::Dispatcher;
use crate::ledger::memory::MemoryLedger;
use crate::ledger::postgres::PgLedger;
use crate::ledger::{Ledger, LedgerErr};
use crate::reset::{FirstOfMonth, ResetScheduler};
use crate::telegram::BotApi;

mod attribution;
mod config;
mod dispatch;
mod leaderboard;
mod ledger;
mod messages;
mod reset;
mod telegram;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Ledger(#[from] LedgerErr),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vouch=debug,sqlx=info,info")),
        )
        .with_target(true)
        .init();

    tracing::info!("starting referral bot");

    let config = Config::from_env()?;

    // the store handle is opened here and injected everywhere; core logic
    // never owns its lifecycle
    let ledger: Arc<dyn Ledger> = match &config.database_url {
        Some(url) => {
            let pg = PgLedger::connect(url).await?;
            pg.ensure_schema().await?;
            tracing::info!("ledger backed by postgres");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL unset, ledger is in-memory and will not survive restarts");
            Arc::new(MemoryLedger::new())
        }
    };

    let api = Arc::new(BotApi::new(&config.bot_token));

    let scheduler = ResetScheduler::new(
        ledger.clone(),
        api.clone(),
        Box::new(FirstOfMonth {
            at: config.reset_time,
        }),
        config.community_chat_id,
    );

    let dispatcher = Dispatcher::new(
        ledger,
        api.clone(),
        config.admin_ids,
        config.operator_id,
        config.reset_time,
    );

    let handles = vec![
        tokio::spawn(async move { scheduler.run().await }),
        tokio::spawn(async move { dispatcher.run(api).await }),
    ];

    _ = join_all(handles).await;

    Ok(())
}
