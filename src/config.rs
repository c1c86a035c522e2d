use std::collections::HashSet;
use std::env;

use chrono::NaiveTime;
use thiserror::Error;

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("could not parse {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Everything the service consumes from the environment, parsed once at
/// startup. The core never reads ambient env state itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    /// Unset means the in-memory ledger (local runs only).
    pub database_url: Option<String>,
    /// Chat that receives the monthly reset announcement.
    pub community_chat_id: i64,
    /// Inviters excluded from earning referral points.
    pub admin_ids: HashSet<i64>,
    /// Sole identity allowed to run the force-reset escape hatch.
    pub operator_id: Option<i64>,
    /// UTC time-of-day the monthly rollover fires.
    pub reset_time: NaiveTime,
}

impl Config {
    pub fn from_env() -> EnvResult<Self> {
        Ok(Self {
            bot_token: required("BOT_TOKEN")?,
            database_url: optional("DATABASE_URL"),
            community_chat_id: parse_i64("COMMUNITY_CHAT_ID", required("COMMUNITY_CHAT_ID")?)?,
            admin_ids: parse_id_set("ADMIN_IDS", optional("ADMIN_IDS"))?,
            operator_id: optional("OPERATOR_ID")
                .map(|raw| parse_i64("OPERATOR_ID", raw))
                .transpose()?,
            reset_time: parse_reset_time(optional("RESET_TIME"))?,
        })
    }
}

fn required(var: &'static str) -> EnvResult<String> {
    optional(var).ok_or(EnvErr::Missing(var))
}

fn optional(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_i64(var: &'static str, raw: String) -> EnvResult<i64> {
    raw.trim().parse().map_err(|e| EnvErr::Invalid {
        var,
        reason: format!("{e}"),
    })
}

fn parse_id_set(var: &'static str, raw: Option<String>) -> EnvResult<HashSet<i64>> {
    let Some(raw) = raw else {
        return Ok(HashSet::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse().map_err(|e| EnvErr::Invalid {
                var,
                reason: format!("bad id '{part}': {e}"),
            })
        })
        .collect()
}

fn parse_reset_time(raw: Option<String>) -> EnvResult<NaiveTime> {
    let Some(raw) = raw else {
        // midnight UTC on the 1st
        return Ok(NaiveTime::MIN);
    };

    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| EnvErr::Invalid {
        var: "RESET_TIME",
        reason: format!("{e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_set_parses_comma_separated_list() {
        let ids = parse_id_set("ADMIN_IDS", Some("1, 2,3".into())).unwrap();
        assert_eq!(ids, HashSet::from([1, 2, 3]));
    }

    #[test]
    fn id_set_defaults_empty() {
        assert!(parse_id_set("ADMIN_IDS", None).unwrap().is_empty());
    }

    #[test]
    fn id_set_rejects_garbage() {
        assert!(parse_id_set("ADMIN_IDS", Some("1,banana".into())).is_err());
    }

    #[test]
    fn reset_time_parses_and_defaults() {
        assert_eq!(
            parse_reset_time(Some("06:30".into())).unwrap(),
            NaiveTime::from_hms_opt(6, 30, 0).unwrap()
        );
        assert_eq!(parse_reset_time(None).unwrap(), NaiveTime::MIN);
        assert!(parse_reset_time(Some("late".into())).is_err());
    }
}
