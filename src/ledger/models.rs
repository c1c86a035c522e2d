use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// One row per distinct chat member who has ever joined or registered.
/// Rows are never deleted; only the current-period counters roll over.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, FromRow)]
pub struct Member {
    pub user_id: i64,
    pub display_name: String,
    pub handle: Option<String>,
    pub points: i64,
    pub invited_count: i64,
    pub last_period_points: i64,
    pub joined_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Member {
    /// Leaderboard label: the public handle when present, else the display name.
    pub fn display_label(&self) -> String {
        match &self.handle {
            Some(handle) => format!("@{handle}"),
            None => self.display_name.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) fn member_fixture(user_id: i64, display_name: &str, handle: Option<&str>) -> Member {
    let now = chrono::Utc::now().naive_utc();
    Member {
        user_id,
        display_name: display_name.to_string(),
        handle: handle.map(str::to_string),
        points: 0,
        invited_count: 0,
        last_period_points: 0,
        joined_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_prefers_handle() {
        let member = member_fixture(1, "Ada Lovelace", Some("ada"));
        assert_eq!(member.display_label(), "@ada");
    }

    #[test]
    fn label_falls_back_to_display_name() {
        let member = member_fixture(2, "Ada Lovelace", None);
        assert_eq!(member.display_label(), "Ada Lovelace");
    }
}
