//! User-facing text. The core hands plain strings to the transport; anything
//! fancier than that is the transport's problem.

use chrono::Timelike;

use crate::leaderboard::{RankedRow, Stats};

pub fn greeting(hour: u32) -> &'static str {
    match hour {
        5..12 => "Good morning",
        12..18 => "Good afternoon",
        18..23 => "Good evening",
        _ => "Good night",
    }
}

pub fn welcome(now: chrono::DateTime<chrono::Utc>, label: &str) -> String {
    format!(
        "{greeting}, {label}! 🎉\n\n\
         Welcome to the community!\n\n\
         Invite your friends and climb the monthly referral leaderboard — \
         every member you bring in earns you a point. \
         Send /rules to see how scoring works.",
        greeting = greeting(now.hour()),
    )
}

pub fn rules() -> String {
    "How the referral contest works:\n\
     • you earn 1 point for every member you invite\n\
     • inviting yourself doesn't count, and admin invites don't score\n\
     • scores reset on the 1st of every month; last month's total is kept\n\
     • /register to join, /stats for your score, /leaderboard for the top 10"
        .to_string()
}

pub fn registered() -> String {
    "You're in! Invite friends to start earning points.".to_string()
}

pub fn already_registered() -> String {
    "You're already registered — your points are safe.".to_string()
}

pub fn not_registered() -> String {
    "You're not registered yet. Send /register to join the contest.".to_string()
}

pub fn stats(stats: &Stats) -> String {
    format!(
        "Your referral stats:\n\
         • points this period: {}\n\
         • members invited: {}\n\
         • last period: {}\n\
         • days until reset: {}",
        stats.points, stats.invited_count, stats.last_period_points, stats.days_until_reset
    )
}

pub fn leaderboard(rows: &[RankedRow]) -> String {
    if rows.is_empty() {
        return "The leaderboard is empty — invite someone!".to_string();
    }

    let mut out = String::from("🏆 Referral leaderboard:\n");
    for row in rows {
        out.push_str(&format!("{}. {} — {}\n", row.rank, row.label, row.points));
    }
    out.trim_end().to_string()
}

pub fn reset_announcement() -> String {
    "🗓 A new month, a new race! The referral leaderboard has been reset — \
     last month's scores are archived. Invite friends to take the top spot."
        .to_string()
}

pub fn forced_reset_done(affected: u64) -> String {
    format!("Rollover forced: {affected} member records archived and reset.")
}

pub fn forced_reset_already_done() -> String {
    "Rollover already completed for this period; nothing to do.".to_string()
}

pub fn unknown_command() -> String {
    "Unknown command. Try /register, /stats, /leaderboard or /rules.".to_string()
}

pub fn store_trouble() -> String {
    "Something went wrong on our side — please try again in a moment.".to_string()
}
