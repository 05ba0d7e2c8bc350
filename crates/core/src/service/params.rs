//! Request parameters and their bounds

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::MAX_MESSAGE_CHARS;

pub const INTENT_CHARS: (usize, usize) = (1, 200);
pub const TOPIC_CHARS: (usize, usize) = (1, 50);
pub const DURATION_MINUTES: (u32, u32) = (5, 120);
pub const REPETITIONS: (u32, u32) = (1, 10);
pub const BREAK_MINUTES: (u32, u32) = (1, 30);
pub const BREAK_INTERVAL: (u32, u32) = (1, 10);
pub const RETENTION_WEEKS: (u32, u32) = (1, 52);
pub const NICKNAME_CHARS: (usize, usize) = (3, 24);
pub const MAX_PAGE: u32 = 100;

pub const DEFAULT_REPETITIONS: u32 = 1;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;
pub const DEFAULT_BREAK_INTERVAL: u32 = 1;
pub const DEFAULT_MESSAGE_PAGE: u32 = 50;
pub const DEFAULT_LEADERBOARD_SIZE: u32 = 10;

fn default_true() -> bool {
    true
}

/// Arguments of `create_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionParams {
    pub intent: String,
    pub topic: String,
    pub min_duration: u32,
    pub max_duration: u32,
    #[serde(default)]
    pub repetitions: Option<u32>,
    #[serde(default)]
    pub break_duration: Option<u32>,
    #[serde(default)]
    pub break_interval: Option<u32>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default = "default_true")]
    pub chat_enabled: bool,
}

impl CreateSessionParams {
    pub fn new(intent: impl Into<String>, topic: impl Into<String>, min: u32, max: u32) -> Self {
        Self {
            intent: intent.into(),
            topic: topic.into(),
            min_duration: min,
            max_duration: max,
            repetitions: None,
            break_duration: None,
            break_interval: None,
            is_private: false,
            chat_enabled: true,
        }
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_chars("intent", &self.intent, INTENT_CHARS)?;
        check_chars("topic", &self.topic, TOPIC_CHARS)?;
        check_range("min_duration", self.min_duration, DURATION_MINUTES)?;
        check_range("max_duration", self.max_duration, DURATION_MINUTES)?;
        if self.min_duration > self.max_duration {
            return Err(Error::Validation(
                "min_duration must not exceed max_duration".into(),
            ));
        }
        check_range("repetitions", self.repetitions(), REPETITIONS)?;
        check_range("break_duration", self.break_duration(), BREAK_MINUTES)?;
        check_range("break_interval", self.break_interval(), BREAK_INTERVAL)?;
        Ok(())
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions.unwrap_or(DEFAULT_REPETITIONS)
    }

    pub fn break_duration(&self) -> u32 {
        self.break_duration.unwrap_or(DEFAULT_BREAK_MINUTES)
    }

    pub fn break_interval(&self) -> u32 {
        self.break_interval.unwrap_or(DEFAULT_BREAK_INTERVAL)
    }
}

/// Window for leaderboard totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    #[default]
    All,
    Month,
    Week,
}

/// Leaderboard ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    FocusMinutes,
    Sessions,
    Streak,
}

/// Arguments of `get_leaderboard`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub time_filter: TimeFilter,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default = "default_leaderboard_size")]
    pub limit: u32,
}

fn default_leaderboard_size() -> u32 {
    DEFAULT_LEADERBOARD_SIZE
}

impl Default for LeaderboardQuery {
    fn default() -> Self {
        Self {
            time_filter: TimeFilter::All,
            sort_by: SortBy::FocusMinutes,
            limit: DEFAULT_LEADERBOARD_SIZE,
        }
    }
}

impl LeaderboardQuery {
    pub fn validate(&self) -> Result<()> {
        check_page(self.limit)
    }
}

/// Trimmed chat message, 1..=500 chars
pub fn validate_message(content: &str) -> Result<String> {
    let trimmed = content.trim();
    check_chars("message", trimmed, (1, MAX_MESSAGE_CHARS))?;
    Ok(trimmed.to_string())
}

/// Trimmed nickname, 3..=24 chars
pub fn validate_nickname(nickname: &str) -> Result<String> {
    let trimmed = nickname.trim();
    check_chars("nickname", trimmed, NICKNAME_CHARS)?;
    Ok(trimmed.to_string())
}

pub fn validate_retention(weeks: u32) -> Result<()> {
    check_range("retention_weeks", weeks, RETENTION_WEEKS)
}

/// Page sizes for messages and leaderboards
pub fn check_page(limit: u32) -> Result<()> {
    check_range("limit", limit, (1, MAX_PAGE))
}

fn check_chars(field: &str, value: &str, (min, max): (usize, usize)) -> Result<()> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(Error::Validation(format!(
            "{} must be {}-{} characters",
            field, min, max
        )));
    }
    Ok(())
}

fn check_range(field: &str, value: u32, (min, max): (u32, u32)) -> Result<()> {
    if !(min..=max).contains(&value) {
        return Err(Error::Validation(format!(
            "{} must be between {} and {}",
            field, min, max
        )));
    }
    Ok(())
}
