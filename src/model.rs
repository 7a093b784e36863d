use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;

/// Maximum number of students returned by a free-text search.
pub const SEARCH_RESULT_LIMIT: usize = 15;

/// Minimum query length for a non-numeric search.
pub const SEARCH_MIN_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickupState {
    Pending,
    Delivered,
}

impl PickupState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "DELIVERED" => Some(Self::Delivered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: i64,
    pub level_id: i64,
    pub name: String,
    pub order: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub grade_id: i64,
    pub name: String,
    pub active: bool,
    pub present: bool,
    pub status_date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupRequest {
    pub id: i64,
    pub student_id: i64,
    pub grade_id: i64,
    pub state: PickupState,
    pub requested_at: String,
    pub delivered_at: Option<String>,
    pub note: Option<String>,
}

/// Storage form of an instant. Fixed width, so text order is time order.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Storage form of a calendar date.
pub fn date_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Current instant and the local calendar day it falls on.
pub fn now_and_today() -> (DateTime<Utc>, NaiveDate) {
    let now = Utc::now();
    (now, now.with_timezone(&Local).date_naive())
}
