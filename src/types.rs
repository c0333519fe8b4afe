use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::defaults;

// ---------------------------------------------------------------------------
// Catalog items
// ---------------------------------------------------------------------------

/// A tradeable item as supplied by the caller. Field aliases accept both the
/// marketplace's snake_case catalog shape and the camelCase client shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "displayName", alias = "item_name")]
    pub display_name: String,
    #[serde(default, alias = "lookupSlug", alias = "url_name")]
    pub lookup_slug: String,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Presence of the user who posted an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosterStatus {
    /// In game right now. The only state an order can be traded against.
    Ingame,
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PosterStatus {
    pub fn is_active(self) -> bool {
        matches!(self, PosterStatus::Ingame)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUser {
    #[serde(default)]
    pub ingame_name: String,
    #[serde(default)]
    pub status: PosterStatus,
}

/// One resting order, in the marketplace's own field names so the anchor order
/// round-trips to clients unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "order_type")]
    pub side: OrderSide,
    #[serde(rename = "platinum")]
    pub price: i64,
    #[serde(default = "one")]
    pub quantity: i64,
    /// None when the upstream omitted the field or sent something unparsable.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: OrderUser,
}

impl Order {
    pub fn poster_status(&self) -> PosterStatus {
        self.user.status
    }
}

fn one() -> i64 {
    1
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

// ---------------------------------------------------------------------------
// Analysis constraints and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default = "default_min_profit", alias = "min_profit")]
    pub min_profit: i64,
    /// 0 disables the investment cap.
    #[serde(default = "default_max_investment", alias = "max_investment")]
    pub max_investment: i64,
    #[serde(default = "default_max_order_age_days", alias = "max_order_age")]
    pub max_order_age_days: u32,
    #[serde(default = "default_batch_size", alias = "batch_size")]
    pub batch_size: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            min_profit: defaults::MIN_PROFIT,
            max_investment: defaults::MAX_INVESTMENT,
            max_order_age_days: defaults::MAX_ORDER_AGE_DAYS,
            batch_size: defaults::BATCH_SIZE,
        }
    }
}

fn default_min_profit() -> i64 {
    defaults::MIN_PROFIT
}

fn default_max_investment() -> i64 {
    defaults::MAX_INVESTMENT
}

fn default_max_order_age_days() -> u32 {
    defaults::MAX_ORDER_AGE_DAYS
}

fn default_batch_size() -> usize {
    defaults::BATCH_SIZE
}

/// A profitable buy-then-resell spread on one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub item_name: String,
    pub item_id: String,
    pub buy_price: i64,
    pub sell_price: i64,
    pub net_profit: i64,
    pub total_investment: i64,
    /// The best bid the buy price was derived from.
    pub anchor_order: Order,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Done,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time copy of a job, returned to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub results: Vec<Opportunity>,
    pub cancelled: bool,
}
