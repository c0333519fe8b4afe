//! A user's own buy orders on the marketplace, enriched with the analysis
//! figures captured when each order was placed.
//!
//! Orders live upstream; the figures live in the local [`MetadataStore`] keyed
//! by (username, order id). Placing an order stores them, listing merges them
//! back in, and deleting an order drops them. Credentials are never held here:
//! the caller's `Authorization` header is forwarded as-is.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::db::MetadataStore;
use crate::error::{AppError, Result};
use crate::fetcher::{MarketClient, RelayResponse};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request to place a buy order. Field names match [`crate::types::Opportunity`],
/// so a result row from an analysis job can be posted back unchanged.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBuyOrder {
    #[serde(alias = "item_id")]
    pub item_id: String,
    #[serde(default, alias = "item_name")]
    pub item_name: String,
    #[serde(alias = "buy_price", alias = "price")]
    pub buy_price: i64,
    #[serde(default, alias = "sell_price")]
    pub sell_price: Option<i64>,
    #[serde(default, alias = "net_profit")]
    pub net_profit: Option<i64>,
    #[serde(default, alias = "total_investment")]
    pub total_investment: Option<i64>,
    #[serde(default = "one")]
    pub quantity: i64,
}

fn one() -> i64 {
    1
}

/// What gets persisted per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyOrderMetadata {
    pub item_id: String,
    pub item_name: String,
    pub buy_price: i64,
    pub sell_price: Option<i64>,
    pub net_profit: Option<i64>,
    pub total_investment: Option<i64>,
    pub quantity: i64,
}

impl From<&CreateBuyOrder> for BuyOrderMetadata {
    fn from(req: &CreateBuyOrder) -> Self {
        Self {
            item_id: req.item_id.clone(),
            item_name: req.item_name.clone(),
            buy_price: req.buy_price,
            sell_price: req.sell_price,
            net_profit: req.net_profit,
            total_investment: req.total_investment,
            quantity: req.quantity,
        }
    }
}

/// A buy order as listed by `GET /profile/{user}/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileOrder {
    pub id: String,
    #[serde(default)]
    pub item: Option<ProfileOrderItem>,
    #[serde(default)]
    pub platinum: i64,
    #[serde(default = "one")]
    pub quantity: i64,
    #[serde(default)]
    pub creation_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileOrderItem {
    pub id: String,
}

/// A live buy order merged with its stored figures. Live fields win for the
/// order itself; figures fall back to the live order when nothing was stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedBuyOrder {
    pub id: String,
    pub item_id: Option<String>,
    #[serde(rename = "itemName")]
    pub item_name: String,
    #[serde(rename = "buyPrice")]
    pub buy_price: i64,
    #[serde(rename = "sellPrice")]
    pub sell_price: Option<i64>,
    #[serde(rename = "netProfit")]
    pub net_profit: Option<i64>,
    #[serde(rename = "totalInvestment")]
    pub total_investment: Option<i64>,
    pub quantity: i64,
    pub creation_date: Option<String>,
    pub platinum: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkDeleteOutcome {
    pub deleted: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// TradeDesk
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TradeDesk {
    client: Arc<MarketClient>,
    metadata: MetadataStore,
}

impl TradeDesk {
    pub fn new(client: Arc<MarketClient>, metadata: MetadataStore) -> Self {
        Self { client, metadata }
    }

    /// Place a visible buy order upstream and remember its figures under the
    /// order id the marketplace assigns. Returns that id.
    pub async fn create_buy_order(
        &self,
        username: &str,
        authorization: Option<String>,
        req: &CreateBuyOrder,
    ) -> Result<String> {
        check_path_segment("username", username)?;
        if req.item_id.is_empty() || req.buy_price <= 0 || req.quantity <= 0 {
            return Err(AppError::BadRequest(
                "item id, a positive price and a positive quantity are required".to_string(),
            ));
        }

        let body = serde_json::json!({
            "item": req.item_id,
            "order_type": "buy",
            "platinum": req.buy_price,
            "quantity": req.quantity,
            "visible": true,
        });
        let resp = self
            .client
            .relay(
                Method::POST,
                "profile/orders",
                authorization,
                Some(serde_json::to_vec(&body)?),
            )
            .await?;
        let payload = expect_success(resp)?;

        let order_id = payload
            .pointer("/payload/order/id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Upstream("order response has no payload.order.id".to_string()))?
            .to_string();

        let metadata = serde_json::to_value(BuyOrderMetadata::from(req))?;
        self.metadata.set(username, &order_id, &metadata).await?;
        info!(
            username,
            order_id = %order_id,
            "[TRADE] buy order placed for {} at {}",
            req.item_name, req.buy_price
        );
        Ok(order_id)
    }

    /// The user's live buy orders with stored figures merged in.
    pub async fn my_buy_orders(
        &self,
        username: &str,
        authorization: Option<String>,
    ) -> Result<Vec<EnrichedBuyOrder>> {
        let orders = self.fetch_buy_orders(username, authorization).await?;
        let metadata = self.metadata.list(username).await?;
        debug!(username, orders = orders.len(), stored = metadata.len(), "[TRADE] merging buy orders");
        Ok(merge_buy_orders(orders, &metadata))
    }

    /// Delete one order upstream; its stored figures go with it.
    pub async fn delete_order(
        &self,
        username: &str,
        order_id: &str,
        authorization: Option<String>,
    ) -> Result<()> {
        check_path_segment("username", username)?;
        check_path_segment("order id", order_id)?;
        let resp = self
            .client
            .relay(
                Method::DELETE,
                &format!("profile/orders/{order_id}"),
                authorization,
                None,
            )
            .await?;
        expect_success(resp)?;
        self.metadata.delete(username, order_id).await?;
        info!(username, order_id, "[TRADE] order deleted");
        Ok(())
    }

    /// Delete every live buy order of the user. Figures are dropped per
    /// deleted order, and wholesale once nothing failed.
    pub async fn delete_all_buy_orders(
        &self,
        username: &str,
        authorization: Option<String>,
    ) -> Result<BulkDeleteOutcome> {
        let orders = self.fetch_buy_orders(username, authorization.clone()).await?;
        let mut outcome = BulkDeleteOutcome::default();

        for order in &orders {
            match self.delete_order(username, &order.id, authorization.clone()).await {
                Ok(()) => outcome.deleted += 1,
                Err(e) => {
                    warn!(username, order_id = %order.id, "[TRADE] delete failed: {e}");
                    outcome.failed += 1;
                }
            }
        }
        if outcome.failed == 0 {
            self.metadata.delete_all(username).await?;
        }
        info!(
            username,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "[TRADE] bulk delete finished"
        );
        Ok(outcome)
    }

    async fn fetch_buy_orders(
        &self,
        username: &str,
        authorization: Option<String>,
    ) -> Result<Vec<ProfileOrder>> {
        check_path_segment("username", username)?;
        let resp = self
            .client
            .relay(
                Method::GET,
                &format!("profile/{username}/orders"),
                authorization,
                None,
            )
            .await?;
        let payload = expect_success(resp)?;
        let raw = payload
            .pointer("/payload/buy_orders")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|o| serde_json::from_value::<ProfileOrder>(o).ok())
            .collect())
    }
}

/// Merge stored figures into live orders, keyed by order id. Entries that do
/// not parse as [`BuyOrderMetadata`] are treated as absent.
pub fn merge_buy_orders(
    orders: Vec<ProfileOrder>,
    metadata: &Map<String, Value>,
) -> Vec<EnrichedBuyOrder> {
    orders
        .into_iter()
        .map(|order| {
            let meta = metadata
                .get(&order.id)
                .and_then(|v| serde_json::from_value::<BuyOrderMetadata>(v.clone()).ok());
            let live_item_id = order.item.map(|i| i.id);
            match meta {
                Some(m) => EnrichedBuyOrder {
                    id: order.id,
                    item_id: Some(m.item_id),
                    item_name: m.item_name,
                    buy_price: m.buy_price,
                    sell_price: m.sell_price,
                    net_profit: m.net_profit,
                    total_investment: m.total_investment,
                    quantity: m.quantity,
                    creation_date: order.creation_date,
                    platinum: order.platinum,
                },
                None => EnrichedBuyOrder {
                    id: order.id,
                    item_id: live_item_id,
                    item_name: "Unknown Item".to_string(),
                    buy_price: order.platinum,
                    sell_price: None,
                    net_profit: None,
                    total_investment: None,
                    quantity: order.quantity,
                    creation_date: order.creation_date,
                    platinum: order.platinum,
                },
            }
        })
        .collect()
}

fn expect_success(resp: RelayResponse) -> Result<Value> {
    if !resp.status.is_success() {
        return Err(AppError::UpstreamRejected {
            status: resp.status,
            body: String::from_utf8_lossy(&resp.body).chars().take(200).collect(),
        });
    }
    if resp.body.is_empty() || resp.status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&resp.body)?)
}

/// Usernames and order ids are interpolated into upstream paths.
fn check_path_segment(what: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid {what}: {value:?}")))
    }
}
