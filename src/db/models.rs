/// Row type for the `order_metadata` table (see migrations/0001_order_metadata.sql).

#[derive(Debug, sqlx::FromRow)]
pub struct OrderMetadataRow {
    pub username: String,
    pub order_id: String,
    /// Serialized JSON object.
    pub metadata: String,
    /// Millisecond UTC epoch of the last write.
    pub updated_at: i64,
}
