//! Market orders and closed listings.

use serde::{Deserialize, Serialize};

use crate::codec::{ColumnKind, ColumnSpec, FieldValue, TableSchema};
use crate::event::DurableRecord;
use crate::impl_gateway_event;
use crate::storage;

/// An open buy or sell order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionListing {
    /// Order identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Player who placed the order.
    pub owner_id: String,
    /// Claim hosting the market.
    pub claim_id: String,
    /// Unit price.
    pub price: i32,
    /// Remaining quantity.
    pub quantity: i32,
    /// Coins held in escrow.
    pub stored_coins: i32,
    /// Item identifier.
    pub item_id: i32,
    /// Whether the item is cargo.
    pub is_cargo_item: bool,
}

impl_gateway_event!(AuctionListing, storage::AUCTION_LISTING);

static AUCTION_LISTING_SCHEMA: TableSchema = TableSchema {
    table: "auction_listings",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("owner_id", ColumnKind::Text),
        ColumnSpec::new("claim_id", ColumnKind::Text),
        ColumnSpec::new("price", ColumnKind::Integer),
        ColumnSpec::new("quantity", ColumnKind::Integer),
        ColumnSpec::new("stored_coins", ColumnKind::Integer),
        ColumnSpec::new("item_id", ColumnKind::Integer),
        ColumnSpec::new("is_cargo_item", ColumnKind::Boolean),
    ],
};

impl DurableRecord for AuctionListing {
    fn schema() -> &'static TableSchema {
        &AUCTION_LISTING_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.owner_id),
            FieldValue::from(&self.claim_id),
            FieldValue::from(self.price),
            FieldValue::from(self.quantity),
            FieldValue::from(self.stored_coins),
            FieldValue::from(self.item_id),
            FieldValue::from(self.is_cargo_item),
        ])
    }
}

/// Item stack recorded on a closed listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedItemStack {
    /// Item identifier.
    pub item_id: i32,
    /// Quantity.
    pub quantity: i32,
    /// Whether the item is cargo.
    pub is_cargo: bool,
}

/// A completed or cancelled listing awaiting collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedListing {
    /// Listing identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Player who owned the listing.
    pub owner_id: String,
    /// Claim hosting the market.
    pub claim_id: String,
    /// Items held by the listing.
    pub item_stack: ClosedItemStack,
    /// Close time as reported by the source.
    pub timestamp: String,
}

impl_gateway_event!(ClosedListing, storage::CLOSED_LISTING);

static CLOSED_LISTING_SCHEMA: TableSchema = TableSchema {
    table: "closed_listings",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("owner_id", ColumnKind::Text),
        ColumnSpec::new("claim_id", ColumnKind::Text),
        ColumnSpec::new("item_stack", ColumnKind::Json),
        ColumnSpec::new("timestamp", ColumnKind::Text),
    ],
};

impl DurableRecord for ClosedListing {
    fn schema() -> &'static TableSchema {
        &CLOSED_LISTING_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.owner_id),
            FieldValue::from(&self.claim_id),
            FieldValue::json(&self.item_stack)?,
            FieldValue::from(&self.timestamp),
        ])
    }
}
