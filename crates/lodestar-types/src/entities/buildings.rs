//! Buildings and inventories.

use serde::{Deserialize, Serialize};

use crate::codec::{ColumnKind, ColumnSpec, FieldValue, TableSchema};
use crate::event::DurableRecord;
use crate::impl_gateway_event;
use crate::storage;

/// A placed building. Cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingState {
    /// Building entity identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Claim the building stands on.
    pub claim_entity_id: String,
}

impl_gateway_event!(BuildingState, storage::BUILDING_STATE);

/// A static building description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingDesc {
    /// Description identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
}

impl_gateway_event!(BuildingDesc, storage::BUILDING_DESC);

static BUILDING_DESC_SCHEMA: TableSchema = TableSchema {
    table: "building_descs",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("description", ColumnKind::Text),
    ],
};

impl DurableRecord for BuildingDesc {
    fn schema() -> &'static TableSchema {
        &BUILDING_DESC_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.name),
            FieldValue::from(&self.description),
        ])
    }
}

/// One inventory slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryPocket {
    /// Item in the slot, if any.
    pub item_id: Option<String>,
    /// Quantity, if occupied.
    pub quantity: Option<i32>,
}

/// An inventory. Cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryState {
    /// Inventory entity identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Slots in order.
    pub pockets: Vec<InventoryPocket>,
}

impl_gateway_event!(InventoryState, storage::INVENTORY_STATE);
