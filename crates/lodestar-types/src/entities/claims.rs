//! Claims and empires.

use serde::{Deserialize, Serialize};

use crate::codec::{ColumnKind, ColumnSpec, FieldValue, TableSchema};
use crate::event::DurableRecord;
use crate::impl_gateway_event;
use crate::storage;

/// A claimed territory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimState {
    /// Claim identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Owning player entity.
    pub owner_player_id: String,
    /// Totem building entity.
    pub owner_building_id: String,
    /// Display name.
    pub name: String,
    /// Whether the claim belongs to no player.
    pub is_neutral: bool,
}

impl_gateway_event!(ClaimState, storage::CLAIM_STATE);

static CLAIM_STATE_SCHEMA: TableSchema = TableSchema {
    table: "claims",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("owner_player_id", ColumnKind::Text),
        ColumnSpec::new("owner_building_id", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("is_neutral", ColumnKind::Boolean),
    ],
};

impl DurableRecord for ClaimState {
    fn schema() -> &'static TableSchema {
        &CLAIM_STATE_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.owner_player_id),
            FieldValue::from(&self.owner_building_id),
            FieldValue::from(&self.name),
            FieldValue::from(self.is_neutral),
        ])
    }
}

/// A world position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// X coordinate.
    pub x: i32,
    /// Z coordinate.
    pub z: i32,
    /// Dimension index.
    pub dimension: u32,
}

/// Per-claim resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimLocalState {
    /// Claim identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Claim center, when placed.
    pub location: Option<Location>,
    /// Stored supplies.
    pub supplies: i32,
    /// Treasury balance.
    pub treasury: u32,
}

impl_gateway_event!(ClaimLocalState, storage::CLAIM_LOCAL_STATE);

static CLAIM_LOCAL_STATE_SCHEMA: TableSchema = TableSchema {
    table: "claim_locals",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("location", ColumnKind::Json),
        ColumnSpec::new("supplies", ColumnKind::Integer),
        ColumnSpec::new("treasury", ColumnKind::BigInt),
    ],
};

impl DurableRecord for ClaimLocalState {
    fn schema() -> &'static TableSchema {
        &CLAIM_LOCAL_STATE_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::json(&self.location)?,
            FieldValue::from(self.supplies),
            FieldValue::from(self.treasury),
        ])
    }
}

/// An empire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpireState {
    /// Empire identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Display name.
    pub name: String,
    /// Shard treasury balance.
    pub shard_treasury: i32,
}

impl_gateway_event!(EmpireState, storage::EMPIRE_STATE);

static EMPIRE_STATE_SCHEMA: TableSchema = TableSchema {
    table: "empires",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("shard_treasury", ColumnKind::Integer),
    ],
};

impl DurableRecord for EmpireState {
    fn schema() -> &'static TableSchema {
        &EMPIRE_STATE_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.name),
            FieldValue::from(self.shard_treasury),
        ])
    }
}

/// A node of an empire's territory. Cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpireNodeState {
    /// Node identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Empire this node belongs to.
    pub empire_id: String,
    /// Whether the node is active.
    pub is_active: bool,
    /// Chunk index of the node.
    pub chunk_index: u64,
    /// Dimension index.
    pub dimension: u32,
    /// X coordinate.
    pub location_x: i32,
    /// Z coordinate.
    pub location_z: i32,
    /// Upkeep cost.
    pub upkeep: i32,
    /// Stored energy.
    pub energy: i32,
}

impl_gateway_event!(EmpireNodeState, storage::EMPIRE_NODE_STATE);

/// A siege against an empire node. Cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpireNodeSiegeState {
    /// Siege identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Besieging empire.
    pub empire_id: String,
    /// Whether the siege is running.
    pub is_active: bool,
    /// Building under siege.
    pub building_entity_id: String,
    /// Energy committed to the siege.
    pub energy: i32,
}

impl_gateway_event!(EmpireNodeSiegeState, storage::EMPIRE_NODE_SIEGE_STATE);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn treasury_keeps_unsigned_width() {
        let claim = ClaimLocalState {
            id: "9".into(),
            module: "m1".into(),
            location: Some(Location { x: 1, z: 2, dimension: 1 }),
            supplies: 10,
            treasury: u32::MAX,
        };
        let fields = claim.encode().unwrap();
        assert_eq!(fields.get(4), Some(&FieldValue::U32(u32::MAX)));
        assert!(matches!(fields.get(2), Some(FieldValue::Json(v)) if v["dimension"] == 1));
    }
}
