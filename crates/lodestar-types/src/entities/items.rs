//! Item, recipe, and item list descriptions.

use serde::{Deserialize, Serialize};

use crate::codec::{ColumnKind, ColumnSpec, FieldValue, TableSchema};
use crate::event::DurableRecord;
use crate::impl_gateway_event;
use crate::storage;

/// Item rarity tier, written by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemRarity {
    /// No rarity assigned.
    #[default]
    Default,
    /// Common.
    Common,
    /// Uncommon.
    Uncommon,
    /// Rare.
    Rare,
    /// Epic.
    Epic,
    /// Legendary.
    Legendary,
    /// Mythic.
    Mythic,
}

impl ItemRarity {
    /// Symbolic name as stored in the durable store.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Common => "Common",
            Self::Uncommon => "Uncommon",
            Self::Rare => "Rare",
            Self::Epic => "Epic",
            Self::Legendary => "Legendary",
            Self::Mythic => "Mythic",
        }
    }

    /// Decode the numeric tag used by the source schema. Unknown tags map
    /// to [`ItemRarity::Default`].
    pub const fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::Common,
            2 => Self::Uncommon,
            3 => Self::Rare,
            4 => Self::Epic,
            5 => Self::Legendary,
            6 => Self::Mythic,
            _ => Self::Default,
        }
    }
}

/// A static item description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Item identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Inventory volume.
    pub volume: i32,
    /// Tier.
    pub tier: i32,
    /// Rarity.
    pub rarity: ItemRarity,
    /// Item list rolled when the item is opened.
    pub item_list_id: i32,
    /// Whether the item appears in the compendium.
    pub has_compendium_entry: bool,
}

impl_gateway_event!(Item, storage::ITEM);

static ITEM_SCHEMA: TableSchema = TableSchema {
    table: "items",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("description", ColumnKind::Text),
        ColumnSpec::new("volume", ColumnKind::Integer),
        ColumnSpec::new("tier", ColumnKind::Integer),
        ColumnSpec::new("rarity", ColumnKind::Enum),
        ColumnSpec::new("item_list_id", ColumnKind::Integer),
        ColumnSpec::new("has_compendium_entry", ColumnKind::Boolean),
    ],
};

impl DurableRecord for Item {
    fn schema() -> &'static TableSchema {
        &ITEM_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.name),
            FieldValue::from(&self.description),
            FieldValue::from(self.volume),
            FieldValue::from(self.tier),
            FieldValue::Enum(self.rarity.as_str()),
            FieldValue::from(self.item_list_id),
            FieldValue::from(self.has_compendium_entry),
        ])
    }
}

/// A static cargo description. Shares the item rarity scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CargoItem {
    /// Cargo identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Carried volume.
    pub volume: i32,
    /// Tier.
    pub tier: i32,
    /// Rarity.
    pub rarity: ItemRarity,
    /// Category tag.
    pub tag: String,
    /// Whether the cargo cannot be picked up once dropped.
    pub not_pickupable: bool,
    /// Whether dropped cargo blocks movement.
    pub blocks_path: bool,
}

impl_gateway_event!(CargoItem, storage::CARGO_ITEM);

static CARGO_ITEM_SCHEMA: TableSchema = TableSchema {
    table: "cargo_items",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("description", ColumnKind::Text),
        ColumnSpec::new("volume", ColumnKind::Integer),
        ColumnSpec::new("tier", ColumnKind::Integer),
        ColumnSpec::new("rarity", ColumnKind::Enum),
        ColumnSpec::new("tag", ColumnKind::Text),
        ColumnSpec::new("not_pickupable", ColumnKind::Boolean),
        ColumnSpec::new("blocks_path", ColumnKind::Boolean),
    ],
};

impl DurableRecord for CargoItem {
    fn schema() -> &'static TableSchema {
        &CARGO_ITEM_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.name),
            FieldValue::from(&self.description),
            FieldValue::from(self.volume),
            FieldValue::from(self.tier),
            FieldValue::Enum(self.rarity.as_str()),
            FieldValue::from(&self.tag),
            FieldValue::from(self.not_pickupable),
            FieldValue::from(self.blocks_path),
        ])
    }
}

/// Building needed to craft a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingRequirement {
    /// Building type.
    pub building_type: i32,
    /// Minimum building tier.
    pub tier: i32,
}

/// Skill level needed to craft a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRequirement {
    /// Skill identifier.
    pub skill_id: i32,
    /// Minimum level.
    pub level: i32,
}

/// Tool needed to craft a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequirement {
    /// Tool type.
    pub tool_type: i32,
    /// Minimum tool level.
    pub level: i32,
}

/// A quantity of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStack {
    /// Item identifier.
    pub item_id: String,
    /// Quantity.
    pub quantity: i32,
}

/// A crafting recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    /// Recipe identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Display name template.
    pub name_format_string: String,
    /// Required building, if any.
    pub building_requirement: Option<BuildingRequirement>,
    /// Required skill levels.
    pub level_requirements: Vec<LevelRequirement>,
    /// Required tools.
    pub tool_requirements: Vec<ToolRequirement>,
    /// Inputs.
    pub consumed_item_stacks: Vec<ItemStack>,
    /// Outputs.
    pub produced_item_stacks: Vec<ItemStack>,
    /// Whether the recipe crafts without player input.
    pub is_passive: bool,
    /// Number of actions to complete.
    pub actions_required: i32,
}

impl_gateway_event!(Recipe, storage::RECIPE);

static RECIPE_SCHEMA: TableSchema = TableSchema {
    table: "recipes",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("name_format_string", ColumnKind::Text),
        ColumnSpec::new("building_requirement", ColumnKind::Json),
        ColumnSpec::new("level_requirements", ColumnKind::Json),
        ColumnSpec::new("tool_requirements", ColumnKind::Json),
        ColumnSpec::new("consumed_item_stacks", ColumnKind::Json),
        ColumnSpec::new("produced_item_stacks", ColumnKind::Json),
        ColumnSpec::new("is_passive", ColumnKind::Boolean),
        ColumnSpec::new("actions_required", ColumnKind::Integer),
    ],
};

impl DurableRecord for Recipe {
    fn schema() -> &'static TableSchema {
        &RECIPE_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.name_format_string),
            FieldValue::json(&self.building_requirement)?,
            FieldValue::json(&self.level_requirements)?,
            FieldValue::json(&self.tool_requirements)?,
            FieldValue::json(&self.consumed_item_stacks)?,
            FieldValue::json(&self.produced_item_stacks)?,
            FieldValue::from(self.is_passive),
            FieldValue::from(self.actions_required),
        ])
    }
}

/// One entry of an item list possibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListEntry {
    /// Item identifier.
    pub item_id: i32,
    /// Quantity.
    pub quantity: i32,
}

/// A weighted outcome of an item list roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListPossibility {
    /// Roll probability.
    pub probability: f32,
    /// Items granted.
    pub items: Vec<ItemListEntry>,
}

/// A loot table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemList {
    /// List identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Display name.
    pub name: String,
    /// Possible outcomes.
    pub possibilities: Vec<ItemListPossibility>,
}

impl_gateway_event!(ItemList, storage::ITEM_LIST);

static ITEM_LIST_SCHEMA: TableSchema = TableSchema {
    table: "item_lists",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("name", ColumnKind::Text),
        ColumnSpec::new("possibilities", ColumnKind::Json),
    ],
};

impl DurableRecord for ItemList {
    fn schema() -> &'static TableSchema {
        &ITEM_LIST_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.name),
            FieldValue::json(&self.possibilities)?,
        ])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::GatewayEvent;

    fn item() -> Item {
        Item {
            id: "42".into(),
            module: String::new(),
            name: "Flint".into(),
            description: "A sharp stone".into(),
            volume: 1,
            tier: 0,
            rarity: ItemRarity::Rare,
            item_list_id: 0,
            has_compendium_entry: true,
        }
    }

    #[test]
    fn encode_matches_schema_width() {
        let fields = item().encode().unwrap();
        assert_eq!(fields.len(), Item::schema().columns.len());
        assert_eq!(fields.get(6), Some(&FieldValue::Enum("Rare")));
    }

    #[test]
    fn set_module_stamps_owner() {
        let mut it = item();
        it.set_module("m1");
        assert_eq!(it.module(), "m1");
        assert_eq!(it.buffer_key(), "Item:42");
    }

    #[test]
    fn cargo_encodes_rarity_and_flags_in_column_order() {
        let cargo = CargoItem {
            id: "3".into(),
            module: String::new(),
            name: "Log".into(),
            description: "Heavy".into(),
            volume: 600,
            tier: 1,
            rarity: ItemRarity::Common,
            tag: "Wood".into(),
            not_pickupable: false,
            blocks_path: true,
        };
        let fields = cargo.encode().unwrap();
        assert_eq!(fields.len(), CargoItem::schema().columns.len());
        assert_eq!(fields.get(6), Some(&FieldValue::Enum("Common")));
        assert_eq!(fields.get(9), Some(&FieldValue::from(true)));
        assert_eq!(cargo.buffer_key(), "CargoItem:3");
    }

    #[test]
    fn rarity_serializes_by_name() {
        let json = serde_json::to_value(item()).unwrap();
        assert_eq!(json["rarity"], "Rare");
        assert_eq!(json["hasCompendiumEntry"], true);
    }

    #[test]
    fn recipe_nested_fields_encode_as_json() {
        let recipe = Recipe {
            id: "r1".into(),
            module: "m1".into(),
            name_format_string: "Craft {0}".into(),
            building_requirement: None,
            level_requirements: vec![LevelRequirement { skill_id: 3, level: 5 }],
            tool_requirements: Vec::new(),
            consumed_item_stacks: Vec::new(),
            produced_item_stacks: vec![ItemStack { item_id: "42".into(), quantity: 2 }],
            is_passive: false,
            actions_required: 4,
        };
        let fields = recipe.encode().unwrap();
        assert_eq!(fields.get(3), Some(&FieldValue::Json(serde_json::Value::Null)));
        assert!(matches!(fields.get(4), Some(FieldValue::Json(v)) if v.is_array()));
    }
}
