//! Source row shapes, as the changefeed materializes them.
//!
//! Field names follow the source schema's column names. Unknown columns
//! are ignored so the source can grow without breaking decoding.

use serde::Deserialize;

/// `item_desc`
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDescRow {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub volume: i32,
    pub tier: i32,
    /// Numeric rarity tag.
    pub rarity: u8,
    pub item_list_id: i32,
    pub compendium_entry: bool,
}

/// `cargo_desc`
#[derive(Debug, Clone, Deserialize)]
pub struct CargoDescRow {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub volume: i32,
    pub tier: i32,
    pub rarity: u8,
    pub tag: String,
    pub not_pickupable: bool,
    pub blocks_path: bool,
}

/// Building type and tier a recipe needs.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BuildingRequirementRow {
    pub building_type: i32,
    pub tier: i32,
}

/// Minimum skill level.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LevelRequirementRow {
    pub skill_id: i32,
    pub level: i32,
}

/// Minimum tool level.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ToolRequirementRow {
    pub tool_type: i32,
    pub level: i32,
}

/// Item reference with a quantity.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ItemStackRow {
    pub item_id: i32,
    pub quantity: i32,
}

/// `crafting_recipe_desc`
#[derive(Debug, Clone, Deserialize)]
pub struct CraftingRecipeDescRow {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub building_requirement: Option<BuildingRequirementRow>,
    #[serde(default)]
    pub level_requirements: Vec<LevelRequirementRow>,
    #[serde(default)]
    pub tool_requirements: Vec<ToolRequirementRow>,
    #[serde(default)]
    pub consumed_item_stacks: Vec<ItemStackRow>,
    #[serde(default)]
    pub crafted_item_stacks: Vec<ItemStackRow>,
    pub is_passive: bool,
    pub actions_required: i32,
}

/// One weighted outcome of an item list.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbabilityRow {
    pub probability: f32,
    #[serde(default)]
    pub items: Vec<ItemStackRow>,
}

/// `item_list_desc`
#[derive(Debug, Clone, Deserialize)]
pub struct ItemListDescRow {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub possibilities: Vec<ProbabilityRow>,
}

/// World coordinates.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationRow {
    pub x: i32,
    pub z: i32,
    pub dimension: u32,
}

/// `claim_state`
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimStateRow {
    pub entity_id: u64,
    pub owner_player_entity_id: u64,
    pub owner_building_entity_id: u64,
    pub name: String,
    pub neutral: bool,
}

/// `claim_local_state`
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimLocalStateRow {
    pub entity_id: u64,
    pub supplies: i32,
    pub treasury: u32,
    #[serde(default)]
    pub location: Option<LocationRow>,
}

/// `empire_state`
#[derive(Debug, Clone, Deserialize)]
pub struct EmpireStateRow {
    pub entity_id: u64,
    pub name: String,
    pub shard_treasury: u32,
}

/// `empire_node_state`
#[derive(Debug, Clone, Deserialize)]
pub struct EmpireNodeStateRow {
    pub entity_id: u64,
    pub empire_entity_id: u64,
    pub active: bool,
    pub chunk_index: u64,
    pub location: LocationRow,
    pub upkeep: i32,
    pub energy: i32,
}

/// `empire_node_siege_state`
#[derive(Debug, Clone, Deserialize)]
pub struct EmpireNodeSiegeStateRow {
    pub entity_id: u64,
    pub empire_entity_id: u64,
    pub active: bool,
    pub building_entity_id: u64,
    pub energy: i32,
}

/// Kind of item held by a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ItemType {
    /// Regular inventory item.
    #[default]
    Item,
    /// Cargo carried by a vehicle or building.
    Cargo,
}

/// `buy_order_state` and `sell_order_state`
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionListingRow {
    pub entity_id: u64,
    pub owner_entity_id: u64,
    pub claim_entity_id: u64,
    pub price_threshold: i32,
    pub quantity: i32,
    pub stored_coins: i32,
    pub item_id: i32,
    #[serde(default)]
    pub item_type: ItemType,
}

/// Item stack of a closed listing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClosedItemStackRow {
    pub item_id: i32,
    pub quantity: i32,
    #[serde(default)]
    pub item_type: ItemType,
}

/// `closed_listing_state`
#[derive(Debug, Clone, Deserialize)]
pub struct ClosedListingStateRow {
    pub entity_id: u64,
    pub owner_entity_id: u64,
    pub claim_entity_id: u64,
    pub item_stack: ClosedItemStackRow,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
}

/// `building_state`
#[derive(Debug, Clone, Deserialize)]
pub struct BuildingStateRow {
    pub entity_id: u64,
    pub claim_entity_id: u64,
}

/// `building_desc`
#[derive(Debug, Clone, Deserialize)]
pub struct BuildingDescRow {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// `chat_message_state`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageStateRow {
    pub entity_id: u64,
    pub channel_id: i32,
    pub owner_entity_id: u64,
    pub username: String,
    pub text: String,
}

/// One inventory slot.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PocketRow {
    #[serde(default)]
    pub contents: Option<ItemStackRow>,
}

/// `inventory_state`
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryStateRow {
    pub owner_entity_id: u64,
    #[serde(default)]
    pub pockets: Vec<PocketRow>,
}

/// `user_state`
#[derive(Debug, Clone, Deserialize)]
pub struct UserStateRow {
    pub identity: String,
    pub entity_id: u64,
    pub can_sign_in: bool,
}

/// `player_username_state`
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerUsernameStateRow {
    pub entity_id: u64,
    pub username: String,
}

/// `location_state`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationStateRow {
    pub entity_id: u64,
    pub x: i32,
    pub z: i32,
    pub dimension: u32,
}

/// `progressive_action_state`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProgressiveActionStateRow {
    pub entity_id: u64,
    pub recipe_id: i32,
    pub craft_count: i32,
    pub progress: i32,
}

/// `public_progressive_action_state`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PublicProgressiveActionStateRow {
    pub entity_id: u64,
    pub building_entity_id: u64,
    pub owner_entity_id: u64,
}
