//! One mapper per target type. Source ids become strings; the module is
//! stamped by the route after mapping.

use chrono::{DateTime, Utc};
use lodestar_types::entities::{
    AuctionListing, BuildingDesc, BuildingRequirement, BuildingState, CargoItem, ChatMessage,
    ClaimLocalState, ClaimState, ClosedItemStack, ClosedListing, EmpireNodeSiegeState,
    EmpireNodeState, EmpireState, InventoryPocket, InventoryState, Item, ItemList, ItemListEntry,
    ItemListPossibility, ItemRarity, ItemStack, LevelRequirement, Location, LocationState,
    ProgressiveAction, PublicProgressiveAction, Recipe, ToolRequirement, UserState, UsernameState,
};

use super::rows::{
    AuctionListingRow, BuildingDescRow, BuildingStateRow, CargoDescRow, ChatMessageStateRow,
    ClaimLocalStateRow, ClaimStateRow, ClosedListingStateRow, CraftingRecipeDescRow,
    EmpireNodeSiegeStateRow, EmpireNodeStateRow, EmpireStateRow, InventoryStateRow, ItemDescRow,
    ItemListDescRow, ItemStackRow, ItemType, LocationRow, LocationStateRow,
    PlayerUsernameStateRow, ProgressiveActionStateRow, PublicProgressiveActionStateRow,
    UserStateRow,
};
use crate::registry::{MappingError, Mapper};

const fn location(row: LocationRow) -> Location {
    Location {
        x: row.x,
        z: row.z,
        dimension: row.dimension,
    }
}

fn item_stack(row: ItemStackRow) -> ItemStack {
    ItemStack {
        item_id: row.item_id.to_string(),
        quantity: row.quantity,
    }
}

/// `item_desc` to [`Item`].
pub struct ItemMapper;

impl Mapper for ItemMapper {
    type Source = ItemDescRow;
    type Target = Item;

    fn map(&self, row: ItemDescRow) -> Result<Item, MappingError> {
        Ok(Item {
            id: row.id.to_string(),
            module: String::new(),
            name: row.name,
            description: row.description,
            volume: row.volume,
            tier: row.tier,
            rarity: ItemRarity::from_tag(row.rarity),
            item_list_id: row.item_list_id,
            has_compendium_entry: row.compendium_entry,
        })
    }
}

/// `cargo_desc` to [`CargoItem`].
pub struct CargoItemMapper;

impl Mapper for CargoItemMapper {
    type Source = CargoDescRow;
    type Target = CargoItem;

    fn map(&self, row: CargoDescRow) -> Result<CargoItem, MappingError> {
        Ok(CargoItem {
            id: row.id.to_string(),
            module: String::new(),
            name: row.name,
            description: row.description,
            volume: row.volume,
            tier: row.tier,
            rarity: ItemRarity::from_tag(row.rarity),
            tag: row.tag,
            not_pickupable: row.not_pickupable,
            blocks_path: row.blocks_path,
        })
    }
}

/// `crafting_recipe_desc` to [`Recipe`].
pub struct RecipeMapper;

impl Mapper for RecipeMapper {
    type Source = CraftingRecipeDescRow;
    type Target = Recipe;

    fn map(&self, row: CraftingRecipeDescRow) -> Result<Recipe, MappingError> {
        Ok(Recipe {
            id: row.id.to_string(),
            module: String::new(),
            name_format_string: row.name,
            building_requirement: row.building_requirement.map(|b| BuildingRequirement {
                building_type: b.building_type,
                tier: b.tier,
            }),
            level_requirements: row
                .level_requirements
                .into_iter()
                .map(|l| LevelRequirement {
                    skill_id: l.skill_id,
                    level: l.level,
                })
                .collect(),
            tool_requirements: row
                .tool_requirements
                .into_iter()
                .map(|t| ToolRequirement {
                    tool_type: t.tool_type,
                    level: t.level,
                })
                .collect(),
            consumed_item_stacks: row.consumed_item_stacks.into_iter().map(item_stack).collect(),
            produced_item_stacks: row.crafted_item_stacks.into_iter().map(item_stack).collect(),
            is_passive: row.is_passive,
            actions_required: row.actions_required,
        })
    }
}

/// `item_list_desc` to [`ItemList`].
pub struct ItemListMapper;

impl Mapper for ItemListMapper {
    type Source = ItemListDescRow;
    type Target = ItemList;

    fn map(&self, row: ItemListDescRow) -> Result<ItemList, MappingError> {
        Ok(ItemList {
            id: row.id.to_string(),
            module: String::new(),
            name: row.name,
            possibilities: row
                .possibilities
                .into_iter()
                .map(|p| ItemListPossibility {
                    probability: p.probability,
                    items: p
                        .items
                        .into_iter()
                        .map(|i| ItemListEntry {
                            item_id: i.item_id,
                            quantity: i.quantity,
                        })
                        .collect(),
                })
                .collect(),
        })
    }
}

/// `claim_state` to [`ClaimState`].
pub struct ClaimStateMapper;

impl Mapper for ClaimStateMapper {
    type Source = ClaimStateRow;
    type Target = ClaimState;

    fn map(&self, row: ClaimStateRow) -> Result<ClaimState, MappingError> {
        Ok(ClaimState {
            id: row.entity_id.to_string(),
            module: String::new(),
            owner_player_id: row.owner_player_entity_id.to_string(),
            owner_building_id: row.owner_building_entity_id.to_string(),
            name: row.name,
            is_neutral: row.neutral,
        })
    }
}

/// `claim_local_state` to [`ClaimLocalState`].
pub struct ClaimLocalStateMapper;

impl Mapper for ClaimLocalStateMapper {
    type Source = ClaimLocalStateRow;
    type Target = ClaimLocalState;

    fn map(&self, row: ClaimLocalStateRow) -> Result<ClaimLocalState, MappingError> {
        Ok(ClaimLocalState {
            id: row.entity_id.to_string(),
            module: String::new(),
            location: row.location.map(location),
            supplies: row.supplies,
            treasury: row.treasury,
        })
    }
}

/// `empire_state` to [`EmpireState`].
pub struct EmpireStateMapper;

impl Mapper for EmpireStateMapper {
    type Source = EmpireStateRow;
    type Target = EmpireState;

    fn map(&self, row: EmpireStateRow) -> Result<EmpireState, MappingError> {
        let shard_treasury =
            i32::try_from(row.shard_treasury).map_err(|e| MappingError::OutOfRange {
                field: "shard_treasury",
                value: format!("{} ({e})", row.shard_treasury),
            })?;
        Ok(EmpireState {
            id: row.entity_id.to_string(),
            module: String::new(),
            name: row.name,
            shard_treasury,
        })
    }
}

/// `empire_node_state` to [`EmpireNodeState`].
pub struct EmpireNodeStateMapper;

impl Mapper for EmpireNodeStateMapper {
    type Source = EmpireNodeStateRow;
    type Target = EmpireNodeState;

    fn map(&self, row: EmpireNodeStateRow) -> Result<EmpireNodeState, MappingError> {
        Ok(EmpireNodeState {
            id: row.entity_id.to_string(),
            module: String::new(),
            empire_id: row.empire_entity_id.to_string(),
            is_active: row.active,
            chunk_index: row.chunk_index,
            dimension: row.location.dimension,
            location_x: row.location.x,
            location_z: row.location.z,
            upkeep: row.upkeep,
            energy: row.energy,
        })
    }
}

/// `empire_node_siege_state` to [`EmpireNodeSiegeState`].
pub struct EmpireNodeSiegeStateMapper;

impl Mapper for EmpireNodeSiegeStateMapper {
    type Source = EmpireNodeSiegeStateRow;
    type Target = EmpireNodeSiegeState;

    fn map(&self, row: EmpireNodeSiegeStateRow) -> Result<EmpireNodeSiegeState, MappingError> {
        Ok(EmpireNodeSiegeState {
            id: row.entity_id.to_string(),
            module: String::new(),
            empire_id: row.empire_entity_id.to_string(),
            is_active: row.active,
            building_entity_id: row.building_entity_id.to_string(),
            energy: row.energy,
        })
    }
}

/// `buy_order_state` and `sell_order_state` to [`AuctionListing`].
pub struct AuctionListingMapper;

impl Mapper for AuctionListingMapper {
    type Source = AuctionListingRow;
    type Target = AuctionListing;

    fn map(&self, row: AuctionListingRow) -> Result<AuctionListing, MappingError> {
        Ok(AuctionListing {
            id: row.entity_id.to_string(),
            module: String::new(),
            owner_id: row.owner_entity_id.to_string(),
            claim_id: row.claim_entity_id.to_string(),
            price: row.price_threshold,
            quantity: row.quantity,
            stored_coins: row.stored_coins,
            item_id: row.item_id,
            is_cargo_item: row.item_type == ItemType::Cargo,
        })
    }
}

/// `closed_listing_state` to [`ClosedListing`].
pub struct ClosedListingMapper;

impl Mapper for ClosedListingMapper {
    type Source = ClosedListingStateRow;
    type Target = ClosedListing;

    fn map(&self, row: ClosedListingStateRow) -> Result<ClosedListing, MappingError> {
        let timestamp = DateTime::<Utc>::from_timestamp_micros(row.timestamp).ok_or_else(|| {
            MappingError::OutOfRange {
                field: "timestamp",
                value: row.timestamp.to_string(),
            }
        })?;
        Ok(ClosedListing {
            id: row.entity_id.to_string(),
            module: String::new(),
            owner_id: row.owner_entity_id.to_string(),
            claim_id: row.claim_entity_id.to_string(),
            item_stack: ClosedItemStack {
                item_id: row.item_stack.item_id,
                quantity: row.item_stack.quantity,
                is_cargo: row.item_stack.item_type == ItemType::Cargo,
            },
            timestamp: timestamp.to_rfc3339(),
        })
    }
}

/// `building_state` to [`BuildingState`].
pub struct BuildingStateMapper;

impl Mapper for BuildingStateMapper {
    type Source = BuildingStateRow;
    type Target = BuildingState;

    fn map(&self, row: BuildingStateRow) -> Result<BuildingState, MappingError> {
        Ok(BuildingState {
            id: row.entity_id.to_string(),
            module: String::new(),
            claim_entity_id: row.claim_entity_id.to_string(),
        })
    }
}

/// `building_desc` to [`BuildingDesc`].
pub struct BuildingDescMapper;

impl Mapper for BuildingDescMapper {
    type Source = BuildingDescRow;
    type Target = BuildingDesc;

    fn map(&self, row: BuildingDescRow) -> Result<BuildingDesc, MappingError> {
        Ok(BuildingDesc {
            id: row.id.to_string(),
            module: String::new(),
            name: row.name,
            description: row.description,
        })
    }
}

/// `chat_message_state` to [`ChatMessage`].
pub struct ChatMessageMapper;

impl Mapper for ChatMessageMapper {
    type Source = ChatMessageStateRow;
    type Target = ChatMessage;

    fn map(&self, row: ChatMessageStateRow) -> Result<ChatMessage, MappingError> {
        Ok(ChatMessage {
            id: row.entity_id.to_string(),
            module: String::new(),
            channel_id: row.channel_id,
            sender_id: row.owner_entity_id.to_string(),
            sender_username: row.username,
            content: row.text,
        })
    }
}

/// `inventory_state` to [`InventoryState`], keyed by owner.
pub struct InventoryStateMapper;

impl Mapper for InventoryStateMapper {
    type Source = InventoryStateRow;
    type Target = InventoryState;

    fn map(&self, row: InventoryStateRow) -> Result<InventoryState, MappingError> {
        Ok(InventoryState {
            id: row.owner_entity_id.to_string(),
            module: String::new(),
            pockets: row
                .pockets
                .into_iter()
                .map(|p| InventoryPocket {
                    item_id: p.contents.map(|c| c.item_id.to_string()),
                    quantity: p.contents.map(|c| c.quantity),
                })
                .collect(),
        })
    }
}

/// `user_state` to [`UserState`], keyed by identity.
pub struct UserStateMapper;

impl Mapper for UserStateMapper {
    type Source = UserStateRow;
    type Target = UserState;

    fn map(&self, row: UserStateRow) -> Result<UserState, MappingError> {
        Ok(UserState {
            id: row.identity,
            module: String::new(),
            user_entity_id: row.entity_id.to_string(),
            can_sign_in: row.can_sign_in,
        })
    }
}

/// `player_username_state` to [`UsernameState`].
pub struct UsernameStateMapper;

impl Mapper for UsernameStateMapper {
    type Source = PlayerUsernameStateRow;
    type Target = UsernameState;

    fn map(&self, row: PlayerUsernameStateRow) -> Result<UsernameState, MappingError> {
        Ok(UsernameState {
            id: row.entity_id.to_string(),
            module: String::new(),
            username: row.username,
        })
    }
}

/// `location_state` to [`LocationState`].
pub struct LocationStateMapper;

impl Mapper for LocationStateMapper {
    type Source = LocationStateRow;
    type Target = LocationState;

    fn map(&self, row: LocationStateRow) -> Result<LocationState, MappingError> {
        Ok(LocationState {
            id: row.entity_id.to_string(),
            module: String::new(),
            x: row.x,
            z: row.z,
            dimension: row.dimension,
        })
    }
}

/// `progressive_action_state` to [`ProgressiveAction`].
pub struct ProgressiveActionMapper;

impl Mapper for ProgressiveActionMapper {
    type Source = ProgressiveActionStateRow;
    type Target = ProgressiveAction;

    fn map(&self, row: ProgressiveActionStateRow) -> Result<ProgressiveAction, MappingError> {
        Ok(ProgressiveAction {
            id: row.entity_id.to_string(),
            module: String::new(),
            recipe_id: row.recipe_id.to_string(),
            craft_count: row.craft_count,
            progress: row.progress,
        })
    }
}

/// `public_progressive_action_state` to [`PublicProgressiveAction`].
pub struct PublicProgressiveActionMapper;

impl Mapper for PublicProgressiveActionMapper {
    type Source = PublicProgressiveActionStateRow;
    type Target = PublicProgressiveAction;

    fn map(
        &self,
        row: PublicProgressiveActionStateRow,
    ) -> Result<PublicProgressiveAction, MappingError> {
        Ok(PublicProgressiveAction {
            id: row.entity_id.to_string(),
            module: String::new(),
            building_entity_id: row.building_entity_id.to_string(),
            owner_entity_id: row.owner_entity_id.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode<M: Mapper>(mapper: &M, row: serde_json::Value) -> Result<M::Target, MappingError> {
        mapper.map(serde_json::from_value(row).unwrap())
    }

    #[test]
    fn item_rarity_tag_and_ids() {
        let item = decode(
            &ItemMapper,
            json!({
                "id": 42, "name": "Flint", "description": "Sharp", "volume": 10,
                "tier": 1, "rarity": 3, "item_list_id": 0, "compendium_entry": true
            }),
        )
        .unwrap();
        assert_eq!(item.id, "42");
        assert_eq!(item.rarity, ItemRarity::Rare);
        assert!(item.has_compendium_entry);
    }

    #[test]
    fn recipe_renames_crafted_stacks() {
        let recipe = decode(
            &RecipeMapper,
            json!({
                "id": 7, "name": "Craft {0}",
                "building_requirement": {"building_type": 2, "tier": 1},
                "consumed_item_stacks": [{"item_id": 1, "quantity": 3}],
                "crafted_item_stacks": [{"item_id": 9, "quantity": 1}],
                "is_passive": false, "actions_required": 5
            }),
        )
        .unwrap();
        assert_eq!(recipe.name_format_string, "Craft {0}");
        assert_eq!(recipe.produced_item_stacks[0].item_id, "9");
        assert_eq!(recipe.consumed_item_stacks[0].quantity, 3);
        assert!(recipe.level_requirements.is_empty());
    }

    #[test]
    fn claim_keeps_owner_building() {
        let claim = decode(
            &ClaimStateMapper,
            json!({
                "entity_id": 1, "owner_player_entity_id": 2,
                "owner_building_entity_id": 3, "name": "Haven", "neutral": false
            }),
        )
        .unwrap();
        assert_eq!(claim.owner_player_id, "2");
        assert_eq!(claim.owner_building_id, "3");
    }

    #[test]
    fn empire_treasury_out_of_range() {
        let err = decode(
            &EmpireStateMapper,
            json!({"entity_id": 1, "name": "E", "shard_treasury": u32::MAX}),
        )
        .err();
        assert!(matches!(
            err,
            Some(MappingError::OutOfRange {
                field: "shard_treasury",
                ..
            })
        ));
    }

    #[test]
    fn cargo_listing_flag() {
        let listing = decode(
            &AuctionListingMapper,
            json!({
                "entity_id": 5, "owner_entity_id": 6, "claim_entity_id": 7,
                "price_threshold": 100, "quantity": 2, "stored_coins": 0,
                "item_id": 12, "item_type": "Cargo"
            }),
        )
        .unwrap();
        assert!(listing.is_cargo_item);
        assert_eq!(listing.price, 100);
    }

    #[test]
    fn closed_listing_timestamp_is_rfc3339() {
        let closed = decode(
            &ClosedListingMapper,
            json!({
                "entity_id": 5, "owner_entity_id": 6, "claim_entity_id": 7,
                "item_stack": {"item_id": 1, "quantity": 4},
                "timestamp": 1_700_000_000_000_000_i64
            }),
        )
        .unwrap();
        assert!(closed.timestamp.starts_with("2023-11-14T22:13:20"));
        assert!(!closed.item_stack.is_cargo);
    }

    #[test]
    fn inventory_pockets_keep_empty_slots() {
        let inventory = decode(
            &InventoryStateMapper,
            json!({
                "owner_entity_id": 88,
                "pockets": [{"contents": {"item_id": 3, "quantity": 2}}, {"contents": null}]
            }),
        )
        .unwrap();
        assert_eq!(inventory.id, "88");
        assert_eq!(inventory.pockets[0].item_id.as_deref(), Some("3"));
        assert_eq!(inventory.pockets[1].quantity, None);
    }

    #[test]
    fn user_state_is_keyed_by_identity() {
        let user = decode(
            &UserStateMapper,
            json!({"identity": "c200abc", "entity_id": 4, "can_sign_in": true}),
        )
        .unwrap();
        assert_eq!(user.id, "c200abc");
        assert_eq!(user.user_entity_id, "4");
    }

    #[test]
    fn cargo_uses_item_rarity_scale() {
        let cargo = decode(
            &CargoItemMapper,
            json!({
                "id": 11, "name": "Log", "description": "Heavy", "volume": 600, "tier": 1,
                "rarity": 9, "tag": "Wood", "not_pickupable": true, "blocks_path": false
            }),
        )
        .unwrap();
        assert_eq!(cargo.id, "11");
        assert_eq!(cargo.rarity, ItemRarity::Default);
        assert!(cargo.not_pickupable);
    }

    #[test]
    fn siege_keeps_besieged_building() {
        let siege = decode(
            &EmpireNodeSiegeStateMapper,
            json!({
                "entity_id": 1, "empire_entity_id": 2, "active": true,
                "building_entity_id": 3, "energy": 40
            }),
        )
        .unwrap();
        assert_eq!(siege.empire_id, "2");
        assert_eq!(siege.building_entity_id, "3");
        assert!(siege.is_active);
    }

    #[test]
    fn crafting_progress_ids_are_strings() {
        let action = decode(
            &ProgressiveActionMapper,
            json!({"entity_id": 9, "recipe_id": 77, "craft_count": 60, "progress": 12}),
        )
        .unwrap();
        assert_eq!(action.recipe_id, "77");
        assert_eq!(action.craft_count, 60);

        let public = decode(
            &PublicProgressiveActionMapper,
            json!({"entity_id": 9, "building_entity_id": 5, "owner_entity_id": 6}),
        )
        .unwrap();
        assert_eq!(public.id, action.id);
        assert_eq!(public.building_entity_id, "5");

        let location = decode(
            &LocationStateMapper,
            json!({"entity_id": 5, "x": -3, "z": 8, "dimension": 1}),
        )
        .unwrap();
        assert_eq!(location.id, public.building_entity_id);
        assert_eq!((location.x, location.z, location.dimension), (-3, 8, 1));
    }
}
