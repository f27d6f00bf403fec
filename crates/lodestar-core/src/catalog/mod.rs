//! The fixed table catalog: which source tables are mapped, to what, and
//! which queries subscribe to them.

mod identity;
mod mappers;
mod rows;

use chrono::{DateTime, Utc};

pub use identity::{SignedInUser, log_identity, resolve_identity};

use crate::registry::{MappingRegistry, RegistryError, TypedRoute};
use mappers::{
    AuctionListingMapper, BuildingDescMapper, BuildingStateMapper, CargoItemMapper,
    ChatMessageMapper, ClaimLocalStateMapper, ClaimStateMapper, ClosedListingMapper,
    EmpireNodeSiegeStateMapper, EmpireNodeStateMapper, EmpireStateMapper, InventoryStateMapper,
    ItemListMapper, ItemMapper, LocationStateMapper, ProgressiveActionMapper,
    PublicProgressiveActionMapper, RecipeMapper, UserStateMapper, UsernameStateMapper,
};

/// Building descriptions that mark a claim totem; only claims anchored by
/// one of these are subscribed.
pub const CLAIM_TOTEM_DESCRIPTIONS: [i64; 2] = [405, 292_245_080];

/// Crafting jobs are subscribed only above this many queued crafts.
pub const LARGE_CRAFT_THRESHOLD: i32 = 50;

/// Build the registry of every mapped table.
pub fn default_registry() -> Result<MappingRegistry, RegistryError> {
    MappingRegistry::builder()
        .route(TypedRoute::durable("item_desc", ItemMapper))
        .route(TypedRoute::durable("crafting_recipe_desc", RecipeMapper))
        .route(TypedRoute::durable("item_list_desc", ItemListMapper))
        .route(TypedRoute::durable("claim_state", ClaimStateMapper))
        .route(TypedRoute::durable("claim_local_state", ClaimLocalStateMapper))
        .route(TypedRoute::durable("empire_state", EmpireStateMapper))
        .route(TypedRoute::cached("empire_node_state", EmpireNodeStateMapper))
        .route(
            TypedRoute::durable("buy_order_state", AuctionListingMapper)
                .with_topic("world.orders.buy"),
        )
        .route(
            TypedRoute::durable("sell_order_state", AuctionListingMapper)
                .with_topic("world.orders.sell"),
        )
        .route(TypedRoute::durable("closed_listing_state", ClosedListingMapper))
        .route(TypedRoute::cached("building_state", BuildingStateMapper))
        .route(TypedRoute::durable("building_desc", BuildingDescMapper))
        .route(TypedRoute::cached("chat_message_state", ChatMessageMapper))
        .route(TypedRoute::cached("inventory_state", InventoryStateMapper))
        .route(TypedRoute::durable("user_state", UserStateMapper))
        .route(TypedRoute::durable("player_username_state", UsernameStateMapper))
        .route(TypedRoute::durable("cargo_desc", CargoItemMapper))
        .route(TypedRoute::cached("empire_node_siege_state", EmpireNodeSiegeStateMapper))
        .route(TypedRoute::cached("location_state", LocationStateMapper))
        .route(TypedRoute::cached("progressive_action_state", ProgressiveActionMapper))
        .route(TypedRoute::cached(
            "public_progressive_action_state",
            PublicProgressiveActionMapper,
        ))
        .build()
}

/// Subscription query for one source table.
///
/// Chat is limited to messages newer than `since`, so a reconnect does not
/// replay history. Crafting jobs are limited to large public ones, and
/// positions to the buildings hosting a public job.
pub fn table_query(table: &str, since: DateTime<Utc>) -> String {
    match table {
        "empire_state" => "SELECT e.* FROM empire_state e \
             JOIN claim_state c ON e.capital_building_entity_id = c.owner_building_entity_id"
            .to_owned(),
        "claim_state" => {
            let [first, second] = CLAIM_TOTEM_DESCRIPTIONS;
            format!(
                "SELECT t.* FROM claim_state t \
                 INNER JOIN claim_local_state l ON t.entity_id = l.entity_id \
                 WHERE l.building_description_id = {first} OR l.building_description_id = {second}"
            )
        }
        "chat_message_state" => format!(
            "SELECT t.* FROM chat_message_state t WHERE t.channel_id >= 0 AND t.timestamp > {}",
            since.timestamp()
        ),
        "inventory_state" => "SELECT i.* FROM inventory_state i \
             INNER JOIN building_state b ON i.owner_entity_id = b.entity_id"
            .to_owned(),
        "empire_node_siege_state" => "SELECT e.* FROM empire_node_siege_state e \
             JOIN building_state b ON e.building_entity_id = b.entity_id"
            .to_owned(),
        "location_state" => "SELECT ls.* FROM location_state ls \
             INNER JOIN public_progressive_action_state ppas \
             ON ppas.building_entity_id = ls.entity_id"
            .to_owned(),
        "progressive_action_state" => format!(
            "SELECT s.* FROM progressive_action_state s \
             INNER JOIN public_progressive_action_state p ON s.entity_id = p.entity_id \
             WHERE s.craft_count > {LARGE_CRAFT_THRESHOLD}"
        ),
        "public_progressive_action_state" => format!(
            "SELECT p.* FROM public_progressive_action_state p \
             JOIN progressive_action_state s ON p.entity_id = s.entity_id \
             WHERE s.craft_count > {LARGE_CRAFT_THRESHOLD}"
        ),
        other => format!("SELECT * FROM {other}"),
    }
}

/// One query per distinct mapped table, in registration order.
pub fn subscription_queries(registry: &MappingRegistry, since: DateTime<Utc>) -> Vec<String> {
    registry
        .tables()
        .into_iter()
        .map(|table| table_query(table, since))
        .collect()
}
