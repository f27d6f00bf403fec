//! Storage routing metadata.
//!
//! Every domain event type has exactly one [`EntityMeta`] entry in
//! [`ENTITY_CATALOG`]. The entry decides whether the type is cached in the
//! hot store, written to the durable store, or both, and whether its cache
//! key is shared by all modules (global) or scoped to the owning module.
//!
//! | Type | Global | Storage |
//! |------|--------|---------|
//! | `Item` | yes | cache + database |
//! | `Recipe` | yes | database |
//! | `ItemList` | yes | database |
//! | `ClaimState` | yes | database |
//! | `ClaimLocalState` | yes | database |
//! | `EmpireState` | yes | database |
//! | `EmpireNodeState` | no | cache |
//! | `AuctionListing` | yes | database |
//! | `ClosedListing` | no | database |
//! | `BuildingState` | no | cache |
//! | `BuildingDesc` | no | database |
//! | `ChatMessage` | no | cache |
//! | `InventoryState` | no | cache |
//! | `UserState` | no | database |
//! | `UsernameState` | yes | database |
//! | `CargoItem` | yes | cache + database |
//! | `EmpireNodeSiegeState` | no | cache |
//! | `LocationState` | no | cache |
//! | `ProgressiveAction` | no | cache |
//! | `PublicProgressiveAction` | no | cache |

bitflags::bitflags! {
    /// Where a domain event type is stored in addition to being published.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StorageTarget: u8 {
        /// Cached in a hash at `cache:{Type}:{scope}` for snapshot reads.
        const CACHE = 0b01;
        /// Persisted in the durable relational store.
        const DATABASE = 0b10;
    }
}

/// Static metadata describing one domain event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMeta {
    /// Stable type name used in cache keys, buffer keys, and logs.
    pub type_name: &'static str,
    /// Whether all modules share one cache key for this type.
    pub global: bool,
    /// Sinks this type is routed to.
    pub storage: StorageTarget,
}

impl EntityMeta {
    const fn new(type_name: &'static str, global: bool, storage: StorageTarget) -> Self {
        Self {
            type_name,
            global,
            storage,
        }
    }

    /// Whether the type is routed to the cache.
    pub const fn is_cached(&self) -> bool {
        self.storage.contains(StorageTarget::CACHE)
    }

    /// Whether the type is routed to the durable store.
    pub const fn is_persisted(&self) -> bool {
        self.storage.contains(StorageTarget::DATABASE)
    }
}

const BOTH: StorageTarget = StorageTarget::CACHE.union(StorageTarget::DATABASE);

/// Metadata for [`Item`](crate::entities::Item).
pub const ITEM: EntityMeta = EntityMeta::new("Item", true, BOTH);
/// Metadata for [`Recipe`](crate::entities::Recipe).
pub const RECIPE: EntityMeta = EntityMeta::new("Recipe", true, StorageTarget::DATABASE);
/// Metadata for [`ItemList`](crate::entities::ItemList).
pub const ITEM_LIST: EntityMeta = EntityMeta::new("ItemList", true, StorageTarget::DATABASE);
/// Metadata for [`ClaimState`](crate::entities::ClaimState).
pub const CLAIM_STATE: EntityMeta = EntityMeta::new("ClaimState", true, StorageTarget::DATABASE);
/// Metadata for [`ClaimLocalState`](crate::entities::ClaimLocalState).
pub const CLAIM_LOCAL_STATE: EntityMeta =
    EntityMeta::new("ClaimLocalState", true, StorageTarget::DATABASE);
/// Metadata for [`EmpireState`](crate::entities::EmpireState).
pub const EMPIRE_STATE: EntityMeta =
    EntityMeta::new("EmpireState", true, StorageTarget::DATABASE);
/// Metadata for [`EmpireNodeState`](crate::entities::EmpireNodeState).
pub const EMPIRE_NODE_STATE: EntityMeta =
    EntityMeta::new("EmpireNodeState", false, StorageTarget::CACHE);
/// Metadata for [`AuctionListing`](crate::entities::AuctionListing).
pub const AUCTION_LISTING: EntityMeta =
    EntityMeta::new("AuctionListing", true, StorageTarget::DATABASE);
/// Metadata for [`ClosedListing`](crate::entities::ClosedListing).
pub const CLOSED_LISTING: EntityMeta =
    EntityMeta::new("ClosedListing", false, StorageTarget::DATABASE);
/// Metadata for [`BuildingState`](crate::entities::BuildingState).
pub const BUILDING_STATE: EntityMeta =
    EntityMeta::new("BuildingState", false, StorageTarget::CACHE);
/// Metadata for [`BuildingDesc`](crate::entities::BuildingDesc).
pub const BUILDING_DESC: EntityMeta =
    EntityMeta::new("BuildingDesc", false, StorageTarget::DATABASE);
/// Metadata for [`ChatMessage`](crate::entities::ChatMessage).
pub const CHAT_MESSAGE: EntityMeta = EntityMeta::new("ChatMessage", false, StorageTarget::CACHE);
/// Metadata for [`InventoryState`](crate::entities::InventoryState).
pub const INVENTORY_STATE: EntityMeta =
    EntityMeta::new("InventoryState", false, StorageTarget::CACHE);
/// Metadata for [`UserState`](crate::entities::UserState).
pub const USER_STATE: EntityMeta = EntityMeta::new("UserState", false, StorageTarget::DATABASE);
/// Metadata for [`UsernameState`](crate::entities::UsernameState).
pub const USERNAME_STATE: EntityMeta =
    EntityMeta::new("UsernameState", true, StorageTarget::DATABASE);
/// Metadata for [`CargoItem`](crate::entities::CargoItem).
pub const CARGO_ITEM: EntityMeta = EntityMeta::new("CargoItem", true, BOTH);
/// Metadata for [`EmpireNodeSiegeState`](crate::entities::EmpireNodeSiegeState).
pub const EMPIRE_NODE_SIEGE_STATE: EntityMeta =
    EntityMeta::new("EmpireNodeSiegeState", false, StorageTarget::CACHE);
/// Metadata for [`LocationState`](crate::entities::LocationState).
pub const LOCATION_STATE: EntityMeta =
    EntityMeta::new("LocationState", false, StorageTarget::CACHE);
/// Metadata for [`ProgressiveAction`](crate::entities::ProgressiveAction).
pub const PROGRESSIVE_ACTION: EntityMeta =
    EntityMeta::new("ProgressiveAction", false, StorageTarget::CACHE);
/// Metadata for [`PublicProgressiveAction`](crate::entities::PublicProgressiveAction).
pub const PUBLIC_PROGRESSIVE_ACTION: EntityMeta =
    EntityMeta::new("PublicProgressiveAction", false, StorageTarget::CACHE);

/// Every domain event type known to the gateway.
pub static ENTITY_CATALOG: &[EntityMeta] = &[
    ITEM,
    RECIPE,
    ITEM_LIST,
    CLAIM_STATE,
    CLAIM_LOCAL_STATE,
    EMPIRE_STATE,
    EMPIRE_NODE_STATE,
    AUCTION_LISTING,
    CLOSED_LISTING,
    BUILDING_STATE,
    BUILDING_DESC,
    CHAT_MESSAGE,
    INVENTORY_STATE,
    USER_STATE,
    USERNAME_STATE,
    CARGO_ITEM,
    EMPIRE_NODE_SIEGE_STATE,
    LOCATION_STATE,
    PROGRESSIVE_ACTION,
    PUBLIC_PROGRESSIVE_ACTION,
];

/// Look up the metadata for a type by name.
pub fn entity_meta(type_name: &str) -> Option<&'static EntityMeta> {
    ENTITY_CATALOG.iter().find(|m| m.type_name == type_name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let names: BTreeSet<&str> = ENTITY_CATALOG.iter().map(|m| m.type_name).collect();
        assert_eq!(names.len(), ENTITY_CATALOG.len());
    }

    #[test]
    fn item_is_routed_to_both_sinks() {
        let meta = entity_meta("Item");
        assert_eq!(meta.map(EntityMeta::is_cached), Some(true));
        assert_eq!(meta.map(EntityMeta::is_persisted), Some(true));
    }

    #[test]
    fn chat_is_cache_only_and_module_scoped() {
        assert!(CHAT_MESSAGE.is_cached());
        assert!(!CHAT_MESSAGE.is_persisted());
        assert!(!CHAT_MESSAGE.global);
    }

    #[test]
    fn crafting_progress_is_cache_only() {
        for meta in [LOCATION_STATE, PROGRESSIVE_ACTION, PUBLIC_PROGRESSIVE_ACTION] {
            assert!(meta.is_cached(), "{}", meta.type_name);
            assert!(!meta.is_persisted(), "{}", meta.type_name);
            assert!(!meta.global, "{}", meta.type_name);
        }
        assert_eq!(entity_meta("CargoItem"), Some(&CARGO_ITEM));
        assert!(CARGO_ITEM.global && CARGO_ITEM.is_persisted());
    }

    #[test]
    fn unknown_type_has_no_metadata() {
        assert!(entity_meta("Nope").is_none());
    }
}
