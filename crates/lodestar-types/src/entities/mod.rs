//! Concrete domain event types.
//!
//! Each type carries an `id`, the owning `module` (stamped by the
//! dispatcher), and its [`GatewayEvent`](crate::GatewayEvent) metadata.
//! Durable types additionally declare their table schema and codec beside
//! the struct.

pub mod actions;
pub mod buildings;
pub mod claims;
pub mod items;
pub mod market;
pub mod players;

pub use actions::{LocationState, ProgressiveAction, PublicProgressiveAction};
pub use buildings::{BuildingDesc, BuildingState, InventoryPocket, InventoryState};
pub use claims::{
    ClaimLocalState, ClaimState, EmpireNodeSiegeState, EmpireNodeState, EmpireState, Location,
};
pub use items::{
    BuildingRequirement, CargoItem, Item, ItemList, ItemListEntry, ItemListPossibility, ItemRarity,
    ItemStack, LevelRequirement, Recipe, ToolRequirement,
};
pub use market::{AuctionListing, ClosedItemStack, ClosedListing};
pub use players::{ChatMessage, UserState, UsernameState};
