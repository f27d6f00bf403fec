//! Crafting progress and the positions of the buildings hosting it.

use serde::{Deserialize, Serialize};

use crate::impl_gateway_event;
use crate::storage;

/// A crafting job in progress. Cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveAction {
    /// Action identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Recipe being crafted.
    pub recipe_id: String,
    /// Number of crafts queued.
    pub craft_count: i32,
    /// Accumulated progress.
    pub progress: i32,
}

impl_gateway_event!(ProgressiveAction, storage::PROGRESSIVE_ACTION);

/// The public face of a crafting job: where it runs and who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProgressiveAction {
    /// Action identifier, shared with [`ProgressiveAction`].
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Building the job runs in.
    pub building_entity_id: String,
    /// Player who started the job.
    pub owner_entity_id: String,
}

impl_gateway_event!(PublicProgressiveAction, storage::PUBLIC_PROGRESSIVE_ACTION);

/// Position of a building hosting public crafting. Cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationState {
    /// Entity identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// X coordinate.
    pub x: i32,
    /// Z coordinate.
    pub z: i32,
    /// Dimension index.
    pub dimension: u32,
}

impl_gateway_event!(LocationState, storage::LOCATION_STATE);
