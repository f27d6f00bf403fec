//! Core traits implemented by every domain event.

use serde::Serialize;

use crate::codec::{FieldValue, TableSchema};
use crate::storage::EntityMeta;

/// Topic namespace shared by every world entity topic.
pub const TOPIC_PREFIX: &str = "world";

/// A domain event emitted by the gateway.
///
/// Instances are created by a mapping step, stamped with the owning module,
/// and treated as immutable afterward.
pub trait GatewayEvent: Serialize + Clone + Send + Sync + 'static {
    /// Static routing metadata for this type.
    const META: EntityMeta;

    /// Stable identifier, unique within (type, scope).
    fn id(&self) -> &str;

    /// Owning module name.
    fn module(&self) -> &str;

    /// Stamp the owning module.
    fn set_module(&mut self, module: &str);

    /// Key used to deduplicate buffered durable writes: `{Type}:{Id}`.
    fn buffer_key(&self) -> String {
        format!("{}:{}", Self::META.type_name, self.id())
    }
}

/// A domain event that can be written to the durable store.
pub trait DurableRecord: GatewayEvent {
    /// Table description, consumed once to build a write definition.
    fn schema() -> &'static TableSchema;

    /// Encode this record into one value per schema column, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a nested field fails JSON serialization.
    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error>;
}

/// Cache hash key for a type: `cache:{Type}:{global|module}`.
pub fn cache_key(type_name: &str, global: bool, module: &str) -> String {
    let scope = if global { "global" } else { module };
    format!("cache:{type_name}:{scope}")
}

/// Cache hash key for a domain event type.
pub fn cache_key_of<T: GatewayEvent>(module: &str) -> String {
    cache_key(T::META.type_name, T::META.global, module)
}

/// Default topic for a type name: `world.` followed by its words,
/// lower-cased and dot-separated (`ClaimLocalState` becomes
/// `world.claim.local.state`).
pub fn derive_topic(type_name: &str) -> String {
    let mut topic = String::with_capacity(type_name.len().saturating_add(12));
    topic.push_str(TOPIC_PREFIX);
    let mut prev_lower = false;
    for ch in type_name.chars() {
        if ch.is_uppercase() {
            topic.push('.');
            topic.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            if !prev_lower && topic.ends_with(TOPIC_PREFIX) {
                topic.push('.');
            }
            topic.push(ch);
            prev_lower = true;
        }
    }
    topic
}

/// Implements [`GatewayEvent`] for a struct with `id: String` and
/// `module: String` fields.
#[macro_export]
macro_rules! impl_gateway_event {
    ($ty:ty, $meta:expr) => {
        impl $crate::event::GatewayEvent for $ty {
            const META: $crate::storage::EntityMeta = $meta;

            fn id(&self) -> &str {
                &self.id
            }

            fn module(&self) -> &str {
                &self.module
            }

            fn set_module(&mut self, module: &str) {
                module.clone_into(&mut self.module);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_module_scoped() {
        assert_eq!(cache_key("ChatMessage", false, "m1"), "cache:ChatMessage:m1");
        assert_eq!(cache_key("ChatMessage", false, "m2"), "cache:ChatMessage:m2");
    }

    #[test]
    fn global_cache_key_ignores_module() {
        assert_eq!(cache_key("Item", true, "m1"), cache_key("Item", true, "m2"));
        assert_eq!(cache_key("Item", true, "m1"), "cache:Item:global");
    }

    #[test]
    fn topics_follow_word_boundaries() {
        assert_eq!(derive_topic("Item"), "world.item");
        assert_eq!(derive_topic("ClaimLocalState"), "world.claim.local.state");
        assert_eq!(derive_topic("EmpireNodeState"), "world.empire.node.state");
    }

    #[test]
    fn lower_case_name_gets_a_separator() {
        assert_eq!(derive_topic("item"), "world.item");
    }
}
