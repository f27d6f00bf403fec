//! Best-effort lookup of the account the gateway is signed in as.

use lodestar_changefeed::ChangefeedLink;
use serde_json::Value;
use tracing::info;

/// The player behind the link identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInUser {
    /// Link identity.
    pub identity: String,
    /// Player entity id.
    pub entity_id: String,
    /// Display name.
    pub username: String,
}

fn entity_id_of(row: &Value) -> Option<String> {
    match row.get("entity_id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Match the link identity against `user_state`, then
/// `player_username_state`. `None` when any step is missing.
pub fn resolve_identity(link: &dyn ChangefeedLink) -> Option<SignedInUser> {
    let identity = link.identity()?;
    let entity_id = link
        .table("user_state")?
        .rows()
        .iter()
        .find(|row| row.get("identity").and_then(Value::as_str) == Some(identity.as_str()))
        .and_then(entity_id_of)?;
    let username = link
        .table("player_username_state")?
        .rows()
        .iter()
        .find(|row| entity_id_of(row).as_deref() == Some(entity_id.as_str()))?
        .get("username")?
        .as_str()?
        .to_owned();
    Some(SignedInUser {
        identity,
        entity_id,
        username,
    })
}

/// Resolve and log the signed-in user.
pub fn log_identity(link: &dyn ChangefeedLink) -> Option<SignedInUser> {
    let user = resolve_identity(link);
    match &user {
        Some(u) => info!(
            identity = %u.identity,
            username = %u.username,
            entity_id = %u.entity_id,
            "Signed in with identity {} as {} ({})",
            u.identity,
            u.username,
            u.entity_id
        ),
        None => info!("Signed in with unknown credentials"),
    }
    user
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use lodestar_changefeed::{
        ConnectParams, ConnectionCallbacks, Connector, MemoryConnector, SubscriptionHandlers,
    };
    use serde_json::json;

    use super::*;

    fn connected(connector: &MemoryConnector) -> Arc<dyn ChangefeedLink> {
        let params = ConnectParams {
            uri: "memory://".into(),
            module: "m1".into(),
            token: "t".into(),
        };
        let link = connector
            .connect(
                &params,
                ConnectionCallbacks {
                    on_connect: Box::new(|_| {}),
                    on_connect_error: Box::new(|_| {}),
                    on_disconnect: Box::new(|_| {}),
                },
            )
            .unwrap();
        link.frame_tick().unwrap();
        link.subscribe(
            &["SELECT * FROM user_state".to_owned()],
            SubscriptionHandlers {
                on_applied: Box::new(|| {}),
                on_error: Box::new(|_| {}),
            },
        )
        .unwrap();
        link.frame_tick().unwrap();
        link
    }

    #[test]
    fn resolves_username_through_user_state() {
        let connector = MemoryConnector::new();
        connector.seed_table(
            "user_state",
            vec![
                json!({"identity": "other", "entity_id": 1, "can_sign_in": true}),
                json!({"identity": "m1-identity-0", "entity_id": 42, "can_sign_in": true}),
            ],
        );
        connector.seed_table(
            "player_username_state",
            vec![json!({"entity_id": 42, "username": "lodestar-bot"})],
        );
        let link = connected(&connector);

        let user = log_identity(link.as_ref()).unwrap();
        assert_eq!(user.username, "lodestar-bot");
        assert_eq!(user.entity_id, "42");
    }

    #[test]
    fn unknown_identity_is_none() {
        let connector = MemoryConnector::new();
        connector.seed_table("user_state", vec![]);
        let link = connected(&connector);
        assert!(log_identity(link.as_ref()).is_none());
    }
}
