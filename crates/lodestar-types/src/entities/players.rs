//! Players, usernames, and chat.

use serde::{Deserialize, Serialize};

use crate::codec::{ColumnKind, ColumnSpec, FieldValue, TableSchema};
use crate::event::DurableRecord;
use crate::impl_gateway_event;
use crate::storage;

/// A chat message. Cache only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Channel the message was sent on.
    pub channel_id: i32,
    /// Sender entity.
    pub sender_id: String,
    /// Sender display name.
    pub sender_username: String,
    /// Message text.
    pub content: String,
}

impl_gateway_event!(ChatMessage, storage::CHAT_MESSAGE);

/// A connected user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    /// Identity of the account.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Player entity controlled by the account.
    pub user_entity_id: String,
    /// Whether the account may sign in.
    pub can_sign_in: bool,
}

impl_gateway_event!(UserState, storage::USER_STATE);

static USER_STATE_SCHEMA: TableSchema = TableSchema {
    table: "users",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("user_entity_id", ColumnKind::Text),
        ColumnSpec::new("can_sign_in", ColumnKind::Boolean),
    ],
};

impl DurableRecord for UserState {
    fn schema() -> &'static TableSchema {
        &USER_STATE_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.user_entity_id),
            FieldValue::from(self.can_sign_in),
        ])
    }
}

/// A player's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameState {
    /// Player entity identifier.
    pub id: String,
    /// Owning module.
    #[serde(default)]
    pub module: String,
    /// Display name.
    pub username: String,
}

impl_gateway_event!(UsernameState, storage::USERNAME_STATE);

static USERNAME_STATE_SCHEMA: TableSchema = TableSchema {
    table: "usernames",
    columns: &[
        ColumnSpec::new("id", ColumnKind::Text),
        ColumnSpec::new("module", ColumnKind::Text),
        ColumnSpec::new("username", ColumnKind::Text),
    ],
};

impl DurableRecord for UsernameState {
    fn schema() -> &'static TableSchema {
        &USERNAME_STATE_SCHEMA
    }

    fn encode(&self) -> Result<Vec<FieldValue>, serde_json::Error> {
        Ok(vec![
            FieldValue::from(&self.id),
            FieldValue::from(&self.module),
            FieldValue::from(&self.username),
        ])
    }
}
