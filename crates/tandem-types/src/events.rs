use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ErrorKind};
use crate::models::{LastMessage, Message};

/// Events sent FROM server TO client over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// First event on every session.
    Ready {
        user_id: Uuid,
        session_id: Uuid,
        online_users: Vec<Uuid>,
    },

    /// Join acknowledgement, carrying anything persisted after the client's
    /// `since` cursor.
    RoomJoined {
        chat_id: Uuid,
        missed: Vec<Message>,
        has_more: bool,
    },

    /// A message was persisted in a room this session has joined.
    MessageReceived { message: Message },

    /// A chat's last-message snapshot moved. Sent to every live session of
    /// both participants, joined or not.
    ChatSummaryChanged {
        chat_id: Uuid,
        last_message: LastMessage,
    },

    /// `user_id` has read everything the other participant sent in `chat_id`.
    MessagesSeen { chat_id: Uuid, user_id: Uuid },

    UserOnline { user_id: Uuid },

    UserOffline {
        user_id: Uuid,
        last_seen: DateTime<Utc>,
    },

    UserTyping {
        chat_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A client command was refused.
    OperationFailed {
        kind: ErrorKind,
        reason: String,
        retryable: bool,
    },
}

impl ServerEvent {
    pub fn failed(err: &ChatError) -> Self {
        Self::OperationFailed {
            kind: err.kind(),
            reason: err.reason().to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Start receiving live events for a chat. `since` is the newest message
    /// timestamp the client already holds.
    Join {
        chat_id: Uuid,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
    },

    Leave { chat_id: Uuid },

    SendMessage { chat_id: Uuid, content: String },

    SetTyping { chat_id: Uuid, is_typing: bool },

    MarkSeen { chat_id: Uuid },
}

impl ClientCommand {
    /// Parse a text frame. Unknown command types and missing fields are
    /// `InvalidContent`.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text).map_err(|e| ChatError::invalid(format!("malformed command: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_commands() {
        let chat_id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"SendMessage","data":{{"chat_id":"{chat_id}","content":"hi"}}}}"#);
        assert_eq!(
            ClientCommand::parse(&raw).unwrap(),
            ClientCommand::SendMessage {
                chat_id,
                content: "hi".into()
            }
        );

        let raw = format!(r#"{{"type":"Join","data":{{"chat_id":"{chat_id}"}}}}"#);
        assert_eq!(
            ClientCommand::parse(&raw).unwrap(),
            ClientCommand::Join { chat_id, since: None }
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_commands() {
        let err = ClientCommand::parse(r#"{"type":"Shout","data":{}}"#).unwrap_err();
        assert!(matches!(err, ChatError::InvalidContent(_)));

        let err = ClientCommand::parse(r#"{"type":"SetTyping","data":{"chat_id":"nope"}}"#).unwrap_err();
        assert!(matches!(err, ChatError::InvalidContent(_)));

        assert!(ClientCommand::parse("not json").is_err());
    }

    #[test]
    fn failure_event_carries_kind() {
        let event = ServerEvent::failed(&ChatError::unavailable("timed out"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OperationFailed");
        assert_eq!(json["data"]["kind"], "store_unavailable");
        assert_eq!(json["data"]["retryable"], true);
        assert_eq!(json["data"]["reason"], "timed out");
    }
}
