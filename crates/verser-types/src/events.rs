use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, User, UserStatus};

/// Frames sent FROM client TO server over the `/ws` relay.
///
/// `send_message` fields are all optional on the wire so that an incomplete
/// frame still parses and can be dropped by the relay without a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayCommand {
    /// Bind this connection to a user id
    Join { user_id: i64 },

    /// Persist a chat message and fan it out to everyone
    SendMessage {
        user_id: Option<i64>,
        conversation_id: Option<i64>,
        content: Option<String>,
    },

    /// Typing indicator, relayed to everyone but the sender
    Typing {
        user_id: i64,
        conversation_id: i64,
        #[serde(default)]
        is_typing: bool,
    },

    /// Any `type` the relay does not know about
    #[serde(other)]
    Unknown,
}

impl RelayCommand {
    /// Returns the (user_id, conversation_id, content) of a `send_message`
    /// frame, or `None` if any of them is missing, zero or empty.
    pub fn outgoing_message(&self) -> Option<(i64, i64, &str)> {
        match self {
            Self::SendMessage {
                user_id: Some(user_id),
                conversation_id: Some(conversation_id),
                content: Some(content),
            } if *user_id != 0 && *conversation_id != 0 && !content.is_empty() => {
                Some((*user_id, *conversation_id, content.as_str()))
            }
            _ => None,
        }
    }
}

/// Events sent FROM server TO clients over the `/ws` relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayEvent {
    /// A user came online or went offline
    UserStatus { user_id: i64, status: UserStatus },

    /// A chat message was persisted
    NewMessage {
        message: ChatMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<User>,
    },

    /// A user started or stopped typing
    UserTyping {
        user_id: i64,
        conversation_id: i64,
        is_typing: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_join_frame() {
        let cmd: RelayCommand = serde_json::from_value(json!({"type": "join", "userId": 3})).unwrap();
        assert_eq!(cmd, RelayCommand::Join { user_id: 3 });
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let cmd: RelayCommand =
            serde_json::from_value(json!({"type": "read_receipt", "messageId": 9})).unwrap();
        assert_eq!(cmd, RelayCommand::Unknown);
    }

    #[test]
    fn incomplete_send_message_parses_but_is_not_outgoing() {
        let cmd: RelayCommand =
            serde_json::from_value(json!({"type": "send_message", "userId": 1, "conversationId": 5}))
                .unwrap();
        assert!(cmd.outgoing_message().is_none());

        let empty: RelayCommand = serde_json::from_value(
            json!({"type": "send_message", "userId": 1, "conversationId": 5, "content": ""}),
        )
        .unwrap();
        assert!(empty.outgoing_message().is_none());

        let zero_user: RelayCommand = serde_json::from_value(
            json!({"type": "send_message", "userId": 0, "conversationId": 5, "content": "x"}),
        )
        .unwrap();
        assert!(zero_user.outgoing_message().is_none());
    }

    #[test]
    fn complete_send_message_is_outgoing() {
        let cmd: RelayCommand = serde_json::from_value(
            json!({"type": "send_message", "userId": 1, "conversationId": 5, "content": "hi"}),
        )
        .unwrap();
        assert_eq!(cmd.outgoing_message(), Some((1, 5, "hi")));
    }

    #[test]
    fn typing_defaults_to_not_typing() {
        let cmd: RelayCommand =
            serde_json::from_value(json!({"type": "typing", "userId": 2, "conversationId": 7})).unwrap();
        assert_eq!(
            cmd,
            RelayCommand::Typing {
                user_id: 2,
                conversation_id: 7,
                is_typing: false
            }
        );
    }

    #[test]
    fn events_serialize_flat_with_camel_case() {
        let status = serde_json::to_value(RelayEvent::UserStatus {
            user_id: 4,
            status: UserStatus::Online,
        })
        .unwrap();
        assert_eq!(status, json!({"type": "user_status", "userId": 4, "status": "online"}));

        let typing = serde_json::to_value(RelayEvent::UserTyping {
            user_id: 4,
            conversation_id: 2,
            is_typing: true,
        })
        .unwrap();
        assert_eq!(
            typing,
            json!({"type": "user_typing", "userId": 4, "conversationId": 2, "isTyping": true})
        );
    }
}
