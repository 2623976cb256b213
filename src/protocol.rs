//! Wire protocol for the real-time endpoint
//!
//! Events are internally-tagged JSON text frames (`{"type": "identify",
//! ...}`). Two top-level enums cover the client-to-server and
//! server-to-client directions.

use serde::{Deserialize, Serialize};

/// Events sent from clients to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to a username.
    Identify { username: String },

    /// Join a team room for broadcast delivery.
    JoinRoom { room_id: String },

    /// Send a message to one user.
    DirectMessage {
        sender: String,
        receiver: String,
        body: String,
    },

    /// Send a message to every live member of a room.
    GroupMessage {
        room_id: String,
        sender: String,
        body: String,
    },
}

/// Events delivered from the server to live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A direct message addressed to this connection's username.
    DirectMessage { sender: String, body: String },

    /// A broadcast to a room this connection has joined.
    GroupMessage {
        sender: String,
        body: String,
        room_id: String,
    },
}

impl ServerEvent {
    /// Serialize for the wire. Event shapes are plain data; this cannot
    /// fail in practice, and the fallback keeps delivery best-effort.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_frame_parses() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"identify","username":"alice"}"#).unwrap();
        match event {
            ClientEvent::Identify { username } => assert_eq!(username, "alice"),
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"type":"shutdown","username":"alice"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_field_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"type":"direct_message","sender":"alice","body":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn group_frame_wire_shape() {
        let frame = ServerEvent::GroupMessage {
            sender: "bob".to_string(),
            body: "standup".to_string(),
            room_id: "team1".to_string(),
        }
        .to_frame();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "group_message");
        assert_eq!(value["sender"], "bob");
        assert_eq!(value["room_id"], "team1");
    }
}
