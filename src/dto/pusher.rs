use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dto::events::ChannelMessage;

const EVENT_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const EVENT_ERROR: &str = "pusher:error";
const EVENT_PING: &str = "pusher:ping";
const EVENT_PONG: &str = "pusher:pong";
const EVENT_SUBSCRIBE: &str = "pusher:subscribe";
const EVENT_UNSUBSCRIBE: &str = "pusher:unsubscribe";
const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Raw frame exchanged over the Pusher WebSocket.
pub struct PusherFrame {
    /// Protocol or application event name.
    pub event: String,
    /// Channel the frame belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Payload; application events carry it as a JSON string.
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
/// Payload of `pusher:connection_established`.
pub struct ConnectionEstablished {
    /// Identifier assigned to this connection.
    pub socket_id: String,
    /// Seconds of silence before the client should ping.
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
/// Payload of `pusher:error`.
pub struct PusherErrorPayload {
    /// Human readable reason.
    #[serde(default)]
    pub message: String,
    /// Pusher error code.
    #[serde(default)]
    pub code: Option<u16>,
}

/// Server frame sorted by what the client has to do with it.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Handshake completed.
    Established(ConnectionEstablished),
    /// Server keepalive; answer with a pong.
    Ping,
    /// Protocol error reported by the server.
    Error(PusherErrorPayload),
    /// Channel subscription confirmed.
    SubscriptionSucceeded { channel: String },
    /// Application event on a channel.
    Channel { channel: String, message: ChannelMessage },
    /// Anything else; ignored.
    Other { event: String },
}

impl PusherFrame {
    /// Subscribe request for a public channel.
    pub fn subscribe(channel: &str) -> Self {
        Self {
            event: EVENT_SUBSCRIBE.into(),
            channel: None,
            data: serde_json::json!({ "channel": channel }),
        }
    }

    /// Unsubscribe request for a channel.
    pub fn unsubscribe(channel: &str) -> Self {
        Self {
            event: EVENT_UNSUBSCRIBE.into(),
            channel: None,
            data: serde_json::json!({ "channel": channel }),
        }
    }

    /// Reply to a server ping.
    pub fn pong() -> Self {
        Self {
            event: EVENT_PONG.into(),
            channel: None,
            data: Value::Object(Default::default()),
        }
    }

    /// Data as text; the server sends JSON-encoded strings, clients send objects.
    pub fn data_text(&self) -> String {
        match &self.data {
            Value::String(text) => text.clone(),
            Value::Null => "{}".into(),
            other => other.to_string(),
        }
    }

    /// Classify a decoded server frame.
    pub fn into_inbound(self) -> serde_json::Result<InboundFrame> {
        let data = self.data_text();
        let PusherFrame { event, channel, .. } = self;
        let inbound = match event.as_str() {
            EVENT_CONNECTION_ESTABLISHED => InboundFrame::Established(serde_json::from_str(&data)?),
            EVENT_PING => InboundFrame::Ping,
            EVENT_ERROR => InboundFrame::Error(serde_json::from_str(&data)?),
            EVENT_SUBSCRIPTION_SUCCEEDED => InboundFrame::SubscriptionSucceeded {
                channel: channel.unwrap_or_default(),
            },
            _ => match channel {
                Some(channel) => InboundFrame::Channel {
                    channel,
                    message: ChannelMessage {
                        event: event.clone(),
                        data,
                    },
                },
                None => InboundFrame::Other {
                    event: event.clone(),
                },
            },
        };
        Ok(inbound)
    }
}
