//! Public types for the bayeux-client crate.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A boxed error type for transport and extension failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with a message delivered to a channel or a publish response.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Callback invoked with asynchronous errors (transport drops, rejected inbound messages).
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// A Bayeux message.
///
/// Used for both meta traffic (`/meta/handshake`, `/meta/subscribe`, ...) and
/// application traffic. Absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Client-assigned identifier, echoed by the server in replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Map<String, serde_json::Value>>,
    /// Target channel of a `/meta/subscribe` or `/meta/unsubscribe` request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
}

impl Message {
    /// A message on `channel` with no other fields set.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// A message on `channel` carrying `data`.
    pub fn with_data(channel: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            data: Some(data),
            ..Default::default()
        }
    }

    /// True unless the server explicitly reported `successful: false`.
    pub fn is_successful(&self) -> bool {
        self.successful != Some(false)
    }
}

/// Lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connected,
    Disconnecting,
    Failed,
}

/// Timing and capacity knobs for a client session.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Upper bound for handshake, connect, subscribe and unsubscribe round trips.
    pub request_timeout: Duration,
    /// How long `disconnect()` waits for the transport before giving up.
    pub disconnect_timeout: Duration,
    /// Pending publishes older than this are discarded without a response.
    pub pending_publish_ttl: Duration,
    /// How often the dispatch task sweeps expired pending publishes.
    pub sweep_interval: Duration,
    /// Capacity of the transport → session inbound channel.
    pub inbound_capacity: usize,
    /// Capacity of each [`Subscription`](crate::Subscription) stream.
    pub subscription_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
            pending_publish_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            inbound_capacity: 256,
            subscription_capacity: 64,
        }
    }
}

impl TimingConfig {
    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sweep_interval.is_zero() {
            return Err(Error::InvalidConfig("sweep_interval must be non-zero"));
        }
        if self.inbound_capacity == 0 {
            return Err(Error::InvalidConfig("inbound_capacity must be at least 1"));
        }
        if self.subscription_capacity == 0 {
            return Err(Error::InvalidConfig(
                "subscription_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("handshake failed: {0}")]
    HandshakeFailed(BoxError),

    #[error("connect failed: {0}")]
    ConnectFailed(BoxError),

    #[error("client is not connected")]
    NotConnected,

    #[error("client already disconnected")]
    AlreadyDisconnected,

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("extension {extension} failed: {cause}")]
    Extension { extension: String, cause: BoxError },

    #[error("transport error: {0}")]
    Transport(BoxError),

    #[error("invalid channel {channel:?}: {reason}")]
    InvalidChannel {
        channel: String,
        reason: &'static str,
    },

    #[error("server rejected request on {channel}: {}", .error.as_deref().unwrap_or("no error details from server"))]
    Rejected {
        channel: String,
        error: Option<String>,
    },

    #[error("URL parse error: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("no transport configured")]
    NoTransport,

    #[error("invalid timing config: {0}")]
    InvalidConfig(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_json_uses_camel_case_and_skips_absent_fields() {
        let msg = Message {
            channel: "/meta/handshake".to_string(),
            id: Some("1".to_string()),
            client_id: Some("abc".to_string()),
            supported_connection_types: Some(vec!["websocket".to_string()]),
            ..Default::default()
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("clientId"));
        assert!(json.contains("supportedConnectionTypes"));
        assert!(!json.contains("successful"));
        assert!(!json.contains("data"));
    }

    #[test]
    fn message_deserializes_server_reply() {
        let json = r#"{
            "channel": "/foo",
            "id": "abc",
            "successful": true,
            "ext": {"auth": "token"}
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.channel, "/foo");
        assert_eq!(msg.id.as_deref(), Some("abc"));
        assert_eq!(msg.successful, Some(true));
        assert_eq!(
            msg.ext.as_ref().and_then(|e| e.get("auth")),
            Some(&serde_json::json!("token"))
        );
    }

    #[test]
    fn is_successful_only_false_when_explicit() {
        let mut msg = Message::new("/foo");
        assert!(msg.is_successful());
        msg.successful = Some(true);
        assert!(msg.is_successful());
        msg.successful = Some(false);
        assert!(!msg.is_successful());
    }

    #[test]
    fn default_timing_config_is_valid() {
        assert!(TimingConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_and_capacities_are_rejected() {
        let zero_sweep = TimingConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            zero_sweep.validate(),
            Err(Error::InvalidConfig(reason)) if reason.contains("sweep_interval")
        ));

        let zero_inbound = TimingConfig {
            inbound_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_inbound.validate(),
            Err(Error::InvalidConfig(reason)) if reason.contains("inbound_capacity")
        ));

        let zero_stream = TimingConfig {
            subscription_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_stream.validate(),
            Err(Error::InvalidConfig(reason)) if reason.contains("subscription_capacity")
        ));
    }

    #[test]
    fn rejected_error_message_falls_back_when_server_sent_none() {
        let err = Error::Rejected {
            channel: "/meta/subscribe".to_string(),
            error: None,
        };
        assert!(err.to_string().contains("no error details from server"));
    }
}
