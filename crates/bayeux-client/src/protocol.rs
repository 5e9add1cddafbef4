//! Bayeux protocol constants, channel naming rules, and meta message builders.

use crate::types::{Error, Message};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Protocol version sent in `/meta/handshake`.
pub const BAYEUX_VERSION: &str = "1.0";

/// Meta channel names.
pub mod channel {
    pub const HANDSHAKE: &str = "/meta/handshake";
    pub const CONNECT: &str = "/meta/connect";
    pub const SUBSCRIBE: &str = "/meta/subscribe";
    pub const UNSUBSCRIBE: &str = "/meta/unsubscribe";
    pub const DISCONNECT: &str = "/meta/disconnect";

    pub(crate) const META_PREFIX: &str = "/meta/";
    pub(crate) const WILDCARD: &str = "*";
    pub(crate) const DEEP_WILDCARD: &str = "**";
}

// ---------------------------------------------------------------------------
// Channel names
// ---------------------------------------------------------------------------

/// What the caller intends to do with a channel; publish and subscribe have
/// different rules for meta channels and wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelUse {
    Subscribe,
    Publish,
}

fn invalid(name: &str, reason: &'static str) -> Error {
    Error::InvalidChannel {
        channel: name.to_string(),
        reason,
    }
}

/// Check a channel name against the Bayeux naming rules.
///
/// Names are absolute (`/foo/bar`), segments are non-empty, and `*` / `**`
/// may only appear as the whole final segment. Meta channels are reserved
/// for the session itself. Wildcards are only meaningful for subscriptions.
pub(crate) fn validate_channel(name: &str, usage: ChannelUse) -> Result<(), Error> {
    if name.is_empty() {
        return Err(invalid(name, "channel name is empty"));
    }
    let Some(rest) = name.strip_prefix('/') else {
        return Err(invalid(name, "channel name must start with '/'"));
    };

    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(invalid(name, "channel name has an empty segment"));
        }
        let is_wildcard = *segment == channel::WILDCARD || *segment == channel::DEEP_WILDCARD;
        if is_wildcard && i != last {
            return Err(invalid(name, "wildcard is only allowed as the final segment"));
        }
        if !is_wildcard && segment.contains('*') {
            return Err(invalid(name, "'*' must make up a whole segment"));
        }
    }

    if name.starts_with(channel::META_PREFIX) || name == "/meta" {
        return Err(invalid(name, "meta channels are reserved for the session"));
    }
    if usage == ChannelUse::Publish && is_wildcard(name) {
        return Err(invalid(name, "cannot publish to a wildcard channel"));
    }
    Ok(())
}

pub(crate) fn is_wildcard(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .is_some_and(|last| last == channel::WILDCARD || last == channel::DEEP_WILDCARD)
}

// ---------------------------------------------------------------------------
// Message ids
// ---------------------------------------------------------------------------

/// Render a message counter as a compact base-36 id.
pub(crate) fn format_id(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(13);
    while n > 0 {
        digits.push(char::from_digit((n % 36) as u32, 36).unwrap_or('0'));
        n /= 36;
    }
    digits.iter().rev().collect()
}

// ---------------------------------------------------------------------------
// Meta message builders
// ---------------------------------------------------------------------------

pub(crate) fn build_handshake_msg(id: String, connection_type: &str) -> Message {
    Message {
        channel: channel::HANDSHAKE.to_string(),
        id: Some(id),
        version: Some(BAYEUX_VERSION.to_string()),
        supported_connection_types: Some(vec![connection_type.to_string()]),
        ..Default::default()
    }
}

pub(crate) fn build_connect_msg(id: String, client_id: Option<String>, connection_type: &str) -> Message {
    Message {
        channel: channel::CONNECT.to_string(),
        id: Some(id),
        client_id,
        connection_type: Some(connection_type.to_string()),
        ..Default::default()
    }
}

pub(crate) fn build_subscription_msg(
    meta_channel: &str,
    id: String,
    client_id: Option<String>,
    subscription: &str,
) -> Message {
    Message {
        channel: meta_channel.to_string(),
        id: Some(id),
        client_id,
        subscription: Some(subscription.to_string()),
        ..Default::default()
    }
}

pub(crate) fn build_disconnect_msg(id: String, client_id: Option<String>) -> Message {
    Message {
        channel: channel::DISCONNECT.to_string(),
        id: Some(id),
        client_id,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(name: &str, usage: ChannelUse) -> &'static str {
        match validate_channel(name, usage) {
            Err(Error::InvalidChannel { reason, .. }) => reason,
            other => panic!("expected InvalidChannel for {name:?}, got {other:?}"),
        }
    }

    #[test]
    fn plain_channels_are_valid() {
        for name in ["/foo", "/foo/bar", "/service/echo", "/chat/room-1"] {
            assert!(validate_channel(name, ChannelUse::Subscribe).is_ok(), "{name}");
            assert!(validate_channel(name, ChannelUse::Publish).is_ok(), "{name}");
        }
    }

    #[test]
    fn empty_and_relative_names_rejected() {
        assert_eq!(reason("", ChannelUse::Subscribe), "channel name is empty");
        assert_eq!(
            reason("foo", ChannelUse::Subscribe),
            "channel name must start with '/'"
        );
    }

    #[test]
    fn empty_segments_rejected() {
        assert_eq!(
            reason("/", ChannelUse::Subscribe),
            "channel name has an empty segment"
        );
        assert_eq!(
            reason("/foo//bar", ChannelUse::Subscribe),
            "channel name has an empty segment"
        );
        assert_eq!(
            reason("/foo/", ChannelUse::Publish),
            "channel name has an empty segment"
        );
    }

    #[test]
    fn trailing_wildcards_allowed_for_subscribe_only() {
        assert!(validate_channel("/foo/*", ChannelUse::Subscribe).is_ok());
        assert!(validate_channel("/foo/**", ChannelUse::Subscribe).is_ok());
        assert!(validate_channel("/**", ChannelUse::Subscribe).is_ok());
        assert_eq!(
            reason("/foo/*", ChannelUse::Publish),
            "cannot publish to a wildcard channel"
        );
        assert_eq!(
            reason("/foo/**", ChannelUse::Publish),
            "cannot publish to a wildcard channel"
        );
    }

    #[test]
    fn wildcard_misuse_rejected() {
        assert_eq!(
            reason("/foo/*/bar", ChannelUse::Subscribe),
            "wildcard is only allowed as the final segment"
        );
        assert_eq!(
            reason("/foo/ba*", ChannelUse::Subscribe),
            "'*' must make up a whole segment"
        );
        assert_eq!(
            reason("/foo/***", ChannelUse::Subscribe),
            "'*' must make up a whole segment"
        );
    }

    #[test]
    fn meta_channels_reserved() {
        assert_eq!(
            reason("/meta/connect", ChannelUse::Subscribe),
            "meta channels are reserved for the session"
        );
        assert_eq!(
            reason("/meta", ChannelUse::Publish),
            "meta channels are reserved for the session"
        );
        assert!(validate_channel("/metadata", ChannelUse::Publish).is_ok());
    }

    #[test]
    fn format_id_base36() {
        assert_eq!(format_id(0), "0");
        assert_eq!(format_id(35), "z");
        assert_eq!(format_id(36), "10");
        assert_eq!(format_id(u64::MAX), "3w5e11264sgsf");
    }

    #[test]
    fn handshake_msg_advertises_version_and_connection_type() {
        let msg = build_handshake_msg("1".to_string(), "long-polling");
        assert_eq!(msg.channel, channel::HANDSHAKE);
        assert_eq!(msg.version.as_deref(), Some("1.0"));
        assert_eq!(
            msg.supported_connection_types,
            Some(vec!["long-polling".to_string()])
        );
        assert!(msg.client_id.is_none());
    }

    #[test]
    fn subscription_msg_carries_target_and_client_id() {
        let msg = build_subscription_msg(
            channel::SUBSCRIBE,
            "7".to_string(),
            Some("client-1".to_string()),
            "/foo",
        );
        assert_eq!(msg.channel, "/meta/subscribe");
        assert_eq!(msg.subscription.as_deref(), Some("/foo"));
        assert_eq!(msg.client_id.as_deref(), Some("client-1"));
        assert_eq!(msg.id.as_deref(), Some("7"));
    }
}
