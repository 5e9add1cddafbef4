//! Extension pipeline applied to every message entering or leaving the client.

use std::sync::Arc;

use crate::types::{BoxError, Error, Message};

/// A named message transform.
///
/// Outgoing extensions see every message before the transport does (meta
/// requests included); incoming extensions see every message the transport
/// delivers before it is dispatched. Returning an error aborts the chain.
pub trait Extension: Send + Sync {
    /// Name reported in [`Error::Extension`] when this extension fails.
    fn name(&self) -> &str;

    /// Transform `message`, or fail to abort the chain.
    fn process(&self, message: Message) -> Result<Message, BoxError>;

    /// Whether this extension is allowed to change `channel` or `id`.
    ///
    /// Those two fields drive routing and publish correlation, so by default
    /// an extension that alters them fails the pipeline.
    fn rewrites_routing(&self) -> bool {
        false
    }
}

/// Extension backed by a closure. Built with [`from_fn`].
pub struct FnExtension<F> {
    name: String,
    f: F,
}

impl<F> Extension for FnExtension<F>
where
    F: Fn(Message) -> Result<Message, BoxError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, message: Message) -> Result<Message, BoxError> {
        (self.f)(message)
    }
}

/// Wrap a closure as an [`Extension`].
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnExtension<F>
where
    F: Fn(Message) -> Result<Message, BoxError> + Send + Sync,
{
    FnExtension {
        name: name.into(),
        f,
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Incoming,
    Outgoing,
}

/// Ordered incoming and outgoing extension chains.
#[derive(Clone, Default)]
pub(crate) struct Extensions {
    incoming: Vec<Arc<dyn Extension>>,
    outgoing: Vec<Arc<dyn Extension>>,
}

impl Extensions {
    pub(crate) fn push_incoming(&mut self, ext: Arc<dyn Extension>) {
        self.incoming.push(ext);
    }

    pub(crate) fn push_outgoing(&mut self, ext: Arc<dyn Extension>) {
        self.outgoing.push(ext);
    }

    pub(crate) fn apply_outgoing(&self, message: Message) -> Result<Message, Error> {
        apply(&self.outgoing, Direction::Outgoing, message)
    }

    pub(crate) fn apply_incoming(&self, message: Message) -> Result<Message, Error> {
        apply(&self.incoming, Direction::Incoming, message)
    }
}

fn apply(
    chain: &[Arc<dyn Extension>],
    direction: Direction,
    mut message: Message,
) -> Result<Message, Error> {
    for ext in chain {
        let channel = message.channel.clone();
        let id = message.id.clone();

        message = ext.process(message).map_err(|cause| {
            tracing::debug!(extension = ext.name(), ?direction, %channel, "extension failed: {cause}");
            Error::Extension {
                extension: ext.name().to_string(),
                cause,
            }
        })?;

        if !ext.rewrites_routing() && (message.channel != channel || message.id != id) {
            return Err(Error::Extension {
                extension: ext.name().to_string(),
                cause: format!(
                    "extension changed routing fields (channel {channel:?} -> {:?}, id {id:?} -> {:?})",
                    message.channel, message.id
                )
                .into(),
            });
        }
    }
    Ok(message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &'static str) -> Arc<dyn Extension> {
        Arc::new(from_fn(name, move |mut msg: Message| {
            let ext = msg.ext.get_or_insert_with(serde_json::Map::new);
            let trail = ext
                .entry("trail")
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let serde_json::Value::Array(items) = trail {
                items.push(serde_json::Value::String(name.to_string()));
            }
            Ok(msg)
        }))
    }

    fn trail(msg: &Message) -> Vec<String> {
        msg.ext
            .as_ref()
            .and_then(|e| e.get("trail"))
            .and_then(|t| t.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    struct Rerouter;

    impl Extension for Rerouter {
        fn name(&self) -> &str {
            "rerouter"
        }

        fn process(&self, mut message: Message) -> Result<Message, BoxError> {
            message.channel = "/rerouted".to_string();
            Ok(message)
        }

        fn rewrites_routing(&self) -> bool {
            true
        }
    }

    #[test]
    fn outgoing_runs_in_registration_order() {
        let mut exts = Extensions::default();
        exts.push_outgoing(tag("a"));
        exts.push_outgoing(tag("b"));
        exts.push_incoming(tag("in"));

        let out = exts.apply_outgoing(Message::new("/foo")).unwrap();
        assert_eq!(trail(&out), vec!["a", "b"]);
    }

    #[test]
    fn incoming_runs_in_registration_order() {
        let mut exts = Extensions::default();
        exts.push_incoming(tag("x"));
        exts.push_incoming(tag("y"));
        exts.push_incoming(tag("z"));

        let out = exts.apply_incoming(Message::new("/foo")).unwrap();
        assert_eq!(trail(&out), vec!["x", "y", "z"]);
    }

    #[test]
    fn empty_chain_passes_message_through() {
        let exts = Extensions::default();
        let msg = Message::with_data("/foo", serde_json::json!({"n": 1}));
        assert_eq!(exts.apply_outgoing(msg.clone()).unwrap(), msg);
    }

    #[test]
    fn failure_aborts_chain_and_names_extension() {
        let mut exts = Extensions::default();
        exts.push_outgoing(tag("a"));
        exts.push_outgoing(Arc::new(from_fn("auth", |_msg: Message| {
            Err("missing token".into())
        })));
        exts.push_outgoing(Arc::new(from_fn("never", |_msg: Message| {
            panic!("extension after a failure must not run")
        })));

        let err = exts.apply_outgoing(Message::new("/foo")).unwrap_err();
        match err {
            Error::Extension { extension, cause } => {
                assert_eq!(extension, "auth");
                assert_eq!(cause.to_string(), "missing token");
            }
            other => panic!("expected Extension error, got {other:?}"),
        }
    }

    #[test]
    fn changing_channel_without_opt_in_fails() {
        let mut exts = Extensions::default();
        exts.push_incoming(Arc::new(from_fn("sneaky", |mut msg: Message| {
            msg.id = Some("other".to_string());
            Ok(msg)
        })));

        let mut msg = Message::new("/foo");
        msg.id = Some("1".to_string());
        let err = exts.apply_incoming(msg).unwrap_err();
        assert!(matches!(err, Error::Extension { ref extension, .. } if extension == "sneaky"));
    }

    #[test]
    fn declared_rerouting_is_allowed() {
        let mut exts = Extensions::default();
        exts.push_outgoing(Arc::new(Rerouter));

        let out = exts.apply_outgoing(Message::new("/foo")).unwrap();
        assert_eq!(out.channel, "/rerouted");
    }
}
