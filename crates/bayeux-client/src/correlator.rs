//! In-flight publishes keyed by message id.
//!
//! Bayeux servers MAY answer a publish, so an entry can live until the
//! session ends or it expires. A response resolves its entry at most once.
//!
//! Ids are only unique per client, and messages other clients publish are
//! forwarded with their own ids. A response therefore has to come back on
//! the publish channel and carry no `data` to match.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{Message, MessageHandler};

struct PendingPublish {
    channel: String,
    handler: Option<MessageHandler>,
    created_at: Instant,
}

/// Outcome of matching an inbound message against pending publishes.
pub(crate) enum Resolution {
    /// Not a publish response; continue with channel dispatch.
    Unmatched,
    /// A publish response. The handler (if one was registered) must be
    /// invoked exactly once by the caller.
    Matched(Option<MessageHandler>),
}

#[derive(Default)]
pub(crate) struct PublishCorrelator {
    pending: HashMap<String, PendingPublish>,
}

impl PublishCorrelator {
    pub(crate) fn track(&mut self, id: String, channel: &str, handler: Option<MessageHandler>) {
        self.pending.insert(
            id,
            PendingPublish {
                channel: channel.to_string(),
                handler,
                created_at: Instant::now(),
            },
        );
    }

    pub(crate) fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Remove the entry answered by `message`, handing back its handler.
    pub(crate) fn resolve(&mut self, message: &Message) -> Resolution {
        let Some(id) = message.id.as_deref() else {
            return Resolution::Unmatched;
        };
        if message.data.is_some() {
            return Resolution::Unmatched;
        }
        match self.pending.get(id) {
            Some(entry) if entry.channel == message.channel => {}
            _ => return Resolution::Unmatched,
        }
        match self.pending.remove(id) {
            Some(entry) => Resolution::Matched(entry.handler),
            None => Resolution::Unmatched,
        }
    }

    /// Drop a single entry without invoking its handler.
    pub(crate) fn discard(&mut self, id: &str) {
        self.pending.remove(id);
    }

    /// Drop entries older than `ttl` without invoking their handlers.
    /// Returns the number discarded.
    pub(crate) fn discard_expired(&mut self, ttl: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, entry| entry.created_at.elapsed() < ttl);
        before - self.pending.len()
    }

    /// Drop every entry without invoking handlers. Returns the number discarded.
    pub(crate) fn discard_all(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
