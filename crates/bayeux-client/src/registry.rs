//! Active channel subscriptions keyed by exact channel name.

use std::collections::HashMap;

use crate::types::{Message, MessageHandler};

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    handlers: HashMap<String, MessageHandler>,
}

impl SubscriptionRegistry {
    /// Insert or replace the handler for `channel`. Returns `true` if a
    /// previous registration was replaced.
    pub(crate) fn register(&mut self, channel: &str, handler: MessageHandler) -> bool {
        self.handlers.insert(channel.to_string(), handler).is_some()
    }

    pub(crate) fn remove(&mut self, channel: &str) -> bool {
        self.handlers.remove(channel).is_some()
    }

    pub(crate) fn contains(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }

    /// Handler registered for the message's channel, if any.
    ///
    /// Returned as a clone so the caller can invoke it after releasing the
    /// session lock. Matching is exact; wildcard expansion is left to
    /// extensions.
    pub(crate) fn dispatch(&self, message: &Message) -> Option<MessageHandler> {
        self.handlers.get(&message.channel).cloned()
    }

    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }
}
