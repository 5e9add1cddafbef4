//! Session lifecycle: handshake, connect, steady-state dispatch, disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::correlator::{PublishCorrelator, Resolution};
use crate::extension::Extensions;
use crate::protocol::{
    self, ChannelUse, build_connect_msg, build_disconnect_msg, build_handshake_msg,
    build_subscription_msg, validate_channel,
};
use crate::registry::SubscriptionRegistry;
use crate::transport::{Inbound, Transport, TransportFuture, TransportOptions};
use crate::types::{
    BoxError, Error, ErrorHandler, Message, MessageHandler, SessionState, TimingConfig,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything guarded by the session's critical section.
///
/// The lock is never held across an `.await` or while a user handler runs.
struct Shared {
    state: SessionState,
    client_id: Option<String>,
    message_counter: u64,
    subscriptions: SubscriptionRegistry,
    pending: PublishCorrelator,
    publish_handlers: HashMap<String, MessageHandler>,
    error_handler: Option<ErrorHandler>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            client_id: None,
            message_counter: 0,
            subscriptions: SubscriptionRegistry::default(),
            pending: PublishCorrelator::default(),
            publish_handlers: HashMap::new(),
            error_handler: None,
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            tracing::info!(from = ?self.state, to = ?next, "session state changed");
            self.state = next;
        }
    }

    /// Next message id, skipping any still tracked as a pending publish.
    fn next_id(&mut self) -> String {
        loop {
            self.message_counter = self.message_counter.wrapping_add(1);
            let id = protocol::format_id(self.message_counter);
            if !self.pending.is_pending(&id) {
                return id;
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnecting | SessionState::Disconnected => {
                Err(Error::AlreadyDisconnected)
            }
            SessionState::Handshaking | SessionState::Failed => Err(Error::NotConnected),
        }
    }

    /// Error for a call cut short because the session ended underneath it.
    fn closed_error(&self) -> Error {
        match self.state {
            SessionState::Failed => Error::NotConnected,
            _ => Error::AlreadyDisconnected,
        }
    }

    /// Drop all subscriptions and pending publishes without invoking handlers.
    fn tear_down(&mut self) {
        let subscriptions = self.subscriptions.len();
        let pending = self.pending.discard_all();
        self.subscriptions.clear();
        tracing::debug!(subscriptions, pending, "session registries cleared");
    }
}

#[derive(Debug, Clone, Copy)]
enum SubscriptionOp {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionOp {
    fn name(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }

    fn meta_channel(self) -> &'static str {
        match self {
            Self::Subscribe => protocol::channel::SUBSCRIBE,
            Self::Unsubscribe => protocol::channel::UNSUBSCRIBE,
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub(crate) struct Session {
    shared: Arc<Mutex<Shared>>,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    extensions: Arc<Extensions>,
    timing: TimingConfig,
    /// Fired when the session ends (disconnect or failure). In-flight calls
    /// and the dispatch task stop on it.
    closed: CancellationToken,
}

fn establish_failed(err: Error) -> Error {
    tracing::error!(state = ?SessionState::Failed, "session establishment failed: {err}");
    err
}

impl Session {
    /// Run init → handshake → connect and start inbound dispatch.
    ///
    /// Any failure is terminal: the caller gets the error and the transport
    /// is dropped. No retry happens here.
    pub(crate) async fn establish(
        url: Url,
        mut transport: Box<dyn Transport>,
        extensions: Extensions,
        timing: TimingConfig,
    ) -> Result<Self, Error> {
        let connection_type = transport.name().to_string();
        let mut shared = Shared::new();
        shared.set_state(SessionState::Handshaking);

        let (inbound_tx, inbound_rx) = mpsc::channel(timing.inbound_capacity);
        transport
            .init(&url, TransportOptions { inbound: inbound_tx })
            .await
            .map_err(|cause| establish_failed(Error::Transport(cause)))?;
        tracing::info!(transport = %connection_type, %url, "transport initialised");

        // Handshake
        let request = extensions
            .apply_outgoing(build_handshake_msg(shared.next_id(), &connection_type))
            .map_err(establish_failed)?;
        let reply = match tokio::time::timeout(timing.request_timeout, transport.handshake(request))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(cause)) => return Err(establish_failed(Error::HandshakeFailed(cause))),
            Err(_) => {
                return Err(establish_failed(Error::Timeout {
                    operation: "handshake",
                }));
            }
        };
        let reply = extensions.apply_incoming(reply).map_err(establish_failed)?;
        if !reply.is_successful() {
            let cause = reply
                .error
                .unwrap_or_else(|| "handshake rejected by server".to_string());
            return Err(establish_failed(Error::HandshakeFailed(cause.into())));
        }
        let Some(client_id) = reply.client_id else {
            return Err(establish_failed(Error::HandshakeFailed(
                "handshake reply carried no clientId".into(),
            )));
        };
        tracing::info!(client_id = %client_id, "handshake complete");
        shared.client_id = Some(client_id);

        // Connect
        let connected = Self::initial_connect(
            transport.as_mut(),
            &mut shared,
            &extensions,
            &timing,
            &connection_type,
        )
        .await;
        if let Err(err) = connected {
            // The server holds a client session after a successful handshake;
            // release it before reporting.
            let request = build_disconnect_msg(shared.next_id(), shared.client_id.clone());
            if let Ok(request) = extensions.apply_outgoing(request) {
                let _ =
                    tokio::time::timeout(timing.disconnect_timeout, transport.disconnect(request))
                        .await;
            }
            return Err(establish_failed(err));
        }

        shared.set_state(SessionState::Connected);

        let shared = Arc::new(Mutex::new(shared));
        let extensions = Arc::new(extensions);
        let closed = CancellationToken::new();
        tokio::spawn(run_dispatch_loop(
            DispatchState {
                shared: shared.clone(),
                extensions: extensions.clone(),
                timing: timing.clone(),
                closed: closed.clone(),
            },
            inbound_rx,
        ));

        Ok(Self {
            shared,
            transport: tokio::sync::Mutex::new(transport),
            extensions,
            timing,
            closed,
        })
    }

    async fn initial_connect(
        transport: &mut dyn Transport,
        shared: &mut Shared,
        extensions: &Extensions,
        timing: &TimingConfig,
        connection_type: &str,
    ) -> Result<(), Error> {
        let request = extensions.apply_outgoing(build_connect_msg(
            shared.next_id(),
            shared.client_id.clone(),
            connection_type,
        ))?;
        let reply = match tokio::time::timeout(timing.request_timeout, transport.connect(request))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(cause)) => return Err(Error::ConnectFailed(cause)),
            Err(_) => return Err(Error::Timeout { operation: "connect" }),
        };
        let reply = extensions.apply_incoming(reply)?;
        if !reply.is_successful() {
            let cause = reply
                .error
                .unwrap_or_else(|| "connect rejected by server".to_string());
            return Err(Error::ConnectFailed(cause.into()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    pub(crate) fn state(&self) -> SessionState {
        self.lock().state
    }

    pub(crate) fn client_id(&self) -> Option<String> {
        self.lock().client_id.clone()
    }

    /// Move a connected session to `Failed` and stop everything in flight.
    fn fail(&self, reason: &str) {
        {
            let mut s = self.lock();
            if s.state != SessionState::Connected {
                return;
            }
            tracing::error!("session failed: {reason}");
            s.set_state(SessionState::Failed);
            s.tear_down();
        }
        self.closed.cancel();
    }

    /// Run one transport call under the transport lock, bounded by the
    /// request timeout and cut short if the session ends.
    async fn transport_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, Error>
    where
        F: for<'a> FnOnce(&'a mut (dyn Transport + 'static)) -> TransportFuture<'a, T>,
    {
        let mut transport = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(self.lock().closed_error()),
            guard = self.transport.lock() => guard,
        };
        self.lock().ensure_connected()?;

        let outcome = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(self.lock().closed_error()),
            outcome = tokio::time::timeout(self.timing.request_timeout, call(&mut **transport)) => outcome,
        };
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => Err(Error::Transport(cause)),
            Err(_) => {
                self.fail(&format!("{operation} timed out"));
                Err(Error::Timeout { operation })
            }
        }
    }

    /// Send a `/meta/subscribe` or `/meta/unsubscribe` for `channel` and
    /// return the (extension-processed, successful) reply.
    async fn subscription_request(
        &self,
        op: SubscriptionOp,
        channel: &str,
    ) -> Result<Message, Error> {
        let request = {
            let mut s = self.lock();
            s.ensure_connected()?;
            build_subscription_msg(op.meta_channel(), s.next_id(), s.client_id.clone(), channel)
        };
        let request = self.extensions.apply_outgoing(request)?;

        let reply = match op {
            SubscriptionOp::Subscribe => {
                self.transport_call(op.name(), |t| t.subscribe(request))
                    .await?
            }
            SubscriptionOp::Unsubscribe => {
                self.transport_call(op.name(), |t| t.unsubscribe(request))
                    .await?
            }
        };

        let reply = self.extensions.apply_incoming(reply)?;
        if !reply.is_successful() {
            return Err(Error::Rejected {
                channel: channel.to_string(),
                error: reply.error,
            });
        }
        Ok(reply)
    }

    pub(crate) async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<(), Error> {
        validate_channel(channel, ChannelUse::Subscribe)?;
        self.subscription_request(SubscriptionOp::Subscribe, channel)
            .await?;

        let mut s = self.lock();
        // A disconnect may have raced the reply.
        s.ensure_connected()?;
        if s.subscriptions.register(channel, handler) {
            tracing::info!(%channel, "subscription handler replaced");
        } else {
            tracing::info!(%channel, "subscribed");
        }
        Ok(())
    }

    pub(crate) async fn unsubscribe(&self, channel: &str) -> Result<(), Error> {
        validate_channel(channel, ChannelUse::Subscribe)?;
        {
            let s = self.lock();
            s.ensure_connected()?;
            if !s.subscriptions.contains(channel) {
                tracing::debug!(%channel, "not subscribed, nothing to do");
                return Ok(());
            }
        }
        self.subscription_request(SubscriptionOp::Unsubscribe, channel)
            .await?;

        let mut s = self.lock();
        s.ensure_connected()?;
        s.subscriptions.remove(channel);
        tracing::info!(%channel, "unsubscribed");
        Ok(())
    }

    /// Send `data` to `channel` and return the message id.
    ///
    /// Does not wait for the server's acknowledgment; that goes to the
    /// channel's publish response handler, if the server sends one.
    pub(crate) async fn publish(&self, channel: &str, data: serde_json::Value) -> Result<String, Error> {
        validate_channel(channel, ChannelUse::Publish)?;
        let (message, handler) = {
            let mut s = self.lock();
            s.ensure_connected()?;
            let message = Message {
                channel: channel.to_string(),
                data: Some(data),
                id: Some(s.next_id()),
                client_id: s.client_id.clone(),
                ..Default::default()
            };
            (message, s.publish_handlers.get(channel).cloned())
        };

        let message = self.extensions.apply_outgoing(message)?;
        let Some(id) = message.id.clone() else {
            return Err(Error::Extension {
                extension: "outgoing pipeline".to_string(),
                cause: "publish message lost its id".into(),
            });
        };

        {
            let mut s = self.lock();
            s.ensure_connected()?;
            s.pending.track(id.clone(), &message.channel, handler);
        }

        if let Err(err) = self.transport_call("publish", |t| t.publish(message)).await {
            self.lock().pending.discard(&id);
            return Err(err);
        }
        tracing::debug!(%channel, %id, "published");
        Ok(id)
    }

    pub(crate) fn on_publish_response(&self, channel: &str, handler: MessageHandler) {
        self.lock()
            .publish_handlers
            .insert(channel.to_string(), handler);
    }

    pub(crate) fn on_transport_error(&self, handler: ErrorHandler) {
        self.lock().error_handler = Some(handler);
    }

    /// Hard cutoff: nothing pending is delivered after this returns.
    pub(crate) async fn disconnect(&self) -> Result<(), Error> {
        let (prior, request) = {
            let mut s = self.lock();
            let prior = s.state;
            if matches!(
                prior,
                SessionState::Disconnecting | SessionState::Disconnected
            ) {
                return Err(Error::AlreadyDisconnected);
            }
            s.set_state(SessionState::Disconnecting);
            s.tear_down();
            (prior, build_disconnect_msg(s.next_id(), s.client_id.clone()))
        };
        self.closed.cancel();

        // The transport is closed even if an extension rejects the request.
        let (request, ext_result) = match self.extensions.apply_outgoing(request.clone()) {
            Ok(processed) => (processed, Ok(())),
            Err(err) => (request, Err(err)),
        };
        let transport_result = {
            let mut transport = self.transport.lock().await;
            match tokio::time::timeout(self.timing.disconnect_timeout, transport.disconnect(request))
                .await
            {
                Ok(result) => result.map_err(Error::Transport),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.timing.disconnect_timeout.as_millis() as u64,
                        "transport disconnect timed out, closing anyway"
                    );
                    Ok(())
                }
            }
        };

        self.lock().set_state(SessionState::Disconnected);

        if prior == SessionState::Failed {
            return Err(Error::NotConnected);
        }
        ext_result?;
        transport_result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

// ---------------------------------------------------------------------------
// Inbound dispatch
// ---------------------------------------------------------------------------

struct DispatchState {
    shared: Arc<Mutex<Shared>>,
    extensions: Arc<Extensions>,
    timing: TimingConfig,
    closed: CancellationToken,
}

async fn run_dispatch_loop(p: DispatchState, mut inbound_rx: mpsc::Receiver<Inbound>) {
    let mut sweep = tokio::time::interval(p.timing.sweep_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    sweep.tick().await;

    loop {
        tokio::select! {
            biased;

            () = p.closed.cancelled() => {
                tracing::debug!("dispatch loop stopped");
                return;
            }

            inbound = inbound_rx.recv() => {
                match inbound {
                    Some(Inbound::Message(message)) => dispatch_message(&p, message),
                    Some(Inbound::Error(cause)) => handle_transport_error(&p, cause),
                    None => {
                        handle_transport_error(&p, "transport closed its inbound channel".into());
                        return;
                    }
                }
            }

            _ = sweep.tick() => {
                let (expired, remaining) = {
                    let mut s = lock(&p.shared);
                    let expired = s.pending.discard_expired(p.timing.pending_publish_ttl);
                    (expired, s.pending.len())
                };
                if expired > 0 {
                    tracing::debug!(expired, remaining, "discarded unanswered publishes");
                }
            }
        }
    }
}

/// Route one inbound message: publish correlation (id and channel) first, then
/// subscription lookup by channel.
fn dispatch_message(p: &DispatchState, message: Message) {
    let message = match p.extensions.apply_incoming(message) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!("dropping inbound message: {err}");
            report_error(p, &err);
            return;
        }
    };

    let handler = {
        let mut s = lock(&p.shared);
        if s.state != SessionState::Connected {
            tracing::debug!(channel = %message.channel, "session not connected, dropping inbound message");
            return;
        }
        match s.pending.resolve(&message) {
            Resolution::Matched(handler) => {
                tracing::debug!(
                    channel = %message.channel,
                    id = ?message.id,
                    successful = ?message.successful,
                    "publish response"
                );
                handler
            }
            Resolution::Unmatched => {
                let handler = s.subscriptions.dispatch(&message);
                if handler.is_none() {
                    tracing::trace!(channel = %message.channel, "no subscription for channel");
                }
                handler
            }
        }
    };

    if let Some(handler) = handler {
        handler(&message);
    }
}

fn report_error(p: &DispatchState, err: &Error) {
    let handler = lock(&p.shared).error_handler.clone();
    if let Some(handler) = handler {
        handler(err);
    }
}

fn handle_transport_error(p: &DispatchState, cause: BoxError) {
    let handler = {
        let mut s = lock(&p.shared);
        if s.state != SessionState::Connected {
            tracing::debug!(state = ?s.state, "ignoring transport error after session ended: {cause}");
            return;
        }
        tracing::error!("transport error: {cause}");
        s.set_state(SessionState::Failed);
        s.tear_down();
        s.error_handler.clone()
    };
    p.closed.cancel();

    if let Some(handler) = handler {
        handler(&Error::Transport(cause));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_id_is_monotonic_and_skips_pending() {
        let mut s = Shared::new();
        assert_eq!(s.next_id(), "1");
        s.pending.track("2".to_string(), "/a", None);
        assert_eq!(s.next_id(), "3");
    }

    #[test]
    fn ensure_connected_maps_states_to_errors() {
        let mut s = Shared::new();
        s.state = SessionState::Connected;
        assert!(s.ensure_connected().is_ok());

        s.state = SessionState::Failed;
        assert!(matches!(s.ensure_connected(), Err(Error::NotConnected)));

        s.state = SessionState::Disconnecting;
        assert!(matches!(s.ensure_connected(), Err(Error::AlreadyDisconnected)));

        s.state = SessionState::Disconnected;
        assert!(matches!(s.ensure_connected(), Err(Error::AlreadyDisconnected)));
    }

    #[test]
    fn closed_error_depends_on_how_session_ended() {
        let mut s = Shared::new();
        s.state = SessionState::Failed;
        assert!(matches!(s.closed_error(), Error::NotConnected));
        s.state = SessionState::Disconnecting;
        assert!(matches!(s.closed_error(), Error::AlreadyDisconnected));
    }

    #[test]
    fn tear_down_empties_registries() {
        let mut s = Shared::new();
        s.subscriptions.register("/a", Arc::new(|_msg: &Message| {}));
        s.pending.track("1".to_string(), "/a", None);
        s.tear_down();
        assert_eq!(s.subscriptions.len(), 0);
        assert_eq!(s.pending.len(), 0);
    }
}
