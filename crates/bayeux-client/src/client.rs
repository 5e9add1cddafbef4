//! Public entry point: [`connect`], [`Client`], and [`Subscription`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use url::Url;

use crate::extension::{Extension, Extensions};
use crate::session::Session;
use crate::transport::Transport;
use crate::types::{Error, Message, MessageHandler, SessionState, TimingConfig};

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Options for [`connect`].
///
/// Extension options append to their chain; the order options are applied
/// in is the order extensions run in.
#[derive(Default)]
pub struct ClientOptions {
    transport: Option<Box<dyn Transport>>,
    extensions: Extensions,
    timing: TimingConfig,
}

impl ClientOptions {
    /// Empty options: no transport, no extensions, default timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport used to reach the server. Required.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Append one incoming and one outgoing extension.
    pub fn with_extension(
        mut self,
        incoming: impl Extension + 'static,
        outgoing: impl Extension + 'static,
    ) -> Self {
        self.extensions.push_incoming(Arc::new(incoming));
        self.extensions.push_outgoing(Arc::new(outgoing));
        self
    }

    /// Append an extension to the incoming chain.
    pub fn with_in_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push_incoming(Arc::new(extension));
        self
    }

    /// Append an extension to the outgoing chain.
    pub fn with_out_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push_outgoing(Arc::new(extension));
        self
    }

    /// Replace the timeouts and channel capacities. Checked by [`connect`].
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }
}

/// Handle to a channel subscription created by [`Client::subscribe`].
///
/// Messages may be dropped under backpressure if the consumer falls behind.
/// The stream ends when the channel is unsubscribed, re-subscribed, or the
/// session ends.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    /// Channel this subscription was created for.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next message pushed to this channel.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// A connected Bayeux client.
///
/// Cheap to clone; all clones share one session. Every method may be
/// called concurrently.
#[derive(Clone)]
pub struct Client {
    session: Arc<Session>,
    subscription_capacity: usize,
}

/// Connect to the Bayeux server at `url`.
///
/// Initialises the transport, performs the handshake and the first connect,
/// and returns once the session is established. A failure at any step is
/// returned as-is; nothing is retried.
pub async fn connect(url: &str, options: ClientOptions) -> Result<Client, Error> {
    let url = Url::parse(url)?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(Error::UnsupportedScheme(url.scheme().to_string()));
    }
    let transport = options.transport.ok_or(Error::NoTransport)?;
    options.timing.validate()?;
    let subscription_capacity = options.timing.subscription_capacity;
    let session = Session::establish(url, transport, options.extensions, options.timing).await?;
    Ok(Client {
        session: Arc::new(session),
        subscription_capacity,
    })
}

impl Client {
    /// Subscribe to `channel` and receive its messages as a stream.
    ///
    /// Subscribing to a channel that already has a subscription replaces it;
    /// the previous [`Subscription`] stream ends.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, Error> {
        let (tx, rx) = mpsc::channel(self.subscription_capacity);
        let dropped = AtomicU64::new(0);
        let handler: MessageHandler = Arc::new(move |message: &Message| {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(m)) => {
                    let total_dropped = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        channel = %m.channel,
                        total_dropped,
                        "subscription stream full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(m)) => {
                    tracing::debug!(channel = %m.channel, "subscription stream closed");
                }
            }
        });
        self.session.subscribe(channel, handler).await?;
        Ok(Subscription {
            channel: channel.to_string(),
            rx,
        })
    }

    /// Subscribe to `channel` with a callback.
    ///
    /// The callback runs on the session's dispatch task and must not block.
    pub async fn subscribe_with<F>(&self, channel: &str, handler: F) -> Result<(), Error>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.session.subscribe(channel, Arc::new(handler)).await
    }

    /// Unsubscribe from `channel`. A no-op if it is not subscribed.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), Error> {
        self.session.unsubscribe(channel).await
    }

    /// Publish `data` to `channel`, returning the message id.
    ///
    /// The server MAY acknowledge a publish. Register a handler with
    /// [`on_publish_response`](Self::on_publish_response) to observe it; it
    /// runs at most once per publish and never after [`disconnect`](Self::disconnect).
    pub async fn publish(&self, channel: &str, data: serde_json::Value) -> Result<String, Error> {
        self.session.publish(channel, data).await
    }

    /// Set the handler for server responses to publishes on `channel`.
    ///
    /// Applies to publishes made after this call.
    pub fn on_publish_response<F>(&self, channel: &str, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.session.on_publish_response(channel, Arc::new(handler));
    }

    /// Set the handler for errors that have no caller to return to:
    /// connection drops and inbound messages rejected by an extension.
    pub fn on_transport_error<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.session.on_transport_error(Arc::new(handler));
    }

    /// Close the session. Subscriptions and pending publishes are dropped
    /// without notification, and every later call fails.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.session.disconnect().await
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Client id assigned by the server during the handshake.
    pub fn client_id(&self) -> Option<String> {
        self.session.client_id()
    }
}
