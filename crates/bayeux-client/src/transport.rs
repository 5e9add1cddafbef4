//! The transport seam: whatever carries Bayeux messages to and from a server.
//!
//! A transport owns framing, I/O, and keeping the `/meta/connect` cycle
//! alive once [`Transport::connect`] has succeeded. The session owns
//! everything protocol-level above it: ids, extensions, subscriptions, and
//! publish correlation.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::types::{BoxError, Message};

/// Traffic a transport pushes to the session outside of a request/reply.
#[derive(Debug)]
pub enum Inbound {
    /// Server push on a subscribed channel, or a publish response.
    Message(Message),
    /// The connection broke. The session moves to `Failed`.
    Error(BoxError),
}

/// Sender half handed to the transport at [`Transport::init`].
pub type InboundSender = mpsc::Sender<Inbound>;

/// Future returned by transport calls.
pub(crate) type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Options passed to [`Transport::init`].
pub struct TransportOptions {
    /// Where to deliver server pushes, publish responses, and connection
    /// errors. Inbound messages are processed in the order they are sent.
    pub inbound: InboundSender,
}

/// Carries Bayeux messages between the client and one server.
///
/// Calls are serialized by the session, so `&mut self` is never contended.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connection type advertised during the handshake (e.g. "websocket").
    fn name(&self) -> &str;

    /// Prepare to talk to `url`. Called exactly once, before any other call.
    async fn init(&mut self, url: &Url, options: TransportOptions) -> Result<(), BoxError>;

    /// Send `/meta/handshake` and return the server's reply.
    async fn handshake(&mut self, request: Message) -> Result<Message, BoxError>;

    /// Send the first `/meta/connect` and return the server's reply.
    async fn connect(&mut self, request: Message) -> Result<Message, BoxError>;

    /// Send `/meta/subscribe` and return the server's reply.
    async fn subscribe(&mut self, request: Message) -> Result<Message, BoxError>;

    /// Send `/meta/unsubscribe` and return the server's reply.
    async fn unsubscribe(&mut self, request: Message) -> Result<Message, BoxError>;

    /// Send an application message. Any server response arrives later as
    /// [`Inbound::Message`] carrying the same id.
    async fn publish(&mut self, message: Message) -> Result<(), BoxError>;

    /// Send `/meta/disconnect` and release all connection resources.
    async fn disconnect(&mut self, request: Message) -> Result<(), BoxError>;
}
