//! Bayeux (Faye) publish/subscribe client.
//!
//! Implements the protocol orchestration layer of a Bayeux client over a
//! pluggable [`Transport`]:
//!
//! # Features
//! - Handshake / connect / disconnect lifecycle with a single shared session
//! - Ordered incoming and outgoing [`Extension`] pipelines
//! - Channel subscriptions as callbacks or async streams
//! - Publish acknowledgments correlated by message id, delivered at most once
//! - Asynchronous transport errors reported through a registered handler
//!
//! The crate ships no wire transport; implement [`Transport`] for the
//! connection type your server speaks.
//!
//! # Example
//! ```no_run
//! # async fn example(transport: impl bayeux_client::Transport + 'static) -> Result<(), bayeux_client::Error> {
//! use bayeux_client::{ClientOptions, extension};
//!
//! let options = ClientOptions::new()
//!     .with_transport(transport)
//!     .with_out_extension(extension::from_fn("auth", |mut msg| {
//!         msg.ext
//!             .get_or_insert_with(Default::default)
//!             .insert("token".into(), "secret".into());
//!         Ok(msg)
//!     }));
//!
//! let client = bayeux_client::connect("https://example.com/faye", options).await?;
//! client.on_publish_response("/chat", |reply| println!("ack: {:?}", reply.successful));
//!
//! let mut sub = client.subscribe("/chat").await?;
//! client.publish("/chat", serde_json::json!({"text": "hi"})).await?;
//! while let Some(msg) = sub.next().await {
//!     println!("got: {:?}", msg.data);
//! }
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod correlator;
pub mod extension;
pub mod protocol;
mod registry;
mod session;
mod transport;
mod types;

pub use client::{Client, ClientOptions, Subscription, connect};
pub use extension::Extension;
pub use transport::{Inbound, InboundSender, Transport, TransportOptions};
pub use types::{
    BoxError, Error, ErrorHandler, Message, MessageHandler, SessionState, TimingConfig,
};
