//! Drive a full client session against an in-process loopback server.
//!
//! ```sh
//! RUST_LOG=bayeux_client=debug cargo run -p bayeux-client --example loopback
//! ```
//!
//! The loopback transport acknowledges every publish and echoes it to
//! subscribers of the same channel, so the output shows both halves of the
//! publish path.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bayeux_client::{
    BoxError, ClientOptions, Inbound, InboundSender, Message, Transport, TransportOptions,
    extension,
};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Default)]
struct Loopback {
    inbound: Option<InboundSender>,
    subscriptions: HashSet<String>,
    server_seq: u64,
}

impl Loopback {
    fn reply(request: &Message) -> Message {
        Message {
            channel: request.channel.clone(),
            id: request.id.clone(),
            client_id: Some("loopback-client".to_string()),
            subscription: request.subscription.clone(),
            successful: Some(true),
            ..Default::default()
        }
    }

    async fn push(&self, message: Message) -> Result<(), BoxError> {
        let inbound = self.inbound.as_ref().ok_or("loopback not initialised")?;
        inbound
            .send(Inbound::Message(message))
            .await
            .map_err(|_| "client stopped listening")?;
        Ok(())
    }
}

#[async_trait]
impl Transport for Loopback {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn init(&mut self, url: &Url, options: TransportOptions) -> Result<(), BoxError> {
        eprintln!("[loopback] serving {url}");
        self.inbound = Some(options.inbound);
        Ok(())
    }

    async fn handshake(&mut self, request: Message) -> Result<Message, BoxError> {
        Ok(Self::reply(&request))
    }

    async fn connect(&mut self, request: Message) -> Result<Message, BoxError> {
        Ok(Self::reply(&request))
    }

    async fn subscribe(&mut self, request: Message) -> Result<Message, BoxError> {
        if let Some(channel) = &request.subscription {
            self.subscriptions.insert(channel.clone());
        }
        Ok(Self::reply(&request))
    }

    async fn unsubscribe(&mut self, request: Message) -> Result<Message, BoxError> {
        if let Some(channel) = &request.subscription {
            self.subscriptions.remove(channel);
        }
        Ok(Self::reply(&request))
    }

    async fn publish(&mut self, message: Message) -> Result<(), BoxError> {
        self.push(Message {
            channel: message.channel.clone(),
            id: message.id.clone(),
            successful: Some(true),
            ..Default::default()
        })
        .await?;

        if self.subscriptions.contains(&message.channel) {
            self.server_seq += 1;
            self.push(Message {
                id: Some(format!("srv-{}", self.server_seq)),
                client_id: None,
                ..message
            })
            .await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self, _request: Message) -> Result<(), BoxError> {
        self.subscriptions.clear();
        self.inbound = None;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let options = ClientOptions::new()
        .with_transport(Loopback::default())
        .with_out_extension(extension::from_fn("sender-tag", |mut msg: Message| {
            msg.ext
                .get_or_insert_with(Default::default)
                .insert("sender".into(), "loopback-example".into());
            Ok(msg)
        }));

    let client = bayeux_client::connect("http://localhost/faye", options).await?;
    eprintln!(
        "[connected] client_id={}",
        client.client_id().as_deref().unwrap_or("-")
    );

    client.on_publish_response("/chat/demo", |reply| {
        eprintln!(
            "[ack] id={} successful={}",
            reply.id.as_deref().unwrap_or("-"),
            reply.is_successful()
        );
    });
    let mut sub = client.subscribe("/chat/demo").await?;

    for n in 1..=3 {
        let id = client
            .publish("/chat/demo", serde_json::json!({ "text": "hello", "n": n }))
            .await?;
        eprintln!("[publish] id={id}");
    }

    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(1), sub.next()).await {
            Ok(Some(msg)) => println!("{}", msg.data.unwrap_or_default()),
            Ok(None) | Err(_) => break,
        }
    }

    client.disconnect().await?;
    eprintln!("[disconnected] state={:?}", client.state());
    Ok(())
}
