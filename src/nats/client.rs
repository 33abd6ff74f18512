//! NATS connection used by the realtime bridge

use async_nats::{Client, ConnectOptions, Event, Subscriber};
use bytes::Bytes;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::NatsArgs;
use crate::types::{ConciergeError, Result};

const PING_INTERVAL: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    name: String,
}

impl NatsClient {
    /// Connect once; there is no retry on the initial connect, but a live
    /// connection reconnects on its own
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let client_name = name.to_string();
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(PING_INTERVAL)
            .connection_timeout(CONNECT_TIMEOUT)
            .event_callback(move |event| {
                let client_name = client_name.clone();
                async move {
                    match event {
                        Event::Disconnected => warn!(client = %client_name, "NATS disconnected"),
                        Event::Connected => info!(client = %client_name, "NATS connected"),
                        other => warn!(client = %client_name, event = %other, "NATS event"),
                    }
                }
            });

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| ConciergeError::Nats(format!("connect to {}: {}", args.nats_url, e)))?;

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| ConciergeError::Nats(format!("publish on {}: {}", subject, e)))
    }

    pub async fn subscribe(&self, subject: &str) -> Result<Subscriber> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| ConciergeError::Nats(format!("subscribe to {}: {}", subject, e)))
    }

    /// Push out anything still buffered, e.g. before shutdown
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| ConciergeError::Nats(format!("flush: {}", e)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
