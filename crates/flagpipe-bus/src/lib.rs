//! Embedded durable publish-subscribe: the ingress queue for captured flags
//! and the fan-out channel for configuration updates.
//!
//! The Bus contract is deliberately narrow (publish + pull-consume with
//! at-least-once ack semantics) so an embedded broker can be swapped for a
//! client pointed at an external one without touching callers.

use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::consumer::{pull::Config as PullConfig, Consumer};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::{self, Context as JsContext};
use flagpipe_schemas::{ConfigShared, Flag};
use futures_util::StreamExt;
use rand::RngCore;

pub const STREAM_NAME: &str = "cookiefarm";
pub const SUBJECT_FLAGS: &str = "cookiefarm.flags";
pub const SUBJECT_CONFIG: &str = "cookiefarm.config";
pub const CONSUMER_FLAGS: &str = "flags-processor";
pub const CONSUMER_CONFIG: &str = "config-processor";
const MAX_IN_FLIGHT: i64 = 128;

/// Generates the random per-boot auth token required of every client
/// connection. Logged once at startup, never persisted.
pub fn generate_boot_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A connected handle to the message bus. Wraps the JetStream context so
/// callers never reach for the raw NATS client directly.
pub struct Bus {
    js: JsContext,
}

impl Bus {
    pub async fn connect(nats_url: &str) -> Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .with_context(|| format!("connect to bus at {nats_url}"))?;
        let js = jetstream::new(client);
        Ok(Self { js })
    }

    /// Idempotently creates the `cookiefarm` stream subscribing to
    /// `cookiefarm.>`, providing at-least-once durability for both topics.
    pub async fn ensure_stream(&self) -> Result<()> {
        self.js
            .get_or_create_stream(StreamConfig {
                name: STREAM_NAME.to_string(),
                subjects: vec![format!("{STREAM_NAME}.>")],
                ..Default::default()
            })
            .await
            .context("ensure cookiefarm stream")?;
        Ok(())
    }

    pub async fn publish_flag(&self, flag: &Flag) -> Result<()> {
        let payload = serde_json::to_vec(flag).context("serialize flag")?;
        self.js
            .publish(SUBJECT_FLAGS, payload.into())
            .await
            .context("publish flag")?
            .await
            .context("await flag publish ack")?;
        Ok(())
    }

    pub async fn publish_config(&self, config: &ConfigShared) -> Result<()> {
        let payload = serde_json::to_vec(config).context("serialize config")?;
        self.js
            .publish(SUBJECT_CONFIG, payload.into())
            .await
            .context("publish config")?
            .await
            .context("await config publish ack")?;
        Ok(())
    }

    /// Durable pull consumer for the flags topic, named `flags-processor`
    /// with a bounded in-flight window.
    pub async fn flags_consumer(&self) -> Result<Consumer<PullConfig>> {
        self.pull_consumer(SUBJECT_FLAGS, CONSUMER_FLAGS).await
    }

    /// Durable pull consumer for the config topic, named `config-processor`.
    pub async fn config_consumer(&self) -> Result<Consumer<PullConfig>> {
        self.pull_consumer(SUBJECT_CONFIG, CONSUMER_CONFIG).await
    }

    async fn pull_consumer(&self, subject: &str, durable_name: &str) -> Result<Consumer<PullConfig>> {
        let stream = self
            .js
            .get_stream(STREAM_NAME)
            .await
            .context("get cookiefarm stream")?;

        let consumer = stream
            .get_or_create_consumer(
                durable_name,
                PullConfig {
                    durable_name: Some(durable_name.to_string()),
                    filter_subject: subject.to_string(),
                    max_ack_pending: MAX_IN_FLIGHT,
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("create pull consumer {durable_name}"))?;

        Ok(consumer)
    }
}

/// One delivered flag message, still unacked. Mirrors the ack-then-process
/// pattern: the ingestion loop decides to ack or skip before touching Store.
pub struct FetchedMessage {
    msg: jetstream::Message,
    pub decoded: Option<Flag>,
}

impl FetchedMessage {
    pub async fn ack(&self) -> Result<()> {
        self.msg.ack().await.map_err(|e| anyhow::anyhow!("ack message: {e}"))
    }
}

/// Pulls up to `batch` messages from `consumer`, waiting at most `expires`
/// for the fetch to fill. Poison (non-JSON) payloads decode to `None` —
/// callers log and ack rather than stalling the consumer on one bad message.
pub async fn fetch_batch(
    consumer: &Consumer<PullConfig>,
    batch: usize,
    expires: Duration,
) -> Result<Vec<FetchedMessage>> {
    let mut messages = consumer
        .batch()
        .max_messages(batch)
        .expires(expires)
        .messages()
        .await
        .context("start pull batch")?;

    let mut out = Vec::with_capacity(batch);
    while let Some(next) = messages.next().await {
        let msg = next.map_err(|e| anyhow::anyhow!("receive message from pull batch: {e}"))?;
        let decoded = serde_json::from_slice::<Flag>(&msg.payload).ok();
        out.push(FetchedMessage { msg, decoded });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_token_is_32_bytes_hex() {
        let token = generate_boot_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn boot_tokens_are_not_constant() {
        assert_ne!(generate_boot_token(), generate_boot_token());
    }
}
