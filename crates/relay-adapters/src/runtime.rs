// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter runtimes: a tagged variant over the capability set.
//!
//! Each variant carries its parsed config as data. Capabilities are
//! explicit: every runtime can start, stop, and probe; only webhook-capable
//! runtimes accept raw inbound bytes from the HTTP edge.

use crate::manifest::{self, CLAUDE_CODE, TELEGRAM, WEBHOOK};
use crate::signing;
use crate::{AdapterError, StatusCell};
use relay_bus::SubscriptionGuard;
use relay_core::adapter::{AdapterConfigRecord, AdapterManifest, AdapterState};
use relay_core::{Envelope, PublishReceipt};
use relay_engine::{PublishRequest, RelayEngine};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// What a running adapter needs from its host.
#[derive(Clone)]
pub struct AdapterContext {
    /// Engine handle for publishing inbound envelopes.
    pub engine: RelayEngine,
    /// Instance id this runtime is bound to.
    pub instance_id: String,
    /// Shared live-status cell maintained by the manager.
    pub status: Arc<StatusCell>,
}

// ---------------------------------------------------------------------------
// Typed configs
// ---------------------------------------------------------------------------

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_signature_header() -> String {
    "x-relay-signature".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ClaudeCodeConfig {
    #[serde(default)]
    agent_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramConfig {
    token: String,
    chat_id: String,
    #[serde(default = "default_api_base")]
    api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WebhookConfig {
    secret: String,
    #[serde(default)]
    forward_url: Option<String>,
    #[serde(default)]
    sign_outbound: bool,
    #[serde(default = "default_signature_header")]
    signature_header: String,
}

// ---------------------------------------------------------------------------
// Runtime variants
// ---------------------------------------------------------------------------

/// Internal bridge to the local agent host.
pub struct ClaudeCodeAdapter {
    config: ClaudeCodeConfig,
}

/// Telegram bot channel.
pub struct TelegramAdapter {
    config: Arc<TelegramConfig>,
    client: reqwest::Client,
}

/// Generic HMAC-signed webhook channel.
pub struct WebhookAdapter {
    config: Arc<WebhookConfig>,
    client: reqwest::Client,
}

/// A configured adapter instance, tagged by type.
pub enum AdapterRuntime {
    /// Internal agent bridge.
    ClaudeCode(ClaudeCodeAdapter),
    /// Telegram bot channel.
    Telegram(TelegramAdapter),
    /// HMAC-signed webhook channel.
    Webhook(WebhookAdapter),
}

impl AdapterRuntime {
    /// Build a runtime from a validated config record.
    pub fn build(record: &AdapterConfigRecord) -> Result<Self, AdapterError> {
        let parse_err = |e: serde_json::Error| AdapterError::ConfigInvalid {
            reasons: vec![e.to_string()],
        };
        match record.adapter_type.as_str() {
            CLAUDE_CODE => Ok(Self::ClaudeCode(ClaudeCodeAdapter {
                config: serde_json::from_value(record.config.clone()).map_err(parse_err)?,
            })),
            TELEGRAM => Ok(Self::Telegram(TelegramAdapter {
                config: Arc::new(
                    serde_json::from_value(record.config.clone()).map_err(parse_err)?,
                ),
                client: reqwest::Client::new(),
            })),
            WEBHOOK => Ok(Self::Webhook(WebhookAdapter {
                config: Arc::new(
                    serde_json::from_value(record.config.clone()).map_err(parse_err)?,
                ),
                client: reqwest::Client::new(),
            })),
            other => Err(AdapterError::UnknownType(other.to_string())),
        }
    }

    /// The manifest for this runtime's type.
    pub fn manifest(&self) -> AdapterManifest {
        let adapter_type = match self {
            Self::ClaudeCode(_) => CLAUDE_CODE,
            Self::Telegram(_) => TELEGRAM,
            Self::Webhook(_) => WEBHOOK,
        };
        manifest::manifest_for(adapter_type).expect("builtin manifest present")
    }

    /// Whether this runtime accepts raw inbound bytes from the edge.
    pub fn webhook_capable(&self) -> bool {
        matches!(self, Self::Webhook(_))
    }

    /// Subject external input is published under for this instance.
    pub fn inbound_subject(&self, instance_id: &str) -> Option<String> {
        match self {
            Self::ClaudeCode(_) => None,
            Self::Telegram(_) => Some(format!("relay.telegram.{instance_id}.in")),
            Self::Webhook(_) => Some(format!("relay.webhook.{instance_id}.in")),
        }
    }

    /// Subject this instance subscribes to for outbound sends.
    pub fn outbound_subject(&self, instance_id: &str) -> Option<String> {
        match self {
            Self::ClaudeCode(_) => Some("relay.human.console.>".into()),
            Self::Telegram(_) => Some(format!("relay.telegram.{instance_id}.out")),
            Self::Webhook(w) => w
                .config
                .forward_url
                .as_ref()
                .map(|_| format!("relay.webhook.{instance_id}.out")),
        }
    }

    /// Start the runtime: register the outbound endpoint and attach the
    /// outbound handler to the bus. Returns guards the host must keep alive.
    pub async fn start(&self, ctx: &AdapterContext) -> anyhow::Result<Vec<SubscriptionGuard>> {
        ctx.status.set_state(AdapterState::Starting);
        if let Self::ClaudeCode(cc) = self
            && let Some(dir) = &cc.config.agent_dir
        {
            debug!(agent_dir = %dir, "agent bridge configured");
        }
        // A channel that cannot be probed must not claim to be connected.
        self.probe().await?;

        let mut guards = Vec::new();
        if let Some(out_subject) = self.outbound_subject(&ctx.instance_id) {
            ctx.engine
                .endpoints()
                .register(&out_subject, Some(&ctx.instance_id))?;
            let handler = self.outbound_handler(ctx);
            let guard = ctx
                .engine
                .bus()
                .subscribe(&out_subject, &out_subject, handler)?;
            guards.push(guard);
        }

        ctx.status.set_state(AdapterState::Connected);
        info!(adapter = %ctx.instance_id, "adapter connected");
        Ok(guards)
    }

    /// Stop the runtime. Subscription guards are dropped by the host; this
    /// only flips the state.
    pub async fn stop(&self, ctx: &AdapterContext) {
        ctx.status.set_state(AdapterState::Stopping);
        ctx.status.set_state(AdapterState::Disconnected);
        debug!(adapter = %ctx.instance_id, "adapter stopped");
    }

    /// Exercise the adapter's connectivity without persisting anything.
    pub async fn probe(&self) -> anyhow::Result<()> {
        match self {
            Self::ClaudeCode(_) => Ok(()),
            Self::Telegram(t) => {
                let url = format!("{}/bot{}/getMe", t.config.api_base, t.config.token);
                let resp = t.client.get(&url).send().await?;
                if !resp.status().is_success() {
                    anyhow::bail!("telegram getMe returned {}", resp.status());
                }
                Ok(())
            }
            Self::Webhook(w) => {
                if w.config.secret.is_empty() {
                    anyhow::bail!("webhook secret must not be empty");
                }
                Ok(())
            }
        }
    }

    /// Accept raw bytes from the edge, authenticate, and publish the
    /// corresponding inbound envelope.
    pub async fn handle_inbound(
        &self,
        ctx: &AdapterContext,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<PublishReceipt, AdapterError> {
        let Self::Webhook(w) = self else {
            return Err(AdapterError::NotFound(format!(
                "adapter '{}' does not accept webhooks",
                ctx.instance_id
            )));
        };

        let Some(signature) = signature else {
            return Err(AdapterError::Unauthorized);
        };
        if !signing::verify(&w.config.secret, body, signature) {
            ctx.status.record_error("webhook signature mismatch");
            return Err(AdapterError::Unauthorized);
        }

        let payload = match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => value,
            Err(_) => serde_json::json!({ "raw": String::from_utf8_lossy(body) }),
        };

        let subject = self
            .inbound_subject(&ctx.instance_id)
            .expect("webhook runtimes always have an inbound subject");
        let from = format!("relay.webhook.{}.ext", ctx.instance_id);
        let receipt = ctx
            .engine
            .publish(PublishRequest::new(subject, from, payload))
            .await
            .map_err(AdapterError::Publish)?;
        ctx.status.record_inbound();
        Ok(receipt)
    }

    /// Handler invoked for every envelope on this instance's outbound
    /// subject.
    fn outbound_handler(&self, ctx: &AdapterContext) -> relay_bus::Handler {
        match self {
            Self::ClaudeCode(_) => {
                let status = ctx.status.clone();
                Arc::new(move |envelope: Envelope| {
                    let status = status.clone();
                    Box::pin(async move {
                        // The console surface itself is outside the kernel;
                        // the bridge records the hand-off.
                        debug!(subject = %envelope.subject, "console outbound");
                        status.record_outbound();
                        Ok(())
                    })
                })
            }
            Self::Telegram(t) => {
                let config = t.config.clone();
                let client = t.client.clone();
                let status = ctx.status.clone();
                Arc::new(move |envelope: Envelope| {
                    let config = config.clone();
                    let client = client.clone();
                    let status = status.clone();
                    Box::pin(async move {
                        let text = match envelope.payload.as_str() {
                            Some(s) => s.to_string(),
                            None => envelope.payload.to_string(),
                        };
                        let url =
                            format!("{}/bot{}/sendMessage", config.api_base, config.token);
                        let result = client
                            .post(&url)
                            .json(&serde_json::json!({
                                "chat_id": config.chat_id,
                                "text": text,
                            }))
                            .send()
                            .await;
                        match result {
                            Ok(resp) if resp.status().is_success() => {
                                status.record_outbound();
                                Ok(())
                            }
                            Ok(resp) => {
                                let reason = format!("sendMessage returned {}", resp.status());
                                status.record_error(&reason);
                                anyhow::bail!(reason)
                            }
                            Err(err) => {
                                status.record_error(&err.to_string());
                                Err(err.into())
                            }
                        }
                    })
                })
            }
            Self::Webhook(w) => {
                let config = w.config.clone();
                let client = w.client.clone();
                let status = ctx.status.clone();
                Arc::new(move |envelope: Envelope| {
                    let config = config.clone();
                    let client = client.clone();
                    let status = status.clone();
                    Box::pin(async move {
                        let Some(url) = config.forward_url.clone() else {
                            // No forward target configured; nothing to do.
                            return Ok(());
                        };
                        let body = serde_json::to_vec(&envelope.payload)?;
                        let mut request = client.post(&url).body(body.clone());
                        if config.sign_outbound {
                            request = request.header(
                                config.signature_header.clone(),
                                signing::sign(&config.secret, &body),
                            );
                        }
                        let resp = request.send().await;
                        match resp {
                            Ok(resp) if resp.status().is_success() => {
                                status.record_outbound();
                                Ok(())
                            }
                            Ok(resp) => {
                                let reason = format!("forward returned {}", resp.status());
                                status.record_error(&reason);
                                anyhow::bail!(reason)
                            }
                            Err(err) => {
                                status.record_error(&err.to_string());
                                Err(err.into())
                            }
                        }
                    })
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(adapter_type: &str, config: serde_json::Value) -> AdapterConfigRecord {
        AdapterConfigRecord {
            id: "t-1".into(),
            adapter_type: adapter_type.into(),
            enabled: true,
            config,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn build_known_types() {
        assert!(AdapterRuntime::build(&record(CLAUDE_CODE, serde_json::json!({}))).is_ok());
        assert!(
            AdapterRuntime::build(&record(
                TELEGRAM,
                serde_json::json!({"token": "t", "chat_id": "c"})
            ))
            .is_ok()
        );
        assert!(
            AdapterRuntime::build(&record(WEBHOOK, serde_json::json!({"secret": "s"}))).is_ok()
        );
    }

    #[test]
    fn build_unknown_type_fails() {
        let err = AdapterRuntime::build(&record("carrier-pigeon", serde_json::json!({})))
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::UnknownType(_)));
    }

    #[test]
    fn only_webhook_is_webhook_capable() {
        let wh = AdapterRuntime::build(&record(WEBHOOK, serde_json::json!({"secret": "s"})))
            .unwrap();
        assert!(wh.webhook_capable());
        let cc = AdapterRuntime::build(&record(CLAUDE_CODE, serde_json::json!({}))).unwrap();
        assert!(!cc.webhook_capable());
    }

    #[test]
    fn instance_subjects_are_valid() {
        let wh = AdapterRuntime::build(&record(WEBHOOK, serde_json::json!({"secret": "s"})))
            .unwrap();
        let inbound = wh.inbound_subject("wh-1").unwrap();
        assert_eq!(inbound, "relay.webhook.wh-1.in");
        relay_subject::validate_subject(&inbound).unwrap();
    }

    #[test]
    fn webhook_without_forward_url_has_no_outbound() {
        let wh = AdapterRuntime::build(&record(WEBHOOK, serde_json::json!({"secret": "s"})))
            .unwrap();
        assert!(wh.outbound_subject("wh-1").is_none());

        let wh = AdapterRuntime::build(&record(
            WEBHOOK,
            serde_json::json!({"secret": "s", "forward_url": "https://example.test/hook"}),
        ))
        .unwrap();
        assert_eq!(
            wh.outbound_subject("wh-1").as_deref(),
            Some("relay.webhook.wh-1.out")
        );
    }
}
