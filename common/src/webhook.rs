// Outbound webhook delivery: signs each event payload with HMAC-SHA256 over a
// per-deployment secret, the same signing primitive the teacher used for
// validating inbound webhook requests, now applied to requests this service sends.

use crate::errors::WebhookError;
use crate::models::WebhookEvent;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

pub fn generate_webhook_secret() -> String {
    use rand::Rng;
    let random_bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(random_bytes)
}

fn sign_payload(payload: &[u8], secret: &str) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::DeliveryFailed(format!("invalid secret: {e}")))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn validate_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> Result<bool, WebhookError> {
    let expected = sign_payload(payload, secret)?;
    Ok(expected == signature)
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait WebhookEmitter: Send + Sync {
    async fn emit(&self, target_url: &str, event: &WebhookEvent) -> Result<(), WebhookError>;
}

/// Shared "no target configured means no-op" guard in front of `WebhookEmitter::emit`,
/// used by both the scheduler's trigger pipeline and the worker's job dispatcher so the
/// skip logic only exists once.
pub async fn emit_to_target(
    webhooks: &dyn WebhookEmitter,
    target: Option<&str>,
    event: &WebhookEvent,
) -> Result<(), WebhookError> {
    match target {
        Some(target) => webhooks.emit(target, event).await,
        None => Ok(()),
    }
}

/// POSTs the event JSON to `target_url` with an `X-Webhook-Signature` header, the
/// same HMAC-SHA256 scheme `validate_webhook_signature` checks on the receiving end.
pub struct HttpWebhookEmitter {
    client: reqwest::Client,
    secret: String,
    enabled: bool,
}

impl HttpWebhookEmitter {
    pub fn new(secret: String, enabled: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client configuration is valid");
        Self { client, secret, enabled }
    }
}

#[async_trait::async_trait]
impl WebhookEmitter for HttpWebhookEmitter {
    #[instrument(skip(self, event), fields(target_url = %target_url))]
    async fn emit(&self, target_url: &str, event: &WebhookEvent) -> Result<(), WebhookError> {
        if !self.enabled {
            return Ok(());
        }

        let payload = serde_json::to_vec(event)
            .map_err(|e| WebhookError::DeliveryFailed(format!("serialization failed: {e}")))?;
        let signature = sign_payload(&payload, &self.secret)?;

        let response = self
            .client
            .post(target_url)
            .header("content-type", "application/json")
            .header("X-Webhook-Signature", signature)
            .body(payload)
            .send()
            .await
            .map_err(|e| WebhookError::DeliveryFailed(e.to_string()))?;

        if response.status().is_success() {
            info!("webhook delivered");
            Ok(())
        } else {
            let status = response.status().as_u16();
            warn!(status, "webhook target rejected payload");
            Err(WebhookError::Rejected { status })
        }
    }
}

/// No-op emitter for deployments with webhooks disabled, so callers don't need to
/// branch on configuration at every emit site.
pub struct NoopWebhookEmitter;

#[async_trait::async_trait]
impl WebhookEmitter for NoopWebhookEmitter {
    async fn emit(&self, _target_url: &str, _event: &WebhookEvent) -> Result<(), WebhookError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_payload_is_deterministic_for_same_secret() {
        let a = sign_payload(b"payload", "secret").unwrap();
        let b = sign_payload(b"payload", "secret").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn validate_webhook_signature_accepts_matching_signature() {
        let signature = sign_payload(b"payload", "secret").unwrap();
        assert!(validate_webhook_signature(b"payload", &signature, "secret").unwrap());
    }

    #[test]
    fn validate_webhook_signature_rejects_tampered_payload() {
        let signature = sign_payload(b"payload", "secret").unwrap();
        assert!(!validate_webhook_signature(b"different", &signature, "secret").unwrap());
    }

    #[test]
    fn generate_webhook_secret_produces_64_hex_chars() {
        let secret = generate_webhook_secret();
        assert_eq!(secret.len(), 64);
        assert!(hex::decode(&secret).is_ok());
    }

    #[tokio::test]
    async fn noop_emitter_always_succeeds() {
        let emitter = NoopWebhookEmitter;
        let event = WebhookEvent::TaskPaused { task_uuid: uuid::Uuid::new_v4(), reason: "test".to_string() };
        assert!(emitter.emit("https://example.com/hook", &event).await.is_ok());
    }

    #[tokio::test]
    async fn emit_to_target_skips_emitter_when_no_target_configured() {
        let mut mock = MockWebhookEmitter::new();
        mock.expect_emit().times(0);

        let event = WebhookEvent::TaskPaused { task_uuid: uuid::Uuid::new_v4(), reason: "test".to_string() };
        assert!(emit_to_target(&mock, None, &event).await.is_ok());
    }

    #[tokio::test]
    async fn emit_to_target_delegates_to_emitter_when_target_set() {
        let mut mock = MockWebhookEmitter::new();
        mock.expect_emit().withf(|url, _| url == "https://example.com/hook").times(1).returning(|_, _| Ok(()));

        let event = WebhookEvent::TaskPaused { task_uuid: uuid::Uuid::new_v4(), reason: "test".to_string() };
        assert!(emit_to_target(&mock, Some("https://example.com/hook"), &event).await.is_ok());
    }

    #[tokio::test]
    async fn emit_to_target_surfaces_emitter_error() {
        let mut mock = MockWebhookEmitter::new();
        mock.expect_emit().returning(|_, _| Err(WebhookError::Rejected { status: 500 }));

        let event = WebhookEvent::TaskPaused { task_uuid: uuid::Uuid::new_v4(), reason: "test".to_string() };
        assert!(emit_to_target(&mock, Some("https://example.com/hook"), &event).await.is_err());
    }
}
