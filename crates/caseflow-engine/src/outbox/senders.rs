//! Channel-specific delivery handlers
//!
//! Every channel is served by one [`ChannelSender`], polymorphic over a
//! single capability: deliver a side effect and classify the outcome. All
//! senders here are HTTP-backed; email, sms, and pdf go through gateway
//! services whose endpoints come from configuration, while webhook and
//! external-api targets come from the message payload itself.
//!
//! Senders attach an `Idempotency-Key` header derived from the message id:
//! a crash between a successful send and the status update causes
//! redelivery, and the receiving side must be able to collapse it.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::OutboxConfig;

use super::models::{Channel, SendOutcome, SideEffect};

/// Delivery handler for one channel
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome;
}

/// Classify an HTTP response status into a delivery outcome.
///
/// Timeouts and server-side failures are worth retrying; everything else in
/// the 4xx range means the request itself is wrong and retrying cannot fix
/// it.
pub fn classify_status(status: StatusCode) -> SendOutcome {
    if status.is_success() {
        SendOutcome::Delivered
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SendOutcome::Retryable(format!("upstream returned {}", status))
    } else {
        SendOutcome::Permanent(format!("upstream rejected request with {}", status))
    }
}

/// Shared HTTP delivery plumbing for all senders
#[derive(Clone)]
struct HttpDelivery {
    client: reqwest::Client,
}

impl HttpDelivery {
    fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post_json(
        &self,
        url: &str,
        message_id: Uuid,
        body: &serde_json::Value,
    ) -> SendOutcome {
        let response = self
            .client
            .post(url)
            .header("Idempotency-Key", message_id.to_string())
            .json(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                debug!(url, status = %response.status(), "Channel delivery response");
                classify_status(response.status())
            },
            // Connection-level failures are transient by definition.
            Err(e) => SendOutcome::Retryable(format!("request failed: {}", e)),
        }
    }
}

/// Webhook delivery to the consumer-registered URL in the payload
struct WebhookSender {
    http: HttpDelivery,
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome {
        let SideEffect::Webhook { url, event, body } = effect else {
            return SendOutcome::Permanent("payload is not a webhook side effect".to_string());
        };
        let envelope = json!({ "event": event, "data": body });
        self.http.post_json(url, message_id, &envelope).await
    }
}

/// Slack notification via incoming-webhook URL from configuration
struct SlackSender {
    http: HttpDelivery,
    webhook_url: Option<String>,
}

#[async_trait]
impl ChannelSender for SlackSender {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome {
        let Some(url) = self.webhook_url.as_deref() else {
            return SendOutcome::NotImplemented;
        };
        let SideEffect::Slack { text } = effect else {
            return SendOutcome::Permanent("payload is not a slack side effect".to_string());
        };
        self.http
            .post_json(url, message_id, &json!({ "text": text }))
            .await
    }
}

/// Discord notification via webhook URL from configuration
struct DiscordSender {
    http: HttpDelivery,
    webhook_url: Option<String>,
}

#[async_trait]
impl ChannelSender for DiscordSender {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome {
        let Some(url) = self.webhook_url.as_deref() else {
            return SendOutcome::NotImplemented;
        };
        let SideEffect::Discord { content } = effect else {
            return SendOutcome::Permanent("payload is not a discord side effect".to_string());
        };
        self.http
            .post_json(url, message_id, &json!({ "content": content }))
            .await
    }
}

/// Email delivery through the mail gateway service
struct EmailSender {
    http: HttpDelivery,
    gateway_url: Option<String>,
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome {
        let Some(url) = self.gateway_url.as_deref() else {
            return SendOutcome::NotImplemented;
        };
        let SideEffect::Email { to, subject, body } = effect else {
            return SendOutcome::Permanent("payload is not an email side effect".to_string());
        };
        self.http
            .post_json(
                url,
                message_id,
                &json!({ "to": to, "subject": subject, "body": body }),
            )
            .await
    }
}

/// SMS delivery through the SMS gateway service
struct SmsSender {
    http: HttpDelivery,
    gateway_url: Option<String>,
}

#[async_trait]
impl ChannelSender for SmsSender {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome {
        let Some(url) = self.gateway_url.as_deref() else {
            return SendOutcome::NotImplemented;
        };
        let SideEffect::Sms { to, body } = effect else {
            return SendOutcome::Permanent("payload is not an sms side effect".to_string());
        };
        self.http
            .post_json(url, message_id, &json!({ "to": to, "body": body }))
            .await
    }
}

/// Document rendering through the PDF render service
struct PdfSender {
    http: HttpDelivery,
    render_url: Option<String>,
}

#[async_trait]
impl ChannelSender for PdfSender {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome {
        let Some(url) = self.render_url.as_deref() else {
            return SendOutcome::NotImplemented;
        };
        let SideEffect::Pdf {
            template,
            case_ref,
            output_key,
        } = effect
        else {
            return SendOutcome::Permanent("payload is not a pdf side effect".to_string());
        };
        self.http
            .post_json(
                url,
                message_id,
                &json!({
                    "template": template,
                    "case_ref": case_ref,
                    "output_key": output_key,
                }),
            )
            .await
    }
}

/// Call-out to a partner system at the endpoint named in the payload
struct ExternalApiSender {
    http: HttpDelivery,
}

#[async_trait]
impl ChannelSender for ExternalApiSender {
    async fn send(&self, message_id: Uuid, effect: &SideEffect) -> SendOutcome {
        let SideEffect::ExternalApi { endpoint, body } = effect else {
            return SendOutcome::Permanent("payload is not an external_api side effect".to_string());
        };
        self.http.post_json(endpoint, message_id, body).await
    }
}

/// Lookup table from channel to its delivery handler
#[derive(Clone)]
pub struct SenderRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    /// Build the full registry from configuration.
    pub fn from_config(config: &OutboxConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        let http = HttpDelivery::new(client);
        let endpoints = &config.channels;

        let mut senders: HashMap<Channel, Arc<dyn ChannelSender>> = HashMap::new();
        senders.insert(
            Channel::Webhook,
            Arc::new(WebhookSender { http: http.clone() }),
        );
        senders.insert(
            Channel::Slack,
            Arc::new(SlackSender {
                http: http.clone(),
                webhook_url: endpoints.slack_webhook_url.clone(),
            }),
        );
        senders.insert(
            Channel::Discord,
            Arc::new(DiscordSender {
                http: http.clone(),
                webhook_url: endpoints.discord_webhook_url.clone(),
            }),
        );
        senders.insert(
            Channel::Email,
            Arc::new(EmailSender {
                http: http.clone(),
                gateway_url: endpoints.email_gateway_url.clone(),
            }),
        );
        senders.insert(
            Channel::Sms,
            Arc::new(SmsSender {
                http: http.clone(),
                gateway_url: endpoints.sms_gateway_url.clone(),
            }),
        );
        senders.insert(
            Channel::Pdf,
            Arc::new(PdfSender {
                http: http.clone(),
                render_url: endpoints.pdf_render_url.clone(),
            }),
        );
        senders.insert(Channel::ExternalApi, Arc::new(ExternalApiSender { http }));

        Self { senders }
    }

    /// Override the sender for one channel (used by tests and embedders).
    pub fn with_sender(mut self, channel: Channel, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }
}
