//! Outbox data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Delivery channels for side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Pdf,
    Email,
    Webhook,
    Slack,
    Discord,
    Sms,
    ExternalApi,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Pdf => "pdf",
            Channel::Email => "email",
            Channel::Webhook => "webhook",
            Channel::Slack => "slack",
            Channel::Discord => "discord",
            Channel::Sms => "sms",
            Channel::ExternalApi => "external_api",
        }
    }

    pub fn all() -> &'static [Channel] {
        &[
            Channel::Pdf,
            Channel::Email,
            Channel::Webhook,
            Channel::Slack,
            Channel::Discord,
            Channel::Sms,
            Channel::ExternalApi,
        ]
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbox message lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    DeadLetter,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }
}

impl From<String> for OutboxStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => OutboxStatus::Pending,
            "processing" => OutboxStatus::Processing,
            "delivered" => OutboxStatus::Delivered,
            "dead_letter" => OutboxStatus::DeadLetter,
            _ => OutboxStatus::Pending,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed side-effect payloads, validated when the message is enqueued.
///
/// The serialized form is tagged with `channel`, which doubles as the
/// `channel` column on the message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum SideEffect {
    /// Render a document and store it under `output_key`.
    Pdf {
        template: String,
        case_ref: String,
        output_key: String,
    },
    Email {
        to: String,
        subject: String,
        body: String,
    },
    /// Deliver an event to a consumer-registered endpoint.
    Webhook {
        url: String,
        event: String,
        body: JsonValue,
    },
    Slack {
        text: String,
    },
    Discord {
        content: String,
    },
    Sms {
        to: String,
        body: String,
    },
    /// Call out to a partner system.
    ExternalApi {
        endpoint: String,
        body: JsonValue,
    },
}

impl SideEffect {
    pub fn channel(&self) -> Channel {
        match self {
            SideEffect::Pdf { .. } => Channel::Pdf,
            SideEffect::Email { .. } => Channel::Email,
            SideEffect::Webhook { .. } => Channel::Webhook,
            SideEffect::Slack { .. } => Channel::Slack,
            SideEffect::Discord { .. } => Channel::Discord,
            SideEffect::Sms { .. } => Channel::Sms,
            SideEffect::ExternalApi { .. } => Channel::ExternalApi,
        }
    }

    /// Boundary validation: reject obviously undeliverable payloads before
    /// they are durably queued.
    pub fn validate(&self) -> EngineResult<()> {
        let complaint = match self {
            SideEffect::Pdf {
                template, case_ref, ..
            } if template.is_empty() || case_ref.is_empty() => {
                Some("pdf side effect requires template and case_ref")
            },
            SideEffect::Email { to, subject, .. } if to.is_empty() || subject.is_empty() => {
                Some("email side effect requires recipient and subject")
            },
            SideEffect::Webhook { url, .. } if !url.starts_with("http") => {
                Some("webhook side effect requires an http(s) url")
            },
            SideEffect::Slack { text } if text.is_empty() => {
                Some("slack side effect requires text")
            },
            SideEffect::Discord { content } if content.is_empty() => {
                Some("discord side effect requires content")
            },
            SideEffect::Sms { to, body } if to.is_empty() || body.is_empty() => {
                Some("sms side effect requires recipient and body")
            },
            SideEffect::ExternalApi { endpoint, .. } if !endpoint.starts_with("http") => {
                Some("external_api side effect requires an http(s) endpoint")
            },
            _ => None,
        };

        match complaint {
            Some(reason) => Err(EngineError::Validation(reason.to_string())),
            None => Ok(()),
        }
    }
}

/// Result of one delivery attempt.
///
/// Handlers classify their own failures; the processor only counts
/// attempts. Transient failures reschedule, permanent failures and
/// unconfigured channels dead-letter without exhausting the retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Retryable(String),
    Permanent(String),
    NotImplemented,
}

/// An outbox message row from the database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub channel: String,
    pub payload: JsonValue,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    pub fn status(&self) -> OutboxStatus {
        OutboxStatus::from(self.status.clone())
    }

    /// Decode the stored payload back into its typed form.
    pub fn side_effect(&self) -> EngineResult<SideEffect> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            EngineError::Validation(format!(
                "Outbox message {} carries an undecodable {} payload: {}",
                self.id, self.channel, e
            ))
        })
    }

    /// Correlation id for audit events; messages enqueued without one are
    /// correlated to themselves.
    pub fn correlation(&self) -> Uuid {
        self.correlation_id.unwrap_or(self.id)
    }
}

/// Outbox depth per channel and status
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxDepth {
    pub channel: String,
    pub status: String,
    pub count: i64,
}

/// Counters from one processing round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub claimed: u64,
    pub delivered: u64,
    pub rescheduled: u64,
    pub dead_lettered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_tag_matches_column() {
        let effect = SideEffect::Slack {
            text: "batch committed".to_string(),
        };
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["channel"], json!(effect.channel().as_str()));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Delivered,
            OutboxStatus::DeadLetter,
        ] {
            assert_eq!(OutboxStatus::from(status.as_str().to_string()), status);
        }
    }

    #[test]
    fn test_validate_rejects_undeliverable_payloads() {
        let bad = SideEffect::Webhook {
            url: "not-a-url".to_string(),
            event: "batch.committed".to_string(),
            body: json!({}),
        };
        assert!(bad.validate().is_err());

        let good = SideEffect::Webhook {
            url: "https://consumer.example/hooks/caseflow".to_string(),
            event: "batch.committed".to_string(),
            body: json!({}),
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_email() {
        let bad = SideEffect::Email {
            to: String::new(),
            subject: "Import summary".to_string(),
            body: String::new(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_all_channels_covered() {
        assert_eq!(Channel::all().len(), 7);
    }
}
