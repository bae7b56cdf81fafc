use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{auth::services::normalize_email, ids::loose_id};

/// Outer shape of every LemonSqueezy webhook delivery.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub meta: EventMeta,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventMeta {
    pub event_name: String,
    #[serde(default, deserialize_with = "loose_id")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub custom_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    #[serde(default, deserialize_with = "loose_id")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

impl EventData {
    /// Decode the attribute bag. Kept lazy so a malformed attribute only
    /// fails the handler that reads it, not the envelope.
    pub fn attributes(&self) -> Result<EventAttributes, serde_json::Error> {
        if self.attributes.is_null() {
            return Ok(EventAttributes::default());
        }
        EventAttributes::deserialize(&self.attributes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    OrderCreated,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    SubscriptionExpired,
    SubscriptionPaymentFailed,
    SubscriptionPaymentSuccess,
    SubscriptionPaymentRecovered,
    SubscriptionPlanChanged,
    SubscriptionResumed,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::OrderCreated,
        EventKind::SubscriptionCreated,
        EventKind::SubscriptionUpdated,
        EventKind::SubscriptionCancelled,
        EventKind::SubscriptionExpired,
        EventKind::SubscriptionPaymentFailed,
        EventKind::SubscriptionPaymentSuccess,
        EventKind::SubscriptionPaymentRecovered,
        EventKind::SubscriptionPlanChanged,
        EventKind::SubscriptionResumed,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::OrderCreated => "order_created",
            EventKind::SubscriptionCreated => "subscription_created",
            EventKind::SubscriptionUpdated => "subscription_updated",
            EventKind::SubscriptionCancelled => "subscription_cancelled",
            EventKind::SubscriptionExpired => "subscription_expired",
            EventKind::SubscriptionPaymentFailed => "subscription_payment_failed",
            EventKind::SubscriptionPaymentSuccess => "subscription_payment_success",
            EventKind::SubscriptionPaymentRecovered => "subscription_payment_recovered",
            EventKind::SubscriptionPlanChanged => "subscription_plan_changed",
            EventKind::SubscriptionResumed => "subscription_resumed",
        }
    }
}

/// The attributes the reconciler reads. Everything is optional; each
/// handler decides what it cannot do without.
#[derive(Debug, Default, Deserialize)]
pub struct EventAttributes {
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "loose_id")]
    pub customer_id: Option<String>,
    #[serde(default, deserialize_with = "loose_id")]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub order_number: Option<i64>,
    #[serde(default)]
    pub total_formatted: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub renews_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ends_at: Option<OffsetDateTime>,
}

impl EventAttributes {
    /// `user_email`, else `customer_email`, trimmed and lower-cased.
    pub fn email(&self) -> Option<String> {
        [&self.user_email, &self.customer_email]
            .into_iter()
            .filter_map(|e| e.as_deref())
            .map(normalize_email)
            .find(|e| !e.is_empty())
    }
}
