use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Subscription status strings written by the reconciler. The column also
/// stores whatever status the provider reports on created/updated/resumed.
pub mod status {
    pub const NONE: &str = "none";
    pub const ACTIVE: &str = "active";
    pub const CANCELLED: &str = "cancelled";
    pub const EXPIRED: &str = "expired";
    pub const INACTIVE: &str = "inactive";
}

pub mod payment_status {
    pub const FAILED: &str = "failed";
    pub const SUCCEEDED: &str = "succeeded";
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email_verified: bool,
    pub verification_token_expires: Option<OffsetDateTime>,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub variant_id: Option<String>,
    pub subscription_status: String,
    pub is_subscribed: bool,
    pub current_period_end: Option<OffsetDateTime>,
    pub plan_type: Option<String>,
    pub payment_status: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn subscription(&self) -> SubscriptionState {
        SubscriptionState {
            subscription_id: self.subscription_id.clone(),
            customer_id: self.customer_id.clone(),
            variant_id: self.variant_id.clone(),
            subscription_status: self.subscription_status.clone(),
            is_subscribed: self.is_subscribed,
            current_period_end: self.current_period_end,
            plan_type: self.plan_type.as_deref().and_then(PlanType::parse),
            payment_status: self.payment_status.clone(),
        }
    }
}

/// Fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub verification_token: Option<String>,
    pub verification_token_expires: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Monthly,
    Yearly,
}

impl PlanType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Yearly => "yearly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "monthly" => Some(PlanType::Monthly),
            "yearly" => Some(PlanType::Yearly),
            _ => None,
        }
    }

    /// Map a provider variant id onto a plan using the configured ids.
    pub fn from_variant(
        variant_id: Option<&str>,
        monthly: Option<&str>,
        yearly: Option<&str>,
    ) -> Option<Self> {
        let variant = variant_id?;
        if monthly == Some(variant) {
            Some(PlanType::Monthly)
        } else if yearly == Some(variant) {
            Some(PlanType::Yearly)
        } else {
            None
        }
    }
}

/// The subscription-related slice of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub variant_id: Option<String>,
    pub subscription_status: String,
    pub is_subscribed: bool,
    pub current_period_end: Option<OffsetDateTime>,
    pub plan_type: Option<PlanType>,
    pub payment_status: Option<String>,
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self {
            subscription_id: None,
            customer_id: None,
            variant_id: None,
            subscription_status: status::NONE.to_string(),
            is_subscribed: false,
            current_period_end: None,
            plan_type: None,
            payment_status: None,
        }
    }
}

/// Columns one event writes. `None` leaves the stored value alone, so
/// events touching different fields never undo each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPatch {
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub variant_id: Option<String>,
    pub subscription_status: Option<String>,
    pub is_subscribed: Option<bool>,
    pub current_period_end: Option<Option<OffsetDateTime>>,
    pub plan_type: Option<Option<PlanType>>,
    pub payment_status: Option<String>,
}

impl SubscriptionPatch {
    pub fn apply_to(&self, state: &SubscriptionState) -> SubscriptionState {
        let mut next = state.clone();
        if let Some(v) = &self.subscription_id {
            next.subscription_id = Some(v.clone());
        }
        if let Some(v) = &self.customer_id {
            next.customer_id = Some(v.clone());
        }
        if let Some(v) = &self.variant_id {
            next.variant_id = Some(v.clone());
        }
        if let Some(v) = &self.subscription_status {
            next.subscription_status = v.clone();
        }
        if let Some(v) = self.is_subscribed {
            next.is_subscribed = v;
        }
        if let Some(v) = self.current_period_end {
            next.current_period_end = v;
        }
        if let Some(v) = self.plan_type {
            next.plan_type = v;
        }
        if let Some(v) = &self.payment_status {
            next.payment_status = Some(v.clone());
        }
        next
    }
}

/// Order record written by `order_created`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: String,
    pub order_number: Option<i64>,
    pub email: String,
    pub total_formatted: Option<String>,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// Fields carried by an `order_created` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: String,
    pub order_number: Option<i64>,
    pub email: String,
    pub total_formatted: Option<String>,
}
