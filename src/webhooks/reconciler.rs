use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    auth::{password::hash_password, services::random_hex},
    config::LemonSqueezyConfig,
    notify::Notification,
    users::{
        repo_types::{payment_status, status},
        NewOrder, PlanType, SubscriptionPatch, UserStore,
    },
    webhooks::events::{EventAttributes, EventData, EventKind},
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The event cannot be applied as sent. Retrying will not help.
    #[error("unusable payload: {0}")]
    Payload(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Updated,
    UserCreated,
    UserExisted,
    UserMissing,
}

#[derive(Debug)]
pub struct Reconciliation {
    pub outcome: Reconciled,
    pub email: String,
    pub notification: Option<Notification>,
}

/// Configured variant ids for the two plans.
#[derive(Debug, Clone, Default)]
pub struct PlanVariants {
    pub monthly: Option<String>,
    pub yearly: Option<String>,
}

impl PlanVariants {
    pub fn from_config(config: &LemonSqueezyConfig) -> Self {
        Self {
            monthly: config.monthly_variant_id.clone(),
            yearly: config.yearly_variant_id.clone(),
        }
    }

    pub fn plan_for(&self, variant_id: Option<&str>) -> Option<PlanType> {
        let plan =
            PlanType::from_variant(variant_id, self.monthly.as_deref(), self.yearly.as_deref());
        if plan.is_none() {
            if let Some(variant_id) = variant_id {
                warn!(variant_id, "variant matches no configured plan");
            }
        }
        plan
    }
}

/// Columns `kind` owns, and what it writes there. Nothing here depends on
/// the stored state, so applying the same event twice writes the same values.
pub fn transition(
    kind: EventKind,
    subscription_id: Option<&str>,
    attrs: &EventAttributes,
    plans: &PlanVariants,
    now: OffsetDateTime,
) -> SubscriptionPatch {
    let mut patch = SubscriptionPatch::default();
    match kind {
        EventKind::OrderCreated => {}
        EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
            patch.subscription_id = subscription_id.map(str::to_string);
            patch.customer_id = attrs.customer_id.clone();
            if let Some(variant) = &attrs.variant_id {
                patch.variant_id = Some(variant.clone());
                patch.plan_type = Some(plans.plan_for(Some(variant.as_str())));
            }
            if let Some(s) = &attrs.status {
                patch.is_subscribed = Some(s == status::ACTIVE);
                patch.subscription_status = Some(s.clone());
            }
            patch.current_period_end = Some(attrs.renews_at);
        }
        EventKind::SubscriptionCancelled => {
            patch.subscription_status = Some(status::CANCELLED.to_string());
            patch.current_period_end = Some(attrs.ends_at);
            if attrs.ends_at.map_or(true, |ends| ends <= now) {
                patch.is_subscribed = Some(false);
                patch.subscription_status = Some(status::INACTIVE.to_string());
            }
        }
        EventKind::SubscriptionExpired => {
            patch.is_subscribed = Some(false);
            patch.subscription_status = Some(status::EXPIRED.to_string());
        }
        EventKind::SubscriptionPaymentFailed => {
            patch.payment_status = Some(payment_status::FAILED.to_string());
        }
        EventKind::SubscriptionPaymentSuccess | EventKind::SubscriptionPaymentRecovered => {
            patch.is_subscribed = Some(true);
            patch.subscription_status = Some(status::ACTIVE.to_string());
            patch.payment_status = Some(payment_status::SUCCEEDED.to_string());
            if attrs.renews_at.is_some() {
                patch.current_period_end = Some(attrs.renews_at);
            }
        }
        EventKind::SubscriptionPlanChanged => {
            if let Some(variant) = &attrs.variant_id {
                patch.variant_id = Some(variant.clone());
                patch.plan_type = Some(plans.plan_for(Some(variant.as_str())));
            }
            if attrs.renews_at.is_some() {
                patch.current_period_end = Some(attrs.renews_at);
            }
        }
        EventKind::SubscriptionResumed => {
            patch.subscription_status = Some(
                attrs
                    .status
                    .clone()
                    .unwrap_or_else(|| status::ACTIVE.to_string()),
            );
            if attrs.renews_at.is_some() {
                patch.current_period_end = Some(attrs.renews_at);
            }
            patch.is_subscribed = Some(true);
        }
    }
    patch
}

/// Applies verified events to the user store.
pub struct Reconciler<'a> {
    store: &'a dyn UserStore,
    plans: PlanVariants,
    app_url: &'a str,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn UserStore, plans: PlanVariants, app_url: &'a str) -> Self {
        Self {
            store,
            plans,
            app_url,
        }
    }

    pub async fn apply(
        &self,
        kind: EventKind,
        data: &EventData,
        now: OffsetDateTime,
    ) -> Result<Reconciliation, ReconcileError> {
        let attrs = data
            .attributes()
            .map_err(|e| ReconcileError::Payload(format!("attributes: {e}")))?;
        let email = attrs
            .email()
            .ok_or_else(|| ReconcileError::Payload("no user_email or customer_email".into()))?;

        if kind == EventKind::OrderCreated {
            return self.order_created(data, &attrs, email).await;
        }

        let Some(user) = self.store.find_by_email(&email).await? else {
            warn!(email = %email, event = kind.as_str(), "no user for event; skipping");
            return Ok(Reconciliation {
                outcome: Reconciled::UserMissing,
                email,
                notification: None,
            });
        };

        let current = user.subscription();
        let patch = transition(kind, data.id.as_deref(), &attrs, &self.plans, now);
        let next = patch.apply_to(&current);
        if next == current {
            debug!(user_id = %user.id, event = kind.as_str(), "subscription already up to date");
        }
        self.store.patch_subscription(user.id, &patch).await?;
        info!(
            user_id = %user.id,
            event = kind.as_str(),
            status = %next.subscription_status,
            is_subscribed = next.is_subscribed,
            "subscription reconciled"
        );

        // Redeliveries leave the state unchanged and send nothing.
        let notification = match kind {
            _ if next == current => None,
            EventKind::SubscriptionCreated if user.email_verified && next.is_subscribed => {
                Some(Notification::SubscriptionConfirmed {
                    app_url: self.app_url.to_string(),
                })
            }
            EventKind::SubscriptionCancelled => Some(Notification::SubscriptionCancelled {
                access_until: next.current_period_end.filter(|end| *end > now),
            }),
            _ => None,
        };

        Ok(Reconciliation {
            outcome: Reconciled::Updated,
            email,
            notification,
        })
    }

    async fn order_created(
        &self,
        data: &EventData,
        attrs: &EventAttributes,
        email: String,
    ) -> Result<Reconciliation, ReconcileError> {
        let order_id = data
            .id
            .clone()
            .ok_or_else(|| ReconcileError::Payload("order without id".into()))?;
        self.store
            .upsert_order(&NewOrder {
                id: order_id.clone(),
                order_number: attrs.order_number,
                email: email.clone(),
                total_formatted: attrs.total_formatted.clone(),
            })
            .await?;
        info!(order_id = %order_id, email = %email, "order recorded");

        if self.store.find_by_email(&email).await?.is_some() {
            return Ok(Reconciliation {
                outcome: Reconciled::UserExisted,
                email,
                notification: None,
            });
        }

        // Placeholder credentials; the buyer sets a real password in create-account.
        let hash = hash_password(&random_hex(16))?;
        let outcome = match self.store.create_if_absent(&email, &hash).await? {
            Some(user) => {
                info!(user_id = %user.id, email = %email, "user created from order");
                Reconciled::UserCreated
            }
            None => Reconciled::UserExisted,
        };
        Ok(Reconciliation {
            outcome,
            email,
            notification: None,
        })
    }
}
