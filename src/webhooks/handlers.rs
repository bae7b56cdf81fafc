use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::ApiError,
    notify,
    state::AppState,
    webhooks::{
        events::{EventKind, WebhookEnvelope},
        reconciler::{PlanVariants, ReconcileError, Reconciler},
        signature::verify_signature,
    },
};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const ALT_SIGNATURE_HEADER: &str = "x-ls-signature";

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/lemonsqueezy-webhook", post(lemonsqueezy_webhook))
        .route("/webhooks/lemonsqueezy", post(lemonsqueezy_webhook))
}

fn received() -> Json<Value> {
    Json(json!({ "received": true }))
}

/// Verifies, decodes and applies one provider delivery. The body is taken
/// as raw bytes so the signature covers exactly what was sent.
#[instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn lemonsqueezy_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = [SIGNATURE_HEADER, ALT_SIGNATURE_HEADER]
        .into_iter()
        .find_map(|name| headers.get(name))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::validation("Missing signature header"))?;

    let Some(secret) = state.config.lemonsqueezy.webhook_secret.as_deref() else {
        error!("LEMONSQUEEZY_WEBHOOK_SECRET is not set; rejecting webhook");
        return Err(ApiError::unauthorized("Invalid signature"));
    };
    if !verify_signature(&body, signature, secret) {
        warn!("webhook signature mismatch");
        return Err(ApiError::unauthorized("Invalid signature"));
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "undecodable webhook body");
        ApiError::validation("Invalid webhook payload")
    })?;
    let event_name = envelope.meta.event_name.as_str();
    let event_id = envelope.meta.event_id.as_deref().unwrap_or("-");

    let Some(kind) = EventKind::from_name(event_name) else {
        info!(event = event_name, event_id, "unhandled webhook event");
        return Ok(received());
    };
    debug!(
        event = event_name,
        event_id,
        data_type = ?envelope.data.kind,
        custom_data = ?envelope.meta.custom_data,
        "processing webhook"
    );

    let reconciler = Reconciler::new(
        state.users.as_ref(),
        PlanVariants::from_config(&state.config.lemonsqueezy),
        &state.config.app_url,
    );
    match reconciler
        .apply(kind, &envelope.data, OffsetDateTime::now_utc())
        .await
    {
        Ok(done) => {
            info!(event = event_name, event_id, email = %done.email, outcome = ?done.outcome, "webhook handled");
            if let Some(notification) = done.notification {
                notify::dispatch(state.mailer.as_ref(), &done.email, notification).await;
            }
            Ok(received())
        }
        Err(ReconcileError::Payload(reason)) => {
            warn!(event = event_name, event_id, %reason, "webhook payload ignored");
            Ok(received())
        }
        Err(ReconcileError::Store(e)) => {
            Err(ApiError::Internal(e.context(format!("handling {event_name}"))))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::state::testing::{test_config, Fakes, WEBHOOK_SECRET};
    use crate::checkout::client::testing::StubCheckout;
    use crate::users::{NewUser, UserStore};
    use crate::webhooks::signature::sign;

    async fn deliver(
        state: AppState,
        uri: &str,
        header: Option<(&str, String)>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some((name, value)) = header {
            req = req.header(name, value);
        }
        let res = crate::app::build_app(state)
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn signed(state: AppState, body: &str) -> (StatusCode, Value) {
        let sig = sign(body.as_bytes(), WEBHOOK_SECRET).unwrap();
        deliver(
            state,
            "/api/lemonsqueezy-webhook",
            Some((SIGNATURE_HEADER, sig)),
            body,
        )
        .await
    }

    async fn seeded(email: &str) -> (AppState, Fakes) {
        let (state, fakes) = AppState::fake();
        fakes
            .users
            .create(NewUser {
                email: email.into(),
                password_hash: "x".into(),
                verification_token: None,
                verification_token_expires: None,
            })
            .await
            .unwrap();
        (state, fakes)
    }

    fn created_body(email: &str) -> String {
        json!({
            "meta": { "event_name": "subscription_created", "event_id": "evt_1" },
            "data": { "type": "subscriptions", "id": "sub_1", "attributes": {
                "user_email": email, "status": "active", "variant_id": "111",
                "customer_id": 9, "renews_at": "2030-01-01T00:00:00Z"
            }}
        })
        .to_string()
    }

    #[tokio::test]
    async fn missing_signature_is_400() {
        let (state, _) = AppState::fake();
        let (status, body) =
            deliver(state, "/api/lemonsqueezy-webhook", None, &created_body("a@b.com")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing signature header");
    }

    #[tokio::test]
    async fn bad_signature_is_401_and_changes_nothing() {
        let (state, fakes) = seeded("a@b.com").await;
        let body = created_body("a@b.com");
        let forged = sign(body.as_bytes(), "not-the-secret").unwrap();
        let (status, json) = deliver(
            state,
            "/api/lemonsqueezy-webhook",
            Some((SIGNATURE_HEADER, forged)),
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "Invalid signature");
        let user = fakes.users.find_by_email("a@b.com").await.unwrap().unwrap();
        assert!(!user.is_subscribed);
    }

    #[tokio::test]
    async fn unconfigured_secret_is_401() {
        let mut config = test_config();
        config.lemonsqueezy.webhook_secret = None;
        let (state, _) = AppState::fake_with(config, StubCheckout::default());
        let (status, _) = signed(state, &created_body("a@b.com")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_subscription_created_updates_user() {
        let (state, fakes) = seeded("a@b.com").await;
        let (status, json) = signed(state, &created_body("A@B.com")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "received": true }));

        let user = fakes.users.find_by_email("a@b.com").await.unwrap().unwrap();
        assert!(user.is_subscribed);
        assert_eq!(user.plan_type.as_deref(), Some("monthly"));
        assert_eq!(user.subscription_id.as_deref(), Some("sub_1"));
        // Not verified yet, so no confirmation mail.
        assert!(fakes.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn verified_user_gets_confirmation_mail() {
        let (state, fakes) = seeded("a@b.com").await;
        let user = fakes.users.find_by_email("a@b.com").await.unwrap().unwrap();
        fakes.users.mark_verified(user.id);

        let (status, _) = signed(state, &created_body("a@b.com")).await;
        assert_eq!(status, StatusCode::OK);
        let sent = fakes.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@b.com");
        assert_eq!(sent[0].subject, "Welcome to Spilll Premium!");
    }

    #[tokio::test]
    async fn alternate_route_and_header_are_accepted() {
        let (state, fakes) = seeded("a@b.com").await;
        let body = created_body("a@b.com");
        let sig = sign(body.as_bytes(), WEBHOOK_SECRET).unwrap();
        let (status, _) = deliver(
            state,
            "/api/webhooks/lemonsqueezy",
            Some((ALT_SIGNATURE_HEADER, sig)),
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let user = fakes.users.find_by_email("a@b.com").await.unwrap().unwrap();
        assert!(user.is_subscribed);
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged() {
        let (state, _) = AppState::fake();
        let body = json!({ "meta": { "event_name": "license_key_created" }, "data": { "id": 1 } })
            .to_string();
        let (status, json) = signed(state, &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["received"], true);
    }

    #[tokio::test]
    async fn undecodable_body_is_400() {
        let (state, _) = AppState::fake();
        let (status, json) = signed(state, "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid webhook payload");
    }

    #[tokio::test]
    async fn payload_without_email_is_acknowledged() {
        let (state, _) = AppState::fake();
        let body = json!({
            "meta": { "event_name": "subscription_expired" },
            "data": { "id": "sub_1", "attributes": { "status": "expired" } }
        })
        .to_string();
        let (status, _) = signed(state, &body).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn order_created_creates_placeholder_account() {
        let (state, fakes) = AppState::fake();
        let body = json!({
            "meta": { "event_name": "order_created" },
            "data": { "type": "orders", "id": 5001, "attributes": {
                "user_email": "buyer@shop.com", "order_number": 42, "total_formatted": "$9.99"
            }}
        })
        .to_string();
        let (status, _) = signed(state, &body).await;
        assert_eq!(status, StatusCode::OK);
        let user = fakes.users.find_by_email("buyer@shop.com").await.unwrap().unwrap();
        assert!(!user.email_verified);
        assert!(fakes.users.find_order("5001").await.unwrap().is_some());
    }
}
