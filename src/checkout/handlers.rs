use axum::{extract::State, routing::post, Json, Router};
use serde_json::json;
use tracing::{error, info, instrument};

use crate::{
    checkout::{
        client::{CheckoutError, CheckoutSession},
        dto::{CreateCheckoutRequest, CreateCheckoutResponse},
    },
    error::ApiError,
    state::AppState,
};

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/create-checkout", post(create_checkout))
}

#[instrument(skip(state, payload))]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    let variant_id = payload
        .variant_id
        .ok_or_else(|| ApiError::validation("Variant ID is required"))?;

    let session = CheckoutSession {
        variant_id,
        custom_data: payload.custom_data.unwrap_or_else(|| json!({})),
        redirect_url: format!("{}/create", state.config.app_url),
        preview: state.config.environment.is_development(),
    };

    match state.checkout.create_checkout(&session).await {
        Ok(checkout_url) => {
            info!(variant_id = %session.variant_id, "checkout session created");
            Ok(Json(CreateCheckoutResponse {
                success: true,
                checkout_url,
            }))
        }
        Err(CheckoutError::NotConfigured(what)) => Err(ApiError::Config(what.into())),
        Err(e) => {
            error!(error = %e, variant_id = %session.variant_id, "checkout creation failed");
            Err(ApiError::Upstream {
                message: "Failed to create checkout session".into(),
                detail: state
                    .config
                    .environment
                    .is_development()
                    .then(|| e.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::checkout::client::testing::StubCheckout;
    use crate::config::Environment;
    use crate::state::{testing::test_config, AppState};

    async fn post(state: AppState, body: &str) -> (StatusCode, serde_json::Value) {
        let app = crate::app::build_app(state);
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/create-checkout")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn missing_variant_is_rejected() {
        let (state, _) = AppState::fake();
        let (status, body) = post(state, "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            serde_json::json!({ "success": false, "error": "Variant ID is required" })
        );
    }

    #[tokio::test]
    async fn returns_provider_checkout_url() {
        let (state, fakes) = AppState::fake();
        let (status, body) = post(state, r#"{"variantId":"111","customData":{"ref":"hero"}}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["checkoutUrl"].as_str().unwrap().ends_with("/111"));

        let requests = fakes.checkout.requests.lock().unwrap();
        assert_eq!(requests[0].redirect_url, "https://spilll.test/create");
        assert_eq!(requests[0].custom_data["ref"], "hero");
        assert!(!requests[0].preview);
    }

    #[tokio::test]
    async fn provider_failure_hides_detail_in_production() {
        let (state, _) = AppState::fake_with(test_config(), StubCheckout::failing());
        let (status, body) = post(state, r#"{"variantId":"111"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to create checkout session");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn provider_failure_shows_detail_in_development() {
        let mut config = test_config();
        config.environment = Environment::Development;
        let (state, fakes) = AppState::fake_with(config, StubCheckout::failing());
        let (status, body) = post(state, r#"{"variantId":"111"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["details"].as_str().unwrap().contains("variant not found"));
        assert!(fakes.checkout.requests.lock().unwrap()[0].preview);
    }
}
