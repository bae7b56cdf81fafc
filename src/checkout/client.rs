use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LemonSqueezyConfig;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("payment provider not configured: {0}")]
    NotConfigured(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// What the buyer asked for plus where the provider should send them afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub variant_id: String,
    pub custom_data: Value,
    pub redirect_url: String,
    pub preview: bool,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Returns the hosted checkout URL.
    async fn create_checkout(&self, session: &CheckoutSession) -> Result<String, CheckoutError>;
}

pub const RECEIPT_BUTTON_TEXT: &str = "Create Your Account";
pub const RECEIPT_THANK_YOU_NOTE: &str =
    "Thank you for your purchase! Please create your account to access your subscription.";

pub struct LemonSqueezyClient {
    config: LemonSqueezyConfig,
    client: reqwest::Client,
}

impl LemonSqueezyClient {
    pub fn new(config: LemonSqueezyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

/// JSON:API document for `POST /v1/checkouts`.
pub fn checkout_document(store_id: &str, session: &CheckoutSession) -> Value {
    json!({
        "data": {
            "type": "checkouts",
            "attributes": {
                "product_options": {
                    "redirect_url": session.redirect_url,
                    "receipt_button_text": RECEIPT_BUTTON_TEXT,
                    "receipt_link_url": session.redirect_url,
                    "receipt_thank_you_note": RECEIPT_THANK_YOU_NOTE,
                },
                "checkout_options": { "embed": true },
                "checkout_data": { "custom": session.custom_data },
                "preview": session.preview,
            },
            "relationships": {
                "store": { "data": { "type": "stores", "id": store_id } },
                "variant": { "data": { "type": "variants", "id": session.variant_id } },
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    data: CheckoutResponseData,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponseData {
    attributes: CheckoutResponseAttributes,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponseAttributes {
    url: String,
}

#[async_trait]
impl CheckoutProvider for LemonSqueezyClient {
    async fn create_checkout(&self, session: &CheckoutSession) -> Result<String, CheckoutError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(CheckoutError::NotConfigured("LEMONSQUEEZY_API_KEY"))?;
        let store_id = self
            .config
            .store_id
            .as_deref()
            .ok_or(CheckoutError::NotConfigured("LEMONSQUEEZY_STORE_ID"))?;

        let url = format!("{}/checkouts", self.config.api_url.trim_end_matches('/'));
        debug!(variant_id = %session.variant_id, "creating checkout");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/vnd.api+json")
            .header(reqwest::header::CONTENT_TYPE, "application/vnd.api+json")
            .body(checkout_document(store_id, session).to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CheckoutError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CheckoutResponse = serde_json::from_str(&body)
            .map_err(|e| CheckoutError::MalformedResponse(e.to_string()))?;
        info!(variant_id = %session.variant_id, "checkout created");
        Ok(parsed.data.attributes.url)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CheckoutSession {
        CheckoutSession {
            variant_id: "12345".into(),
            custom_data: json!({ "source": "pricing" }),
            redirect_url: "https://spilll.app/create".into(),
            preview: false,
        }
    }

    #[test]
    fn document_embeds_redirect_receipt_and_custom_data() {
        let doc = checkout_document("999", &session());
        let attrs = &doc["data"]["attributes"];
        assert_eq!(doc["data"]["type"], "checkouts");
        assert_eq!(attrs["product_options"]["redirect_url"], "https://spilll.app/create");
        assert_eq!(attrs["product_options"]["receipt_button_text"], RECEIPT_BUTTON_TEXT);
        assert_eq!(attrs["checkout_data"]["custom"]["source"], "pricing");
        assert_eq!(attrs["checkout_options"]["embed"], true);
        assert_eq!(doc["data"]["relationships"]["store"]["data"]["id"], "999");
        assert_eq!(doc["data"]["relationships"]["variant"]["data"]["id"], "12345");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let client = LemonSqueezyClient::new(LemonSqueezyConfig {
            api_url: "http://127.0.0.1:9".into(),
            api_key: None,
            store_id: Some("1".into()),
            webhook_secret: None,
            monthly_variant_id: None,
            yearly_variant_id: None,
        });
        let err = client.create_checkout(&session()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotConfigured("LEMONSQUEEZY_API_KEY")));
    }

    #[test]
    fn response_url_is_extracted() {
        let body = r#"{"data":{"type":"checkouts","id":"x","attributes":{"url":"https://pay.example/x"}}}"#;
        let parsed: CheckoutResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.data.attributes.url, "https://pay.example/x");
    }
}
