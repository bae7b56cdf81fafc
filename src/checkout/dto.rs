use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::loose_id;

/// Request body for `POST /api/create-checkout`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[serde(default, deserialize_with = "loose_id")]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub custom_data: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutResponse {
    pub success: bool,
    pub checkout_url: String,
}
