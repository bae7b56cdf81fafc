pub mod client;
mod dto;
pub mod handlers;

use crate::state::AppState;
use axum::Router;

pub use client::{CheckoutProvider, LemonSqueezyClient};

pub fn router() -> Router<AppState> {
    handlers::checkout_routes()
}
