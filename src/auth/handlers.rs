use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            CreateAccountRequest, LoginRequest, LoginResponse, MeResponse, MessageResponse,
            PaymentUser, PublicUser, ResendVerificationRequest, VerifyEmailRequest,
            VerifyPaymentRequest, VerifyPaymentResponse,
        },
        jwt::{AuthUser, JwtKeys},
        password::{hash_password, is_strong_enough, verify_password, MIN_PASSWORD_LEN},
        services::{is_valid_email, normalize_email, VerificationToken},
    },
    error::ApiError,
    notify::{self, Notification},
    state::AppState,
    users::{NewUser, User},
};

const ACCOUNT_CREATED: &str =
    "Account created successfully. Please check your email to verify your account.";
const RESEND_GENERIC: &str =
    "If your email exists in our system, a verification email has been sent.";
const ORDER_USED: &str = "This order has already been used to create an account";
const USER_NOT_FOUND_YET: &str =
    "Payment verified, but user record not found yet. The webhook may still be processing.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/create-account", post(create_account))
        .route("/verify-email", post(verify_email))
        .route("/resend-verification", post(resend_verification))
        .route("/login", post(login))
        .route("/verify-payment", post(verify_payment))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_mail(state: &AppState) -> Result<(), ApiError> {
    if state.config.mailgun.is_configured() {
        Ok(())
    } else {
        Err(ApiError::Config("MAILGUN_API_KEY / MAILGUN_DOMAIN".into()))
    }
}

/// Callers decide whether a lost verification mail fails the request.
async fn send_verification(
    state: &AppState,
    email: &str,
    token: &VerificationToken,
) -> Result<(), ApiError> {
    let mail = Notification::Verification {
        url: token.url(&state.config.app_url),
    }
    .render(email);
    state.mailer.send(&mail).await.map_err(|e| {
        error!(email, error = %e, "verification email failed");
        ApiError::Internal(anyhow::anyhow!("verification email failed: {e}"))
    })
}

#[instrument(skip(state, payload))]
pub async fn create_account(
    State(state): State<AppState>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let (Some(email), Some(password)) = (
        present(payload.email),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::validation("Email and password are required"));
    };
    let email = normalize_email(&email);

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation("Invalid email format"));
    }
    if !is_strong_enough(&password) {
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    require_mail(&state)?;

    let existing = state.users.find_by_email(&email).await?;
    if existing.as_ref().is_some_and(|u| u.email_verified) {
        warn!(email = %email, "email already registered");
        return Err(ApiError::Conflict(
            "An account with this email already exists".into(),
        ));
    }

    let order = match &payload.order_id {
        Some(order_id) => {
            let Some(order) = state.users.find_order(order_id).await? else {
                warn!(order_id = %order_id, "unknown order id");
                return Err(ApiError::validation("Invalid order ID"));
            };
            if order
                .user_id
                .is_some_and(|owner| Some(owner) != existing.as_ref().map(|u| u.id))
            {
                warn!(order_id = %order_id, "order already claimed");
                return Err(ApiError::validation(ORDER_USED));
            }
            Some(order)
        }
        None => None,
    };

    let hash = hash_password(&password)?;
    let token = VerificationToken::issue(
        OffsetDateTime::now_utc(),
        state.config.verification_ttl_hours,
    );

    match existing {
        Some(user) => {
            // Only the buyer holding the placeholder's own order may set its password.
            let claim = order
                .as_ref()
                .filter(|o| o.user_id.is_none() && o.email == email);
            if let Some(order) = claim {
                if !state.users.claim_order(&order.id, user.id).await? {
                    warn!(order_id = %order.id, user_id = %user.id, "order claimed concurrently");
                    return Err(ApiError::validation(ORDER_USED));
                }
                state.users.update_password(user.id, &hash).await?;
                info!(user_id = %user.id, order_id = %order.id, "placeholder claimed with order");
            } else {
                info!(user_id = %user.id, "account pending verification; password unchanged");
            }
            state
                .users
                .set_verification_token(user.id, &token.token, token.expires)
                .await?;
        }
        None => {
            let new_user = NewUser {
                email: email.clone(),
                password_hash: hash,
                verification_token: Some(token.token.clone()),
                verification_token_expires: Some(token.expires),
            };
            let user = match &order {
                Some(order) => state
                    .users
                    .create_claiming_order(new_user, &order.id)
                    .await?
                    .ok_or_else(|| {
                        warn!(order_id = %order.id, "order claimed concurrently");
                        ApiError::validation(ORDER_USED)
                    })?,
                None => state.users.create(new_user).await?,
            };
            info!(user_id = %user.id, email = %email, "user created");
        }
    }

    send_verification(&state, &email, &token).await?;
    Ok(Json(MessageResponse::ok(ACCOUNT_CREATED)))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = present(payload.token)
        .ok_or_else(|| ApiError::validation("Verification token is required"))?;

    let Some(user) = state
        .users
        .consume_verification_token(&token, OffsetDateTime::now_utc())
        .await?
    else {
        warn!("invalid or expired verification token");
        return Err(ApiError::validation("Invalid or expired verification token"));
    };

    info!(user_id = %user.id, email = %user.email, "email verified");
    notify::dispatch(
        state.mailer.as_ref(),
        &user.email,
        Notification::Welcome {
            login_url: format!("{}/login", state.config.app_url.trim_end_matches('/')),
        },
    )
    .await;

    Ok(Json(MessageResponse::ok("Email verified successfully")))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<ResendVerificationRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = present(payload.email)
        .map(|e| normalize_email(&e))
        .ok_or_else(|| ApiError::validation("Email is required"))?;
    require_mail(&state)?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        info!(email = %email, "resend requested for unknown email");
        return Ok(Json(MessageResponse::ok(RESEND_GENERIC)));
    };
    if user.email_verified {
        return Err(ApiError::validation(
            "Your email is already verified. Please login to your account.",
        ));
    }

    let token = VerificationToken::issue(
        OffsetDateTime::now_utc(),
        state.config.verification_ttl_hours,
    );
    state
        .users
        .set_verification_token(user.id, &token.token, token.expires)
        .await?;
    // Same answer as for an unknown email, even when the mail is lost.
    if send_verification(&state, &email, &token).await.is_ok() {
        info!(user_id = %user.id, "verification email re-sent");
    }
    Ok(Json(MessageResponse::ok(RESEND_GENERIC)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (Some(email), Some(password)) = (
        present(payload.email),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::validation("Email and password are required"));
    };
    let email = normalize_email(&email);

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(ApiError::unauthorized("Invalid email or password"));
    };
    if !verify_password(&password, &user.password_hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid email or password"));
    }
    if !user.email_verified {
        info!(user_id = %user.id, "login blocked until email is verified");
        return Err(ApiError::NeedsVerification { email: user.email });
    }

    let token = JwtKeys::from_ref(&state).sign(user.id, &user.email)?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(LoginResponse {
        success: true,
        token,
        user: PublicUser {
            id: user.id,
            email: user.email,
        },
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, ApiError> {
    let order_id = payload
        .order_id
        .ok_or_else(|| ApiError::validation("Order ID is required"))?;

    let user: Option<User> = match state.users.find_order(&order_id).await? {
        Some(order) => match order.user_id {
            Some(id) => state.users.find_by_id(id).await?,
            None => state.users.find_by_email(&order.email).await?,
        },
        None => None,
    };

    let response = match user {
        Some(user) => {
            info!(order_id = %order_id, user_id = %user.id, "payment verified");
            let sub = user.subscription();
            VerifyPaymentResponse {
                success: true,
                user: Some(PaymentUser {
                    id: user.id,
                    email: user.email,
                    is_subscribed: sub.is_subscribed,
                    plan_type: sub.plan_type,
                }),
                message: None,
            }
        }
        None => {
            info!(order_id = %order_id, "payment verified before user exists");
            VerifyPaymentResponse {
                success: true,
                user: None,
                message: Some(USER_NOT_FOUND_YET.into()),
            }
        }
    };
    Ok(Json(response))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state.users.find_by_id(user_id).await?.ok_or_else(|| {
        warn!(user_id = %user_id, "token for missing user");
        ApiError::unauthorized("User not found")
    })?;
    Ok(Json(user.into()))
}
