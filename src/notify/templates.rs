use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::mailer::OutgoingEmail;

/// Transactional messages the service sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Verification { url: String },
    Welcome { login_url: String },
    SubscriptionConfirmed { app_url: String },
    SubscriptionCancelled { access_until: Option<OffsetDateTime> },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Verification { .. } => "verification",
            Notification::Welcome { .. } => "welcome",
            Notification::SubscriptionConfirmed { .. } => "subscription_confirmed",
            Notification::SubscriptionCancelled { .. } => "subscription_cancelled",
        }
    }

    pub fn render(&self, to: &str) -> OutgoingEmail {
        let (subject, body) = match self {
            Notification::Verification { url } => (
                "Verify your Spilll account".to_string(),
                format!(
                    "<h1>Welcome to Spilll!</h1>\
                     <p>Verify your email address to activate your account:</p>\
                     <p><a href=\"{url}\">Verify Email Address</a></p>\
                     <p>Or paste this link into your browser: {url}</p>\
                     <p>This link will expire in 24 hours.</p>"
                ),
            ),
            Notification::Welcome { login_url } => (
                "Welcome to Spilll!".to_string(),
                format!(
                    "<h1>Your account is verified</h1>\
                     <p>You can now sign in and start generating presets.</p>\
                     <p><a href=\"{login_url}\">Log In Now</a></p>"
                ),
            ),
            Notification::SubscriptionConfirmed { app_url } => (
                "Welcome to Spilll Premium!".to_string(),
                format!(
                    "<h1>Thank you for subscribing to Spilll!</h1>\
                     <p>You now have unlimited access to the preset generator.</p>\
                     <p><a href=\"{app_url}/app\">Start Creating Presets</a></p>"
                ),
            ),
            Notification::SubscriptionCancelled { access_until } => {
                let until = access_until
                    .and_then(|t| t.format(&Rfc3339).ok())
                    .map(|t| format!("<p>You keep access until {t}.</p>"))
                    .unwrap_or_default();
                (
                    "Your Spilll subscription was cancelled".to_string(),
                    format!(
                        "<h1>Subscription cancelled</h1>\
                         <p>We're sorry to see you go.</p>{until}"
                    ),
                )
            }
        };
        OutgoingEmail {
            to: to.to_string(),
            subject,
            html: body,
        }
    }
}
