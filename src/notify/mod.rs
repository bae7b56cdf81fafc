pub mod mailer;
pub mod templates;

use tracing::{info, warn};

pub use mailer::{Mailer, MailgunMailer};
pub use templates::Notification;

/// Best-effort send: failures are logged and swallowed.
pub async fn dispatch(mailer: &dyn Mailer, to: &str, notification: Notification) {
    let email = notification.render(to);
    match mailer.send(&email).await {
        Ok(()) => info!(to, kind = notification.kind(), "notification sent"),
        Err(e) => warn!(to, kind = notification.kind(), error = %e, "notification failed"),
    }
}
