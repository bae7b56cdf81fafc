use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::checkout::{CheckoutProvider, LemonSqueezyClient};
use crate::config::AppConfig;
use crate::notify::{Mailer, MailgunMailer};
use crate::users::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub checkout: Arc<dyn CheckoutProvider>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        // Run migrations if present
        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let users = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;
        let mailer = Arc::new(MailgunMailer::new(config.mailgun.clone())) as Arc<dyn Mailer>;
        let checkout = Arc::new(LemonSqueezyClient::new(config.lemonsqueezy.clone()))
            as Arc<dyn CheckoutProvider>;

        Ok(Self::from_parts(users, config, mailer, checkout))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        config: Arc<AppConfig>,
        mailer: Arc<dyn Mailer>,
        checkout: Arc<dyn CheckoutProvider>,
    ) -> Self {
        Self {
            users,
            config,
            mailer,
            checkout,
        }
    }
}
