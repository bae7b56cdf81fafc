use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::{NewOrder, NewUser, Order, SubscriptionPatch, User};

/// Persistent user/order state. Every write is a single statement or a
/// single transaction.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;
    /// Insert `user` and attach the unclaimed order to it together. `None`,
    /// with nothing written, if the order is already taken.
    async fn create_claiming_order(&self, user: NewUser, order_id: &str)
        -> anyhow::Result<Option<User>>;
    /// Insert unless the email exists. Returns the new row, or `None` if
    /// someone else owns the email already.
    async fn create_if_absent(&self, email: &str, password_hash: &str)
        -> anyhow::Result<Option<User>>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()>;
    /// Mark the owner of `token` verified and clear the token in one step.
    async fn consume_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;
    /// Write only the columns set in `patch`.
    async fn patch_subscription(&self, id: Uuid, patch: &SubscriptionPatch)
        -> anyhow::Result<()>;
    async fn upsert_order(&self, order: &NewOrder) -> anyhow::Result<()>;
    async fn find_order(&self, order_id: &str) -> anyhow::Result<Option<Order>>;
    /// Attach an unclaimed order to a user. `false` if it was already taken.
    async fn claim_order(&self, order_id: &str, user_id: Uuid) -> anyhow::Result<bool>;
}

const USER_COLUMNS: &str = "id, email, password_hash, email_verified, \
     verification_token_expires, subscription_id, customer_id, variant_id, \
     subscription_status, is_subscribed, current_period_end, plan_type, payment_status, \
     created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, email, total_formatted, status, user_id, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, verification_token, verification_token_expires)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.verification_token)
            .bind(user.verification_token_expires)
            .fetch_one(&self.db)
            .await
            .context("insert user")?;
        Ok(user)
    }

    async fn create_claiming_order(
        &self,
        user: NewUser,
        order_id: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut tx = self.db.begin().await.context("begin account transaction")?;

        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, verification_token, verification_token_expires)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.verification_token)
            .bind(user.verification_token_expires)
            .fetch_one(&mut *tx)
            .await
            .context("insert user")?;

        let claimed = sqlx::query("UPDATE orders SET user_id = $2 WHERE id = $1 AND user_id IS NULL")
            .bind(order_id)
            .bind(created.id)
            .execute(&mut *tx)
            .await
            .context("claim order")?;
        if claimed.rows_affected() != 1 {
            tx.rollback().await.context("roll back account")?;
            return Ok(None);
        }

        tx.commit().await.context("commit account")?;
        Ok(Some(created))
    }

    async fn create_if_absent(
        &self,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(password_hash)
            .fetch_optional(&self.db)
            .await
            .context("insert user if absent")?;
        Ok(user)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("update password")?;
        Ok(())
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET verification_token = $2, verification_token_expires = $3, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires)
        .execute(&self.db)
        .await
        .context("set verification token")?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
               SET email_verified = TRUE,
                   verification_token = NULL,
                   verification_token_expires = NULL,
                   updated_at = now()
             WHERE verification_token = $1
               AND verification_token_expires > $2
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("consume verification token")?;
        Ok(user)
    }

    async fn patch_subscription(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
    ) -> anyhow::Result<()> {
        let mut query = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = now()");
        if let Some(v) = &patch.subscription_id {
            query.push(", subscription_id = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.customer_id {
            query.push(", customer_id = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.variant_id {
            query.push(", variant_id = ").push_bind(v.clone());
        }
        if let Some(v) = &patch.subscription_status {
            query.push(", subscription_status = ").push_bind(v.clone());
        }
        if let Some(v) = patch.is_subscribed {
            query.push(", is_subscribed = ").push_bind(v);
        }
        if let Some(v) = patch.current_period_end {
            query.push(", current_period_end = ").push_bind(v);
        }
        if let Some(v) = patch.plan_type {
            query
                .push(", plan_type = ")
                .push_bind(v.map(|p| p.as_str().to_string()));
        }
        if let Some(v) = &patch.payment_status {
            query.push(", payment_status = ").push_bind(v.clone());
        }
        query.push(" WHERE id = ").push_bind(id);

        query
            .build()
            .execute(&self.db)
            .await
            .context("patch subscription")?;
        Ok(())
    }

    async fn upsert_order(&self, order: &NewOrder) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, email, total_formatted, status)
            VALUES ($1, $2, $3, $4, 'created')
            ON CONFLICT (id) DO UPDATE
               SET order_number = EXCLUDED.order_number,
                   email = EXCLUDED.email,
                   total_formatted = EXCLUDED.total_formatted
            "#,
        )
        .bind(&order.id)
        .bind(order.order_number)
        .bind(&order.email)
        .bind(&order.total_formatted)
        .execute(&self.db)
        .await
        .context("upsert order")?;
        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> anyhow::Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_id)
            .fetch_optional(&self.db)
            .await
            .context("find order")?;
        Ok(order)
    }

    async fn claim_order(&self, order_id: &str, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE orders SET user_id = $2 WHERE id = $1 AND (user_id IS NULL OR user_id = $2)",
        )
        .bind(order_id)
        .bind(user_id)
        .execute(&self.db)
        .await
        .context("claim order")?;
        Ok(res.rows_affected() == 1)
    }
}
