use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo::UserStore;
use crate::users::repo_types::{status, NewOrder, NewUser, Order, SubscriptionPatch, User};

#[derive(Clone)]
struct Row {
    user: User,
    token: Option<String>,
}

/// Store used by unit and router tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, Row>>,
    orders: Mutex<HashMap<String, Order>>,
    yield_after_read: bool,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads return a snapshot and then yield to the runtime, like a query
    /// whose result is already stale when the caller acts on it.
    pub fn yielding() -> Self {
        Self {
            yield_after_read: true,
            ..Self::default()
        }
    }

    async fn round_trip(&self) {
        if self.yield_after_read {
            tokio::task::yield_now().await;
        }
    }

    fn insert(users: &mut HashMap<Uuid, Row>, user: NewUser) -> User {
        let now = OffsetDateTime::now_utc();
        let row = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            email_verified: false,
            verification_token_expires: user.verification_token_expires,
            subscription_id: None,
            customer_id: None,
            variant_id: None,
            subscription_status: status::NONE.to_string(),
            is_subscribed: false,
            current_period_end: None,
            plan_type: None,
            payment_status: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(
            row.id,
            Row {
                user: row.clone(),
                token: user.verification_token,
            },
        );
        row
    }

    fn with_row<F: FnOnce(&mut Row)>(&self, id: Uuid, f: F) {
        if let Some(row) = self.users.lock().expect("users lock").get_mut(&id) {
            f(row);
            row.user.updated_at = OffsetDateTime::now_utc();
        }
    }

    pub fn mark_verified(&self, id: Uuid) {
        self.with_row(id, |r| r.user.email_verified = true);
    }

    pub fn verification_token_of(&self, id: Uuid) -> Option<String> {
        self.users
            .lock()
            .expect("users lock")
            .get(&id)
            .and_then(|r| r.token.clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let found = {
            let users = self.users.lock().expect("users lock");
            users
                .values()
                .find(|r| r.user.email == email)
                .map(|r| r.user.clone())
        };
        self.round_trip().await;
        Ok(found)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let found = self
            .users
            .lock()
            .expect("users lock")
            .get(&id)
            .map(|r| r.user.clone());
        self.round_trip().await;
        Ok(found)
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.lock().expect("users lock");
        if users.values().any(|r| r.user.email == user.email) {
            anyhow::bail!("duplicate email {}", user.email);
        }
        Ok(Self::insert(&mut users, user))
    }

    async fn create_claiming_order(
        &self,
        user: NewUser,
        order_id: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().expect("users lock");
        let mut orders = self.orders.lock().expect("orders lock");
        if users.values().any(|r| r.user.email == user.email) {
            anyhow::bail!("duplicate email {}", user.email);
        }
        let Some(order) = orders.get_mut(order_id).filter(|o| o.user_id.is_none()) else {
            return Ok(None);
        };
        let created = Self::insert(&mut users, user);
        order.user_id = Some(created.id);
        Ok(Some(created))
    }

    async fn create_if_absent(
        &self,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().expect("users lock");
        if users.values().any(|r| r.user.email == email) {
            return Ok(None);
        }
        Ok(Some(Self::insert(
            &mut users,
            NewUser {
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                verification_token: None,
                verification_token_expires: None,
            },
        )))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        self.with_row(id, |r| r.user.password_hash = password_hash.to_string());
        Ok(())
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        self.with_row(id, |r| {
            r.token = Some(token.to_string());
            r.user.verification_token_expires = Some(expires);
        });
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().expect("users lock");
        let found = users.values_mut().find(|r| {
            r.token.as_deref() == Some(token)
                && r.user.verification_token_expires.is_some_and(|exp| exp > now)
        });
        Ok(found.map(|r| {
            r.token = None;
            r.user.email_verified = true;
            r.user.verification_token_expires = None;
            r.user.clone()
        }))
    }

    async fn patch_subscription(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
    ) -> anyhow::Result<()> {
        self.with_row(id, |r| {
            let next = patch.apply_to(&r.user.subscription());
            let u = &mut r.user;
            u.subscription_id = next.subscription_id;
            u.customer_id = next.customer_id;
            u.variant_id = next.variant_id;
            u.subscription_status = next.subscription_status;
            u.is_subscribed = next.is_subscribed;
            u.current_period_end = next.current_period_end;
            u.plan_type = next.plan_type.map(|p| p.as_str().to_string());
            u.payment_status = next.payment_status;
        });
        Ok(())
    }

    async fn upsert_order(&self, order: &NewOrder) -> anyhow::Result<()> {
        let mut orders = self.orders.lock().expect("orders lock");
        let entry = orders.entry(order.id.clone()).or_insert_with(|| Order {
            id: order.id.clone(),
            order_number: None,
            email: String::new(),
            total_formatted: None,
            status: "created".into(),
            user_id: None,
            created_at: OffsetDateTime::now_utc(),
        });
        entry.order_number = order.order_number;
        entry.email = order.email.clone();
        entry.total_formatted = order.total_formatted.clone();
        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> anyhow::Result<Option<Order>> {
        let found = self
            .orders
            .lock()
            .expect("orders lock")
            .get(order_id)
            .cloned();
        self.round_trip().await;
        Ok(found)
    }

    async fn claim_order(&self, order_id: &str, user_id: Uuid) -> anyhow::Result<bool> {
        let mut orders = self.orders.lock().expect("orders lock");
        match orders.get_mut(order_id) {
            Some(order) if order.user_id.is_none() || order.user_id == Some(user_id) => {
                order.user_id = Some(user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "x".into(),
            verification_token: None,
            verification_token_expires: None,
        }
    }

    #[tokio::test]
    async fn taken_order_blocks_account_creation() {
        let store = MemoryUserStore::new();
        store
            .upsert_order(&NewOrder {
                id: "5001".into(),
                order_number: None,
                email: "a@b.com".into(),
                total_formatted: None,
            })
            .await
            .unwrap();

        let first = store
            .create_claiming_order(new_user("a@b.com"), "5001")
            .await
            .unwrap()
            .unwrap();
        let second = store
            .create_claiming_order(new_user("c@d.com"), "5001")
            .await
            .unwrap();
        let unknown = store
            .create_claiming_order(new_user("e@f.com"), "nope")
            .await
            .unwrap();

        assert!(second.is_none());
        assert!(unknown.is_none());
        assert!(store.find_by_email("c@d.com").await.unwrap().is_none());
        assert!(store.find_by_email("e@f.com").await.unwrap().is_none());
        let order = store.find_order("5001").await.unwrap().unwrap();
        assert_eq!(order.user_id, Some(first.id));
    }
}
