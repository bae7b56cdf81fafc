#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;

pub use repo::{PgUserStore, UserStore};
pub use repo_types::{NewOrder, NewUser, PlanType, SubscriptionPatch, User};
