use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

/// Closed set of account roles. Restriction is a membership test, not a
/// hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Membership test backing role restriction.
    pub fn permits(self, allowed: &[Role]) -> bool {
        allowed.contains(&self)
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    #[serde(skip)]
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip)]
    pub password_reset_token: Option<String>,
    #[serde(skip)]
    pub password_reset_expires: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    /// True when the password changed after the given JWT issued-at
    /// timestamp, meaning tokens minted before the change are stale.
    pub fn changed_password_after(&self, issued_at: usize) -> bool {
        match self.password_changed_at {
            Some(changed) => changed.unix_timestamp() as usize > issued_at,
            None => false,
        }
    }
}

/// Fields required to create a user. The password arrives here already
/// hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Persistent collection of user records. Postgres in production, in-memory
/// in tests.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Lookup by email or username, whichever is supplied.
    async fn find_by_identifier(
        &self,
        email: Option<&str>,
        username: Option<&str>,
    ) -> anyhow::Result<Option<User>>;

    /// Lookup by hashed reset token, restricted to tokens that have not yet
    /// expired.
    async fn find_by_reset_token(&self, token_hash: &str) -> anyhow::Result<Option<User>>;

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User>;

    /// Persist the mutable fields of an existing user (password hash,
    /// password-changed timestamp, reset token state, role, username).
    async fn save(&self, user: &User) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn user_with_changed_at(changed_at: Option<OffsetDateTime>) -> User {
        User {
            id: Uuid::new_v4(),
            username: "ann".into(),
            email: "ann@x.com".into(),
            password_hash: "hash".into(),
            role: Role::User,
            password_changed_at: changed_at,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn never_changed_password_is_not_stale() {
        let user = user_with_changed_at(None);
        assert!(!user.changed_password_after(0));
    }

    #[test]
    fn token_issued_before_change_is_stale() {
        let changed = OffsetDateTime::now_utc();
        let user = user_with_changed_at(Some(changed));
        let issued_at = (changed - Duration::minutes(5)).unix_timestamp() as usize;
        assert!(user.changed_password_after(issued_at));
    }

    #[test]
    fn token_issued_after_change_is_fresh() {
        let changed = OffsetDateTime::now_utc();
        let user = user_with_changed_at(Some(changed));
        let issued_at = (changed + Duration::minutes(5)).unix_timestamp() as usize;
        assert!(!user.changed_password_after(issued_at));
    }

    #[test]
    fn role_permits_is_set_membership() {
        assert!(Role::Admin.permits(&[Role::Admin]));
        assert!(!Role::User.permits(&[Role::Admin]));
        assert!(Role::User.permits(&[Role::User, Role::Admin]));
    }

    #[test]
    fn user_serialization_strips_secrets() {
        let mut user = user_with_changed_at(None);
        user.password_reset_token = Some("deadbeef".into());
        let json = serde_json::to_value(&user).expect("serialize user");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_reset_token").is_none());
        assert_eq!(json["email"], "ann@x.com");
    }
}
