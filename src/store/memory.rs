use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{NewUser, User, UserStore};

/// In-memory user store used by tests and local development without a
/// database.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored record, for asserting on persisted state.
    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().expect("store lock").get(&id).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().expect("store lock").get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .expect("store lock")
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_identifier(
        &self,
        email: Option<&str>,
        username: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .expect("store lock")
            .values()
            .find(|u| {
                email.is_some_and(|e| u.email == e)
                    || username.is_some_and(|n| u.username == n)
            })
            .cloned())
    }

    async fn find_by_reset_token(&self, token_hash: &str) -> anyhow::Result<Option<User>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .users
            .lock()
            .expect("store lock")
            .values()
            .find(|u| {
                u.password_reset_token.as_deref() == Some(token_hash)
                    && u.password_reset_expires.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.users
            .lock()
            .expect("store lock")
            .insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> anyhow::Result<()> {
        let mut users = self.users.lock().expect("store lock");
        anyhow::ensure!(users.contains_key(&user.id), "no such user");
        users.insert(user.id, user.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;
    use time::Duration;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_and_find_by_either_identifier() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("ann", "ann@x.com")).await.unwrap();

        let by_email = store
            .find_by_identifier(Some("ann@x.com"), None)
            .await
            .unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(created.id));

        let by_username = store
            .find_by_identifier(None, Some("ann"))
            .await
            .unwrap();
        assert_eq!(by_username.map(|u| u.id), Some(created.id));

        let miss = store.find_by_identifier(Some("bob@x.com"), None).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn reset_token_lookup_ignores_expired_tokens() {
        let store = MemoryUserStore::new();
        let mut user = store.create(new_user("ann", "ann@x.com")).await.unwrap();
        user.password_reset_token = Some("abc123".into());
        user.password_reset_expires = Some(OffsetDateTime::now_utc() - Duration::minutes(1));
        store.save(&user).await.unwrap();

        assert!(store.find_by_reset_token("abc123").await.unwrap().is_none());

        user.password_reset_expires = Some(OffsetDateTime::now_utc() + Duration::minutes(10));
        store.save(&user).await.unwrap();
        assert!(store.find_by_reset_token("abc123").await.unwrap().is_some());
    }
}
