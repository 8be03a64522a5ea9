//! Authentication: credential checks and session tokens
//!
//! Credentials and live authentications are held in memory. Passwords are
//! kept only as SHA-256 digests.

use std::collections::HashMap;

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::{Authentication, Credentials};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("user id and password are required")]
    Invalid,
    #[error("user {0} is already registered")]
    UserExists(String),
    #[error("unknown user {0}")]
    UnknownUser(String),
}

struct StoredCredentials {
    user_id: String,
    digest: [u8; 32],
}

fn digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// 32 random bytes, hex encoded
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct AuthService {
    credentials: RwLock<Vec<StoredCredentials>>,
    /// keyed by token
    authentications: RwLock<HashMap<String, Authentication>>,
}

impl AuthService {
    pub fn new(users: &[(String, String)]) -> Self {
        let credentials = users
            .iter()
            .map(|(user_id, password)| StoredCredentials {
                user_id: user_id.clone(),
                digest: digest(password),
            })
            .collect();

        Self {
            credentials: RwLock::new(credentials),
            authentications: RwLock::new(HashMap::new()),
        }
    }

    /// Check credentials and, if they match, record a new authentication
    pub async fn authenticate_by_credentials(
        &self,
        credentials: &Credentials,
    ) -> Option<Authentication> {
        let presented = digest(&credentials.password);
        let user_id = self
            .credentials
            .read()
            .await
            .iter()
            .find(|c| c.user_id == credentials.user_id && c.digest == presented)
            .map(|c| c.user_id.clone());

        let Some(user_id) = user_id else {
            info!(user = %credentials.user_id, "login rejected");
            return None;
        };

        let auth = Authentication {
            id: generate_token(),
            date: Utc::now(),
            user: user_id,
        };
        self.authentications
            .write()
            .await
            .insert(auth.id.clone(), auth.clone());

        info!(user = %auth.user, "login");
        Some(auth)
    }

    pub async fn authenticate_by_token(&self, token: &str) -> Option<Authentication> {
        self.authentications.read().await.get(token).cloned()
    }

    /// Add a new user and log them in
    pub async fn register_user(&self, credentials: &Credentials) -> Result<Authentication, AuthError> {
        if credentials.user_id.trim().is_empty() || credentials.password.is_empty() {
            return Err(AuthError::Invalid);
        }

        {
            let mut stored = self.credentials.write().await;
            if stored.iter().any(|c| c.user_id == credentials.user_id) {
                return Err(AuthError::UserExists(credentials.user_id.clone()));
            }
            stored.push(StoredCredentials {
                user_id: credentials.user_id.clone(),
                digest: digest(&credentials.password),
            });
        }

        self.authenticate_by_credentials(credentials)
            .await
            .ok_or(AuthError::Invalid)
    }

    pub async fn change_password(
        &self,
        authentication: &Authentication,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if new_password.is_empty() {
            return Err(AuthError::Invalid);
        }

        let mut stored = self.credentials.write().await;
        let found = stored
            .iter_mut()
            .find(|c| c.user_id == authentication.user)
            .ok_or_else(|| AuthError::UnknownUser(authentication.user.clone()))?;
        found.digest = digest(new_password);

        info!(user = %authentication.user, "password changed");
        Ok(())
    }

    /// End a session (logout)
    pub async fn remove_authentication(&self, token: &str) {
        self.authentications.write().await.remove(token);
    }

    /// Remove a user's credentials and end all of their sessions
    pub async fn remove_user(&self, user_id: &str) {
        let removed = {
            let mut stored = self.credentials.write().await;
            let before = stored.len();
            stored.retain(|c| c.user_id != user_id);
            before != stored.len()
        };
        if !removed {
            warn!(user = %user_id, "remove_user: no such user");
            return;
        }

        self.authentications
            .write()
            .await
            .retain(|_, auth| auth.user != user_id);
        info!(user = %user_id, "user removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(user_id: &str, password: &str) -> Credentials {
        Credentials {
            user_id: user_id.to_string(),
            password: password.to_string(),
        }
    }

    fn service() -> AuthService {
        AuthService::new(&[("user@mac.com".to_string(), "Welcome123".to_string())])
    }

    #[tokio::test]
    async fn login_issues_a_token_that_authenticates() {
        let auth = service();
        let login = auth
            .authenticate_by_credentials(&creds("user@mac.com", "Welcome123"))
            .await
            .unwrap();

        assert_eq!(login.user, "user@mac.com");
        assert_eq!(login.id.len(), 64);
        assert_eq!(auth.authenticate_by_token(&login.id).await, Some(login.clone()));

        auth.remove_authentication(&login.id).await;
        assert_eq!(auth.authenticate_by_token(&login.id).await, None);
    }

    #[tokio::test]
    async fn wrong_password_or_user_is_rejected() {
        let auth = service();
        assert!(auth
            .authenticate_by_credentials(&creds("user@mac.com", "welcome123"))
            .await
            .is_none());
        assert!(auth
            .authenticate_by_credentials(&creds("nobody@mac.com", "Welcome123"))
            .await
            .is_none());
        assert!(auth.authenticate_by_token("not-a-token").await.is_none());
    }

    #[tokio::test]
    async fn register_then_change_password() {
        let auth = service();
        let session = auth.register_user(&creds("new@x.com", "pw1")).await.unwrap();
        assert!(matches!(
            auth.register_user(&creds("new@x.com", "other")).await,
            Err(AuthError::UserExists(_))
        ));

        auth.change_password(&session, "pw2").await.unwrap();
        assert!(auth
            .authenticate_by_credentials(&creds("new@x.com", "pw1"))
            .await
            .is_none());
        assert!(auth
            .authenticate_by_credentials(&creds("new@x.com", "pw2"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn removing_a_user_ends_their_sessions() {
        let auth = service();
        let session = auth
            .authenticate_by_credentials(&creds("user@mac.com", "Welcome123"))
            .await
            .unwrap();

        auth.remove_user("user@mac.com").await;

        assert!(auth.authenticate_by_token(&session.id).await.is_none());
        assert!(auth
            .authenticate_by_credentials(&creds("user@mac.com", "Welcome123"))
            .await
            .is_none());
        assert!(matches!(
            auth.change_password(&session, "x").await,
            Err(AuthError::UnknownUser(_))
        ));
    }
}
