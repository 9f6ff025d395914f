//! Identity provider boundary.
//!
//! The core only needs a stable `user.id` to key the tree it fetches. The
//! demo provider accepts any well-formed credentials and maps the demo
//! account to the fixed id `demo_user`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{AppError, AuthSuccess, Result, User};

pub const DEMO_EMAIL: &str = "demo@alma.com";
pub const DEMO_PASSWORD: &str = "demo123";
pub const DEMO_USER_ID: &str = "demo_user";

const MIN_PASSWORD_LEN: usize = 6;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<AuthSuccess>;

    async fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthSuccess>;
}

/// Accept-any-well-formed-credential provider used by the CLI and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoIdentityProvider;

impl DemoIdentityProvider {
    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
    }

    fn user_for(name: &str, email: &str) -> User {
        let email = email.trim().to_lowercase();
        let id = if email == DEMO_EMAIL {
            DEMO_USER_ID.to_string()
        } else {
            user_id_for(&email)
        };
        User {
            id,
            name: name.to_string(),
            email,
            avatar: None,
            created_at: Self::epoch(),
        }
    }
}

/// Stable user id derived from an email address.
#[must_use]
pub fn user_id_for(email: &str) -> String {
    let slug: String = email
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("user_{slug}")
}

fn is_well_formed_email(email: &str) -> bool {
    let email = email.trim();
    email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
}

fn display_name(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("friend")
        .to_string()
}

#[async_trait]
impl IdentityProvider for DemoIdentityProvider {
    async fn login(&self, email: &str, password: &str) -> Result<AuthSuccess> {
        if !is_well_formed_email(email) {
            return Err(AppError::Auth {
                message: "enter a valid email address".into(),
            });
        }
        if email.trim().eq_ignore_ascii_case(DEMO_EMAIL) && password != DEMO_PASSWORD {
            return Err(AppError::Auth {
                message: "wrong password for the demo account".into(),
            });
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::Auth {
                message: format!("password must have at least {MIN_PASSWORD_LEN} characters"),
            });
        }

        let name = if email.trim().eq_ignore_ascii_case(DEMO_EMAIL) {
            "Demo User".to_string()
        } else {
            display_name(email)
        };
        let user = Self::user_for(&name, email);
        tracing::info!(user_id = %user.id, "Logged in");
        Ok(AuthSuccess {
            success: true,
            user,
        })
    }

    async fn register(&self, name: &str, email: &str, password: &str) -> Result<AuthSuccess> {
        if name.trim().is_empty() {
            return Err(AppError::validation("name is required"));
        }
        if !is_well_formed_email(email) {
            return Err(AppError::validation("enter a valid email address"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "password must have at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let user = Self::user_for(name.trim(), email);
        tracing::info!(user_id = %user.id, "Registered");
        Ok(AuthSuccess {
            success: true,
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_login_is_stable() {
        let provider = DemoIdentityProvider;
        let first = provider.login(DEMO_EMAIL, DEMO_PASSWORD).await.unwrap();
        let second = provider.login(DEMO_EMAIL, DEMO_PASSWORD).await.unwrap();
        assert!(first.success);
        assert_eq!(first.user.id, "demo_user");
        assert_eq!(first.user, second.user);
    }

    #[tokio::test]
    async fn test_demo_wrong_password() {
        let err = DemoIdentityProvider.login(DEMO_EMAIL, "nope-nope").await.unwrap_err();
        assert!(matches!(err, AppError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_malformed_credentials() {
        let provider = DemoIdentityProvider;
        assert!(provider.login("not-an-email", "secret1").await.is_err());
        assert!(provider.login("a@b.com", "123").await.is_err());
        assert!(matches!(
            provider.register("", "a@b.com", "secret1").await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_login_and_register_agree_on_id() {
        let provider = DemoIdentityProvider;
        let registered = provider.register("Ana", "Ana@Example.com", "secret1").await.unwrap();
        let logged_in = provider.login("ana@example.com", "secret1").await.unwrap();
        assert_eq!(registered.user.id, logged_in.user.id);
        assert_eq!(registered.user.id, "user_ana_example_com");
    }
}
