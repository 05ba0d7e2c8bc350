//! Bearer-token authentication against configured argon2 hashes

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tracing::debug;

use focusroom_core::{Error, Result, UserInfo};
use focusroom_net::Authenticator;

use crate::config::{ConfigError, UserEntry};

/// Hash a bearer token for the `token_hash` config field
pub fn hash_token(token: &str) -> std::result::Result<String, ConfigError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::Invalid(format!("failed to hash token: {}", e)))
}

/// Authenticator over the `[[users]]` table
pub struct TokenAuthenticator {
    users: Vec<UserEntry>,
}

impl TokenAuthenticator {
    pub fn new(users: Vec<UserEntry>) -> Self {
        Self { users }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserInfo> {
        if token.is_empty() {
            return Err(Error::AuthenticationRequired);
        }

        let argon2 = Argon2::default();
        for entry in &self.users {
            let Ok(parsed) = PasswordHash::new(&entry.token_hash) else {
                continue;
            };
            if argon2.verify_password(token.as_bytes(), &parsed).is_ok() {
                debug!(user_id = %entry.user_id, "Token accepted");
                return Ok(UserInfo {
                    user_id: entry.user_id,
                    email: entry.email.clone(),
                });
            }
        }

        Err(Error::AuthenticationRequired)
    }
}
