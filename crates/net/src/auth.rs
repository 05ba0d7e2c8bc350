//! Connection authentication

use focusroom_core::{Result, UserInfo};

/// Resolves a bearer token to a caller.
///
/// Called once per connection during the handshake, on a blocking thread.
pub trait Authenticator: Send + Sync {
    /// `Error::AuthenticationRequired` when the token is unknown or expired
    fn authenticate(&self, token: &str) -> Result<UserInfo>;
}
