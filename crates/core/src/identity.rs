//! Pseudonymous session identities
//!
//! A participant is stored only as `identity_hash = HMAC-SHA256(secret, user_id || session_id)`.
//! The hash is stable for a given pair and cannot be mapped back to a user
//! without the server secret and the full user set.

use rand::seq::SliceRandom;
use rand::Rng;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the digest
pub const IDENTITY_HASH_LEN: usize = 32;

const ADJECTIVES: &[&str] = &[
    "Calm", "Bright", "Quiet", "Steady", "Swift", "Gentle", "Bold", "Clever", "Patient", "Keen",
    "Lucky", "Mellow", "Nimble", "Silent", "Sunny", "Brave",
];

const ANIMALS: &[&str] = &[
    "Otter", "Falcon", "Panda", "Heron", "Lynx", "Koala", "Badger", "Robin", "Turtle", "Fox",
    "Owl", "Dolphin", "Wren", "Moose", "Gecko", "Marten",
];

/// Derives per-session identities from real user ids
#[derive(Clone)]
pub struct IdentityHasher {
    keyed: HmacSha256,
}

impl IdentityHasher {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            keyed: HmacSha256::new_from_slice(secret.as_ref())
                .expect("HMAC accepts keys of any length"),
        }
    }

    /// Identity of `user_id` inside `session_id`
    pub fn hash(&self, user_id: Uuid, session_id: Uuid) -> String {
        let mut mac = self.keyed.clone();
        mac.update(user_id.as_bytes());
        mac.update(session_id.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex.truncate(IDENTITY_HASH_LEN);
        hex
    }
}

impl std::fmt::Debug for IdentityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHasher").finish_non_exhaustive()
    }
}

/// Random, human-readable display alias such as "Calm Otter 42"
pub fn generate_alias() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Calm");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Otter");
    let number: u8 = rng.gen_range(1..100);
    format!("{} {} {}", adjective, animal, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_per_pair() {
        let hasher = IdentityHasher::new("secret");
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();

        assert_eq!(hasher.hash(user, session), hasher.hash(user, session));
        assert_eq!(hasher.hash(user, session).len(), IDENTITY_HASH_LEN);
    }

    #[test]
    fn test_hash_differs_across_sessions_and_secrets() {
        let hasher = IdentityHasher::new("secret");
        let user = Uuid::new_v4();
        let a = hasher.hash(user, Uuid::new_v4());
        let b = hasher.hash(user, Uuid::new_v4());
        assert_ne!(a, b);

        let session = Uuid::new_v4();
        let other = IdentityHasher::new("another secret");
        assert_ne!(hasher.hash(user, session), other.hash(user, session));
    }

    #[test]
    fn test_hash_matches_hmac_sha256() {
        let user = Uuid::nil();
        let session = Uuid::from_u128(1);
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(user.as_bytes());
        mac.update(session.as_bytes());
        let expected: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        let hash = IdentityHasher::new("secret").hash(user, session);
        assert_eq!(hash, expected[..IDENTITY_HASH_LEN]);
    }

    #[test]
    fn test_empty_secret_still_keys() {
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let empty = IdentityHasher::new("");
        assert_eq!(empty.hash(user, session).len(), IDENTITY_HASH_LEN);
        assert_ne!(empty.hash(user, session), IdentityHasher::new("x").hash(user, session));
    }

    #[test]
    fn test_hash_does_not_contain_user_id() {
        let hasher = IdentityHasher::new("secret");
        let user = Uuid::new_v4();
        let hash = hasher.hash(user, Uuid::new_v4());
        assert!(!hash.contains(&user.simple().to_string()[..8]));
    }

    #[test]
    fn test_alias_shape() {
        let alias = generate_alias();
        let parts: Vec<&str> = alias.split(' ').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(ANIMALS.contains(&parts[1]));
        assert!(parts[2].parse::<u8>().is_ok());
    }
}
