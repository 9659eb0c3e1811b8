//! Session middleware configuration.
//!
//! Session cookies are signed with a key derived from
//! `STOREFRONT_SESSION_SECRET`. The store is `PostgreSQL` in production and
//! any `SessionStore` in tests.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};
use sqlx::PgPool;
use tower_sessions::cookie::{Key, SameSite};
use tower_sessions::service::SignedCookie;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};
use tower_sessions_sqlx_store::PostgresStore;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "orchard_session";

/// Session expiry time in seconds (7 days).
const SESSION_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// `PostgreSQL` session store. The table is created by migration.
#[must_use]
pub fn postgres_store(pool: &PgPool) -> PostgresStore {
    PostgresStore::new(pool.clone())
}

/// Create the session layer over `store`.
///
/// Cookies are `Secure` when `base_url` is HTTPS.
#[must_use]
pub fn create_session_layer<S>(
    store: S,
    base_url: &str,
    secret: &SecretString,
) -> SessionManagerLayer<S, SignedCookie>
where
    S: SessionStore + Clone,
{
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(base_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
        .with_signed(signing_key(secret))
}

/// 64-byte cookie signing key derived from the session secret.
fn signing_key(secret: &SecretString) -> Key {
    let digest = Sha512::digest(secret.expose_secret().as_bytes());
    Key::from(digest.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_is_deterministic() {
        let secret = SecretString::from("k7Qz!p2Lx9#vR4mN8wT1yB6cF3hJ5dG0");
        assert_eq!(
            signing_key(&secret).master(),
            signing_key(&secret).master()
        );
        let other = SecretString::from("a different but equally long secret!");
        assert_ne!(signing_key(&secret).master(), signing_key(&other).master());
    }
}
