//! Credential storage.
//!
//! `TokenStore` keeps the bearer token for each scope in the OS keychain via
//! keyring. `WIPECACHE_TOKEN` in the environment takes precedence.

pub mod token;

pub use token::TokenStore;

/// Environment variable that overrides the stored token.
pub const ENV_TOKEN: &str = "WIPECACHE_TOKEN";

/// Token for a scope: the environment first, then the keychain.
pub fn resolve_token(scope: &str) -> Option<String> {
    std::env::var(ENV_TOKEN)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| TokenStore::get(scope).ok())
}
