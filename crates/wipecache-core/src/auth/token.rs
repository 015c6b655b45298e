use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "wipecache";

/// API tokens kept in the OS keychain, one per scope.
///
/// The token is an opaque bearer credential handed to the HTTP adapter; this
/// crate never inspects it.
pub struct TokenStore;

impl TokenStore {
    /// Store the API token for a scope
    pub fn store(scope: &str, token: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, scope).context("Failed to create keyring entry")?;
        entry
            .set_password(token)
            .context("Failed to store token in keychain")?;
        Ok(())
    }

    pub fn get(scope: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, scope).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve token from keychain")
    }

    /// Remove the stored token for a scope
    pub fn delete(scope: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, scope).context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete token from keychain")?;
        Ok(())
    }

    pub fn has_token(scope: &str) -> bool {
        Entry::new(SERVICE_NAME, scope)
            .and_then(|entry| entry.get_password())
            .is_ok()
    }
}
