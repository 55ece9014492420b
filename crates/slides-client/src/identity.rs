use slides_db::LocalStorage;
use tracing::info;

use crate::error::ClientError;

/// Key the nickname is persisted under.
pub const NICKNAME_KEY: &str = "collab-slides-nickname";

/// The nickname this device edits under. There are no accounts: whoever
/// holds a nickname is that user.
pub struct IdentityStore {
    storage: LocalStorage,
    nickname: String,
}

impl IdentityStore {
    pub fn open(storage: LocalStorage) -> Result<Self, ClientError> {
        let nickname = storage.get_item(NICKNAME_KEY)?.unwrap_or_default();
        Ok(Self { storage, nickname })
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn has_nickname(&self) -> bool {
        !self.nickname.trim().is_empty()
    }

    /// Trim and persist. An empty nickname is refused and storage is left
    /// as it was.
    pub fn set_nickname(&mut self, name: &str) -> Result<&str, ClientError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ClientError::EmptyNickname);
        }

        self.storage.set_item(NICKNAME_KEY, trimmed)?;
        self.nickname = trimmed.to_string();
        info!("Nickname set to {}", self.nickname);
        Ok(&self.nickname)
    }

    pub fn clear_nickname(&mut self) -> Result<(), ClientError> {
        self.storage.remove_item(NICKNAME_KEY)?;
        self.nickname.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let identity = IdentityStore::open(LocalStorage::open_in_memory().unwrap()).unwrap();
        assert_eq!(identity.nickname(), "");
        assert!(!identity.has_nickname());
    }

    #[test]
    fn set_trims_and_persists() {
        let storage = LocalStorage::open_in_memory().unwrap();
        let mut identity = IdentityStore::open(storage).unwrap();

        assert_eq!(identity.set_nickname("  ada  ").unwrap(), "ada");
        assert!(identity.has_nickname());
        assert_eq!(
            identity.storage.get_item(NICKNAME_KEY).unwrap().as_deref(),
            Some("ada")
        );
    }

    #[test]
    fn blank_nickname_is_rejected_and_keeps_previous() {
        let mut identity = IdentityStore::open(LocalStorage::open_in_memory().unwrap()).unwrap();
        identity.set_nickname("grace").unwrap();

        let err = identity.set_nickname("   ").unwrap_err();
        assert!(matches!(err, ClientError::EmptyNickname));
        assert_eq!(err.to_string(), "Nickname cannot be empty");
        assert_eq!(identity.nickname(), "grace");
        assert_eq!(
            identity.storage.get_item(NICKNAME_KEY).unwrap().as_deref(),
            Some("grace")
        );
    }

    #[test]
    fn reopening_restores_the_stored_nickname() {
        let storage = LocalStorage::open_in_memory().unwrap();
        storage.set_item(NICKNAME_KEY, "linus").unwrap();

        let mut identity = IdentityStore::open(storage).unwrap();
        assert_eq!(identity.nickname(), "linus");

        identity.clear_nickname().unwrap();
        assert!(!identity.has_nickname());
        assert_eq!(identity.storage.get_item(NICKNAME_KEY).unwrap(), None);
    }
}
