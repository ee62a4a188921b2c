//! Credential storage
//!
//! [`CredentialRepository`] is the seam for persistent backends. The
//! in-memory implementation keys credentials by owner (one credential per
//! user) with a secondary index from credential ID to owner. All mutations
//! happen under the owning entry's shard lock, so counter checks and
//! updates are a single atomic read-modify-write per credential.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::errors::{CounterError, RepositoryError};
use super::types::{Credential, CredentialPublicKey};

/// Whether `presented` may replace `stored` as a credential's signature counter
///
/// The counter must strictly increase. Authenticators that do not implement
/// counters always report zero; a stored zero followed by a reported zero is
/// accepted for them.
#[must_use]
pub fn counter_advances(stored: u32, presented: u32) -> bool {
    presented > stored || (stored == 0 && presented == 0)
}

/// Logical credential store
///
/// Implementations must make `put` and `advance_counter` atomic per
/// credential. Single-credential policy: an owner holds at most one
/// credential; allowing several devices means keying by
/// `(owner, credential_id)` instead.
pub trait CredentialRepository: Send + Sync {
    /// Insert a new credential for `owner`
    ///
    /// # Errors
    /// Returns [`RepositoryError::AlreadyExists`] if the owner already has a
    /// credential or the credential ID is taken.
    fn put(
        &self,
        owner: &str,
        credential_id: Vec<u8>,
        public_key: CredentialPublicKey,
        initial_counter: u32,
    ) -> Result<Credential, RepositoryError>;

    /// The credential registered to `owner`, if any
    fn get(&self, owner: &str) -> Option<Credential>;

    /// Look a credential up by its ID
    fn find_by_id(&self, credential_id: &[u8]) -> Option<Credential>;

    /// Replace the stored signature counter if `new_counter` advances it
    ///
    /// # Errors
    /// - [`CounterError::ReplaySuspected`] if the counter does not advance
    /// - [`CounterError::UnknownCredential`] if no such credential exists
    fn advance_counter(&self, credential_id: &[u8], new_counter: u32) -> Result<(), CounterError>;
}

/// Process-local credential repository
#[derive(Default)]
pub struct InMemoryCredentialRepository {
    by_owner: DashMap<String, Credential>,
    owner_by_id: DashMap<Vec<u8>, String>,
}

impl InMemoryCredentialRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_owner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }

    fn owner_of(&self, credential_id: &[u8]) -> Option<String> {
        self.owner_by_id.get(credential_id).map(|owner| owner.clone())
    }
}

impl CredentialRepository for InMemoryCredentialRepository {
    fn put(
        &self,
        owner: &str,
        credential_id: Vec<u8>,
        public_key: CredentialPublicKey,
        initial_counter: u32,
    ) -> Result<Credential, RepositoryError> {
        // Lock order: owner entry, then ID index
        let Entry::Vacant(slot) = self.by_owner.entry(owner.to_string()) else {
            return Err(RepositoryError::AlreadyExists);
        };
        let Entry::Vacant(index) = self.owner_by_id.entry(credential_id.clone()) else {
            return Err(RepositoryError::AlreadyExists);
        };

        let credential = Credential {
            credential_id,
            owner_identity: owner.to_string(),
            public_key,
            signature_counter: initial_counter,
            created_at: Utc::now(),
            last_used: None,
        };
        index.insert(owner.to_string());
        slot.insert(credential.clone());
        Ok(credential)
    }

    fn get(&self, owner: &str) -> Option<Credential> {
        self.by_owner.get(owner).map(|credential| credential.clone())
    }

    fn find_by_id(&self, credential_id: &[u8]) -> Option<Credential> {
        let owner = self.owner_of(credential_id)?;
        self.get(&owner)
    }

    fn advance_counter(&self, credential_id: &[u8], new_counter: u32) -> Result<(), CounterError> {
        let owner = self
            .owner_of(credential_id)
            .ok_or(CounterError::UnknownCredential)?;
        let mut credential = self
            .by_owner
            .get_mut(&owner)
            .ok_or(CounterError::UnknownCredential)?;

        let stored = credential.signature_counter;
        if !counter_advances(stored, new_counter) {
            return Err(CounterError::ReplaySuspected {
                stored,
                presented: new_counter,
            });
        }
        credential.signature_counter = new_counter;
        credential.last_used = Some(Utc::now());
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryCredentialRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCredentialRepository")
            .field("credentials", &self.by_owner.len())
            .finish()
    }
}
