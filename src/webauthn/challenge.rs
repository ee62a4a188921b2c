//! One-time challenge storage
//!
//! One slot per `(identity, purpose)`: issuing replaces whatever was pending
//! in that slot, and consuming removes it atomically before any comparison,
//! so a challenge can be presented at most once whatever the outcome.
//! Consumed values are remembered until their window closes; presenting one
//! again reports `NotFound` even if a newer challenge now occupies the slot.
//! Expired entries are swept at most once per TTL, by whichever `issue`
//! call first finds the sweep due.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::crypto;
use super::errors::ChallengeError;
use super::types::{CeremonyPurpose, Challenge};

type SlotKey = (String, CeremonyPurpose);

/// In-memory store for pending challenges
pub struct ChallengeStore {
    ttl: Duration,
    pending: DashMap<SlotKey, Challenge>,
    retired: DashMap<Vec<u8>, DateTime<Utc>>,
    /// Unix millis after which the next `issue` sweeps expired entries
    next_sweep_at: AtomicI64,
}

impl ChallengeStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: DashMap::new(),
            retired: DashMap::new(),
            next_sweep_at: AtomicI64::new((Utc::now() + ttl).timestamp_millis()),
        }
    }

    /// Issue a fresh challenge for `identity`, replacing any unconsumed one
    /// of the same purpose
    ///
    /// # Errors
    /// Returns [`ChallengeError::EntropyUnavailable`] if the system random
    /// source fails.
    pub fn issue(
        &self,
        identity: &str,
        purpose: CeremonyPurpose,
    ) -> Result<Challenge, ChallengeError> {
        let value =
            crypto::random_bytes(crypto::CHALLENGE_LEN).map_err(|_| ChallengeError::EntropyUnavailable)?;
        let issued_at = Utc::now();
        self.sweep_if_due(issued_at);

        let challenge = Challenge {
            value,
            purpose,
            issued_at,
            expires_at: issued_at + self.ttl,
        };

        if self
            .pending
            .insert((identity.to_string(), purpose), challenge.clone())
            .is_some()
        {
            log::debug!("Replaced unconsumed {purpose} challenge for {identity}");
        }
        Ok(challenge)
    }

    /// Consume the pending challenge for `identity` and `purpose`
    ///
    /// The slot is cleared on every call, including failed ones.
    ///
    /// # Errors
    /// - [`ChallengeError::NotFound`] if nothing is pending, or `presented`
    ///   was already consumed
    /// - [`ChallengeError::Mismatch`] if `presented` differs from the pending value
    /// - [`ChallengeError::Expired`] if the pending challenge is past its window
    pub fn consume(
        &self,
        identity: &str,
        purpose: CeremonyPurpose,
        presented: &[u8],
    ) -> Result<(), ChallengeError> {
        let (_, challenge) = self
            .pending
            .remove(&(identity.to_string(), purpose))
            .ok_or(ChallengeError::NotFound)?;
        self.retired.insert(challenge.value.clone(), challenge.expires_at);

        if challenge.value != presented {
            if self.retired.contains_key(presented) {
                return Err(ChallengeError::NotFound);
            }
            return Err(ChallengeError::Mismatch);
        }
        if challenge.is_expired_at(Utc::now()) {
            return Err(ChallengeError::Expired);
        }
        Ok(())
    }

    fn sweep_if_due(&self, now: DateTime<Utc>) {
        let due = self.next_sweep_at.load(Ordering::Relaxed);
        if now.timestamp_millis() < due {
            return;
        }
        let next = (now + self.ttl).timestamp_millis();
        // One caller wins the sweep; the others carry on issuing
        if self
            .next_sweep_at
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_expired();
        }
    }

    /// Drop challenges whose window has passed
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.pending.retain(|_, challenge| !challenge.is_expired_at(now));
        self.retired.retain(|_, expires_at| *expires_at > now);
    }

    /// Number of challenges awaiting consumption
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("ttl", &self.ttl)
            .field("pending", &self.pending.len())
            .finish()
    }
}
