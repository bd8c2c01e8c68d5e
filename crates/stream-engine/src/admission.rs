//! Single-active-session admission control.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use findr_common::{FindrError, FindrResult};

/// Opaque session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id received from a client. Malformed ids cannot name a
    /// session, so they are reported as not found.
    pub fn parse(raw: &str) -> FindrResult<Self> {
        raw.parse()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = FindrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| FindrError::session_not_found(s))
    }
}

/// Process-wide gate admitting at most one session.
///
/// Every operation holds the lock only for a check-and-set; nothing here
/// calls into pipelines or does I/O.
#[derive(Debug, Default)]
pub struct SessionAdmission {
    active: Mutex<Option<SessionId>>,
}

impl SessionAdmission {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<SessionId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `id` if no session is active. Returns false and changes nothing
    /// otherwise.
    pub fn try_acquire(&self, id: SessionId) -> bool {
        let mut slot = self.slot();
        if slot.is_some() {
            return false;
        }
        *slot = Some(id);
        true
    }

    /// Clear the active session if it is `id`. A stale release for any
    /// other id is ignored. Returns whether the slot was cleared.
    pub fn release(&self, id: SessionId) -> bool {
        let mut slot = self.slot();
        if *slot == Some(id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    pub fn current(&self) -> Option<SessionId> {
        *self.slot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected() {
        let admission = SessionAdmission::new();
        let (a, b) = (SessionId::new(), SessionId::new());

        assert!(admission.try_acquire(a));
        assert!(!admission.try_acquire(b));
        assert_eq!(admission.current(), Some(a));
    }

    #[test]
    fn test_stale_release_is_ignored() {
        let admission = SessionAdmission::new();
        let (old, new) = (SessionId::new(), SessionId::new());

        assert!(admission.try_acquire(old));
        assert!(admission.release(old));
        assert!(admission.try_acquire(new));

        assert!(!admission.release(old));
        assert_eq!(admission.current(), Some(new));
        assert!(admission.is_active());
    }

    #[test]
    fn test_session_id_parsing() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(&id.to_string()).unwrap(), id);

        let err = SessionId::parse("not-a-uuid").unwrap_err();
        assert!(matches!(err, FindrError::SessionNotFound { .. }));
    }
}
