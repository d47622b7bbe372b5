//! Collaborator interfaces for the persistent access log and the identity
//! directory.

use crate::error::StoreError;
use crate::types::{AccessEvent, EventKind, IdentityId, LastEvent, Profile};

/// Append-only access log.
///
/// Both operations are expected to be atomic and immediately consistent:
/// an event returned from `append` is visible to the next `last_event_for`.
pub trait AccessLog {
    fn append(&mut self, event: &AccessEvent) -> Result<(), StoreError>;

    /// Most recent event for `identity` whose kind is in `kinds`, in append order.
    fn last_event_for(
        &self,
        identity: IdentityId,
        kinds: &[EventKind],
    ) -> Result<Option<LastEvent>, StoreError>;
}

/// Profile lookup for matched identities.
pub trait ProfileDirectory {
    fn profile(&self, identity: IdentityId) -> Result<Option<Profile>, StoreError>;
}
