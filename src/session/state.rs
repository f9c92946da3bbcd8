//! Session state machine
//!
//! Pure transitions over [`Session`] values. Nothing here touches the log or
//! any shared state; ordering across nodes comes from replaying the
//! session-state topic, not from these functions.

use super::types::{FullClientId, Instance, Session, SessionId};

/// Outcome of a session operation.
///
/// `Unchanged` is never an error: adding an instance that is already present
/// or removing one that is absent is a legal no-op and returns the input
/// session untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOpResult {
    /// Successful mutation
    Updated(Session),
    /// Legal no-op
    Unchanged(Session),
    /// Add refused by the connection quota
    InstanceLimitReached(Session),
    /// Producer instance offered to a consumer session or vice versa
    InstanceTypeForSessionIncorrect(Session),
    /// Lookup-style operation on an unknown session
    SessionNotFound(SessionId),
    /// Transport or asynchronous failure surfaced by the handler
    IncompleteOp(String),
}

impl SessionOpResult {
    /// Whether the operation left usable session state behind
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SessionOpResult::Updated(_) | SessionOpResult::Unchanged(_)
        )
    }

    /// The session carried by this result, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionOpResult::Updated(session)
            | SessionOpResult::Unchanged(session)
            | SessionOpResult::InstanceLimitReached(session)
            | SessionOpResult::InstanceTypeForSessionIncorrect(session) => Some(session),
            _ => None,
        }
    }
}

impl Session {
    /// Register an instance.
    ///
    /// Returns `InstanceTypeForSessionIncorrect` for a kind mismatch,
    /// `Unchanged` if the instance id is already present,
    /// `InstanceLimitReached` when the quota is exhausted, and otherwise
    /// `Updated` with the instance inserted.
    pub fn add_instance(&self, instance: Instance) -> SessionOpResult {
        if !instance.matches_kind(self.kind()) {
            return SessionOpResult::InstanceTypeForSessionIncorrect(self.clone());
        }
        let key = instance.full_client_id();
        if self.contains(&key) {
            return SessionOpResult::Unchanged(self.clone());
        }
        if !self.can_open_socket() {
            return SessionOpResult::InstanceLimitReached(self.clone());
        }
        let mut next = self.clone();
        next.instances_mut().insert(key, instance);
        SessionOpResult::Updated(next)
    }

    /// Deregister an instance by client id. Removing an absent instance is a
    /// no-op, which makes socket cleanup idempotent.
    pub fn remove_instance(&self, id: &FullClientId) -> SessionOpResult {
        if !self.contains(id) {
            return SessionOpResult::Unchanged(self.clone());
        }
        let mut next = self.clone();
        next.instances_mut().remove(id);
        SessionOpResult::Updated(next)
    }

    /// Whether another socket may register: true when the limit is disabled
    /// (zero) or the instance set is below it.
    pub fn can_open_socket(&self) -> bool {
        self.max_connections() == 0 || (self.len() as u32) < self.max_connections()
    }

    /// Insert an instance bypassing the quota check. Used only when folding
    /// log events: replay never drops an instance another node accepted, even
    /// if the result transiently violates the quota.
    pub(crate) fn force_add_instance(&mut self, instance: Instance) -> bool {
        let key = instance.full_client_id();
        if self.instances().contains_key(&key) {
            return false;
        }
        self.instances_mut().insert(key, instance);
        true
    }
}
