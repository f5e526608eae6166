//! Authenticated sessions, keyed by connection.
//!
//! Membership in the registry is what separates the pre-auth phase from the
//! authenticated phase of a connection.

use crate::connection_manager::ConnectionId;
use crate::store::UserId;
use log::info;
use std::collections::BTreeMap;
use thiserror::Error;

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone)]
struct Session {
    identity: UserIdentity,
    /// Question served last and not yet answered.
    outstanding_question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connection {0} already holds a session")]
    AlreadyAuthenticated(ConnectionId),
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<ConnectionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `identity` to `connection`. A connection holds at most one
    /// session; a second call fails and leaves the first one in place.
    pub fn authenticate(
        &mut self,
        connection: ConnectionId,
        identity: UserIdentity,
    ) -> Result<(), SessionError> {
        if self.sessions.contains_key(&connection) {
            return Err(SessionError::AlreadyAuthenticated(connection));
        }

        info!("Connection {} logged in as {}", connection, identity.username);
        self.sessions.insert(
            connection,
            Session {
                identity,
                outstanding_question: None,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, connection: ConnectionId) -> Option<&UserIdentity> {
        self.sessions.get(&connection).map(|session| &session.identity)
    }

    /// Ends the session of `connection`, if it has one.
    pub fn revoke(&mut self, connection: ConnectionId) -> Option<UserIdentity> {
        self.sessions
            .remove(&connection)
            .map(|session| session.identity)
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    pub fn is_logged_in(&self, username: &str) -> bool {
        self.sessions
            .values()
            .any(|session| session.identity.username == username)
    }

    /// Display names of every session, in connection order.
    pub fn usernames(&self) -> Vec<String> {
        self.sessions
            .values()
            .map(|session| session.identity.username.clone())
            .collect()
    }

    /// Records the question just served to `connection`.
    pub fn serve_question(&mut self, connection: ConnectionId, question_id: String) {
        if let Some(session) = self.sessions.get_mut(&connection) {
            session.outstanding_question = Some(question_id);
        }
    }

    /// Clears the outstanding question if it is `question_id`, so each served
    /// question can be answered once. Returns whether it matched.
    pub fn claim_outstanding_question(
        &mut self,
        connection: ConnectionId,
        question_id: &str,
    ) -> bool {
        match self.sessions.get_mut(&connection) {
            Some(session) if session.outstanding_question.as_deref() == Some(question_id) => {
                session.outstanding_question = None;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
