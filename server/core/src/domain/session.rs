// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sessions
//!
//! A [`Session`] is one ordered channel of operations for a client. The
//! per-client [`SessionSet`] keeps them in creation order and addresses them
//! by position. Removal compacts the set, so an index handed out earlier
//! may later name a different session or nothing at all; a lookup always
//! reflects current membership.
//!
//! Exactly-once execution over a session is handled above this crate.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::client::ClientId;

/// Opaque session identifier (`sessionid4` is 16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    client_id: ClientId,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(client_id: ClientId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            client_id,
            created_at,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Owning client; resolve it through the registry.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Ordered, index-addressable collection of a client's sessions.
#[derive(Debug, Default)]
pub struct SessionSet {
    sessions: RwLock<Vec<Arc<Session>>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the index the session landed at.
    pub fn push(&self, session: Arc<Session>) -> usize {
        let mut sessions = self.sessions.write();
        sessions.push(session);
        sessions.len() - 1
    }

    /// Remove by identity. Returns `false` if the session was not a member.
    pub fn remove(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.iter().position(|s| s.id() == session.id()) {
            Some(pos) => {
                sessions.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove whatever currently sits at `index`.
    pub fn remove_at(&self, index: usize) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        if index >= sessions.len() {
            return None;
        }
        Some(sessions.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<Arc<Session>> {
        self.sessions.read().get(index).cloned()
    }

    pub fn find(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().iter().find(|s| s.id() == *id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().clone()
    }

    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.write();
        let count = sessions.len();
        sessions.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
