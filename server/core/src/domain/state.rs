// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # State tokens and the per-client StateID registry
//!
//! A [`StateId`] names one open, lock or delegation grant. It is minted for a
//! single client and is opaque to everything but that client's record: the
//! `other` field packs the owning [`ClientId`] and a per-client counter, so
//! two clients can never mint the same token.
//!
//! [`StateRegistry`] only stores and retrieves. Deciding when a grant stops
//! being valid belongs to the layer that issued it.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** State token value object, state entity, per-client registry

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::client::ClientId;

/// Length of the opaque part of a state token.
pub const STATEID_OTHER_SIZE: usize = 12;

/// Opaque state token (`stateid4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId {
    pub seqid: u32,
    pub other: [u8; STATEID_OTHER_SIZE],
}

impl StateId {
    pub fn new(seqid: u32, other: [u8; STATEID_OTHER_SIZE]) -> Self {
        Self { seqid, other }
    }

    /// Mint the token for the `local_seq`-th state of `client_id`.
    pub fn for_client(client_id: ClientId, local_seq: u32) -> Self {
        let mut other = [0u8; STATEID_OTHER_SIZE];
        other[..8].copy_from_slice(&client_id.as_u64().to_be_bytes());
        other[8..].copy_from_slice(&local_seq.to_be_bytes());
        Self { seqid: 1, other }
    }

    /// Client id packed into the token, if it was minted by [`StateId::for_client`].
    pub fn client_id(&self) -> ClientId {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.other[..8]);
        ClientId::from_raw(u64::from_be_bytes(raw))
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:", self.seqid)?;
        for b in &self.other {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "]")
    }
}

/// What a state token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Open,
    Lock,
    Delegation,
}

/// One open, lock or delegation grant.
///
/// `owner` is a lookup key back to the owning client, never an owning pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nfs4State {
    state_id: StateId,
    owner: ClientId,
    kind: StateKind,
    created_at: DateTime<Utc>,
}

impl Nfs4State {
    pub fn new(state_id: StateId, owner: ClientId, kind: StateKind, created_at: DateTime<Utc>) -> Self {
        Self {
            state_id,
            owner,
            kind,
            created_at,
        }
    }

    pub fn state_id(&self) -> StateId {
        self.state_id
    }

    pub fn owner(&self) -> ClientId {
        self.owner
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Per-client map from [`StateId`] to state object.
///
/// Safe for the concurrent access a single client produces when it
/// pipelines operations over several sessions.
#[derive(Debug, Default)]
pub struct StateRegistry {
    states: RwLock<HashMap<StateId, Arc<Nfs4State>>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keyed by the state's own token. An existing entry is replaced.
    pub fn insert(&self, state: Arc<Nfs4State>) {
        self.states.write().insert(state.state_id(), state);
    }

    pub fn get(&self, state_id: &StateId) -> Option<Arc<Nfs4State>> {
        self.states.read().get(state_id).cloned()
    }

    pub fn remove(&self, state_id: &StateId) -> Option<Arc<Nfs4State>> {
        self.states.write().remove(state_id)
    }

    /// Drop every entry, returning how many were held.
    pub fn clear(&self) -> usize {
        let mut states = self.states.write();
        let count = states.len();
        states.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}
