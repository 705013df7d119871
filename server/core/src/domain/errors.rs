// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! State-core error taxonomy.
//!
//! Every failure is returned synchronously to the dispatch layer; nothing in
//! this crate retries. [`StateError::status`] gives the protocol status the
//! dispatch layer should put on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::client::ClientId;
use crate::domain::state::StateId;

/// Errors raised by the client/state core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("stale client id {0}")]
    StaleClientId(ClientId),

    #[error("lease expired for client {0}")]
    LeaseExpired(ClientId),

    #[error("bad sequence id: expected {expected}, received {received}")]
    BadSequenceId { expected: u32, received: u32 },

    #[error("invalid time value: {seconds}s {nseconds}ns")]
    InvalidTimeValue { seconds: i64, nseconds: u32 },

    #[error("state {0} not found")]
    StateNotFound(StateId),

    #[error("session index {0} not found")]
    SessionNotFound(usize),

    #[error("state {state_id} belongs to client {owner}")]
    ForeignState { state_id: StateId, owner: ClientId },
}

/// Coarse classification of [`StateError`] used by callers that only care
/// about the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    StaleClientId,
    LeaseExpired,
    BadSequenceId,
    InvalidTimeValue,
    NotFound,
}

/// Subset of the NFSv4 status space (`nfsstat4`) produced by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum NfsStatus {
    Ok = 0,
    Inval = 22,
    Expired = 10011,
    StaleClientId = 10022,
    BadStateId = 10025,
    BadSeqId = 10026,
    BadSession = 10052,
}

impl NfsStatus {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StaleClientId(_) => ErrorKind::StaleClientId,
            Self::LeaseExpired(_) => ErrorKind::LeaseExpired,
            Self::BadSequenceId { .. } => ErrorKind::BadSequenceId,
            Self::InvalidTimeValue { .. } => ErrorKind::InvalidTimeValue,
            Self::StateNotFound(_) | Self::SessionNotFound(_) | Self::ForeignState { .. } => {
                ErrorKind::NotFound
            }
        }
    }

    pub fn status(&self) -> NfsStatus {
        match self {
            Self::StaleClientId(_) => NfsStatus::StaleClientId,
            Self::LeaseExpired(_) => NfsStatus::Expired,
            Self::BadSequenceId { .. } => NfsStatus::BadSeqId,
            Self::InvalidTimeValue { .. } => NfsStatus::Inval,
            Self::StateNotFound(_) | Self::ForeignState { .. } => NfsStatus::BadStateId,
            Self::SessionNotFound(_) => NfsStatus::BadSession,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
