// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientId;

/// Client lifecycle events published by the client registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Established {
        client_id: ClientId,
        principal: String,
        established_at: DateTime<Utc>,
    },
    Confirmed {
        client_id: ClientId,
        confirmed_at: DateTime<Utc>,
    },
    /// A confirmed client came back with a new verifier; `new` is staged
    /// until it confirms.
    RebootDetected {
        old: ClientId,
        new: ClientId,
        detected_at: DateTime<Utc>,
    },
    /// An unconfirmed record was replaced in place, or a confirmed one was
    /// superseded when its successor confirmed.
    Replaced {
        old: ClientId,
        new: ClientId,
        replaced_at: DateTime<Utc>,
    },
    Expired {
        client_id: ClientId,
        expired_at: DateTime<Utc>,
    },
    Destroyed {
        client_id: ClientId,
        destroyed_at: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// The client the event is about (the new one for replacements).
    pub fn client_id(&self) -> ClientId {
        match self {
            Self::Established { client_id, .. }
            | Self::Confirmed { client_id, .. }
            | Self::Expired { client_id, .. }
            | Self::Destroyed { client_id, .. } => *client_id,
            Self::RebootDetected { new, .. } | Self::Replaced { new, .. } => *new,
        }
    }
}

/// Outbound port for client lifecycle events.
pub trait ClientEventPublisher: Send + Sync {
    fn publish_client_event(&self, event: ClientEvent);
}

/// Publisher that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventPublisher;

impl ClientEventPublisher for NullEventPublisher {
    fn publish_client_event(&self, _event: ClientEvent) {}
}
