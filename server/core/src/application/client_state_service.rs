// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Client State Application Service
//!
//! The surface the RPC dispatch layer calls. Every operation names its
//! client by [`ClientId`], resolves it through the [`ClientRegistry`] and
//! then works on that one record. Errors come back as [`StateError`]; the
//! dispatch layer maps them to wire status with [`StateError::status`].
//!
//! Only [`ClientStateService::renew_lease`] checks the lease. The dispatch
//! layer calls it for every lease-bearing request (RENEW, SEQUENCE) before
//! the operations that follow.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Dispatch-facing use cases over client records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::application::client_registry::ClientRegistry;
use crate::domain::client::{CallbackHandle, ClientId, Verifier};
use crate::domain::errors::StateError;
use crate::domain::session::Session;
use crate::domain::state::{Nfs4State, StateId, StateKind};

/// Result of identity establishment handed back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishedIdentity {
    pub client_id: ClientId,
    pub confirmed: bool,
}

pub struct ClientStateService {
    registry: Arc<ClientRegistry>,
    lease_time_seconds: u64,
}

impl ClientStateService {
    pub fn new(registry: Arc<ClientRegistry>, lease_time_seconds: u64) -> Self {
        Self {
            registry,
            lease_time_seconds,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn lease_time_seconds(&self) -> u64 {
        self.lease_time_seconds
    }

    fn now(&self) -> DateTime<Utc> {
        self.registry.clock().now()
    }

    pub fn establish_identity(
        &self,
        owner_id: &[u8],
        verifier: Verifier,
        principal: &str,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> EstablishedIdentity {
        let record = self
            .registry
            .establish_identity(owner_id, verifier, principal, remote_addr, local_addr);
        EstablishedIdentity {
            client_id: record.client_id(),
            confirmed: record.is_confirmed(),
        }
    }

    pub fn confirm_identity(&self, client_id: ClientId) -> Result<(), StateError> {
        self.registry.confirm(client_id).map(|_| ())
    }

    /// Check-and-renew the client's lease at `now`.
    pub fn renew_lease(&self, client_id: ClientId, now: DateTime<Utc>) -> Result<(), StateError> {
        self.registry
            .lookup(client_id)?
            .check_lease(now, self.lease_time_seconds)
    }

    pub fn allocate_sequence(&self, client_id: ClientId) -> Result<u32, StateError> {
        Ok(self.registry.lookup(client_id)?.next_sequence_id())
    }

    pub fn current_sequence(&self, client_id: ClientId) -> Result<u32, StateError> {
        Ok(self.registry.lookup(client_id)?.current_sequence_id())
    }

    /// File `state` with its owning client under the state's own token.
    pub fn put_state(&self, client_id: ClientId, state: Arc<Nfs4State>) -> Result<(), StateError> {
        self.registry.lookup(client_id)?.add_state(state)
    }

    pub fn get_state(&self, client_id: ClientId, state_id: &StateId) -> Result<Arc<Nfs4State>, StateError> {
        self.registry
            .lookup(client_id)?
            .state(state_id)
            .ok_or(StateError::StateNotFound(*state_id))
    }

    /// Mint and file a new state of `kind` for the client.
    pub fn open_state(&self, client_id: ClientId, kind: StateKind) -> Result<Arc<Nfs4State>, StateError> {
        let now = self.now();
        self.registry.lookup(client_id)?.open_state(kind, now)
    }

    pub fn release_state(&self, client_id: ClientId, state_id: &StateId) -> Result<Arc<Nfs4State>, StateError> {
        let released = self
            .registry
            .lookup(client_id)?
            .remove_state(state_id)
            .ok_or(StateError::StateNotFound(*state_id))?;
        debug!(client_id = %client_id, state_id = %state_id, "Released state");
        Ok(released)
    }

    /// Create a session and return its index in the client's session set.
    pub fn create_session(&self, client_id: ClientId) -> Result<usize, StateError> {
        let record = self.registry.lookup(client_id)?;
        let session = Arc::new(Session::new(client_id, self.now()));
        debug!(client_id = %client_id, session_id = %session.id(), "Creating session");
        record.add_session(session)
    }

    pub fn get_session(&self, client_id: ClientId, index: usize) -> Result<Arc<Session>, StateError> {
        self.registry
            .lookup(client_id)?
            .session(index)
            .ok_or(StateError::SessionNotFound(index))
    }

    pub fn destroy_session(&self, client_id: ClientId, index: usize) -> Result<(), StateError> {
        let session = self
            .registry
            .lookup(client_id)?
            .remove_session_at(index)
            .ok_or(StateError::SessionNotFound(index))?;
        debug!(client_id = %client_id, session_id = %session.id(), "Destroyed session");
        Ok(())
    }

    pub fn session_count(&self, client_id: ClientId) -> Result<usize, StateError> {
        Ok(self.registry.lookup(client_id)?.sessions_left())
    }

    pub fn set_callback(&self, client_id: ClientId, handle: CallbackHandle) -> Result<(), StateError> {
        self.registry.lookup(client_id)?.set_callback(handle)
    }

    pub fn get_callback(&self, client_id: ClientId) -> Result<Option<CallbackHandle>, StateError> {
        Ok(self.registry.lookup(client_id)?.callback())
    }

    pub fn destroy_client(&self, client_id: ClientId) -> Result<(), StateError> {
        self.registry.destroy(client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NullEventPublisher;
    use crate::domain::time::ManualClock;

    fn service() -> ClientStateService {
        let registry = Arc::new(ClientRegistry::new(
            Arc::new(ManualClock::starting_now()),
            Arc::new(NullEventPublisher),
        ));
        ClientStateService::new(registry, 90)
    }

    fn establish(service: &ClientStateService) -> ClientId {
        let any = SocketAddr::from(([127, 0, 0, 1], 0));
        service
            .establish_identity(b"client", Verifier::from(1), "nobody", any, any)
            .client_id
    }

    #[test]
    fn test_state_lookup_miss_is_not_found() {
        let service = service();
        let client_id = establish(&service);
        let unused = StateId::for_client(client_id, 77);

        let err = service.get_state(client_id, &unused).unwrap_err();
        assert_eq!(err, StateError::StateNotFound(unused));
    }

    #[test]
    fn test_open_and_release_state() {
        let service = service();
        let client_id = establish(&service);

        let state = service.open_state(client_id, StateKind::Lock).unwrap();
        assert_eq!(state.kind(), StateKind::Lock);
        assert!(Arc::ptr_eq(&service.get_state(client_id, &state.state_id()).unwrap(), &state));

        service.release_state(client_id, &state.state_id()).unwrap();
        assert!(service.get_state(client_id, &state.state_id()).unwrap_err().is_not_found());
        assert!(service.release_state(client_id, &state.state_id()).is_err());
    }

    #[test]
    fn test_get_session_out_of_range() {
        let service = service();
        let client_id = establish(&service);
        assert_eq!(
            service.get_session(client_id, 0).unwrap_err(),
            StateError::SessionNotFound(0)
        );
    }

    #[test]
    fn test_callback_through_service() {
        let service = service();
        let client_id = establish(&service);
        assert_eq!(service.get_callback(client_id).unwrap(), None);

        let handle = CallbackHandle {
            program: 0x4000_0001,
            netid: "tcp6".to_string(),
            uaddr: "::1.3.1".to_string(),
        };
        service.set_callback(client_id, handle.clone()).unwrap();
        assert_eq!(service.get_callback(client_id).unwrap(), Some(handle));
    }

    #[test]
    fn test_destroyed_client_is_stale_everywhere() {
        let service = service();
        let client_id = establish(&service);
        service.destroy_client(client_id).unwrap();

        let stale = StateError::StaleClientId(client_id);
        assert_eq!(service.allocate_sequence(client_id).unwrap_err(), stale);
        assert_eq!(service.create_session(client_id).unwrap_err(), stale);
        assert_eq!(service.get_callback(client_id).unwrap_err(), stale);
        assert_eq!(service.renew_lease(client_id, Utc::now()).unwrap_err(), stale);
    }
}
