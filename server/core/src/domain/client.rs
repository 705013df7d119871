// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Client Record Aggregate
//!
//! A server's client record is a 5-tuple: the client-supplied owner id, the
//! client's incarnation verifier, the principal from the RPC credentials, the
//! server-generated [`ClientId`], and a confirmed flag. Around that tuple the
//! record carries everything the server tracks for one client incarnation:
//! its lease, its state-request sequence counter, its state tokens, its
//! sessions and its callback endpoint.
//!
//! ## Lifecycle
//!
//! ```text
//! EXCHANGE_ID / SETCLIENTID
//!   └─ ClientRegistry::establish_identity  → new unconfirmed ClientRecord
//!         └─ ClientRegistry::confirm        → confirmed (one way)
//!         └─ check_lease / renew_lease      ← every request from the client
//!         └─ release                        ← expiry, reboot replacement or destroy
//! ```
//!
//! ## Invariants
//!
//! - `client_id` never changes after construction.
//! - `confirmed` only goes false → true. A rebooted client gets a new record.
//! - Once released, a record fails every lease check and every mutation
//!   with `StaleClientId` and holds no state or sessions. Mutations and the
//!   release both run under the liveness lock, so nothing is filed after the
//!   release clears the record.
//! - Mutable fields are guarded per record so that different clients never
//!   contend with each other.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::errors::StateError;
use crate::domain::session::{Session, SessionSet};
use crate::domain::state::{Nfs4State, StateId, StateKind, StateRegistry};
use crate::domain::time::elapsed_millis;

/// Size of the client incarnation verifier (`verifier4`).
pub const VERIFIER_SIZE: usize = 8;

// ============================================================================
// Value Objects
// ============================================================================

/// Server-generated short-hand client identifier.
///
/// High 32 bits: server boot epoch in seconds. Low 32 bits: issuance counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Boot epoch of the server instance that issued this id.
    pub fn boot_epoch(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Client incarnation verifier. Compared for equality, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Verifier(pub [u8; VERIFIER_SIZE]);

impl Verifier {
    pub fn new(bytes: [u8; VERIFIER_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VERIFIER_SIZE] {
        &self.0
    }
}

impl From<u64> for Verifier {
    fn from(value: u64) -> Self {
        Self(value.to_be_bytes())
    }
}

/// Which real-world client this is, independent of its reboots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOwnerKey {
    pub owner_id: Vec<u8>,
    pub principal: String,
}

impl ClientOwnerKey {
    pub fn new(owner_id: impl Into<Vec<u8>>, principal: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            principal: principal.into(),
        }
    }
}

/// Issues [`ClientId`]s for one server boot.
///
/// Owned by the client registry; the counter is the only way ids are made.
#[derive(Debug)]
pub struct ClientIdGenerator {
    boot_epoch: u32,
    counter: AtomicU64,
}

impl ClientIdGenerator {
    pub fn new(boot_epoch: u32) -> Self {
        Self {
            boot_epoch,
            counter: AtomicU64::new(0),
        }
    }

    /// Capture the boot epoch from a wall-clock instant.
    pub fn from_boot_time(boot_time: DateTime<Utc>) -> Self {
        Self::new(boot_time.timestamp().clamp(0, i64::from(u32::MAX)) as u32)
    }

    pub fn boot_epoch(&self) -> u32 {
        self.boot_epoch
    }

    /// Next id; strictly increasing, never repeated within a boot.
    ///
    /// One boot can issue at most `u32::MAX` ids. Past that the counter
    /// would carry into the boot-epoch half of the id.
    pub fn next_id(&self) -> ClientId {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert!(
            seq <= u64::from(u32::MAX),
            "client id counter exhausted for boot epoch {}",
            self.boot_epoch
        );
        if seq > u64::from(u32::MAX) {
            warn!(boot_epoch = self.boot_epoch, "Client id counter exhausted for this boot");
        }
        ClientId((u64::from(self.boot_epoch) << 32) + seq)
    }

    #[cfg(test)]
    fn with_issued(boot_epoch: u32, issued: u64) -> Self {
        Self {
            boot_epoch,
            counter: AtomicU64::new(issued),
        }
    }
}

/// Callback channel endpoint as supplied by the client. Stored and returned
/// as-is; the transport behind it lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackHandle {
    pub program: u32,
    pub netid: String,
    pub uaddr: String,
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug)]
struct Liveness {
    lease_timestamp: DateTime<Utc>,
    confirmed: bool,
    released: bool,
}

/// Per-client state for one client incarnation.
#[derive(Debug)]
pub struct ClientRecord {
    owner: ClientOwnerKey,
    verifier: Verifier,
    client_id: ClientId,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,

    liveness: Mutex<Liveness>,

    // per client wide counter of client state requests, first value issued is 1
    seqid: AtomicU32,
    // local part of minted state tokens
    next_state: AtomicU32,

    states: StateRegistry,
    sessions: SessionSet,
    callback: RwLock<Option<CallbackHandle>>,
}

impl ClientRecord {
    pub fn new(
        client_id: ClientId,
        owner: ClientOwnerKey,
        verifier: Verifier,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        now: DateTime<Utc>,
    ) -> Self {
        debug!(client_id = %client_id, remote = %remote_addr, "New client id");
        Self {
            owner,
            verifier,
            client_id,
            remote_addr,
            local_addr,
            liveness: Mutex::new(Liveness {
                lease_timestamp: now,
                confirmed: false,
                released: false,
            }),
            seqid: AtomicU32::new(0),
            next_state: AtomicU32::new(0),
            states: StateRegistry::new(),
            sessions: SessionSet::new(),
            callback: RwLock::new(None),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn owner_key(&self) -> &ClientOwnerKey {
        &self.owner
    }

    pub fn owner_id(&self) -> &[u8] {
        &self.owner.owner_id
    }

    pub fn principal(&self) -> &str {
        &self.owner.principal
    }

    pub fn verifier(&self) -> Verifier {
        self.verifier
    }

    pub fn verify_verifier(&self, candidate: &Verifier) -> bool {
        self.verifier == *candidate
    }

    pub fn verify_client_id(&self, candidate: ClientId) -> bool {
        self.client_id == candidate
    }

    /// Client address as seen by the server.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Server address as seen by the client.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // ------------------------------------------------------------------------
    // Confirmation and lease
    // ------------------------------------------------------------------------

    pub fn is_confirmed(&self) -> bool {
        self.liveness.lock().confirmed
    }

    pub fn is_released(&self) -> bool {
        self.liveness.lock().released
    }

    /// Flip to confirmed and start a fresh lease.
    pub(crate) fn mark_confirmed(&self, now: DateTime<Utc>) -> Result<(), StateError> {
        let mut liveness = self.liveness.lock();
        if liveness.released {
            return Err(StateError::StaleClientId(self.client_id));
        }
        liveness.confirmed = true;
        liveness.lease_timestamp = now;
        Ok(())
    }

    pub fn lease_timestamp(&self) -> DateTime<Utc> {
        self.liveness.lock().lease_timestamp
    }

    /// Set the lease timestamp to `now` unconditionally.
    pub fn renew_lease(&self, now: DateTime<Utc>) {
        self.liveness.lock().lease_timestamp = now;
    }

    /// Check the lease and, if it is still valid, renew it.
    ///
    /// Any permitted operation counts as evidence that the client is alive,
    /// so a passing check always refreshes the lease.
    ///
    /// # Errors
    ///
    /// - [`StateError::StaleClientId`] if the record was already released
    /// - [`StateError::LeaseExpired`] if more than `max_lease_seconds` passed
    ///   since the last renewal
    pub fn check_lease(&self, now: DateTime<Utc>, max_lease_seconds: u64) -> Result<(), StateError> {
        let mut liveness = self.liveness.lock();
        if liveness.released {
            return Err(StateError::StaleClientId(self.client_id));
        }
        if lease_lapsed(liveness.lease_timestamp, now, max_lease_seconds) {
            warn!(client_id = %self.client_id, "Lease time expired");
            metrics::counter!("leasehold_lease_expired_total").increment(1);
            return Err(StateError::LeaseExpired(self.client_id));
        }
        liveness.lease_timestamp = now;
        Ok(())
    }

    /// Whether the lease has lapsed, without renewing it.
    pub fn lease_expired(&self, now: DateTime<Utc>, max_lease_seconds: u64) -> bool {
        let liveness = self.liveness.lock();
        lease_lapsed(liveness.lease_timestamp, now, max_lease_seconds)
    }

    /// Release this record if it is still unconfirmed and its lease lapsed.
    ///
    /// Decided under the same lock as [`ClientRecord::check_lease`], so a
    /// lease renewed concurrently is never released.
    pub(crate) fn release_if_idle_unconfirmed(&self, now: DateTime<Utc>, max_lease_seconds: u64) -> bool {
        let mut liveness = self.liveness.lock();
        if liveness.released
            || liveness.confirmed
            || !lease_lapsed(liveness.lease_timestamp, now, max_lease_seconds)
        {
            return false;
        }
        liveness.released = true;
        self.drop_owned_state();
        true
    }

    /// Release this record and everything it owns.
    pub(crate) fn release(&self) {
        let mut liveness = self.liveness.lock();
        if liveness.released {
            return;
        }
        liveness.released = true;
        self.drop_owned_state();
    }

    /// Run `mutate` under the liveness lock if the record is still live.
    fn while_live<T>(&self, mutate: impl FnOnce() -> T) -> Result<T, StateError> {
        let liveness = self.liveness.lock();
        if liveness.released {
            return Err(StateError::StaleClientId(self.client_id));
        }
        Ok(mutate())
    }

    // caller holds the liveness lock
    fn drop_owned_state(&self) {
        let states = self.states.clear();
        let sessions = self.sessions.clear();
        *self.callback.write() = None;
        debug!(client_id = %self.client_id, states, sessions, "Released client state");
    }

    // ------------------------------------------------------------------------
    // Sequence counter
    // ------------------------------------------------------------------------

    /// Pre-increment and return the state-request sequence counter.
    /// The first value issued is 1.
    pub fn next_sequence_id(&self) -> u32 {
        self.seqid.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    pub fn current_sequence_id(&self) -> u32 {
        self.seqid.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // State tokens
    // ------------------------------------------------------------------------

    /// File `state` under its own token. Overwrites silently.
    ///
    /// # Errors
    ///
    /// - [`StateError::ForeignState`] if the state belongs to a different client
    /// - [`StateError::StaleClientId`] if the record was released
    pub fn add_state(&self, state: Arc<Nfs4State>) -> Result<(), StateError> {
        if state.owner() != self.client_id {
            return Err(StateError::ForeignState {
                state_id: state.state_id(),
                owner: state.owner(),
            });
        }
        let state_id = state.state_id();
        self.while_live(|| self.states.insert(state))?;
        debug!(client_id = %self.client_id, state_id = %state_id, "Added state");
        Ok(())
    }

    /// Mint a fresh token for this client and file a new state object under it.
    ///
    /// # Errors
    ///
    /// [`StateError::StaleClientId`] if the record was released; no token is minted.
    pub fn open_state(&self, kind: StateKind, now: DateTime<Utc>) -> Result<Arc<Nfs4State>, StateError> {
        let state = self.while_live(|| {
            let local = self.next_state.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
            let state_id = StateId::for_client(self.client_id, local);
            let state = Arc::new(Nfs4State::new(state_id, self.client_id, kind, now));
            self.states.insert(state.clone());
            state
        })?;
        debug!(client_id = %self.client_id, state_id = %state.state_id(), ?kind, "Opened state");
        Ok(state)
    }

    pub fn state(&self, state_id: &StateId) -> Option<Arc<Nfs4State>> {
        self.states.get(state_id)
    }

    pub fn remove_state(&self, state_id: &StateId) -> Option<Arc<Nfs4State>> {
        self.states.remove(state_id)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// [`StateError::StaleClientId`] if the record was released.
    pub fn add_session(&self, session: Arc<Session>) -> Result<usize, StateError> {
        let index = self.while_live(|| self.sessions.push(session))?;
        debug!(client_id = %self.client_id, index, "Added session");
        Ok(index)
    }

    pub fn remove_session(&self, session: &Session) -> bool {
        self.sessions.remove(session)
    }

    pub fn remove_session_at(&self, index: usize) -> Option<Arc<Session>> {
        self.sessions.remove_at(index)
    }

    /// Session at `index`, or `None` when out of bounds.
    pub fn session(&self, index: usize) -> Option<Arc<Session>> {
        self.sessions.get(index)
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.snapshot()
    }

    pub fn sessions_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions_left(&self) -> usize {
        self.sessions.len()
    }

    // ------------------------------------------------------------------------
    // Callback
    // ------------------------------------------------------------------------

    pub fn set_callback(&self, handle: CallbackHandle) -> Result<(), StateError> {
        self.while_live(|| *self.callback.write() = Some(handle))
    }

    pub fn callback(&self) -> Option<CallbackHandle> {
        self.callback.read().clone()
    }
}

impl std::fmt::Display for ClientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.remote_addr,
            String::from_utf8_lossy(&self.owner.owner_id),
            self.client_id
        )
    }
}

fn lease_lapsed(lease_timestamp: DateTime<Utc>, now: DateTime<Utc>, max_lease_seconds: u64) -> bool {
    let max_millis = i64::try_from(max_lease_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
    elapsed_millis(lease_timestamp, now) > max_millis
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn record(now: DateTime<Utc>) -> ClientRecord {
        ClientRecord::new(
            ClientId::from_raw(0x6500_0000_0000_0001),
            ClientOwnerKey::new(b"host-a".to_vec(), "nfs/host-a@REALM"),
            Verifier::from(0xdead_beef),
            addr(700),
            addr(2049),
            now,
        )
    }

    #[test]
    fn test_generator_issues_increasing_ids_with_boot_epoch() {
        let generator = ClientIdGenerator::new(0x6500_0000);
        let first = generator.next_id();
        let second = generator.next_id();

        assert_eq!(first.as_u64(), (0x6500_0000u64 << 32) + 1);
        assert!(second > first);
        assert_eq!(first.boot_epoch(), 0x6500_0000);
    }

    #[test]
    fn test_generator_last_id_of_boot_keeps_epoch() {
        let generator = ClientIdGenerator::with_issued(7, u64::from(u32::MAX) - 1);
        let last = generator.next_id();
        assert_eq!(last.boot_epoch(), 7);
        assert_eq!(last.as_u64() & 0xffff_ffff, u64::from(u32::MAX));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "client id counter exhausted")]
    fn test_generator_exhaustion_is_caught() {
        let generator = ClientIdGenerator::with_issued(7, u64::from(u32::MAX));
        generator.next_id();
    }

    #[test]
    fn test_generator_is_duplicate_free_across_threads() {
        let generator = ClientIdGenerator::new(1);
        let ids: Vec<ClientId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..500).map(|_| generator.next_id()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 4000);
    }

    #[test]
    fn test_verifier_comparison_is_exact() {
        let r = record(Utc::now());
        assert!(r.verify_verifier(&Verifier::from(0xdead_beef)));
        assert!(!r.verify_verifier(&Verifier::from(0xdead_bef0)));
        assert!(r.verify_client_id(ClientId::from_raw(0x6500_0000_0000_0001)));
    }

    #[test]
    fn test_sequence_ids_start_at_one() {
        let r = record(Utc::now());
        assert_eq!(r.current_sequence_id(), 0);
        assert_eq!(r.next_sequence_id(), 1);
        assert_eq!(r.next_sequence_id(), 2);
        assert_eq!(r.current_sequence_id(), 2);
    }

    #[test]
    fn test_check_lease_within_window_renews() {
        let t0 = Utc::now();
        let r = record(t0);

        let t1 = t0 + Duration::seconds(60);
        r.check_lease(t1, 90).unwrap();
        assert_eq!(r.lease_timestamp(), t1);

        // 60s after the renewal is fine even though 120s passed since creation
        r.check_lease(t1 + Duration::seconds(60), 90).unwrap();
    }

    #[test]
    fn test_check_lease_boundary_is_inclusive() {
        let t0 = Utc::now();
        let r = record(t0);
        r.check_lease(t0 + Duration::seconds(90), 90).unwrap();
    }

    #[test]
    fn test_check_lease_after_window_fails_without_renewing() {
        let t0 = Utc::now();
        let r = record(t0);

        let late = t0 + Duration::milliseconds(90_001);
        assert_eq!(
            r.check_lease(late, 90),
            Err(StateError::LeaseExpired(r.client_id()))
        );
        assert_eq!(r.lease_timestamp(), t0);
    }

    #[test]
    fn test_released_record_reports_stale() {
        let t0 = Utc::now();
        let r = record(t0);
        r.release();
        assert_eq!(r.check_lease(t0, 90), Err(StateError::StaleClientId(r.client_id())));
        assert!(r.mark_confirmed(t0).is_err());
    }

    #[test]
    fn test_idle_release_skips_confirmed_and_fresh_records() {
        let t0 = Utc::now();
        let late = t0 + Duration::seconds(200);

        let fresh = record(t0);
        assert!(!fresh.release_if_idle_unconfirmed(t0 + Duration::seconds(10), 90));

        let confirmed = record(t0);
        confirmed.mark_confirmed(t0).unwrap();
        assert!(!confirmed.release_if_idle_unconfirmed(late, 90));

        let idle = record(t0);
        idle.open_state(StateKind::Open, t0).unwrap();
        assert!(idle.release_if_idle_unconfirmed(late, 90));
        assert!(idle.is_released());
        assert_eq!(idle.state_count(), 0);
    }

    #[test]
    fn test_confirmation_is_one_way() {
        let t0 = Utc::now();
        let r = record(t0);
        assert!(!r.is_confirmed());
        r.mark_confirmed(t0).unwrap();
        r.mark_confirmed(t0).unwrap();
        assert!(r.is_confirmed());
    }

    #[test]
    fn test_foreign_state_is_rejected() {
        let r = record(Utc::now());
        let other = ClientId::from_raw(99);
        let foreign = Arc::new(Nfs4State::new(
            StateId::for_client(other, 1),
            other,
            StateKind::Lock,
            Utc::now(),
        ));
        assert!(matches!(r.add_state(foreign), Err(StateError::ForeignState { .. })));
        assert_eq!(r.state_count(), 0);
    }

    #[test]
    fn test_open_state_mints_distinct_tokens() {
        let r = record(Utc::now());
        let a = r.open_state(StateKind::Open, Utc::now()).unwrap();
        let b = r.open_state(StateKind::Delegation, Utc::now()).unwrap();
        assert_ne!(a.state_id(), b.state_id());
        assert_eq!(a.state_id().client_id(), r.client_id());
        assert!(Arc::ptr_eq(&r.state(&b.state_id()).unwrap(), &b));
    }

    #[test]
    fn test_session_out_of_bounds_is_none() {
        let r = record(Utc::now());
        assert!(r.session(0).is_none());
        let idx = r.add_session(Arc::new(Session::new(r.client_id(), Utc::now()))).unwrap();
        assert_eq!(idx, 0);
        assert!(r.session(0).is_some());
        assert_eq!(r.sessions_left(), 1);
    }

    #[test]
    fn test_callback_round_trip() {
        let r = record(Utc::now());
        assert!(r.callback().is_none());
        let cb = CallbackHandle {
            program: 0x4000_0000,
            netid: "tcp".into(),
            uaddr: "127.0.0.1.3.0".into(),
        };
        r.set_callback(cb.clone()).unwrap();
        assert_eq!(r.callback(), Some(cb));
    }

    #[test]
    fn test_released_record_rejects_mutations() {
        let t0 = Utc::now();
        let r = record(t0);
        r.open_state(StateKind::Open, t0).unwrap();
        r.release();

        let stale = StateError::StaleClientId(r.client_id());
        let session = Arc::new(Session::new(r.client_id(), t0));
        assert_eq!(r.add_session(session), Err(stale.clone()));
        assert_eq!(r.open_state(StateKind::Lock, t0), Err(stale.clone()));
        let late = Arc::new(Nfs4State::new(
            StateId::for_client(r.client_id(), 40),
            r.client_id(),
            StateKind::Open,
            t0,
        ));
        assert_eq!(r.add_state(late), Err(stale.clone()));
        let cb = CallbackHandle {
            program: 1,
            netid: "tcp".into(),
            uaddr: "127.0.0.1.3.0".into(),
        };
        assert_eq!(r.set_callback(cb), Err(stale));

        assert_eq!(r.state_count(), 0);
        assert_eq!(r.sessions_left(), 0);
        assert!(r.callback().is_none());
    }

    #[test]
    fn test_release_racing_mutations_leaves_record_empty() {
        for _ in 0..50 {
            let t0 = Utc::now();
            let r = record(t0);
            std::thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| {
                        for _ in 0..50 {
                            let _ = r.open_state(StateKind::Open, t0);
                            let _ = r.add_session(Arc::new(Session::new(r.client_id(), t0)));
                        }
                    });
                }
                s.spawn(|| r.release());
            });

            assert!(r.is_released());
            assert_eq!(r.state_count(), 0);
            assert_eq!(r.sessions_left(), 0);
        }
    }

    #[test]
    fn test_display_format() {
        let r = record(Utc::now());
        assert_eq!(r.to_string(), "127.0.0.1:700:host-a@6500000000000001");
    }
}
