// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the client state service
//!
//! These tests drive the dispatch-facing operations end to end:
//! 1. Identity establishment, re-advertisement and reboot replacement
//! 2. Client id issuance order
//! 3. Sequence allocation under concurrency
//! 4. Lease renewal and expiry with a controllable clock
//! 5. State and session round trips
//! 6. Event publication and the background reaper

use chrono::Duration;
use leasehold_core::application::{ClientRegistry, ClientStateService, LeaseReaper, LeaseReaperConfig};
use leasehold_core::domain::client::{ClientId, Verifier};
use leasehold_core::domain::errors::{ErrorKind, NfsStatus, StateError};
use leasehold_core::domain::events::ClientEvent;
use leasehold_core::domain::state::{Nfs4State, StateId, StateKind};
use leasehold_core::domain::time::{LeaseClock, ManualClock, NfsTime};
use leasehold_core::infrastructure::event_bus::EventBus;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

const LEASE: u64 = 90;

struct Harness {
    service: ClientStateService,
    clock: Arc<ManualClock>,
    bus: EventBus,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let bus = EventBus::new(256);
    let registry = Arc::new(ClientRegistry::new(clock.clone(), Arc::new(bus.clone())));
    Harness {
        service: ClientStateService::new(registry, LEASE),
        clock,
        bus,
    }
}

fn client_addr() -> SocketAddr {
    "192.168.1.20:916".parse().unwrap()
}

fn server_addr() -> SocketAddr {
    "192.168.1.1:2049".parse().unwrap()
}

fn establish(h: &Harness, owner: &str, verifier: u64) -> ClientId {
    h.service
        .establish_identity(
            owner.as_bytes(),
            Verifier::from(verifier),
            "nfs/client@EXAMPLE.ORG",
            client_addr(),
            server_addr(),
        )
        .client_id
}

#[test]
fn test_repeated_establish_returns_same_client_id() {
    let h = harness();
    let first = establish(&h, "Linux NFSv4.1 client-1", 0xaa);
    for _ in 0..5 {
        assert_eq!(establish(&h, "Linux NFSv4.1 client-1", 0xaa), first);
    }

    h.service.confirm_identity(first).unwrap();
    let identity = h.service.establish_identity(
        b"Linux NFSv4.1 client-1",
        Verifier::from(0xaa),
        "nfs/client@EXAMPLE.ORG",
        client_addr(),
        server_addr(),
    );
    assert_eq!(identity.client_id, first);
    assert!(identity.confirmed);
}

#[test]
fn test_reboot_invalidates_old_client_once_new_one_confirms() {
    let h = harness();
    let old = establish(&h, "client-1", 1);
    h.service.confirm_identity(old).unwrap();
    let old_state = h.service.open_state(old, StateKind::Open).unwrap();
    h.service.create_session(old).unwrap();

    let new = establish(&h, "client-1", 2);
    assert_ne!(new, old);

    // still served until the new incarnation confirms
    h.service.renew_lease(old, h.clock.now()).unwrap();

    h.service.confirm_identity(new).unwrap();

    let stale = StateError::StaleClientId(old);
    assert_eq!(h.service.renew_lease(old, h.clock.now()).unwrap_err(), stale);
    assert_eq!(h.service.allocate_sequence(old).unwrap_err(), stale);
    assert_eq!(
        h.service.get_state(old, &old_state.state_id()).unwrap_err(),
        stale
    );
    assert_eq!(h.service.create_session(old).unwrap_err(), stale);
    assert_eq!(stale.status(), NfsStatus::StaleClientId);

    // the new incarnation starts clean
    assert_eq!(h.service.session_count(new).unwrap(), 0);
    assert!(h.service.get_state(new, &old_state.state_id()).is_err());
}

#[test]
fn test_client_ids_are_distinct_and_increasing() {
    let h = harness();
    let ids: Vec<ClientId> = (0..50)
        .map(|i| establish(&h, &format!("client-{}", i), 1))
        .collect();

    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    let boot = ids[0].boot_epoch();
    assert!(ids.iter().all(|id| id.boot_epoch() == boot));
    assert_eq!(boot, h.service.registry().boot_epoch());
}

#[test]
fn test_allocate_sequence_is_gap_free() {
    let h = harness();
    let client = establish(&h, "client-1", 1);

    let sequential: Vec<u32> = (0..10).map(|_| h.service.allocate_sequence(client).unwrap()).collect();
    assert_eq!(sequential, (1..=10).collect::<Vec<u32>>());
}

#[test]
fn test_allocate_sequence_concurrently() {
    let h = harness();
    let client = establish(&h, "client-1", 1);
    let threads = 8;
    let per_thread = 250;

    let values: Vec<u32> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    (0..per_thread)
                        .map(|_| h.service.allocate_sequence(client).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|t| t.join().unwrap()).collect()
    });

    let n = (threads * per_thread) as u32;
    let unique: HashSet<u32> = values.iter().copied().collect();
    assert_eq!(values.len(), n as usize);
    assert_eq!(unique, (1..=n).collect::<HashSet<u32>>());
    assert_eq!(h.service.current_sequence(client).unwrap(), n);
}

#[test]
fn test_renewals_within_window_never_expire() {
    let h = harness();
    let client = establish(&h, "client-1", 1);
    h.service.confirm_identity(client).unwrap();

    for _ in 0..10 {
        h.clock.advance(Duration::seconds(60));
        h.service.renew_lease(client, h.clock.now()).unwrap();
    }
}

#[test]
fn test_lease_expires_without_renewal() {
    let h = harness();
    let client = establish(&h, "client-1", 1);
    h.service.confirm_identity(client).unwrap();

    h.clock.advance(Duration::seconds(LEASE as i64) + Duration::milliseconds(1));
    let err = h.service.renew_lease(client, h.clock.now()).unwrap_err();

    assert_eq!(err, StateError::LeaseExpired(client));
    assert_eq!(err.kind(), ErrorKind::LeaseExpired);
    assert_eq!(err.status(), NfsStatus::Expired);
}

#[test]
fn test_put_then_get_state_round_trip() {
    let h = harness();
    let client = establish(&h, "client-1", 1);

    let state = Arc::new(Nfs4State::new(
        StateId::for_client(client, 1),
        client,
        StateKind::Delegation,
        h.clock.now(),
    ));
    h.service.put_state(client, state.clone()).unwrap();

    let fetched = h.service.get_state(client, &state.state_id()).unwrap();
    assert!(Arc::ptr_eq(&fetched, &state));

    let unused = StateId::for_client(client, 2);
    let err = h.service.get_state(client, &unused).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_state_is_not_visible_through_another_client() {
    let h = harness();
    let a = establish(&h, "client-a", 1);
    let b = establish(&h, "client-b", 1);

    let state = h.service.open_state(a, StateKind::Open).unwrap();
    assert!(h.service.get_state(b, &state.state_id()).unwrap_err().is_not_found());

    let err = h.service.put_state(b, state).unwrap_err();
    assert!(matches!(err, StateError::ForeignState { owner, .. } if owner == a));
}

#[test]
fn test_session_lifecycle() {
    let h = harness();
    let client = establish(&h, "client-1", 1);

    let index = h.service.create_session(client).unwrap();
    assert_eq!(h.service.get_session(client, index).unwrap().client_id(), client);

    h.service.destroy_session(client, index).unwrap();
    assert_eq!(h.service.session_count(client).unwrap(), 0);
    assert_eq!(
        h.service.destroy_session(client, index).unwrap_err(),
        StateError::SessionNotFound(index)
    );

    let unknown = ClientId::from_raw(0xdead);
    assert_eq!(
        h.service.create_session(unknown).unwrap_err(),
        StateError::StaleClientId(unknown)
    );
}

#[test]
fn test_time_value_conversion() {
    assert_eq!(NfsTime::new(1, 5_000_000).to_millis().unwrap(), 1005);
    let err = NfsTime::new(1, 1_000_000_000).to_millis().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTimeValue);
}

#[tokio::test]
async fn test_reaper_evicts_unconfirmed_and_publishes() {
    let h = harness();
    let mut events = h.bus.subscribe();

    let idle = establish(&h, "idle", 1);
    let kept = establish(&h, "kept", 1);
    h.service.confirm_identity(kept).unwrap();
    h.clock.advance(Duration::seconds(LEASE as i64 * 2));

    let reaper = LeaseReaper::new(h.service.registry().clone(), LeaseReaperConfig::default());
    assert_eq!(reaper.sweep_cycle(), 1);

    assert_eq!(
        h.service.confirm_identity(idle).unwrap_err(),
        StateError::StaleClientId(idle)
    );
    // confirmed but lapsed: still known, lease check reports expiry
    assert_eq!(
        h.service.renew_lease(kept, h.clock.now()).unwrap_err(),
        StateError::LeaseExpired(kept)
    );

    let published = events.drain();
    assert!(published
        .iter()
        .any(|e| matches!(e, ClientEvent::Expired { client_id, .. } if *client_id == idle)));

    let json = serde_json::to_value(&published[0]).unwrap();
    assert_eq!(json["event"], "established");
}
