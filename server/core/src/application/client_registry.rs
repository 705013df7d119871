// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Client Registry
//!
//! Process-wide table of [`ClientRecord`]s. The single source of truth for
//! which record answers to a given `(owner id, principal)` pair and to a
//! given [`ClientId`]. It alone creates and destroys records.
//!
//! ## Identity index
//!
//! Every `(owner id, principal)` key owns an [`OwnerSlot`] holding at most
//! one confirmed and one unconfirmed record. The slot is updated through the
//! map's entry API, which serialises callers on the same key, so concurrent
//! identity establishment for one client always agrees on one record.
//!
//! ## Reboot handling
//!
//! A new verifier for a known key is a client reboot:
//! - an unconfirmed record is replaced in place and released at once;
//! - a confirmed record keeps serving while the new incarnation is staged
//!   as unconfirmed. When the new record confirms, the old one is released
//!   and removed, and its client id turns stale.
//!
//! Lock order is always: identity index entry, then client-id index.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Identity lifecycle, id issuance and expiration sweep

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::client::{ClientId, ClientIdGenerator, ClientOwnerKey, ClientRecord, Verifier};
use crate::domain::errors::StateError;
use crate::domain::events::{ClientEvent, ClientEventPublisher};
use crate::domain::time::LeaseClock;

/// Records known for one `(owner id, principal)` key.
#[derive(Debug, Default)]
pub struct OwnerSlot {
    confirmed: Option<Arc<ClientRecord>>,
    unconfirmed: Option<Arc<ClientRecord>>,
}

impl OwnerSlot {
    fn matching(&self, verifier: &Verifier) -> Option<Arc<ClientRecord>> {
        self.confirmed
            .iter()
            .chain(self.unconfirmed.iter())
            .find(|r| r.verify_verifier(verifier))
            .cloned()
    }

    fn holds_confirmed(&self, record: &Arc<ClientRecord>) -> bool {
        self.confirmed.as_ref().is_some_and(|c| Arc::ptr_eq(c, record))
    }

    fn holds_unconfirmed(&self, record: &Arc<ClientRecord>) -> bool {
        self.unconfirmed.as_ref().is_some_and(|u| Arc::ptr_eq(u, record))
    }

    /// Drop `record` from the slot. Returns `false` if it was not there.
    fn forget(&mut self, record: &Arc<ClientRecord>) -> bool {
        if self.holds_confirmed(record) {
            self.confirmed = None;
            true
        } else if self.holds_unconfirmed(record) {
            self.unconfirmed = None;
            true
        } else {
            false
        }
    }

    fn is_empty(&self) -> bool {
        self.confirmed.is_none() && self.unconfirmed.is_none()
    }
}

pub struct ClientRegistry {
    ids: ClientIdGenerator,
    owners: DashMap<ClientOwnerKey, OwnerSlot>,
    by_id: DashMap<ClientId, Arc<ClientRecord>>,
    clock: Arc<dyn LeaseClock>,
    events: Arc<dyn ClientEventPublisher>,
}

impl ClientRegistry {
    /// Create a registry whose boot epoch is the clock's current time.
    pub fn new(clock: Arc<dyn LeaseClock>, events: Arc<dyn ClientEventPublisher>) -> Self {
        let ids = ClientIdGenerator::from_boot_time(clock.now());
        Self::with_id_generator(ids, clock, events)
    }

    pub fn with_id_generator(
        ids: ClientIdGenerator,
        clock: Arc<dyn LeaseClock>,
        events: Arc<dyn ClientEventPublisher>,
    ) -> Self {
        info!(boot_epoch = ids.boot_epoch(), "Client registry initialised");
        Self {
            ids,
            owners: DashMap::new(),
            by_id: DashMap::new(),
            clock,
            events,
        }
    }

    pub fn boot_epoch(&self) -> u32 {
        self.ids.boot_epoch()
    }

    pub fn clock(&self) -> &Arc<dyn LeaseClock> {
        &self.clock
    }

    /// Find or create the record for a client announcing itself.
    ///
    /// - unknown key: a fresh unconfirmed record;
    /// - known key, same verifier: the existing record, confirmed or not;
    /// - known key, new verifier: a fresh unconfirmed record (see module docs
    ///   for what happens to the previous incarnation).
    pub fn establish_identity(
        &self,
        owner_id: &[u8],
        verifier: Verifier,
        principal: &str,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Arc<ClientRecord> {
        let now = self.clock.now();
        let key = ClientOwnerKey::new(owner_id, principal);
        let mut events = Vec::new();

        let record = {
            let mut slot = self.owners.entry(key.clone()).or_default();

            if let Some(existing) = slot.matching(&verifier) {
                debug!(client_id = %existing.client_id(), "Client re-advertised same verifier");
                return existing;
            }

            let record = Arc::new(ClientRecord::new(
                self.ids.next_id(),
                key,
                verifier,
                remote_addr,
                local_addr,
                now,
            ));
            let new_id = record.client_id();
            self.by_id.insert(new_id, record.clone());
            events.push(ClientEvent::Established {
                client_id: new_id,
                principal: principal.to_string(),
                established_at: now,
            });

            if let Some(previous) = slot.unconfirmed.replace(record.clone()) {
                previous.release();
                self.by_id.remove(&previous.client_id());
                info!(old = %previous.client_id(), new = %new_id, "Replaced unconfirmed client");
                events.push(ClientEvent::Replaced {
                    old: previous.client_id(),
                    new: new_id,
                    replaced_at: now,
                });
            }

            if let Some(confirmed) = &slot.confirmed {
                info!(old = %confirmed.client_id(), new = %new_id, "Client reboot detected");
                metrics::counter!("leasehold_client_reboots_total").increment(1);
                events.push(ClientEvent::RebootDetected {
                    old: confirmed.client_id(),
                    new: new_id,
                    detected_at: now,
                });
            }

            record
        };

        metrics::counter!("leasehold_clients_established_total").increment(1);
        self.publish_all(events);
        record
    }

    /// Mark the record confirmed. Confirming a staged reboot releases the
    /// previously confirmed incarnation.
    ///
    /// # Errors
    ///
    /// [`StateError::StaleClientId`] if the id is unknown, expired or was
    /// superseded before it could confirm.
    pub fn confirm(&self, client_id: ClientId) -> Result<Arc<ClientRecord>, StateError> {
        let record = self.lookup(client_id)?;
        let now = self.clock.now();

        let superseded = {
            let Entry::Occupied(mut occupied) = self.owners.entry(record.owner_key().clone()) else {
                return Err(StateError::StaleClientId(client_id));
            };
            let slot = occupied.get_mut();

            if slot.holds_confirmed(&record) {
                return Ok(record);
            }
            if !slot.holds_unconfirmed(&record) {
                return Err(StateError::StaleClientId(client_id));
            }

            record.mark_confirmed(now)?;
            slot.unconfirmed = None;
            let superseded = slot.confirmed.replace(record.clone());
            if let Some(old) = &superseded {
                old.release();
                self.by_id.remove(&old.client_id());
            }
            superseded
        };

        info!(client_id = %client_id, "Client confirmed");
        metrics::counter!("leasehold_clients_confirmed_total").increment(1);

        let mut events = vec![ClientEvent::Confirmed {
            client_id,
            confirmed_at: now,
        }];
        if let Some(old) = superseded {
            events.push(ClientEvent::Replaced {
                old: old.client_id(),
                new: client_id,
                replaced_at: now,
            });
        }
        self.publish_all(events);
        Ok(record)
    }

    /// # Errors
    ///
    /// [`StateError::StaleClientId`] if no live record has this id.
    pub fn lookup(&self, client_id: ClientId) -> Result<Arc<ClientRecord>, StateError> {
        let record = self
            .by_id
            .get(&client_id)
            .map(|entry| entry.value().clone())
            .ok_or(StateError::StaleClientId(client_id))?;

        if record.is_released() {
            return Err(StateError::StaleClientId(client_id));
        }
        Ok(record)
    }

    /// Remove a record and release all of its state and sessions.
    pub fn destroy(&self, client_id: ClientId) -> Result<(), StateError> {
        let record = self.lookup(client_id)?;

        {
            let Entry::Occupied(mut occupied) = self.owners.entry(record.owner_key().clone()) else {
                return Err(StateError::StaleClientId(client_id));
            };
            if !occupied.get_mut().forget(&record) {
                return Err(StateError::StaleClientId(client_id));
            }
            if occupied.get().is_empty() {
                occupied.remove();
            }
            record.release();
            self.by_id.remove(&client_id);
        }

        let now = self.clock.now();
        info!(client_id = %client_id, "Client destroyed");
        metrics::counter!("leasehold_clients_destroyed_total").increment(1);
        self.publish_all(vec![ClientEvent::Destroyed {
            client_id,
            destroyed_at: now,
        }]);
        Ok(())
    }

    /// Remove unconfirmed records whose lease is older than `lease_seconds`.
    /// Confirmed records are never removed here.
    pub fn expire_idle_unconfirmed(&self, now: DateTime<Utc>, lease_seconds: u64) -> Vec<ClientId> {
        let candidates: Vec<Arc<ClientRecord>> = self
            .by_id
            .iter()
            .filter(|entry| {
                let record = entry.value();
                !record.is_confirmed() && record.lease_expired(now, lease_seconds)
            })
            .map(|entry| entry.value().clone())
            .collect();

        let mut expired = Vec::new();
        for record in candidates {
            let Entry::Occupied(mut occupied) = self.owners.entry(record.owner_key().clone()) else {
                continue;
            };
            if !occupied.get().holds_unconfirmed(&record) {
                continue;
            }
            // re-checked under the record's lease lock
            if !record.release_if_idle_unconfirmed(now, lease_seconds) {
                continue;
            }
            occupied.get_mut().unconfirmed = None;
            if occupied.get().is_empty() {
                occupied.remove();
            }
            self.by_id.remove(&record.client_id());
            expired.push(record.client_id());
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired idle unconfirmed clients");
            metrics::counter!("leasehold_clients_expired_total").increment(expired.len() as u64);
            self.publish_all(
                expired
                    .iter()
                    .map(|&client_id| ClientEvent::Expired {
                        client_id,
                        expired_at: now,
                    })
                    .collect(),
            );
        }
        expired
    }

    /// Confirmed record for an owner key, if any.
    pub fn confirmed_for(&self, key: &ClientOwnerKey) -> Option<Arc<ClientRecord>> {
        self.owners.get(key).and_then(|slot| slot.confirmed.clone())
    }

    /// Unconfirmed (possibly staged) record for an owner key, if any.
    pub fn unconfirmed_for(&self, key: &ClientOwnerKey) -> Option<Arc<ClientRecord>> {
        self.owners.get(key).and_then(|slot| slot.unconfirmed.clone())
    }

    /// Number of records reachable by client id.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn publish_all(&self, events: Vec<ClientEvent>) {
        metrics::gauge!("leasehold_clients_active").set(self.by_id.len() as f64);
        for event in events {
            self.events.publish_client_event(event);
        }
    }
}
