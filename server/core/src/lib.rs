// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `leasehold-core` - NFSv4 client identity, lease and state core
//!
//! Server-side bookkeeping for NFSv4-class clients: identity establishment
//! and reboot detection, leases, per-client state tokens with a replay
//! sequence counter, and per-client sessions. Wire marshalling, RPC dispatch
//! and the backing filesystem live outside this crate.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `ClientRecord`, `StateId`, `Session`, lease clock, errors, config |
//! | [`application`] | Application | `ClientRegistry`, `ClientStateService`, `LeaseReaper` |
//! | [`infrastructure`] | Infrastructure | in-process `EventBus` |

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
