// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod client_registry;
pub mod client_state_service;
pub mod lease_reaper;

pub use client_registry::ClientRegistry;
pub use client_state_service::{ClientStateService, EstablishedIdentity};
pub use lease_reaper::{LeaseReaper, LeaseReaperConfig};
