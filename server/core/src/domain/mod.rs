// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model for client identity, leases, state tokens and sessions.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entities, value objects and ports of the state core

pub mod time;
pub mod errors;
pub mod client;
pub mod state;
pub mod session;
pub mod events;
pub mod server_config;
