// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lease Clock
//!
//! Wall-clock time source used for every lease timestamp, plus the protocol
//! time value (`seconds` + `nseconds`) and its conversion to milliseconds.
//!
//! Lease logic never calls `Utc::now()` directly; it asks a [`LeaseClock`].
//! Production code uses [`SystemClock`], tests substitute a [`ManualClock`]
//! and move time forward explicitly.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Time source and time-value discipline shared by lease logic

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::errors::StateError;

const NANOS_PER_SECOND: u32 = 1_000_000_000;
const NANOS_PER_MILLI: u32 = 1_000_000;

/// Source of "now" for lease bookkeeping.
pub trait LeaseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the host wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LeaseClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl LeaseClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Milliseconds elapsed from `since` to `now`; negative if the clock stepped back.
pub fn elapsed_millis(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_milliseconds()
}

/// Protocol time value: whole seconds since the epoch plus a sub-second part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NfsTime {
    pub seconds: i64,
    pub nseconds: u32,
}

impl NfsTime {
    pub fn new(seconds: i64, nseconds: u32) -> Self {
        Self { seconds, nseconds }
    }

    /// Convert to milliseconds since the epoch.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidTimeValue`] when `nseconds` is a full second or
    /// more, or when `seconds` does not fit in an `i64` millisecond count.
    pub fn to_millis(&self) -> Result<i64, StateError> {
        if self.nseconds >= NANOS_PER_SECOND {
            return Err(self.invalid());
        }
        self.seconds
            .checked_mul(1000)
            .and_then(|millis| millis.checked_add(i64::from(self.nseconds / NANOS_PER_MILLI)))
            .ok_or_else(|| self.invalid())
    }

    fn invalid(&self) -> StateError {
        StateError::InvalidTimeValue {
            seconds: self.seconds,
            nseconds: self.nseconds,
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        let seconds = millis.div_euclid(1000);
        let rem = millis.rem_euclid(1000) as u32;
        Self {
            seconds,
            nseconds: rem * NANOS_PER_MILLI,
        }
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            seconds: at.timestamp(),
            nseconds: at.timestamp_subsec_nanos().min(NANOS_PER_SECOND - 1),
        }
    }

    pub fn to_datetime(&self) -> Result<DateTime<Utc>, StateError> {
        let millis = self.to_millis()?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| self.invalid())
    }
}
