// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use prost_types::Timestamp;

/// Wall clock used for lease assignment and expiration sweeps. Tests
/// substitute fakes to advance time deterministically.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub fn to_timestamp(t: SystemTime) -> Timestamp {
    Timestamp::from(t)
}

pub fn from_timestamp(ts: &Timestamp) -> Option<SystemTime> {
    SystemTime::try_from(*ts).ok()
}
