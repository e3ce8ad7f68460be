// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

// Trace-driven simulator for a multi-tier flash-backed object cache: a
// DRAM LRU in front of a flash tier built from a log region and/or a
// set-associative region, with admission and readmission policies
// gating the writes between tiers. "Flash writes" are accounting only;
// the objective reported is hit rate and flash write amplification.

mod admission;
mod cache;
mod candidate;
mod config;
mod error;
mod log;
mod lru;
mod rotating;
mod rrip;
mod sets;
mod stats;
mod trace;

pub use crate::admission::{create as create_admission_policy, Policy};
pub use crate::cache::{Cache, CHECK_WARMUP_INTERVAL, INDEX_LOG_RATIO, STATS_INTERVAL_POWER};
pub use crate::candidate::Candidate;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::log::{Log, LogEngine, LogFind};
pub use crate::lru::MemCache;
pub use crate::rotating::RotatingLog;
pub use crate::rrip::RripSets;
pub use crate::sets::{SetEngine, SetLayout, Sets, SetsOutcome};
pub use crate::stats::{LocalStats, StatsCollector};
pub use crate::trace::{create as create_trace, Request, RequestKind, TraceSource};
