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

// Append-only flash region with bulk eviction. The monolithic variant
// lives here: the region fills up and then flushes wholesale, emitting
// the entire resident set as one eviction batch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::candidate::Candidate;
use crate::stats::LocalStats;

/// Outcome of a log lookup. `HitInactive` marks an item that is still
/// block-resident but already promoted into the set region; the caller
/// follows up with `SetEngine::track_hit` and, if the sets no longer hold
/// the item, `reactivate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFind {
	Miss,
	Hit,
	HitInactive,
}

pub trait LogEngine {
	/// Insert a batch (amortizes the flash write); returns the eviction
	/// batch pushed out of the region.
	fn insert(&mut self, items: Vec<Candidate>) -> Vec<Candidate>;

	/// Insert an item handed back by the set region. Never flushes; the
	/// write-amplification tally for the item was already counted.
	fn insert_from_sets(&mut self, item: Candidate);

	fn find(&mut self, item: Candidate) -> LogFind;

	/// Re-mark an inactive item as log-owned again. Only meaningful after
	/// `find` returned `HitInactive` and the sets failed to locate it.
	fn reactivate(&mut self, item: Candidate);

	/// Offer rejected/evicted items back for readmission; retains the ones
	/// whose observed hit count clears the configured threshold.
	fn readmit(&mut self, items: Vec<Candidate>);

	fn ratio_capacity_used(&self) -> f64;
	fn ratio_evicted_to_capacity(&self) -> f64;
	fn write_amp(&self) -> f64;
	fn flush_stats(&self);
}

/// Monolithic log: one resident set, flushed in its entirety whenever the
/// next insertion would overflow.
pub struct Log {
	stats: Arc<LocalStats>,
	resident: HashMap<u64, Candidate>,
	/// Insertion order of resident ids; drained on flush so the eviction
	/// batch leaves in arrival order.
	order: Vec<u64>,
	per_item_hits: HashMap<u64, u64>,
	total_capacity: u64,
	total_size: u64,
	readmit: u64,
}

impl Log {
	pub fn new(log_capacity: u64, stats: Arc<LocalStats>, readmit: u64) -> Log {
		stats.set("logCapacity", log_capacity as i64);
		Log {
			stats,
			resident: HashMap::new(),
			order: Vec::new(),
			per_item_hits: HashMap::new(),
			total_capacity: log_capacity,
			total_size: 0,
			readmit,
		}
	}

	fn insert_one(&mut self, mut item: Candidate) {
		self.stats.add("bytes_written", item.size as i64);
		self.stats.bump("stores_requested");
		self.stats.add("stores_requested_bytes", item.size as i64);
		self.total_size += item.size;
		item.hit_count = 0;
		self.resident.insert(item.id, item);
		self.order.push(item.id);
		if self.readmit > 0 {
			self.per_item_hits.insert(item.id, 0);
		}
		assert!(self.total_size <= self.total_capacity);
	}
}

impl LogEngine for Log {
	fn insert(&mut self, items: Vec<Candidate>) -> Vec<Candidate> {
		let mut evicted = Vec::new();
		for item in items {
			if item.size + self.total_size > self.total_capacity {
				let flushed_size = self.total_size;
				for id in self.order.drain(..) {
					if let Some(resident) = self.resident.remove(&id) {
						evicted.push(resident);
					}
				}
				log::trace!(
					target: "flashsim",
					"Log flush: {} items, {} bytes",
					evicted.len(),
					flushed_size,
				);
				self.stats.add("numEvictions", evicted.len() as i64);
				self.stats.add("sizeEvictions", flushed_size as i64);
				self.stats.bump("numLogFlushes");
				self.total_size = 0;
			}
			self.insert_one(item);
		}
		self.stats.set("current_size", self.total_size as i64);
		assert!(self.total_capacity >= self.total_size);
		evicted
	}

	fn insert_from_sets(&mut self, item: Candidate) {
		if item.size + self.total_size > self.total_capacity {
			self.stats.add("bytes_rejected_from_sets", item.size as i64);
			self.stats.bump("num_rejected_from_sets");
			return;
		}
		self.stats.add("bytes_readmitted", item.size as i64);
		self.stats.bump("num_readmitted");
		self.stats.add("bytes_written", item.size as i64);
		self.total_size += item.size;
		self.resident.insert(item.id, item);
		self.order.push(item.id);
		assert!(self.total_size <= self.total_capacity);
		self.per_item_hits.insert(item.id, 0);
	}

	fn find(&mut self, item: Candidate) -> LogFind {
		match self.resident.get_mut(&item.id) {
			None => {
				self.stats.bump("misses");
				LogFind::Miss
			}
			Some(resident) => {
				self.stats.bump("hits");
				resident.hit_count += 1;
				if self.readmit > 0 {
					*self.per_item_hits.entry(item.id).or_insert(0) += 1;
				}
				LogFind::Hit
			}
		}
	}

	fn reactivate(&mut self, _item: Candidate) {}

	fn readmit(&mut self, items: Vec<Candidate>) {
		if self.readmit == 0 {
			return;
		}
		for item in items {
			let hits = self.per_item_hits.get(&item.id).copied().unwrap_or(0);
			if hits > self.readmit && self.total_size + item.size < self.total_capacity {
				self.stats.add("bytes_written", item.size as i64);
				self.stats.add("bytes_readmitted", item.size as i64);
				self.stats.bump("num_readmitted");
				self.total_size += item.size;
				self.resident.insert(item.id, item);
				self.order.push(item.id);
				assert!(self.total_size <= self.total_capacity);
				self.per_item_hits.insert(item.id, 0);
			} else {
				self.per_item_hits.remove(&item.id);
			}
		}
		self.stats.set("current_size", self.total_size as i64);
		assert!(self.total_capacity >= self.total_size);
	}

	fn ratio_capacity_used(&self) -> f64 {
		self.total_size as f64 / self.total_capacity as f64
	}

	fn ratio_evicted_to_capacity(&self) -> f64 {
		self.stats.get("sizeEvictions") as f64 / self.total_capacity as f64
	}

	fn write_amp(&self) -> f64 {
		self.stats.get("bytes_written") as f64 / self.stats.get("stores_requested_bytes") as f64
	}

	fn flush_stats(&self) {
		self.stats.set("bytes_written", 0);
		self.stats.set("stores_requested", 0);
		self.stats.set("stores_requested_bytes", 0);
		self.stats.set("numEvictions", 0);
		self.stats.set("sizeEvictions", 0);
		self.stats.set("numLogFlushes", 0);
		self.stats.set("misses", 0);
		self.stats.set("hits", 0);
	}
}
