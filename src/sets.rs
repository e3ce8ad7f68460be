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

// Set-associative flash region, FIFO-with-hit-promotion variant.
//
// Each bin is an ordered deque split by an insertion cursor: everything
// in front of the cursor never saw a hit and is fair game for eviction,
// everything behind it was inserted carrying a hit and is protected.
// Every write to a set is accounted as a full-set flash write, however
// many objects landed in it within the batch.

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::candidate::Candidate;
use crate::stats::{LocalStats, SIZE_BUCKETING};

/// Width of the per-bin NRU hit mask, one bit per logical slot.
pub const HIT_BIT_VECTOR_SIZE: usize = 32;

/// Geometry of the set region plus the bucket hashing. Copies of this are
/// handed to collaborators (the rotating log, admission policies) that
/// need to group candidates by set without holding the engine itself.
#[derive(Debug, Clone, Copy)]
pub struct SetLayout {
	pub num_sets: u64,
	pub set_capacity: u64,
	pub num_hash_functions: u32,
}

fn rehash(value: u64) -> u64 {
	let mut hasher = DefaultHasher::new();
	value.hash(&mut hasher);
	hasher.finish()
}

impl SetLayout {
	/// The set used for single-hash placement.
	pub fn primary_set(&self, item: Candidate) -> u64 {
		item.id % self.num_sets
	}

	/// All sets the item could be mapped to, primary first. The chain is
	/// one derivation longer than `num_hash_functions`; existing traces
	/// depend on that, so it stays.
	pub fn find_set_nums(&self, item: Candidate) -> Vec<u64> {
		let mut possibilities = Vec::with_capacity(self.num_hash_functions as usize + 1);
		let mut current = item.id;
		for _ in 0..=self.num_hash_functions {
			let set_num = current % self.num_sets;
			if !possibilities.contains(&set_num) {
				possibilities.push(set_num);
			}
			current = rehash(rehash(current));
		}
		possibilities
	}

	pub fn total_capacity(&self) -> u64 {
		self.num_sets * self.set_capacity
	}
}

/// Result of a batch insertion. `readmit` holds hit-carrying victims the
/// orchestrator should hand back to the log; engines built without
/// readmission routing fold those into `evicted` instead.
#[derive(Debug, Default)]
pub struct SetsOutcome {
	pub evicted: Vec<Candidate>,
	pub readmit: Vec<Candidate>,
}

pub trait SetEngine {
	/// Insert a batch, each item into its primary set.
	fn insert(&mut self, items: Vec<Candidate>) -> SetsOutcome;

	/// Insert a batch into one pre-chosen set; every item must hash there.
	fn insert_into_set(&mut self, set_num: u64, items: Vec<Candidate>) -> SetsOutcome;

	fn find(&mut self, item: Candidate) -> bool;

	fn layout(&self) -> &SetLayout;

	fn find_set_nums(&self, item: Candidate) -> Vec<u64> {
		self.layout().find_set_nums(item)
	}

	/// Hit on a set-resident object observed elsewhere in the cache (the
	/// log's inactive entries). Promotes like a hit, without the hit/miss
	/// accounting of `find`.
	fn track_hit(&mut self, item: Candidate) -> bool;

	fn ratio_capacity_used(&self) -> f64;
	fn ratio_evicted_to_capacity(&self) -> f64;
	fn write_amp(&self) -> f64;
	fn flush_stats(&self);
	/// Auxiliary-metadata cost of the engine in bytes.
	fn memory_consumption(&self) -> u64;
	fn enable_dist_tracking(&mut self);
	fn enable_hit_distribution_over_sets(&mut self);
}

struct Bin {
	items: VecDeque<Candidate>,
	size: u64,
	/// Insertion point for no-hit items; index of the first protected slot.
	no_hit_insert_loc: usize,
	/// NRU marks, bit per slot, only maintained in NRU mode.
	hit_bits: u32,
}

impl Bin {
	fn new() -> Bin {
		Bin { items: VecDeque::new(), size: 0, no_hit_insert_loc: 0, hit_bits: 0 }
	}
}

pub struct Sets {
	stats: Arc<LocalStats>,
	layout: SetLayout,
	bins: Vec<Bin>,
	total_size: u64,
	total_capacity: u64,
	route_hit_evictions: bool,
	nru: bool,
	dist_tracking: bool,
	hit_dist: bool,
}

impl Sets {
	pub fn new(
		layout: SetLayout,
		stats: Arc<LocalStats>,
		route_hit_evictions: bool,
		nru: bool,
	) -> Sets {
		stats.set("numSets", layout.num_sets as i64);
		stats.set("setCapacity", layout.set_capacity as i64);
		stats.set("numHashFunctions", layout.num_hash_functions as i64);
		stats.set("nru", nru as i64);
		let bins = (0..layout.num_sets).map(|_| Bin::new()).collect();
		Sets {
			stats,
			layout,
			bins,
			total_size: 0,
			total_capacity: layout.total_capacity(),
			route_hit_evictions,
			nru,
			dist_tracking: false,
			hit_dist: false,
		}
	}

	/// Places one item, evicting from the front of the bin until it fits.
	fn insert_one(&mut self, item: Candidate, bin_num: u64, outcome: &mut SetsOutcome) {
		assert!(item.size <= self.layout.set_capacity);
		assert!(self.layout.find_set_nums(item).contains(&bin_num));
		assert!(!(item.size == 0 && item.id == 0));

		let bin = &mut self.bins[bin_num as usize];
		assert!(bin.items.iter().all(|resident| resident.id != item.id));

		while item.size + bin.size > self.layout.set_capacity {
			if bin.no_hit_insert_loc == 0 && item.hit_count == 0 {
				// Everything resident is protected; the newcomer loses.
				self.stats.bump("numEvictions");
				self.stats.add("sizeEvictions", item.size as i64);
				self.stats.bump("numEvictionsImmediate");
				self.stats.add("sizeEvictionsImmediate", item.size as i64);
				outcome.evicted.push(item);
				return;
			}
			let old = bin.items[0];
			self.stats.bump("numEvictions");
			self.stats.add("sizeEvictions", old.size as i64);
			bin.size -= old.size;
			self.total_size -= old.size;
			if bin.no_hit_insert_loc > 0 {
				bin.no_hit_insert_loc -= 1;
				outcome.evicted.push(old);
			} else {
				self.stats.bump("numHitItemsEvicted");
				self.stats.add("sizeHitItemsEvicted", old.size as i64);
				if self.route_hit_evictions {
					outcome.readmit.push(old);
				} else {
					outcome.evicted.push(old);
				}
			}
			bin.items.pop_front();
		}

		if item.hit_count > 0 {
			let mut item = item;
			item.hit_count = 0;
			bin.items.push_back(item);
		} else {
			assert!(bin.no_hit_insert_loc <= bin.items.len());
			bin.items.insert(bin.no_hit_insert_loc, item);
			bin.no_hit_insert_loc += 1;
		}
		bin.size += item.size;
		self.total_size += item.size;
		self.stats.set("current_size", self.total_size as i64);
	}

	/// Partitions a bin into no-hit prefix and hit suffix according to the
	/// NRU marks, clears the marks, and returns the new cursor.
	fn reorder_set_nru(&mut self, bin_num: u64) -> usize {
		assert!(bin_num < self.layout.num_sets);
		let dist_tracking = self.dist_tracking;
		let bin = &mut self.bins[bin_num as usize];
		let mut hit_items = Vec::new();
		let mut no_hit_items = Vec::new();
		let mut size_hits = 0u64;
		for (i, item) in bin.items.drain(..).enumerate() {
			assert!(!(item.size == 0 && item.id == 0));
			if i >= HIT_BIT_VECTOR_SIZE || bin.hit_bits & (1 << i) == 0 {
				no_hit_items.push(item);
			} else {
				if dist_tracking {
					size_hits += item.size;
				}
				hit_items.push(item);
			}
		}
		bin.hit_bits = 0;
		let cursor = no_hit_items.len();
		let hits = hit_items.len();
		bin.items.extend(no_hit_items);
		bin.items.extend(hit_items);
		if dist_tracking {
			self.stats.bump(&format!("numItemsWithHits{}", hits));
			let bucketed = (size_hits / SIZE_BUCKETING) * SIZE_BUCKETING;
			self.stats.bump(&format!("sizeItemsWithHits{}", bucketed));
		}
		cursor
	}

	fn note_requested_store(&self, item: Candidate) {
		self.stats.bump("stores_requested");
		self.stats.add("stores_requested_bytes", item.size as i64);
	}

	fn note_actual_store(&self, num_sets_updated: u64) {
		self.stats
			.add("bytes_written", (num_sets_updated * self.layout.set_capacity) as i64);
	}

	fn scan_bin(&mut self, bin_num: u64, item: Candidate) -> bool {
		let nru = self.nru;
		let bin = &mut self.bins[bin_num as usize];
		for (i, resident) in bin.items.iter().enumerate() {
			if *resident == item {
				if nru && i < HIT_BIT_VECTOR_SIZE {
					bin.hit_bits |= 1 << i;
				}
				return true;
			}
		}
		false
	}
}

impl SetEngine for Sets {
	fn insert(&mut self, items: Vec<Candidate>) -> SetsOutcome {
		let mut sets_touched = vec![false; self.layout.num_sets as usize];
		let mut outcome = SetsOutcome::default();
		for item in items {
			let bin_num = self.layout.primary_set(item);
			if !sets_touched[bin_num as usize] && self.nru {
				let cursor = self.reorder_set_nru(bin_num);
				self.bins[bin_num as usize].no_hit_insert_loc = cursor;
			}
			sets_touched[bin_num as usize] = true;
			self.insert_one(item, bin_num, &mut outcome);
			self.note_requested_store(item);
		}
		let num_touched = sets_touched.iter().filter(|touched| **touched).count();
		self.note_actual_store(num_touched as u64);
		assert!(self.total_capacity >= self.total_size);
		outcome
	}

	fn insert_into_set(&mut self, set_num: u64, items: Vec<Candidate>) -> SetsOutcome {
		assert!(set_num < self.layout.num_sets);
		let mut outcome = SetsOutcome::default();
		if self.nru {
			let cursor = self.reorder_set_nru(set_num);
			self.bins[set_num as usize].no_hit_insert_loc = cursor;
		}
		let touched = !items.is_empty();
		for item in items {
			self.insert_one(item, set_num, &mut outcome);
			self.note_requested_store(item);
		}
		if touched {
			self.note_actual_store(1);
		}
		assert!(self.total_capacity >= self.total_size);
		outcome
	}

	fn find(&mut self, item: Candidate) -> bool {
		for bin_num in self.layout.find_set_nums(item) {
			if self.scan_bin(bin_num, item) {
				if self.hit_dist {
					self.stats.bump(&format!("set{}", bin_num));
				}
				self.stats.bump("hits");
				return true;
			}
			if self.hit_dist {
				self.stats.bump(&format!("setMisses{}", bin_num));
			}
		}
		self.stats.bump("misses");
		false
	}

	fn layout(&self) -> &SetLayout {
		&self.layout
	}

	fn track_hit(&mut self, item: Candidate) -> bool {
		for bin_num in self.layout.find_set_nums(item) {
			if self.scan_bin(bin_num, item) {
				self.stats.bump("hitsSharedWithLog");
				return true;
			}
		}
		self.stats.bump("trackHitsFailed");
		false
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
		self.stats.set("misses", 0);
		self.stats.set("hits", 0);
		self.stats.set("bytes_written", 0);
		self.stats.set("stores_requested", 0);
		self.stats.set("stores_requested_bytes", 0);
		self.stats.set("sizeEvictions", 0);
		self.stats.set("numEvictions", 0);
		self.stats.set("hitsSharedWithLog", 0);
		self.stats.set("trackHitsFailed", 0);
		self.stats.set("numHitItemsEvicted", 0);
	}

	fn memory_consumption(&self) -> u64 {
		if self.nru {
			(HIT_BIT_VECTOR_SIZE as u64 / 8) * self.layout.num_sets
		} else {
			0
		}
	}

	fn enable_dist_tracking(&mut self) {
		self.dist_tracking = true;
	}

	fn enable_hit_distribution_over_sets(&mut self) {
		self.hit_dist = true;
	}
}
