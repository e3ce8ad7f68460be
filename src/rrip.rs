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

// Set-associative flash region, RRIP variant. Each bin keeps FIFO
// queues of candidates bucketed by re-reference prediction value;
// higher RRPV means more evictable. A batch touching a bin first ages
// every cohort so the oldest sits at the eviction frontier.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::candidate::Candidate;
use crate::sets::{SetEngine, SetLayout, SetsOutcome};
use crate::stats::LocalStats;

/// Inserted items start this far below the distant (maximum) RRPV.
const RRIP_LONG_DIFF: u32 = 1;
/// Distance of the eviction frontier from `2^bits`.
const RRIP_DISTANT_DIFF: u32 = 1;
/// Average object size, only used for the metadata memory estimate.
const AVG_OBJ_SIZE_BYTES: f64 = 330.0;

struct Bin {
	/// RRPV -> FIFO of candidates at that value. Highest key is the
	/// eviction frontier.
	rrpv_to_items: BTreeMap<u32, VecDeque<Candidate>>,
	size: u64,
}

impl Bin {
	fn new() -> Bin {
		Bin { rrpv_to_items: BTreeMap::new(), size: 0 }
	}
}

pub struct RripSets {
	stats: Arc<LocalStats>,
	layout: SetLayout,
	bins: Vec<Bin>,
	total_size: u64,
	total_capacity: u64,
	route_hit_evictions: bool,
	bits: u32,
	max_rrpv: u32,
	/// Promotion RRIP in the sets, value RRIP on merge from the log.
	mixed: bool,
	/// Promotion RRIP everywhere.
	promotion_only: bool,
	hit_dist: bool,
}

impl RripSets {
	pub fn new(
		layout: SetLayout,
		stats: Arc<LocalStats>,
		route_hit_evictions: bool,
		bits: u32,
		promotion_only: bool,
		mixed: bool,
	) -> RripSets {
		stats.set("numSets", layout.num_sets as i64);
		stats.set("setCapacity", layout.set_capacity as i64);
		stats.set("numHashFunctions", layout.num_hash_functions as i64);
		stats.set("rripBits", bits as i64);
		let bins = (0..layout.num_sets).map(|_| Bin::new()).collect();
		RripSets {
			stats,
			layout,
			bins,
			total_size: 0,
			total_capacity: layout.total_capacity(),
			route_hit_evictions,
			bits,
			max_rrpv: (1u32 << bits) - RRIP_DISTANT_DIFF,
			mixed,
			promotion_only,
			hit_dist: false,
		}
	}

	/// Ages a bin so its oldest cohort reaches the eviction frontier.
	fn increment_rrpv_values(&mut self, bin_num: u64) {
		let max_rrpv = self.max_rrpv;
		let bin = &mut self.bins[bin_num as usize];
		let current_max = match bin.rrpv_to_items.keys().next_back() {
			Some(&key) => key,
			None => return,
		};
		if current_max >= max_rrpv {
			return;
		}
		let diff = max_rrpv - current_max;
		let old = std::mem::take(&mut bin.rrpv_to_items);
		for (rrpv, queue) in old {
			bin.rrpv_to_items.insert(rrpv + diff, queue);
		}
	}

	/// Bytes resident at or above the insertion point, i.e. what the
	/// eviction loop could free without touching younger cohorts.
	fn allowable_size(bin: &Bin, insertion_point: u32) -> u64 {
		bin.rrpv_to_items
			.range(insertion_point..)
			.flat_map(|(_, queue)| queue.iter())
			.map(|item| item.size)
			.sum()
	}

	fn insert_one(&mut self, item: Candidate, bin_num: u64, outcome: &mut SetsOutcome) {
		assert!(item.size <= self.layout.set_capacity);
		assert!(self.layout.find_set_nums(item).contains(&bin_num));
		assert!(!(item.size == 0 && item.id == 0));

		let insert_val = {
			let base = self.max_rrpv as i64 - RRIP_LONG_DIFF as i64 - item.hit_count as i64;
			if base < 0 {
				0
			} else if self.promotion_only && item.hit_count > 0 {
				0
			} else {
				base as u32
			}
		};

		let bin = &mut self.bins[bin_num as usize];
		if Self::allowable_size(bin, insert_val) < item.size
			&& item.size + bin.size > self.layout.set_capacity
		{
			// The cohorts above the insertion point cannot make room;
			// the incoming item is the victim.
			self.stats.bump("numEvictions");
			self.stats.add("sizeEvictions", item.size as i64);
			self.stats.bump("numEvictionsImmediate");
			self.stats.add("sizeEvictionsImmediate", item.size as i64);
			if item.hit_count > 0 && self.route_hit_evictions {
				outcome.readmit.push(item);
			} else {
				outcome.evicted.push(item);
			}
			return;
		}

		while item.size + bin.size > self.layout.set_capacity {
			let frontier = *bin
				.rrpv_to_items
				.keys()
				.next_back()
				.expect("resident cohorts remain while over budget");
			let queue = bin.rrpv_to_items.get_mut(&frontier).expect("frontier cohort exists");
			let old = queue.pop_front().expect("cohorts are dropped when emptied");
			self.stats.bump("numEvictions");
			self.stats.add("sizeEvictions", old.size as i64);
			bin.size -= old.size;
			self.total_size -= old.size;
			outcome.evicted.push(old);
			if queue.is_empty() {
				bin.rrpv_to_items.remove(&frontier);
			}
		}

		bin.rrpv_to_items.entry(insert_val).or_insert_with(VecDeque::new).push_back(item);
		bin.size += item.size;
		self.total_size += item.size;
		self.stats.set("current_size", self.total_size as i64);
	}

	/// Scans one bin from the eviction frontier down; a match at a
	/// non-zero RRPV is promoted one step, or to zero in the promotion
	/// modes.
	fn scan_bin(&mut self, bin_num: u64, item: Candidate) -> bool {
		let promote_to_zero = self.mixed || self.promotion_only;
		let bin = &mut self.bins[bin_num as usize];
		let keys: Vec<u32> = bin.rrpv_to_items.keys().rev().copied().collect();
		for rrpv in keys {
			let queue = match bin.rrpv_to_items.get_mut(&rrpv) {
				Some(queue) => queue,
				None => continue,
			};
			let pos = match queue.iter().position(|resident| *resident == item) {
				Some(pos) => pos,
				None => continue,
			};
			if rrpv != 0 {
				let found = queue.remove(pos).expect("position just located");
				if queue.is_empty() {
					bin.rrpv_to_items.remove(&rrpv);
				}
				let dest = if promote_to_zero { 0 } else { rrpv - 1 };
				bin.rrpv_to_items.entry(dest).or_insert_with(VecDeque::new).push_back(found);
			}
			return true;
		}
		false
	}

	fn note_requested_store(&self, item: Candidate) {
		self.stats.bump("stores_requested");
		self.stats.add("stores_requested_bytes", item.size as i64);
	}

	fn note_actual_store(&self, num_sets_updated: u64) {
		self.stats
			.add("bytes_written", (num_sets_updated * self.layout.set_capacity) as i64);
	}
}

impl SetEngine for RripSets {
	fn insert(&mut self, items: Vec<Candidate>) -> SetsOutcome {
		let mut sets_touched = vec![false; self.layout.num_sets as usize];
		let mut outcome = SetsOutcome::default();
		for item in items {
			let bin_num = self.layout.primary_set(item);
			if !sets_touched[bin_num as usize] {
				self.increment_rrpv_values(bin_num);
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
		self.increment_rrpv_values(set_num);
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
				self.stats.bump("hits");
				if self.hit_dist {
					self.stats.bump(&format!("setHits{}", bin_num));
				}
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
		// Estimate from the average object size; the RRPV bits are the
		// only per-object metadata.
		let bits_per_set = self.bits as f64 * (self.layout.set_capacity as f64 / AVG_OBJ_SIZE_BYTES);
		let total_bits = bits_per_set as u64 * self.layout.num_sets;
		total_bits / 8
	}

	fn enable_dist_tracking(&mut self) {}

	fn enable_hit_distribution_over_sets(&mut self) {
		self.hit_dist = true;
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::candidate::{candidate, hit_candidate};

	fn one_set(capacity: u64, bits: u32) -> (RripSets, Arc<LocalStats>) {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let layout = SetLayout { num_sets: 1, set_capacity: capacity, num_hash_functions: 1 };
		(RripSets::new(layout, stats.clone(), false, bits, false, false), stats)
	}

	fn rrpv_of(sets: &RripSets, id: u64) -> Option<u32> {
		for (rrpv, queue) in &sets.bins[0].rrpv_to_items {
			if queue.iter().any(|c| c.id == id) {
				return Some(*rrpv);
			}
		}
		None
	}

	#[test]
	fn inserts_at_long_and_ages_to_frontier() {
		// bits = 2: RRPV range [0, 3], long insertion point 2.
		let (mut sets, _) = one_set(80, 2);
		sets.insert(vec![candidate(1, 40), candidate(2, 40)]);
		assert_eq!(rrpv_of(&sets, 1), Some(2));
		assert_eq!(rrpv_of(&sets, 2), Some(2));

		// Hit moves object 1 one step toward zero.
		assert!(sets.find(candidate(1, 40)));
		assert_eq!(rrpv_of(&sets, 1), Some(1));

		// New batch: aging shifts 2 -> 3 and 1 -> 2, then the frontier
		// cohort is evicted to make room.
		let outcome = sets.insert(vec![candidate(3, 40)]);
		assert_eq!(outcome.evicted, vec![candidate(2, 40)]);
		assert_eq!(rrpv_of(&sets, 1), Some(2));
		assert_eq!(rrpv_of(&sets, 3), Some(2));
	}

	#[test]
	fn hit_count_lowers_insertion_point() {
		let (mut sets, _) = one_set(200, 2);
		sets.insert(vec![hit_candidate(1, 40, 1), hit_candidate(2, 40, 5), candidate(3, 40)]);
		// insert_val = 3 - 1 - hits, clamped at zero.
		assert_eq!(rrpv_of(&sets, 1), Some(1));
		assert_eq!(rrpv_of(&sets, 2), Some(0));
		assert_eq!(rrpv_of(&sets, 3), Some(2));
	}

	#[test]
	fn promotion_only_pins_hit_inserts_to_zero() {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let layout = SetLayout { num_sets: 1, set_capacity: 200, num_hash_functions: 1 };
		let mut sets = RripSets::new(layout, stats, false, 2, true, false);
		sets.insert(vec![hit_candidate(1, 40, 1), candidate(2, 40)]);
		assert_eq!(rrpv_of(&sets, 1), Some(0));
		assert_eq!(rrpv_of(&sets, 2), Some(2));
		// Promotion mode also resets to zero on hit.
		assert!(sets.find(candidate(2, 40)));
		assert_eq!(rrpv_of(&sets, 2), Some(0));
	}

	#[test]
	fn unpromotable_incoming_item_is_rejected() {
		let (mut sets, stats) = one_set(90, 2);
		sets.insert(vec![candidate(1, 40), candidate(2, 40)]);
		// Promote object 2 to RRPV 0.
		assert!(sets.find(candidate(2, 40)));
		assert!(sets.find(candidate(2, 40)));
		assert_eq!(rrpv_of(&sets, 2), Some(0));

		// Aging lifts object 1 to the frontier and object 2 to RRPV 1.
		// Only 40 bytes sit at or above the insertion point, which cannot
		// make room for 50: the incoming item is the victim.
		let outcome = sets.insert(vec![candidate(3, 50)]);
		assert_eq!(outcome.evicted, vec![candidate(3, 50)]);
		assert_eq!(stats.get("numEvictionsImmediate"), 1);
		assert!(sets.find(candidate(1, 40)));
		assert!(sets.find(candidate(2, 40)));
	}

	#[test]
	fn eviction_drains_frontier_queue_in_fifo_order() {
		let (mut sets, _) = one_set(120, 2);
		sets.insert(vec![candidate(1, 40), candidate(2, 40), candidate(3, 40)]);
		// All three share RRPV 2; a new batch ages them to 3 and evicts
		// from the front of that queue.
		let outcome = sets.insert(vec![candidate(4, 80)]);
		assert_eq!(outcome.evicted, vec![candidate(1, 40), candidate(2, 40)]);
		assert_eq!(rrpv_of(&sets, 3), Some(3));
		assert_eq!(rrpv_of(&sets, 4), Some(2));
	}

	#[test]
	fn size_invariant_holds() {
		let (mut sets, _) = one_set(100, 2);
		for id in 1..40 {
			sets.insert(vec![candidate(id, 30)]);
			let resident: u64 = sets.bins[0]
				.rrpv_to_items
				.values()
				.flat_map(|queue| queue.iter())
				.map(|item| item.size)
				.sum();
			assert_eq!(resident, sets.total_size);
			assert!(sets.total_size <= sets.total_capacity);
		}
	}

	#[test]
	fn memory_estimate_uses_rrpv_bits() {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let layout = SetLayout { num_sets: 10, set_capacity: 3300, num_hash_functions: 1 };
		let sets = RripSets::new(layout, stats, false, 2, false, false);
		// 2 bits x (3300 / 330) objects = 20 bits per set, 200 bits total.
		assert_eq!(sets.memory_consumption(), 25);
	}
}
