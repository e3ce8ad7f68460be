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

// Block-rotating log. Capacity is partitioned into equal blocks (plus a
// smaller tail block when it does not divide evenly) with a circular
// write head; advancing the head flushes the next block wholesale.
//
// Built with a set layout, the log keeps a set-number index over its
// residents and drags same-set residents along with every eviction, so
// one set update absorbs many log entries. Items promoted into sets stay
// physically block-resident under an inactive mark until their block
// rotates. Built without a layout the engine is the log-only ablation:
// no index, no co-eviction, no readmission.

use std::collections::HashMap;
use std::sync::Arc;

use crate::candidate::Candidate;
use crate::log::{LogEngine, LogFind};
use crate::sets::SetLayout;
use crate::stats::LocalStats;

/// Per-set byte budget for dragging extra log residents into an eviction
/// batch. High enough to rarely bind.
const EVICT_SET_LIMIT: u64 = 16000;

struct Block {
	items: Vec<Candidate>,
	capacity: u64,
	size: u64,
}

impl Block {
	fn new(capacity: u64) -> Block {
		Block { items: Vec::new(), capacity, size: 0 }
	}

	fn insert(&mut self, item: Candidate) {
		self.items.push(item);
		self.size += item.size;
		assert!(self.size <= self.capacity);
	}
}

pub struct RotatingLog {
	stats: Arc<LocalStats>,
	layout: Option<SetLayout>,
	blocks: Vec<Block>,
	/// Resident marker: present iff the item occupies log bytes; the value
	/// is false once the item has been promoted into the set region.
	item_active: HashMap<u64, bool>,
	per_item_hits: HashMap<u64, u64>,
	/// Secondary index: primary set number -> log residents hashing there.
	set_to_items: HashMap<u64, Vec<Candidate>>,
	total_capacity: u64,
	total_size: u64,
	active_block: usize,
	readmit: u64,
}

impl RotatingLog {
	pub fn new(
		log_capacity: u64,
		block_size: u64,
		layout: Option<SetLayout>,
		stats: Arc<LocalStats>,
		readmit: u64,
	) -> RotatingLog {
		stats.set("logCapacity", log_capacity as i64);
		let mut blocks: Vec<Block> =
			(0..log_capacity / block_size).map(|_| Block::new(block_size)).collect();
		// Allow the last block to be smaller than the others.
		if log_capacity % block_size != 0 {
			blocks.push(Block::new(log_capacity % block_size));
		}
		log::debug!(
			target: "flashsim",
			"Log capacity: {}, num blocks: {}, block capacity: {}",
			log_capacity,
			blocks.len(),
			block_size,
		);
		RotatingLog {
			stats,
			layout,
			blocks,
			item_active: HashMap::new(),
			per_item_hits: HashMap::new(),
			set_to_items: HashMap::new(),
			total_capacity: log_capacity,
			total_size: 0,
			active_block: 0,
			readmit,
		}
	}

	fn insert_one(&mut self, mut item: Candidate) {
		self.stats.add("bytes_written", item.size as i64);
		self.stats.bump("stores_requested");
		self.stats.add("stores_requested_bytes", item.size as i64);
		assert!(!self.item_active.contains_key(&item.id));
		self.total_size += item.size;
		item.hit_count = 0;
		self.blocks[self.active_block].insert(item);
		if let Some(layout) = &self.layout {
			self.per_item_hits.insert(item.id, 0);
			let set_num = layout.primary_set(item);
			self.set_to_items.entry(set_num).or_insert_with(Vec::new).push(item);
		}
		self.item_active.insert(item.id, true);
	}

	/// Advances the write head and flushes the block it lands on. Only
	/// items still marked active come out; promoted ones are forgotten.
	fn increment_block_and_flush(&mut self) -> Vec<Candidate> {
		let mut evicted = Vec::new();
		self.active_block = (self.active_block + 1) % self.blocks.len();
		let block = &mut self.blocks[self.active_block];

		if block.size > 0 {
			let flushed_items = block.items.len();
			let flushed_size = block.size;
			evicted.reserve(flushed_items);
			for item in block.items.drain(..) {
				if self.item_active.remove(&item.id) == Some(true) {
					evicted.push(item);
				}
			}
			self.stats.add("numEvictions", flushed_items as i64);
			self.stats.add("sizeEvictions", flushed_size as i64);
			self.stats.bump("numLogFlushes");
			self.total_size -= flushed_size;
			block.size = 0;
		}
		evicted
	}

	/// For every set touched by the eviction batch, drags other
	/// currently-resident log items of the same set along (up to
	/// `EVICT_SET_LIMIT` bytes), marking them inactive; their blocks clean
	/// them up on rotation. Returns the expanded batch.
	fn add_set_matches(&mut self, evicted: Vec<Candidate>) -> Vec<Candidate> {
		let layout = match &self.layout {
			Some(layout) => *layout,
			None => return evicted,
		};
		let mut ret = Vec::new();
		for item in &evicted {
			let set_num = layout.primary_set(*item);
			let entries = match self.set_to_items.remove(&set_num) {
				Some(entries) if !entries.is_empty() => entries,
				_ => continue,
			};
			ret.reserve(entries.len());
			let mut size_moved = 0u64;
			let mut not_moved = Vec::new();
			for mut entry in entries {
				let already_evicted = !self.item_active.contains_key(&entry.id);
				if !already_evicted && size_moved > EVICT_SET_LIMIT {
					not_moved.push(entry);
					continue;
				}
				entry.hit_count = self.per_item_hits.get(&entry.id).copied().unwrap_or(0) as u32;
				size_moved += entry.size;
				ret.push(entry);
				if !already_evicted {
					// Stats skip items the block flush already forced out.
					self.stats.bump("num_early_evict");
					self.stats.add("size_early_evict", entry.size as i64);
					self.item_active.insert(entry.id, false);
				}
			}
			self.set_to_items.insert(set_num, not_moved);
		}
		ret
	}
}

impl LogEngine for RotatingLog {
	fn insert(&mut self, items: Vec<Candidate>) -> Vec<Candidate> {
		let mut evicted = Vec::new();
		for item in items {
			let block = &self.blocks[self.active_block];
			if item.size + block.size > block.capacity {
				let mut flushed = self.increment_block_and_flush();
				evicted.append(&mut flushed);
			}
			self.insert_one(item);
		}
		let evicted = self.add_set_matches(evicted);
		assert!(self.total_capacity >= self.total_size);
		self.stats.set("current_size", self.total_size as i64);
		evicted
	}

	fn insert_from_sets(&mut self, item: Candidate) {
		let layout = match &self.layout {
			Some(layout) => *layout,
			None => return,
		};
		let set_num = layout.primary_set(item);
		if let Some(active) = self.item_active.get_mut(&item.id) {
			// Still block-resident: reactivating is free.
			self.stats.add("num_early_evict", -1);
			self.stats.add("size_early_evict", -(item.size as i64));
			*active = true;
			self.set_to_items.entry(set_num).or_insert_with(Vec::new).push(item);
			return;
		}
		let block = &mut self.blocks[self.active_block];
		if item.size + block.size > block.capacity {
			self.stats.add("bytes_rejected_from_sets", item.size as i64);
			self.stats.bump("num_rejected_from_sets");
			return;
		}
		self.stats.add("bytes_readmitted", item.size as i64);
		self.stats.bump("num_readmitted");
		self.stats.add("bytes_written", item.size as i64);
		self.total_size += item.size;
		block.insert(item);
		self.item_active.insert(item.id, true);
		self.set_to_items.entry(set_num).or_insert_with(Vec::new).push(item);
		self.per_item_hits.insert(item.id, 0);
	}

	fn find(&mut self, item: Candidate) -> LogFind {
		match self.item_active.get(&item.id) {
			None => {
				self.stats.bump("misses");
				LogFind::Miss
			}
			Some(false) => {
				self.stats.bump("hits");
				// Hit tracking continues in the set region.
				LogFind::HitInactive
			}
			Some(true) => {
				self.stats.bump("hits");
				if self.layout.is_some() {
					*self.per_item_hits.entry(item.id).or_insert(0) += 1;
				}
				LogFind::Hit
			}
		}
	}

	fn reactivate(&mut self, item: Candidate) {
		if let Some(active) = self.item_active.get_mut(&item.id) {
			*active = true;
		}
	}

	fn readmit(&mut self, items: Vec<Candidate>) {
		let layout = match &self.layout {
			Some(layout) => *layout,
			None => return,
		};
		for item in items {
			let set_num = layout.primary_set(item);
			if self.item_active.contains_key(&item.id) {
				self.stats.add("num_early_evict", -1);
				self.stats.add("size_early_evict", -(item.size as i64));
				self.item_active.insert(item.id, true);
				self.set_to_items.entry(set_num).or_insert_with(Vec::new).push(item);
			} else if self.readmit > 0
				&& self.per_item_hits.get(&item.id).copied().unwrap_or(0) > self.readmit
			{
				let block = &mut self.blocks[self.active_block];
				if block.size + item.size > block.capacity {
					// Not worth cleaning another block just to keep it.
					self.stats.bump("readmit_evicted");
					self.stats.add("readmit_evicted_size", item.size as i64);
					self.per_item_hits.remove(&item.id);
					continue;
				}
				self.stats.add("bytes_readmitted", item.size as i64);
				self.stats.bump("num_readmitted");
				self.stats.add("bytes_written", item.size as i64);
				self.set_to_items.entry(set_num).or_insert_with(Vec::new).push(item);
				self.total_size += item.size;
				block.insert(item);
				self.item_active.insert(item.id, true);
			}
			self.per_item_hits.remove(&item.id);
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
		self.stats.set("num_early_evict", 0);
		self.stats.set("size_early_evict", 0);
		self.stats.set("bytes_rejected_from_sets", 0);
		self.stats.set("num_rejected_from_sets", 0);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::candidate::candidate;

	fn log_only(capacity: u64, block_size: u64) -> (RotatingLog, Arc<LocalStats>) {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		(RotatingLog::new(capacity, block_size, None, stats.clone(), 0), stats)
	}

	fn log_with_sets(
		capacity: u64,
		block_size: u64,
		num_sets: u64,
		readmit: u64,
	) -> (RotatingLog, Arc<LocalStats>) {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let layout = SetLayout { num_sets, set_capacity: 1 << 20, num_hash_functions: 1 };
		(RotatingLog::new(capacity, block_size, Some(layout), stats.clone(), readmit), stats)
	}

	#[test]
	fn one_block_evicted_per_rotation() {
		let (mut log, stats) = log_only(100, 50);
		assert!(log.insert(vec![candidate(1, 40)]).is_empty());
		// Overflows block 0, head moves to (empty) block 1: no flush yet.
		assert!(log.insert(vec![candidate(2, 40)]).is_empty());
		assert_eq!(stats.get("numLogFlushes"), 0);
		// Overflows block 1, head wraps to block 0 and flushes object 1.
		let evicted = log.insert(vec![candidate(3, 40)]);
		assert_eq!(evicted, vec![candidate(1, 40)]);
		assert_eq!(stats.get("numLogFlushes"), 1);
		assert_eq!(stats.get("numEvictions"), 1);
		assert_eq!(stats.get("sizeEvictions"), 40);
		assert_eq!(log.find(candidate(2, 40)), LogFind::Hit);
		assert_eq!(log.find(candidate(3, 40)), LogFind::Hit);
		assert_eq!(log.find(candidate(1, 40)), LogFind::Miss);
	}

	#[test]
	fn tail_block_takes_the_remainder() {
		let (mut log, stats) = log_only(130, 50);
		assert_eq!(log.blocks.len(), 3);
		assert_eq!(log.blocks[2].capacity, 30);
		// Fill blocks 0 and 1, then a 25-byte item lands in the tail.
		log.insert(vec![candidate(1, 50), candidate(2, 50), candidate(3, 25)]);
		assert_eq!(stats.get("numLogFlushes"), 0);
		assert_eq!(stats.get("current_size"), 125);
	}

	#[test]
	fn co_evicts_same_set_residents() {
		// Objects 1 and 3 share set 1 of 2; block rotation forcing out
		// object 1 drags object 3 into the batch under an inactive mark.
		let (mut log, stats) = log_with_sets(100, 50, 2, 0);
		log.insert(vec![candidate(1, 40)]);
		log.insert(vec![candidate(3, 40)]);
		let evicted = log.insert(vec![candidate(2, 40)]);
		assert_eq!(evicted.len(), 2);
		assert_eq!(evicted[0].id, 1);
		assert_eq!(evicted[1].id, 3);
		assert_eq!(stats.get("num_early_evict"), 1);
		assert_eq!(stats.get("size_early_evict"), 40);
		// Object 3 is still block-resident, only inactive.
		assert_eq!(log.find(candidate(3, 40)), LogFind::HitInactive);
	}

	#[test]
	fn co_evicted_items_carry_their_hits() {
		let (mut log, _) = log_with_sets(100, 50, 2, 1);
		log.insert(vec![candidate(1, 40)]);
		log.insert(vec![candidate(3, 40)]);
		assert_eq!(log.find(candidate(3, 40)), LogFind::Hit);
		assert_eq!(log.find(candidate(3, 40)), LogFind::Hit);
		let evicted = log.insert(vec![candidate(2, 40)]);
		assert_eq!(evicted.len(), 2);
		assert_eq!(evicted[1].id, 3);
		assert_eq!(evicted[1].hit_count, 2);
		// The flushed item was reset on insertion.
		assert_eq!(evicted[0].hit_count, 0);
	}

	#[test]
	fn insert_from_sets_reactivates_resident_items() {
		let (mut log, stats) = log_with_sets(100, 50, 2, 0);
		log.insert(vec![candidate(1, 40)]);
		log.insert(vec![candidate(3, 40)]);
		log.insert(vec![candidate(2, 40)]);
		assert_eq!(stats.get("num_early_evict"), 1);
		// The set region hands object 3 back: it is still block-resident,
		// so it is simply re-marked active and re-indexed.
		log.insert_from_sets(candidate(3, 40));
		assert_eq!(stats.get("num_early_evict"), 0);
		assert_eq!(log.find(candidate(3, 40)), LogFind::Hit);
		assert_eq!(stats.get("num_readmitted"), 0);
	}

	#[test]
	fn insert_from_sets_appends_or_rejects() {
		let (mut log, stats) = log_with_sets(100, 50, 2, 0);
		log.insert(vec![candidate(1, 40)]);
		// Object 5 is long gone from the log; it fits the active block.
		log.insert_from_sets(candidate(5, 10));
		assert_eq!(stats.get("num_readmitted"), 1);
		assert_eq!(log.find(candidate(5, 10)), LogFind::Hit);
		// No room for another 10 bytes in block 0.
		log.insert_from_sets(candidate(7, 10));
		assert_eq!(stats.get("num_rejected_from_sets"), 1);
		assert_eq!(log.find(candidate(7, 10)), LogFind::Miss);
	}

	#[test]
	fn readmit_thresholds_on_observed_hits() {
		let (mut log, stats) = log_with_sets(100, 50, 2, 1);
		log.insert(vec![candidate(1, 8)]);
		assert_eq!(log.find(candidate(1, 8)), LogFind::Hit);
		assert_eq!(log.find(candidate(1, 8)), LogFind::Hit);
		log.insert(vec![candidate(3, 10)]);
		log.insert(vec![candidate(2, 40)]);
		// Rotation back to block 0 flushes objects 1 (2 hits) and 3 (cold).
		let evicted = log.insert(vec![candidate(4, 20)]);
		assert_eq!(evicted.len(), 2);
		assert_eq!(evicted[0].hit_count, 2);

		log.readmit(evicted);
		// Object 1 cleared the threshold and was appended to the active
		// block; object 3 was dropped.
		assert_eq!(stats.get("num_readmitted"), 1);
		assert_eq!(stats.get("bytes_readmitted"), 8);
		assert_eq!(log.find(candidate(1, 8)), LogFind::Hit);
		assert_eq!(log.find(candidate(3, 10)), LogFind::Miss);
	}

	#[test]
	fn readmit_reactivates_dragged_residents() {
		let (mut log, stats) = log_with_sets(100, 50, 2, 1);
		log.insert(vec![candidate(1, 30)]);
		log.insert(vec![candidate(3, 30)]);
		// Flushing block 0 evicts object 1 and drags the still-resident
		// object 3 along under an inactive mark.
		let evicted = log.insert(vec![candidate(2, 40)]);
		assert_eq!(evicted.len(), 2);
		assert_eq!(stats.get("num_early_evict"), 1);

		log.readmit(evicted);
		// Object 3 was still block-resident: reactivated for free. Object 1
		// never saw a hit and is gone.
		assert_eq!(stats.get("num_early_evict"), 0);
		assert_eq!(log.find(candidate(3, 30)), LogFind::Hit);
		assert_eq!(log.find(candidate(1, 30)), LogFind::Miss);
		assert_eq!(stats.get("num_readmitted"), 0);
	}

	#[test]
	fn readmit_short_circuits_on_full_block() {
		let (mut log, stats) = log_with_sets(100, 50, 2, 1);
		log.insert(vec![candidate(1, 40)]);
		log.find(candidate(1, 40));
		log.find(candidate(1, 40));
		// Rotate twice so object 1 is fully evicted, then fill the head.
		log.insert(vec![candidate(2, 40)]);
		let evicted = log.insert(vec![candidate(4, 45)]);
		assert!(evicted.iter().any(|c| c.id == 1));
		log.insert(vec![candidate(6, 4)]);

		let hot: Vec<Candidate> = evicted.into_iter().filter(|c| c.id == 1).collect();
		log.readmit(hot);
		// Readmission would need a block advance; it is dropped instead.
		assert_eq!(stats.get("readmit_evicted"), 1);
		assert_eq!(stats.get("readmit_evicted_size"), 40);
		assert_eq!(log.find(candidate(1, 40)), LogFind::Miss);
	}

	#[test]
	fn size_accounting_stays_consistent() {
		let (mut log, _) = log_only(128, 32);
		for id in 1..200 {
			log.insert(vec![candidate(id, 1 + id % 20)]);
			let block_sum: u64 = log.blocks.iter().map(|b| b.size).sum();
			assert_eq!(block_sum, log.total_size);
			assert!(log.total_size <= log.total_capacity);
		}
	}
}
