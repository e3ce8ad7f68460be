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

// DRAM front of the hierarchy: a size-aware LRU. Most-recently-used at
// the front, eviction victim at the back. The inner `lru` list is used
// unbounded; byte accounting against `max_size` lives here because the
// crate bounds by entry count, not bytes.

use std::sync::Arc;

use lru::LruCache;

use crate::candidate::Candidate;
use crate::stats::LocalStats;

pub struct MemCache {
	stats: Arc<LocalStats>,
	entries: LruCache<u64, Candidate>,
	max_size: u64,
	current_size: u64,
}

impl MemCache {
	pub fn new(max_size: u64, stats: Arc<LocalStats>) -> MemCache {
		stats.set("lruCacheCapacity", max_size as i64);
		MemCache {
			stats,
			entries: LruCache::unbounded(),
			max_size,
			current_size: 0,
		}
	}

	/// Inserts `item`, returning the batch evicted to make room. An item
	/// larger than the whole cache bounces straight back out.
	pub fn insert(&mut self, item: Candidate) -> Vec<Candidate> {
		let mut evicted = Vec::new();
		if item.size > self.max_size {
			self.stats.bump("numEvictions");
			self.stats.add("sizeEvictions", item.size as i64);
			evicted.push(item);
			return evicted;
		}

		while self.current_size + item.size > self.max_size {
			let (_, victim) = self.entries.pop_lru().expect("sized entries remain while over budget");
			self.stats.bump("numEvictions");
			self.stats.add("sizeEvictions", victim.size as i64);
			self.current_size -= victim.size;
			evicted.push(victim);
		}
		self.entries.put(item.id, item);
		self.current_size += item.size;
		self.stats.set("current_size", self.current_size as i64);
		assert!(self.current_size <= self.max_size);
		evicted
	}

	/// Membership test; a hit refreshes recency.
	pub fn find(&mut self, item: Candidate) -> bool {
		if self.entries.get(&item.id).is_some() {
			self.stats.bump("hits");
			true
		} else {
			self.stats.bump("misses");
			false
		}
	}

	pub fn flush_stats(&self) {
		self.stats.set("hits", 0);
		self.stats.set("misses", 0);
		self.stats.set("numEvictions", 0);
		self.stats.set("sizeEvictions", 0);
	}
}
