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

// Identity and size of a cached object. Candidates are plain values;
// equality and hashing go by `id` alone, everything else is metadata
// that individual tiers are free to rewrite on their own copies.

use std::hash::{Hash, Hasher};

use crate::trace::Request;

#[derive(Clone, Copy, Debug)]
pub struct Candidate {
	pub id: u64,
	/// Object size in bytes. Always positive.
	pub size: u64,
	/// Hits observed while resident in the log tier. Reset on entry to sets.
	pub hit_count: u32,
	/// Opaque pass-through from the trace.
	pub oracle_count: i64,
}

impl Candidate {
	pub fn from_request(req: &Request) -> Candidate {
		Candidate {
			id: req.id,
			size: req.size,
			hit_count: 0,
			oracle_count: req.oracle_count,
		}
	}
}

impl PartialEq for Candidate {
	fn eq(&self, other: &Candidate) -> bool {
		self.id == other.id
	}
}

impl Eq for Candidate {}

impl Hash for Candidate {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl std::fmt::Display for Candidate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "({})", self.id)
	}
}

#[cfg(test)]
pub fn candidate(id: u64, size: u64) -> Candidate {
	Candidate { id, size, hit_count: 0, oracle_count: 0 }
}

#[cfg(test)]
pub fn hit_candidate(id: u64, size: u64, hit_count: u32) -> Candidate {
	Candidate { id, size, hit_count, oracle_count: 0 }
}
