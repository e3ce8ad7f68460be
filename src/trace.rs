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

//! Trace input: the request model plus the two sources that produce
//! request streams. `ZipfTrace` samples an independent-reference-model
//! workload; `ReplayTrace` replays `id,size,op_count` rows from a text
//! file. Both are deterministic under a fixed seed.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::BufRead;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{Config, TraceConfig};
use crate::error::{Error, Result};

/// Accounting overhead added to every replayed object, in bytes.
const KEY_OVERHEAD_BYTES: u64 = 44;
/// Replayed object sizes are clamped below this.
const MAX_OBJECT_SIZE: u64 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
	Get,
	Set,
	Delete,
	Other,
}

#[derive(Debug, Clone, Copy)]
pub struct Request {
	pub id: u64,
	pub size: u64,
	pub kind: RequestKind,
	pub time: u64,
	pub oracle_count: i64,
	pub req_num: u64,
}

pub trait TraceSource {
	/// Drives the visitor over the whole request stream.
	fn for_each(&mut self, visit: &mut dyn FnMut(&Request) -> Result<()>) -> Result<()>;
}

pub fn create(config: &Config) -> Result<Box<dyn TraceSource>> {
	let trace = config.trace.as_ref().ok_or_else(|| {
		Error::InvalidConfiguration("a trace section is required".into())
	})?;
	log::info!(target: "flashsim", "Trace format: {}", trace.format);
	let num_requests = trace.total_k_accesses.unwrap_or(-1).saturating_mul(1024);
	match trace.format.as_str() {
		"Zipf" => {
			if num_requests <= 0 {
				return Err(Error::InvalidConfiguration(
					"Zipf traces require a positive trace.totalKAccesses".into(),
				));
			}
			let alpha = trace.alpha.ok_or_else(|| {
				Error::InvalidConfiguration("Zipf traces require trace.alpha".into())
			})?;
			let num_objects = trace.num_objects.ok_or_else(|| {
				Error::InvalidConfiguration("Zipf traces require trace.numObjects".into())
			})?;
			let sizes = trace.object_sizes.clone().unwrap_or_else(|| vec![64]);
			Ok(Box::new(ZipfTrace::new(
				alpha,
				num_objects,
				num_requests as u64,
				sizes,
				trace.seed.unwrap_or(1),
			)?))
		}
		"Replay" => {
			let filename = trace.filename.as_ref().ok_or_else(|| {
				Error::InvalidConfiguration("Replay traces require trace.filename".into())
			})?;
			ReplayTrace::open(filename, trace)
				.map(|replay| Box::new(replay) as Box<dyn TraceSource>)
		}
		other => Err(Error::InvalidConfiguration(format!("Unknown trace format: {}", other))),
	}
}

/// Zipf-like object popularity (the independent reference model).
///
/// Objects with similar request rates are grouped into buckets so that
/// sampling is a two-level uniform pick: first a bucket (buckets carry
/// roughly equal rate mass), then an object within it. Bucket sizes grow
/// geometrically toward the cold tail.
pub struct ZipfTrace {
	rng: SmallRng,
	buckets: Vec<Vec<(u64, u64)>>,
	num_requests: u64,
}

impl ZipfTrace {
	pub fn new(
		alpha: f64,
		num_objects_k: u64,
		num_requests: u64,
		base_sizes: Vec<u64>,
		seed: u64,
	) -> Result<ZipfTrace> {
		if base_sizes.is_empty() {
			return Err(Error::InvalidConfiguration("trace.objectSizes is empty".into()));
		}
		let obj_count = num_objects_k * 1000;
		log::debug!(target: "flashsim", "Zipf object count {}", obj_count);
		let mut rng = SmallRng::seed_from_u64(seed);

		let mut buckets: Vec<Vec<(u64, u64)>> = vec![Vec::new()];
		let mut rate_sum = 0f64;
		let mut min_bucket_len = 1usize;
		for object_id in 1..obj_count {
			rate_sum += 1.0 / (object_id as f64).powf(alpha);
			let size = base_sizes[rng.gen_range(0..base_sizes.len())];
			let bucket = buckets.last_mut().expect("at least one bucket");
			bucket.push((object_id, size));
			if rate_sum > 1.0 && bucket.len() >= min_bucket_len {
				min_bucket_len = bucket.len() * 2;
				buckets.push(Vec::new());
				rate_sum = 0.0;
			}
		}
		if buckets.last().map_or(false, |bucket| bucket.is_empty()) {
			buckets.pop();
		}
		if buckets.is_empty() {
			return Err(Error::InvalidConfiguration("Zipf trace with no objects".into()));
		}
		log::debug!(
			target: "flashsim",
			"Zipf buckets: {}, smallest {}, largest {}",
			buckets.len(),
			buckets.first().map_or(0, Vec::len),
			buckets.last().map_or(0, Vec::len),
		);
		Ok(ZipfTrace { rng, buckets, num_requests })
	}

	fn sample(&mut self) -> (u64, u64) {
		let outer = self.rng.gen_range(0..self.buckets.len());
		let inner = self.rng.gen_range(0..self.buckets[outer].len());
		self.buckets[outer][inner]
	}
}

impl TraceSource for ZipfTrace {
	fn for_each(&mut self, visit: &mut dyn FnMut(&Request) -> Result<()>) -> Result<()> {
		log::info!(
			target: "flashsim",
			"Generating {} requests",
			self.num_requests,
		);
		for req_num in 0..self.num_requests {
			let (id, size) = self.sample();
			let req = Request {
				id,
				size,
				kind: RequestKind::Get,
				time: req_num,
				oracle_count: 0,
				req_num,
			};
			visit(&req)?;
		}
		Ok(())
	}
}

/// Replays `id,size,op_count` rows (comma or whitespace separated). Each
/// row is visited `op_count` times. Ids are free-form strings and are
/// hashed to 64 bits.
pub struct ReplayTrace {
	reader: std::io::BufReader<std::fs::File>,
	remaining: i64,
	sampling: f64,
	scaling: f64,
	sampling_rng: SmallRng,
	selected: HashSet<u64>,
	discarded: HashSet<u64>,
}

impl ReplayTrace {
	pub fn open(filename: &str, config: &TraceConfig) -> Result<ReplayTrace> {
		log::info!(target: "flashsim", "Replaying object file: {}", filename);
		let file = std::fs::File::open(filename)?;
		Ok(ReplayTrace {
			reader: std::io::BufReader::new(file),
			remaining: config.total_k_accesses.unwrap_or(-1).saturating_mul(1024),
			sampling: config.sampling_percent.unwrap_or(1.0),
			scaling: config.object_scaling.unwrap_or(1.0),
			sampling_rng: SmallRng::seed_from_u64(config.sampling_seed.unwrap_or(0)),
			selected: HashSet::new(),
			discarded: HashSet::new(),
		})
	}

	/// All-or-nothing per-object sampling, sticky across repeats.
	fn sampled(&mut self, id: u64) -> bool {
		if (self.sampling - 1.0).abs() < f64::EPSILON {
			return true;
		}
		if self.selected.contains(&id) {
			return true;
		}
		if self.discarded.contains(&id) {
			return false;
		}
		if self.sampling_rng.gen_range(0.0..1.0) < self.sampling {
			self.selected.insert(id);
			true
		} else {
			self.discarded.insert(id);
			false
		}
	}

	fn scaled_size(&self, raw_size: u64) -> u64 {
		let with_key = raw_size + KEY_OVERHEAD_BYTES;
		let scaled = (with_key as f64 * self.scaling).round() as u64;
		if scaled >= MAX_OBJECT_SIZE {
			MAX_OBJECT_SIZE - 1
		} else if scaled == 0 {
			1
		} else {
			scaled
		}
	}
}

fn hash_object_key(key: &str) -> u64 {
	let mut hasher = DefaultHasher::new();
	key.hash(&mut hasher);
	hasher.finish()
}

impl TraceSource for ReplayTrace {
	fn for_each(&mut self, visit: &mut dyn FnMut(&Request) -> Result<()>) -> Result<()> {
		let mut line = String::new();
		let mut req_num = 0u64;
		loop {
			if self.remaining == 0 {
				return Ok(());
			}
			line.clear();
			if self.reader.read_line(&mut line)? == 0 {
				return Ok(());
			}
			let mut fields = line.split(|c: char| c == ',' || c.is_whitespace())
				.filter(|field| !field.is_empty());
			let key = match fields.next() {
				Some(key) => key,
				None => continue,
			};
			let raw_size: u64 = match fields.next().map(str::parse) {
				Some(Ok(size)) => size,
				// Tolerate a header row and blank lines.
				_ => continue,
			};
			let op_count: u64 = match fields.next().map(str::parse) {
				Some(Ok(count)) => count,
				_ => continue,
			};

			let id = hash_object_key(key);
			if !self.sampled(id) {
				continue;
			}
			let size = self.scaled_size(raw_size);
			for _ in 0..op_count {
				req_num += 1;
				let req = Request {
					id,
					size,
					kind: RequestKind::Get,
					time: req_num,
					oracle_count: 0,
					req_num,
				};
				visit(&req)?;
				if self.remaining != 0 {
					self.remaining -= 1;
				}
			}
		}
	}
}
