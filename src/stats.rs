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

// Keyed counter bags. Every component owns one `LocalStats` bag of
// name -> i64 counters with read-or-create-zero semantics. Bags are
// registered under a component name on the `StatsCollector`, which
// serializes the whole group as one JSON object per flush onto a single
// output stream. Key order is sorted so goldens stay stable.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

const PRETTY_JSON_INDENT: &[u8] = b"    ";

/// Size distributions are bucketed to this granularity in bytes.
pub const SIZE_BUCKETING: u64 = 10;

#[derive(Default)]
pub struct LocalStats {
	counters: Mutex<BTreeMap<String, i64>>,
}

impl LocalStats {
	pub fn bump(&self, name: &str) {
		self.add(name, 1);
	}

	pub fn add(&self, name: &str, delta: i64) {
		let mut counters = self.counters.lock();
		if let Some(value) = counters.get_mut(name) {
			*value += delta;
		} else {
			counters.insert(name.to_string(), delta);
		}
	}

	pub fn set(&self, name: &str, value: i64) {
		self.counters.lock().insert(name.to_string(), value);
	}

	pub fn get(&self, name: &str) -> i64 {
		self.counters.lock().get(name).copied().unwrap_or(0)
	}

	fn snapshot(&self) -> BTreeMap<String, i64> {
		self.counters.lock().clone()
	}
}

pub struct StatsCollector {
	output: Mutex<std::fs::File>,
	locals: Mutex<BTreeMap<String, Arc<LocalStats>>>,
}

impl StatsCollector {
	pub fn open(path: &Path) -> Result<StatsCollector> {
		log::info!(target: "flashsim", "Stats file at {}", path.display());
		let output = std::fs::File::create(path)?;
		Ok(StatsCollector {
			output: Mutex::new(output),
			locals: Mutex::new(BTreeMap::new()),
		})
	}

	/// Returns the bag registered under `name`, creating it on first use.
	pub fn local(&self, name: &str) -> Arc<LocalStats> {
		let mut locals = self.locals.lock();
		if let Some(local) = locals.get(name) {
			return local.clone();
		}
		let local = Arc::new(LocalStats::default());
		locals.insert(name.to_string(), local.clone());
		local
	}

	/// Serializes every bag as one pretty-printed JSON object and appends
	/// it to the output stream.
	pub fn print(&self) -> Result<()> {
		let blob: BTreeMap<String, BTreeMap<String, i64>> = self
			.locals
			.lock()
			.iter()
			.map(|(name, local)| (name.clone(), local.snapshot()))
			.collect();
		let mut buf = Vec::new();
		let formatter = serde_json::ser::PrettyFormatter::with_indent(PRETTY_JSON_INDENT);
		let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
		blob.serialize(&mut ser)?;
		buf.push(b'\n');
		let mut output = self.output.lock();
		output.write_all(&buf)?;
		Ok(())
	}
}
