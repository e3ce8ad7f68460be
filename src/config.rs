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

//! Hierarchical run configuration, deserialized from a JSON file.
//!
//! Component sections are optional; their presence selects the cache
//! topology (`memoryCache` only, plus `log` and/or `sets`). All sizing
//! keys use the external units of the tools that produce these files:
//! megabytes for tier sizes, kilobytes for log flush blocks, bytes for
//! set capacities.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub stats: StatsConfig,
	pub cache: CacheConfig,
	#[serde(rename = "memoryCache")]
	pub memory_cache: Option<MemoryCacheConfig>,
	pub log: Option<LogConfig>,
	pub sets: Option<SetsConfig>,
	#[serde(rename = "preLogAdmission")]
	pub pre_log_admission: Option<AdmissionConfig>,
	#[serde(rename = "preSetAdmission")]
	pub pre_set_admission: Option<AdmissionConfig>,
	pub trace: Option<TraceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
	#[serde(rename = "outputFile")]
	pub output_file: std::path::PathBuf,
	#[serde(rename = "collectionIntervalPower")]
	pub collection_interval_power: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
	#[serde(rename = "flashSizeMB")]
	pub flash_size_mb: Option<u64>,
	#[serde(rename = "memorySizeMB")]
	pub memory_size_mb: u64,
	#[serde(rename = "memOverheadRatio")]
	pub mem_overhead_ratio: Option<f64>,
	#[serde(rename = "slowWarmup", default)]
	pub slow_warmup: bool,
	#[serde(rename = "recordSetDistribution", default)]
	pub record_set_distribution: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryCacheConfig {
	pub policy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
	/// Percent of flash devoted to the log region, 0-100. Only consulted
	/// when a set region shares the flash device.
	#[serde(rename = "percentLog")]
	pub percent_log: Option<f64>,
	/// Presence selects the block-rotating log over the monolithic one.
	#[serde(rename = "flushBlockSizeKB")]
	pub flush_block_size_kb: Option<u64>,
	/// Readmission hit threshold; 0 disables readmission.
	#[serde(default)]
	pub readmit: u64,
	/// Shifts half the log budget into the set region on top of the split.
	#[serde(rename = "adjustFlashSizeUp", default)]
	pub adjust_flash_size_up: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetsConfig {
	/// Per-set capacity in bytes. One flash write to a set is accounted
	/// at exactly this size.
	#[serde(rename = "setCapacity")]
	pub set_capacity: u64,
	#[serde(rename = "numHashFunctions")]
	pub num_hash_functions: Option<u32>,
	/// Presence selects the RRIP engine over FIFO-with-promotion.
	#[serde(rename = "rripBits")]
	pub rrip_bits: Option<u32>,
	#[serde(rename = "promotionOnly", default)]
	pub promotion_only: bool,
	#[serde(rename = "mixedRRIP", default)]
	pub mixed_rrip: bool,
	#[serde(rename = "trackHitsPerItem", default)]
	pub track_hits_per_item: bool,
	#[serde(rename = "hitDistribution", default)]
	pub hit_distribution: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
	pub policy: String,
	#[serde(rename = "admitRatio")]
	pub admit_ratio: Option<f64>,
	pub threshold: Option<u64>,
	#[serde(default)]
	pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceConfig {
	pub format: String,
	/// Total request budget in units of 1024 requests. Negative or absent
	/// means unbounded for replay traces.
	#[serde(rename = "totalKAccesses")]
	pub total_k_accesses: Option<i64>,
	pub alpha: Option<f64>,
	/// Object population in thousands.
	#[serde(rename = "numObjects")]
	pub num_objects: Option<u64>,
	#[serde(rename = "objectSizes")]
	pub object_sizes: Option<Vec<u64>>,
	pub seed: Option<u64>,
	pub filename: Option<String>,
	#[serde(rename = "samplingPercent")]
	pub sampling_percent: Option<f64>,
	#[serde(rename = "samplingSeed")]
	pub sampling_seed: Option<u64>,
	#[serde(rename = "objectScaling")]
	pub object_scaling: Option<f64>,
}

impl Config {
	pub fn from_file(path: &Path) -> Result<Config> {
		let data = std::fs::read_to_string(path)?;
		serde_json::from_str(&data)
			.map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))
	}

	pub fn stats_interval(&self) -> u64 {
		let power = self
			.stats
			.collection_interval_power
			.unwrap_or(crate::cache::STATS_INTERVAL_POWER);
		10u64.pow(power)
	}

	pub fn flash_size(&self) -> Result<u64> {
		let mb = self.cache.flash_size_mb.ok_or_else(|| {
			Error::InvalidConfiguration("cache.flashSizeMB is required for flash tiers".into())
		})?;
		Ok(mb * 1024 * 1024)
	}

	pub fn memory_size(&self) -> u64 {
		self.cache.memory_size_mb * 1024 * 1024
	}
}
