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

// The orchestrator. Owns the whole component graph and runs the
// per-access control flow: lookup across DRAM, log and sets, miss
// insertion into DRAM, and the eviction cascade downward through the
// admission filters. The topology is chosen by which configuration
// sections are present; absent tiers simply drop out of the pipeline.
//
// Because candidates differ in size, in general
//
//    accesses != hits + evictions + fills
//
// A single access can cascade into multiple evictions to make space for
// the new object, so evictions != misses.

use std::collections::HashSet;
use std::sync::Arc;

use crate::admission::{self, Policy};
use crate::candidate::Candidate;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::log::{Log, LogEngine, LogFind};
use crate::lru::MemCache;
use crate::rotating::RotatingLog;
use crate::rrip::RripSets;
use crate::sets::{SetEngine, SetLayout, Sets};
use crate::stats::{LocalStats, StatsCollector, SIZE_BUCKETING};
use crate::trace::{Request, RequestKind};

pub const STATS_INTERVAL_POWER: u32 = 6;
pub const CHECK_WARMUP_INTERVAL: u64 = 1000;
/// DRAM overhead of indexing the log, as a fraction of log capacity.
pub const INDEX_LOG_RATIO: f64 = 0.02;
/// Default rotating-log block size for the log-only topology.
const DEFAULT_FLUSH_BLOCK_KB: u64 = 256;

pub struct Cache {
	collector: Arc<StatsCollector>,
	global: Arc<LocalStats>,
	mem: MemCache,
	log: Option<Box<dyn LogEngine>>,
	sets: Option<Box<dyn SetEngine>>,
	prelog_admission: Option<Box<dyn Policy>>,
	preset_admission: Option<Box<dyn Policy>>,
	/// Ids ever seen, for compulsory-miss accounting.
	history: HashSet<u64>,
	stats_interval: u64,
	warmed_up: bool,
	record_dist: bool,
}

impl Cache {
	pub fn create(config: &Config) -> Result<Cache> {
		let collector = Arc::new(StatsCollector::open(&config.stats.output_file)?);
		let global = collector.local("global");

		let memory_cache = config.memory_cache.as_ref().ok_or_else(|| {
			Error::InvalidConfiguration("a memoryCache section is required".into())
		})?;
		if memory_cache.policy != "LRU" {
			return Err(Error::InvalidConfiguration(format!(
				"unsupported memoryCache.policy: {}",
				memory_cache.policy
			)));
		}

		let memory_size = config.memory_size();
		let overhead_ratio = config.cache.mem_overhead_ratio.unwrap_or(INDEX_LOG_RATIO);

		let mut log_engine: Option<Box<dyn LogEngine>> = None;
		let mut sets_engine: Option<Box<dyn SetEngine>> = None;
		let mut prelog_admission = None;
		let mut preset_admission = None;
		let mut mem_capacity = memory_size;

		match (&config.log, &config.sets) {
			(Some(log_cfg), Some(sets_cfg)) => {
				// Split flash between the regions so the set region is a
				// multiple of setCapacity and close to the requested
				// percentage, leaning toward more log.
				let flash_size = config.flash_size()?;
				let log_percent = log_cfg.percent_log.ok_or_else(|| {
					Error::InvalidConfiguration("log.percentLog is required with sets".into())
				})? / 100.0;
				let set_capacity = sets_cfg.set_capacity;
				let exact_set_capacity = flash_size as f64 * (1.0 - log_percent);
				let mut actual_set_capacity =
					(exact_set_capacity - exact_set_capacity % set_capacity as f64) as u64;
				let log_capacity = flash_size - actual_set_capacity;
				if log_cfg.adjust_flash_size_up {
					actual_set_capacity += log_capacity / 2;
				}
				log::info!(
					target: "flashsim",
					"Desired percent log: {}, actual percent log: {}",
					log_percent,
					log_capacity as f64 / flash_size as f64,
				);

				let layout = SetLayout {
					num_sets: actual_set_capacity / set_capacity,
					set_capacity,
					num_hash_functions: sets_cfg.num_hash_functions.unwrap_or(1),
				};
				let set_stats = collector.local("sets");
				let mut sets: Box<dyn SetEngine> = if let Some(bits) = sets_cfg.rrip_bits {
					Box::new(RripSets::new(
						layout,
						set_stats,
						true,
						bits,
						sets_cfg.promotion_only,
						sets_cfg.mixed_rrip,
					))
				} else {
					Box::new(Sets::new(layout, set_stats, true, sets_cfg.track_hits_per_item))
				};
				if sets_cfg.hit_distribution {
					sets.enable_hit_distribution_over_sets();
				}

				let log_stats = collector.local("log");
				let log: Box<dyn LogEngine> = if let Some(kb) = log_cfg.flush_block_size_kb {
					Box::new(RotatingLog::new(
						log_capacity,
						kb * 1024,
						Some(layout),
						log_stats,
						log_cfg.readmit,
					))
				} else {
					Box::new(Log::new(log_capacity, log_stats, log_cfg.readmit))
				};

				// DRAM pays for the log index and the set metadata.
				let sets_memory = sets.memory_consumption();
				let overhead = log_capacity as f64 * overhead_ratio + sets_memory as f64;
				if overhead > memory_size as f64 {
					return Err(Error::InvalidConfiguration(format!(
						"flash metadata overhead {} exceeds memory budget {}",
						overhead, memory_size
					)));
				}
				mem_capacity =
					memory_size - (log_capacity as f64 * overhead_ratio) as u64 - sets_memory;

				if let Some(admission_cfg) = &config.pre_log_admission {
					let stats = collector
						.local(&format!("{}.preLogAdmission", admission_cfg.policy));
					prelog_admission =
						Some(admission::create(admission_cfg, Some(layout), stats)?);
				}
				if let Some(admission_cfg) = &config.pre_set_admission {
					let stats = collector
						.local(&format!("{}.preSetAdmission", admission_cfg.policy));
					preset_admission =
						Some(admission::create(admission_cfg, Some(layout), stats)?);
				}

				log_engine = Some(log);
				sets_engine = Some(sets);
			}
			(Some(log_cfg), None) => {
				let log_capacity = config.flash_size()?;
				let block_size =
					log_cfg.flush_block_size_kb.unwrap_or(DEFAULT_FLUSH_BLOCK_KB) * 1024;
				let log_stats = collector.local("log");
				let log = RotatingLog::new(log_capacity, block_size, None, log_stats, log_cfg.readmit);

				let overhead = log_capacity as f64 * overhead_ratio;
				if overhead > memory_size as f64 {
					return Err(Error::InvalidConfiguration(format!(
						"log index overhead {} exceeds memory budget {}",
						overhead, memory_size
					)));
				}
				mem_capacity = memory_size - overhead as u64;

				if let Some(admission_cfg) = &config.pre_log_admission {
					let stats = collector
						.local(&format!("{}.preLogAdmission", admission_cfg.policy));
					prelog_admission = Some(admission::create(admission_cfg, None, stats)?);
				}
				if !config.cache.slow_warmup {
					return Err(Error::InvalidConfiguration(
						"a log-only flash tier requires cache.slowWarmup".into(),
					));
				}
				log_engine = Some(Box::new(log));
			}
			(None, Some(sets_cfg)) => {
				let flash_size = config.flash_size()?;
				let layout = SetLayout {
					num_sets: flash_size / sets_cfg.set_capacity,
					set_capacity: sets_cfg.set_capacity,
					num_hash_functions: sets_cfg.num_hash_functions.unwrap_or(1),
				};
				let set_stats = collector.local("sets");
				let mut sets: Box<dyn SetEngine> = if let Some(bits) = sets_cfg.rrip_bits {
					Box::new(RripSets::new(
						layout,
						set_stats,
						false,
						bits,
						sets_cfg.promotion_only,
						sets_cfg.mixed_rrip,
					))
				} else {
					Box::new(Sets::new(layout, set_stats, false, sets_cfg.track_hits_per_item))
				};
				if sets_cfg.hit_distribution {
					sets.enable_hit_distribution_over_sets();
				}

				let sets_memory = sets.memory_consumption();
				if sets_memory > memory_size {
					return Err(Error::InvalidConfiguration(format!(
						"set metadata {} exceeds memory budget {}",
						sets_memory, memory_size
					)));
				}
				mem_capacity = memory_size - sets_memory;

				if let Some(admission_cfg) = &config.pre_set_admission {
					let stats = collector
						.local(&format!("{}.preSetAdmission", admission_cfg.policy));
					preset_admission =
						Some(admission::create(admission_cfg, Some(layout), stats)?);
				}
				sets_engine = Some(sets);
			}
			(None, None) => {}
		}

		log::info!(
			target: "flashsim",
			"Memory cache size after indexing costs: {}",
			mem_capacity,
		);
		let mem = MemCache::new(mem_capacity, collector.local("memCache"));

		let warmed_up = config.cache.slow_warmup;
		let record_dist = config.cache.record_set_distribution;
		let mut cache = Cache {
			collector,
			global,
			mem,
			log: log_engine,
			sets: sets_engine,
			prelog_admission,
			preset_admission,
			history: HashSet::new(),
			stats_interval: config.stats_interval(),
			warmed_up,
			record_dist,
		};
		if cache.record_dist && cache.warmed_up {
			if let Some(sets) = &mut cache.sets {
				sets.enable_dist_tracking();
			}
		}
		Ok(cache)
	}

	/// Processes one trace record to completion: lookup, accounting, miss
	/// insertion, and the whole eviction cascade.
	pub fn access(&mut self, req: &Request) -> Result<()> {
		if req.kind != RequestKind::Get {
			return Ok(());
		}
		self.global.set("timestamp", req.time as i64);

		let id = Candidate::from_request(req);
		let hit = self.find(id);
		if hit {
			self.global.bump("hits");
			self.global.add("hitsSize", id.size as i64);
		} else {
			self.global.bump("misses");
			self.global.add("missesSize", id.size as i64);
		}

		self.global.bump("totalAccesses");
		self.global.bump("accessesAfterFlush");
		if self.history.insert(id.id) {
			// First-ever sighting of this object.
			self.global.bump("compulsoryMisses");
			self.global.add("uniqueBytes", id.size as i64);
		}

		if self.stats_interval > 0
			&& self.global.get("totalAccesses") as u64 % self.stats_interval == 0
		{
			self.dump_stats()?;
		}

		if !hit {
			self.insert(id)?;
		}
		Ok(())
	}

	fn find(&mut self, id: Candidate) -> bool {
		if self.mem.find(id) {
			return true;
		}
		if let Some(log) = &mut self.log {
			match log.find(id) {
				LogFind::Hit => return true,
				LogFind::HitInactive => {
					// The log item was promoted into sets; the hit belongs
					// there. If the sets lost it, the log takes it back.
					let promoted =
						self.sets.as_mut().map_or(false, |sets| sets.track_hit(id));
					if !promoted {
						log.reactivate(id);
					}
					return true;
				}
				LogFind::Miss => {}
			}
		}
		if let Some(sets) = &mut self.sets {
			if sets.find(id) {
				return true;
			}
		}
		false
	}

	fn insert(&mut self, id: Candidate) -> Result<()> {
		let batch = self.mem.insert(id);
		let warmed_up = self.warmed_up;
		let record_dist = self.record_dist;
		match (&mut self.log, &mut self.sets) {
			(Some(log), Some(sets)) => {
				let mut batch = batch;
				if warmed_up {
					if let Some(prelog) = &mut self.prelog_admission {
						let grouped = prelog.admit(batch, Some(log.as_mut()));
						let mut groups: Vec<(u64, Vec<Candidate>)> =
							grouped.into_iter().collect();
						groups.sort_unstable_by_key(|(set_num, _)| *set_num);
						batch = groups.into_iter().flat_map(|(_, items)| items).collect();
					}
				}
				let batch = log.insert(batch);
				if !batch.is_empty() {
					let preset = if warmed_up { self.preset_admission.as_mut() } else { None };
					if let Some(preset) = preset {
						let grouped = preset.admit(batch, Some(log.as_mut()));
						let mut groups: Vec<(u64, Vec<Candidate>)> =
							grouped.into_iter().collect();
						groups.sort_unstable_by_key(|(set_num, _)| *set_num);
						for (set_num, group) in groups {
							if record_dist {
								let size: u64 = group.iter().map(|item| item.size).sum();
								self.global.bump(&format!("numItemsMoved{}", group.len()));
								self.global.bump(&format!(
									"sizeItemsMoved{}",
									(size / SIZE_BUCKETING) * SIZE_BUCKETING
								));
							}
							let outcome = sets.insert_into_set(set_num, group);
							for item in outcome.readmit {
								log.insert_from_sets(item);
							}
						}
					} else {
						let outcome = sets.insert(batch);
						for item in outcome.readmit {
							log.insert_from_sets(item);
						}
					}
				}
			}
			(Some(log), None) => {
				let mut batch = batch;
				if warmed_up {
					if let Some(prelog) = &mut self.prelog_admission {
						batch = prelog.admit_simple(batch);
					}
				}
				let _ = log.insert(batch);
			}
			(None, Some(sets)) => {
				let preset = if warmed_up { self.preset_admission.as_mut() } else { None };
				if let Some(preset) = preset {
					let grouped = preset.admit(batch, None);
					let mut groups: Vec<(u64, Vec<Candidate>)> = grouped.into_iter().collect();
					groups.sort_unstable_by_key(|(set_num, _)| *set_num);
					for (set_num, group) in groups {
						let _ = sets.insert_into_set(set_num, group);
					}
				} else if !batch.is_empty() {
					let _ = sets.insert(batch);
				}
			}
			(None, None) => {}
		}

		if !self.warmed_up
			&& self.global.get("accessesAfterFlush") as u64 % CHECK_WARMUP_INTERVAL == 0
		{
			self.check_warmup()?;
		}
		Ok(())
	}

	/// Warmup ends once the flash tier's cumulative evicted bytes first
	/// reach its capacity; all statistics restart from there and the
	/// admission filters arm themselves.
	fn check_warmup(&mut self) -> Result<()> {
		let ratio = match (&self.sets, &self.log) {
			(Some(sets), _) => sets.ratio_evicted_to_capacity(),
			(None, Some(log)) => log.ratio_evicted_to_capacity(),
			(None, None) => return Ok(()),
		};
		if ratio < 1.0 {
			return Ok(());
		}
		self.flush_global_stats()?;
		log::info!(target: "flashsim", "Reached end of warmup, resetting stats");
		if let Some(sets) = &mut self.sets {
			sets.flush_stats();
		}
		if let Some(log) = &mut self.log {
			log.flush_stats();
		}
		self.mem.flush_stats();
		self.dump_stats()?;
		self.warmed_up = true;
		if self.record_dist {
			if let Some(sets) = &mut self.sets {
				sets.enable_dist_tracking();
			}
		}
		Ok(())
	}

	fn flush_global_stats(&mut self) -> Result<()> {
		self.dump_stats()?;
		self.global.set("hits", 0);
		self.global.set("misses", 0);
		self.global.set("hitsSize", 0);
		self.global.set("missesSize", 0);
		self.global.set("accessesAfterFlush", 0);
		self.global.bump("numStatFlushes");
		Ok(())
	}

	pub fn dump_stats(&self) -> Result<()> {
		log::info!(
			target: "flashsim",
			"Miss rate: {} flash write amp: {}",
			self.miss_rate(),
			self.flash_write_amp(),
		);
		self.collector.print()
	}

	pub fn total_accesses(&self) -> u64 {
		self.global.get("totalAccesses") as u64
	}

	pub fn accesses_after_flush(&self) -> u64 {
		self.global.get("accessesAfterFlush") as u64
	}

	pub fn warmed_up(&self) -> bool {
		self.warmed_up
	}

	pub fn miss_rate(&self) -> f64 {
		self.global.get("misses") as f64 / self.global.get("accessesAfterFlush") as f64
	}

	/// Composed flash write amplification. An admission filter scales
	/// everything downstream of it, since rejected bytes never reach
	/// flash.
	pub fn flash_write_amp(&self) -> f64 {
		let prelog_ratio = match &self.prelog_admission {
			Some(policy) if self.warmed_up => policy.byte_ratio_admitted(),
			_ => 1.0,
		};
		let preset_ratio = match &self.preset_admission {
			Some(policy) if self.warmed_up => policy.byte_ratio_admitted(),
			_ => 1.0,
		};
		match (&self.log, &self.sets) {
			(None, None) => 0.0,
			(Some(log), None) => log.write_amp() * prelog_ratio,
			(None, Some(sets)) => sets.write_amp() * preset_ratio,
			(Some(log), Some(sets)) => {
				(sets.write_amp() * preset_ratio + log.write_amp()) * prelog_ratio
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::trace::{Request, RequestKind};

	struct TempDir(std::path::PathBuf);

	impl TempDir {
		fn new(name: &'static str) -> TempDir {
			env_logger::try_init().ok();
			let mut path = std::env::temp_dir();
			path.push("flashsim-test");
			path.push("cache");
			path.push(name);

			if path.exists() {
				std::fs::remove_dir_all(&path).unwrap();
			}
			std::fs::create_dir_all(&path).unwrap();
			TempDir(path)
		}

		fn stats_path(&self) -> std::path::PathBuf {
			self.0.join("stats.out")
		}
	}

	impl Drop for TempDir {
		fn drop(&mut self) {
			if self.0.exists() {
				std::fs::remove_dir_all(&self.0).unwrap();
			}
		}
	}

	fn get(id: u64, size: u64) -> Request {
		Request { id, size, kind: RequestKind::Get, time: id, oracle_count: 0, req_num: 0 }
	}

	/// DRAM-only cache with a byte-level capacity, bypassing the MB
	/// granularity of the configuration path.
	fn mem_only(dir: &TempDir, capacity: u64) -> Cache {
		let collector = Arc::new(StatsCollector::open(&dir.stats_path()).unwrap());
		let global = collector.local("global");
		let mem = MemCache::new(capacity, collector.local("memCache"));
		Cache {
			collector,
			global,
			mem,
			log: None,
			sets: None,
			prelog_admission: None,
			preset_admission: None,
			history: HashSet::new(),
			stats_interval: 0,
			warmed_up: true,
			record_dist: false,
		}
	}

	fn sets_only(dir: &TempDir, num_sets: u64, set_capacity: u64, mem_capacity: u64, warmed_up: bool) -> Cache {
		let collector = Arc::new(StatsCollector::open(&dir.stats_path()).unwrap());
		let global = collector.local("global");
		let mem = MemCache::new(mem_capacity, collector.local("memCache"));
		let layout = SetLayout { num_sets, set_capacity, num_hash_functions: 1 };
		let sets = Sets::new(layout, collector.local("sets"), false, false);
		Cache {
			collector,
			global,
			mem,
			log: None,
			sets: Some(Box::new(sets)),
			prelog_admission: None,
			preset_admission: None,
			history: HashSet::new(),
			stats_interval: 0,
			warmed_up,
			record_dist: false,
		}
	}

	#[test]
	fn mem_only_counts_misses_and_compulsories() {
		let dir = TempDir::new("mem_only_counts");
		let mut cache = mem_only(&dir, 100);
		for req in [get(1, 40), get(2, 40), get(3, 40), get(1, 40), get(4, 40)] {
			cache.access(&req).unwrap();
		}
		// Every access missed: object 1 was evicted before its re-access.
		assert_eq!(cache.global.get("hits"), 0);
		assert_eq!(cache.global.get("misses"), 5);
		assert_eq!(cache.total_accesses(), 5);
		assert_eq!(cache.global.get("compulsoryMisses"), 4);
		assert_eq!(cache.global.get("uniqueBytes"), 160);
		assert_eq!(cache.flash_write_amp(), 0.0);
	}

	#[test]
	fn hits_plus_misses_equals_accesses() {
		let dir = TempDir::new("hits_plus_misses");
		let mut cache = mem_only(&dir, 1000);
		for i in 0..200u64 {
			cache.access(&get(i % 7, 10 + i % 13)).unwrap();
		}
		assert_eq!(
			cache.global.get("hits") + cache.global.get("misses"),
			cache.global.get("totalAccesses"),
		);
	}

	#[test]
	fn non_get_requests_are_ignored() {
		let dir = TempDir::new("non_get_ignored");
		let mut cache = mem_only(&dir, 100);
		let mut req = get(1, 40);
		req.kind = RequestKind::Set;
		cache.access(&req).unwrap();
		req.kind = RequestKind::Delete;
		cache.access(&req).unwrap();
		assert_eq!(cache.total_accesses(), 0);
		assert_eq!(cache.global.get("compulsoryMisses"), 0);
	}

	#[test]
	fn warmup_flips_once_and_preserves_compulsories() {
		let dir = TempDir::new("warmup_flips_once");
		// 2 sets x 100 bytes of flash behind a 50-byte DRAM front.
		let mut cache = sets_only(&dir, 2, 100, 50, false);
		let mut accesses = 0u64;
		let mut flipped_at = None;
		// Unique objects stream through and churn the sets until the
		// cumulative evicted bytes pass the flash capacity. Warmup checks
		// happen every CHECK_WARMUP_INTERVAL post-flush accesses.
		for id in 0..5000u64 {
			cache.access(&get(id, 40)).unwrap();
			accesses += 1;
			if cache.warmed_up() && flipped_at.is_none() {
				flipped_at = Some(accesses);
			}
			if let Some(at) = flipped_at {
				assert!(cache.warmed_up(), "warmup is monotonic after {}", at);
			}
		}
		assert!(cache.warmed_up());
		// The reset cleared the windowed counters but kept the history.
		assert_eq!(cache.global.get("compulsoryMisses"), 5000);
		assert_eq!(cache.global.get("uniqueBytes"), 5000 * 40);
		assert_eq!(cache.total_accesses(), 5000);
		assert!(cache.accesses_after_flush() < 5000);
		assert_eq!(cache.global.get("numStatFlushes"), 1);
	}

	#[test]
	fn full_pipeline_moves_evictions_down_and_back() {
		let dir = TempDir::new("full_pipeline");
		let collector = Arc::new(StatsCollector::open(&dir.stats_path()).unwrap());
		let global = collector.local("global");
		let mem = MemCache::new(100, collector.local("memCache"));
		let layout = SetLayout { num_sets: 4, set_capacity: 200, num_hash_functions: 1 };
		let sets = Sets::new(layout, collector.local("sets"), true, false);
		let log = RotatingLog::new(200, 100, Some(layout), collector.local("log"), 1);
		let mut cache = Cache {
			collector,
			global,
			mem,
			log: Some(Box::new(log)),
			sets: Some(Box::new(sets)),
			prelog_admission: None,
			preset_admission: None,
			history: HashSet::new(),
			stats_interval: 0,
			warmed_up: true,
			record_dist: false,
		};

		for i in 0..2000u64 {
			// A small hot set keeps some objects popular enough to travel
			// the whole pipeline, including readmission.
			let id = if i % 3 == 0 { i % 5 } else { i };
			cache.access(&get(id, 30)).unwrap();
		}
		assert_eq!(
			cache.global.get("hits") + cache.global.get("misses"),
			cache.global.get("totalAccesses"),
		);
		assert!(cache.flash_write_amp() >= 1.0);
		let dump = cache.dump_stats();
		assert!(dump.is_ok());
		let contents = std::fs::read_to_string(dir.stats_path()).unwrap();
		assert!(contents.contains("\"log\""));
		assert!(contents.contains("\"sets\""));
		assert!(contents.contains("\"memCache\""));
		assert!(contents.contains("\"global\""));
	}

	#[test]
	fn create_validates_topology_requirements() {
		let dir = TempDir::new("create_validates");
		let stats_path = dir.stats_path();
		let base = |extra: &str| -> String {
			format!(
				r#"{{
					"stats": {{ "outputFile": {:?} }},
					"cache": {{ "flashSizeMB": 1, "memorySizeMB": 1 }},
					"memoryCache": {{ "policy": "LRU" }}{}
				}}"#,
				stats_path, extra,
			)
		};

		// DRAM-only works.
		let config: Config = serde_json::from_str(&base("")).unwrap();
		assert!(Cache::create(&config).is_ok());

		// Log-only without slowWarmup is a configuration error.
		let config: Config =
			serde_json::from_str(&base(r#", "log": { "readmit": 0 }"#)).unwrap();
		assert!(Cache::create(&config).is_err());

		// Unknown memory cache policy is rejected.
		let raw = base("").replace("LRU", "FIFO");
		let config: Config = serde_json::from_str(&raw).unwrap();
		assert!(Cache::create(&config).is_err());

		// Full pipeline with both flash sections.
		let extra = r#",
			"log": { "percentLog": 50.0, "flushBlockSizeKB": 16, "readmit": 1 },
			"sets": { "setCapacity": 4096 },
			"preSetAdmission": { "policy": "Threshold", "threshold": 2 }"#;
		let mut config: Config = serde_json::from_str(&base(extra)).unwrap();
		config.cache.slow_warmup = true;
		let cache = Cache::create(&config).unwrap();
		assert!(cache.log.is_some());
		assert!(cache.sets.is_some());
		assert!(cache.preset_admission.is_some());
		assert!(cache.warmed_up());
	}

	#[test]
	fn write_amp_composes_admission_ratios() {
		let dir = TempDir::new("write_amp_composes");
		let collector = Arc::new(StatsCollector::open(&dir.stats_path()).unwrap());
		let global = collector.local("global");
		let mem = MemCache::new(50, collector.local("memCache"));
		let layout = SetLayout { num_sets: 2, set_capacity: 100, num_hash_functions: 1 };
		let sets = Sets::new(layout, collector.local("sets"), false, false);
		// Admit everything: the ratio must stay 1 and the composition
		// reduces to the sets write amp.
		let policy = crate::admission::RandomAdmission::new(
			1.0,
			0,
			Some(layout),
			collector.local("Random.preSetAdmission"),
		);
		let mut cache = Cache {
			collector,
			global,
			mem,
			log: None,
			sets: Some(Box::new(sets)),
			prelog_admission: None,
			preset_admission: Some(Box::new(policy)),
			history: HashSet::new(),
			stats_interval: 0,
			warmed_up: true,
			record_dist: false,
		};
		for id in 0..100u64 {
			cache.access(&get(id, 20)).unwrap();
		}
		let ratio = cache.preset_admission.as_ref().unwrap().byte_ratio_admitted();
		assert!((ratio - 1.0).abs() < 1e-9);
		assert!(cache.flash_write_amp() >= 1.0);
	}
}
