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

// Admission filters between tiers. A policy decides which candidates
// proceed downward; the rejected complement is either handed to the log
// for readmission or dropped. Policies are inactive until warmup ends.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::candidate::Candidate;
use crate::config::AdmissionConfig;
use crate::error::{Error, Result};
use crate::log::LogEngine;
use crate::sets::SetLayout;
use crate::stats::LocalStats;

pub trait Policy {
	/// Filters a batch, partitioned by primary set membership. Rejected
	/// items go to `log.readmit` when a log was supplied, else they drop.
	fn admit(
		&mut self,
		items: Vec<Candidate>,
		log: Option<&mut dyn LogEngine>,
	) -> HashMap<u64, Vec<Candidate>>;

	/// Filters a batch without set grouping; rejected items are dropped.
	/// Fatal misuse for policies that need set knowledge.
	fn admit_simple(&mut self, items: Vec<Candidate>) -> Vec<Candidate>;

	fn admission_stats(&self) -> &LocalStats;

	/// `sizeAdmits / sizePossibleAdmits`, the scale factor applied to
	/// downstream write amplification.
	fn byte_ratio_admitted(&self) -> f64 {
		let stats = self.admission_stats();
		stats.get("sizeAdmits") as f64 / stats.get("sizePossibleAdmits") as f64
	}
}

pub fn create(
	config: &AdmissionConfig,
	layout: Option<SetLayout>,
	stats: Arc<LocalStats>,
) -> Result<Box<dyn Policy>> {
	log::info!(target: "flashsim", "Admission policy: {}", config.policy);
	match config.policy.as_str() {
		"Random" => {
			let admit_ratio = config.admit_ratio.ok_or_else(|| {
				Error::InvalidConfiguration("Random admission requires admitRatio".into())
			})?;
			if !(0.0..=1.0).contains(&admit_ratio) {
				return Err(Error::InvalidConfiguration(format!(
					"admitRatio {} outside [0, 1]",
					admit_ratio
				)));
			}
			Ok(Box::new(RandomAdmission::new(admit_ratio, config.seed, layout, stats)))
		}
		"Threshold" => {
			let threshold = config.threshold.ok_or_else(|| {
				Error::InvalidConfiguration("Threshold admission requires threshold".into())
			})?;
			if threshold <= 1 {
				return Err(Error::InvalidConfiguration(format!(
					"admission threshold {} must exceed 1",
					threshold
				)));
			}
			Ok(Box::new(ThresholdAdmission::new(threshold, layout, stats)))
		}
		other => {
			Err(Error::InvalidConfiguration(format!("Unknown admission policy: {}", other)))
		}
	}
}

/// Groups a batch by each item's primary set. Single-hash placement only
/// consults the first derived set number.
fn group_by_primary_set(
	layout: &SetLayout,
	items: Vec<Candidate>,
) -> HashMap<u64, Vec<Candidate>> {
	let mut grouped: HashMap<u64, Vec<Candidate>> = HashMap::new();
	for item in items {
		grouped.entry(layout.primary_set(item)).or_insert_with(Vec::new).push(item);
	}
	grouped
}

fn track_possible_admits(stats: &LocalStats, items: &[Candidate]) {
	stats.bump("trackPossibleAdmitsCalls");
	for item in items {
		stats.bump("numPossibleAdmits");
		stats.add("sizePossibleAdmits", item.size as i64);
	}
}

fn track_admitted(stats: &LocalStats, items: &[Candidate]) {
	stats.bump("trackAdmittedCalls");
	for item in items {
		stats.bump("numAdmits");
		stats.add("sizeAdmits", item.size as i64);
	}
}

fn perform_readmission(log: Option<&mut dyn LogEngine>, rejected: Vec<Candidate>) {
	if let Some(log) = log {
		log.readmit(rejected);
	}
}

/// Admits each item independently with probability `admit_ratio`, as a
/// threshold comparison against a uniform 64-bit stream.
pub struct RandomAdmission {
	stats: Arc<LocalStats>,
	layout: Option<SetLayout>,
	admit_threshold: u64,
	rng: SmallRng,
}

impl RandomAdmission {
	pub fn new(
		admit_ratio: f64,
		seed: u64,
		layout: Option<SetLayout>,
		stats: Arc<LocalStats>,
	) -> RandomAdmission {
		RandomAdmission {
			stats,
			layout,
			admit_threshold: (admit_ratio * u64::MAX as f64) as u64,
			rng: SmallRng::seed_from_u64(seed),
		}
	}
}

impl Policy for RandomAdmission {
	fn admit(
		&mut self,
		items: Vec<Candidate>,
		log: Option<&mut dyn LogEngine>,
	) -> HashMap<u64, Vec<Candidate>> {
		let layout = self.layout.as_ref().expect("grouped admission requires a set layout");
		let mut grouped = group_by_primary_set(layout, items);
		let mut rejected = Vec::new();
		// Filter in set order so the random stream is reproducible.
		let mut set_nums: Vec<u64> = grouped.keys().copied().collect();
		set_nums.sort_unstable();
		for set_num in set_nums {
			let bin = grouped.get_mut(&set_num).expect("key came from the map");
			track_possible_admits(&self.stats, bin);
			let mut kept = Vec::with_capacity(bin.len());
			for item in bin.drain(..) {
				if self.rng.next_u64() > self.admit_threshold {
					rejected.push(item);
				} else {
					kept.push(item);
				}
			}
			track_admitted(&self.stats, &kept);
			*bin = kept;
		}
		perform_readmission(log, rejected);
		grouped
	}

	fn admit_simple(&mut self, items: Vec<Candidate>) -> Vec<Candidate> {
		let mut admitted = Vec::with_capacity(items.len());
		track_possible_admits(&self.stats, &items);
		for item in items {
			if self.rng.next_u64() <= self.admit_threshold {
				admitted.push(item);
			}
		}
		track_admitted(&self.stats, &admitted);
		admitted
	}

	fn admission_stats(&self) -> &LocalStats {
		&self.stats
	}
}

/// Admits a primary-set group only when enough items head for the same
/// set at once; sub-threshold groups are rejected wholesale.
pub struct ThresholdAdmission {
	stats: Arc<LocalStats>,
	layout: Option<SetLayout>,
	threshold: u64,
}

impl ThresholdAdmission {
	pub fn new(threshold: u64, layout: Option<SetLayout>, stats: Arc<LocalStats>) -> ThresholdAdmission {
		assert!(threshold > 1);
		stats.set("thresholdValue", threshold as i64);
		ThresholdAdmission { stats, layout, threshold }
	}
}

impl Policy for ThresholdAdmission {
	fn admit(
		&mut self,
		items: Vec<Candidate>,
		log: Option<&mut dyn LogEngine>,
	) -> HashMap<u64, Vec<Candidate>> {
		let layout = self.layout.as_ref().expect("grouped admission requires a set layout");
		let mut grouped = group_by_primary_set(layout, items);
		let mut rejected = Vec::new();
		let mut admitted = HashMap::new();
		// Process in set order so readmission sees a reproducible stream.
		let mut set_nums: Vec<u64> = grouped.keys().copied().collect();
		set_nums.sort_unstable();
		for set_num in set_nums {
			let bin = grouped.remove(&set_num).expect("key came from the map");
			track_possible_admits(&self.stats, &bin);
			if (bin.len() as u64) < self.threshold {
				rejected.extend(bin);
			} else {
				track_admitted(&self.stats, &bin);
				admitted.insert(set_num, bin);
			}
		}
		perform_readmission(log, rejected);
		admitted
	}

	fn admit_simple(&mut self, _items: Vec<Candidate>) -> Vec<Candidate> {
		panic!("Threshold admission filter needs sets");
	}

	fn admission_stats(&self) -> &LocalStats {
		&self.stats
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::candidate::candidate;
	use crate::log::{Log, LogFind};

	fn layout(num_sets: u64) -> SetLayout {
		SetLayout { num_sets, set_capacity: 4096, num_hash_functions: 1 }
	}

	fn admission_config(json: &str) -> AdmissionConfig {
		serde_json::from_str(json).unwrap()
	}

	#[test]
	fn factory_rejects_unknown_policy() {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let config = admission_config(r#"{ "policy": "Clairvoyant" }"#);
		assert!(create(&config, None, stats).is_err());
	}

	#[test]
	fn factory_validates_parameters() {
		env_logger::try_init().ok();
		let config = admission_config(r#"{ "policy": "Random" }"#);
		assert!(create(&config, None, Arc::new(LocalStats::default())).is_err());
		let config = admission_config(r#"{ "policy": "Random", "admitRatio": 1.5 }"#);
		assert!(create(&config, None, Arc::new(LocalStats::default())).is_err());
		let config = admission_config(r#"{ "policy": "Threshold", "threshold": 1 }"#);
		assert!(create(&config, None, Arc::new(LocalStats::default())).is_err());
		let config = admission_config(r#"{ "policy": "Threshold", "threshold": 2 }"#);
		assert!(create(&config, None, Arc::new(LocalStats::default())).is_ok());
	}

	#[test]
	fn random_extremes_admit_all_or_nothing() {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let mut policy = RandomAdmission::new(1.0, 0, None, stats.clone());
		let items: Vec<Candidate> = (1..=10).map(|id| candidate(id, 10)).collect();
		let admitted = policy.admit_simple(items.clone());
		assert_eq!(admitted.len(), 10);
		assert!((policy.byte_ratio_admitted() - 1.0).abs() < 1e-9);

		let stats = Arc::new(LocalStats::default());
		let mut policy = RandomAdmission::new(0.0, 0, None, stats.clone());
		let admitted = policy.admit_simple(items);
		assert!(admitted.is_empty());
		assert_eq!(stats.get("numPossibleAdmits"), 10);
		assert_eq!(stats.get("numAdmits"), 0);
	}

	#[test]
	fn random_is_deterministic_under_a_seed() {
		env_logger::try_init().ok();
		let items: Vec<Candidate> = (1..=100).map(|id| candidate(id, 10)).collect();
		let run = |seed: u64| -> Vec<u64> {
			let stats = Arc::new(LocalStats::default());
			let mut policy = RandomAdmission::new(0.5, seed, None, stats);
			policy.admit_simple(items.clone()).iter().map(|c| c.id).collect()
		};
		assert_eq!(run(7), run(7));
		assert_ne!(run(7), run(8));
	}

	#[test]
	fn admit_counters_bound_possible_admits() {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let mut policy = RandomAdmission::new(0.5, 3, Some(layout(4)), stats.clone());
		let items: Vec<Candidate> = (1..=100).map(|id| candidate(id, 10)).collect();
		policy.admit(items, None);
		assert!(stats.get("numAdmits") <= stats.get("numPossibleAdmits"));
		assert!(stats.get("sizeAdmits") <= stats.get("sizePossibleAdmits"));
		assert_eq!(stats.get("numPossibleAdmits"), 100);
	}

	#[test]
	fn threshold_admits_whole_groups_only() {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let mut policy = ThresholdAdmission::new(2, Some(layout(4)), stats.clone());
		// Set 1 receives objects 1 and 5; sets 2 and 3 one object each.
		let admitted = policy.admit(
			vec![candidate(1, 10), candidate(5, 10), candidate(2, 10), candidate(3, 10)],
			None,
		);
		assert_eq!(admitted.len(), 1);
		let group = &admitted[&1];
		assert_eq!(group.len(), 2);
		assert_eq!(stats.get("numAdmits"), 2);
		assert_eq!(stats.get("numPossibleAdmits"), 4);
		assert_eq!(stats.get("thresholdValue"), 2);
	}

	#[test]
	fn threshold_rejects_route_to_readmission() {
		env_logger::try_init().ok();
		let stats = Arc::new(LocalStats::default());
		let log_stats = Arc::new(LocalStats::default());
		// Readmission threshold 1: items with 2+ observed hits return.
		let mut log = Log::new(1000, log_stats.clone(), 1);
		log.insert(vec![candidate(2, 10)]);
		assert_eq!(log.find(candidate(2, 10)), LogFind::Hit);
		assert_eq!(log.find(candidate(2, 10)), LogFind::Hit);
		let evicted = log.insert(vec![candidate(6, 900)]);
		assert_eq!(evicted.len(), 1);

		let mut policy = ThresholdAdmission::new(2, Some(layout(4)), stats);
		// The lone group is sub-threshold; the reject flows into
		// readmission and the hot object returns to the log.
		let admitted = policy.admit(evicted, Some(&mut log));
		assert!(admitted.is_empty());
		assert_eq!(log_stats.get("num_readmitted"), 1);
		assert_eq!(log.find(candidate(2, 10)), LogFind::Hit);
	}

	#[test]
	#[should_panic(expected = "Threshold admission filter needs sets")]
	fn threshold_admit_simple_is_fatal() {
		let stats = Arc::new(LocalStats::default());
		let mut policy = ThresholdAdmission::new(2, None, stats);
		policy.admit_simple(vec![candidate(1, 10)]);
	}
}
