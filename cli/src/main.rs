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

use std::path::PathBuf;
use std::time::Instant;

use structopt::StructOpt;

use flashsim::{Cache, Config};

/// Replays an object trace against a simulated DRAM + flash cache
/// hierarchy and reports hit rate and flash write amplification.
#[derive(Debug, StructOpt)]
#[structopt(name = "flashsim")]
struct Args {
	/// Path to the JSON configuration file.
	#[structopt(parse(from_os_str))]
	config: PathBuf,
}

fn main() {
	env_logger::init();
	let args = Args::from_args();
	if let Err(err) = run(&args) {
		eprintln!("{}", err);
		std::process::exit(1);
	}
}

fn run(args: &Args) -> flashsim::Result<()> {
	let config = Config::from_file(&args.config)?;
	let mut trace = flashsim::create_trace(&config)?;
	let mut cache = Cache::create(&config)?;
	cache.dump_stats()?;

	let start = Instant::now();
	trace.for_each(&mut |req| cache.access(req))?;
	let elapsed = start.elapsed().as_secs_f64();

	cache.dump_stats()?;
	println!(
		"Processed {} accesses in {:.1} seconds, rate of {:.0} accs/sec",
		cache.total_accesses(),
		elapsed,
		cache.total_accesses() as f64 / elapsed.max(f64::EPSILON),
	);
	Ok(())
}
