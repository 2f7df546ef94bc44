use rand::prelude::random;
use structopt::StructOpt;

use std::result;

mod assoc;
mod pool;
mod revcache;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Command line options.
#[derive(Clone, StructOpt)]
pub struct Opt {
    #[structopt(long = "seed", default_value = "0")]
    seed: u128,

    #[structopt(long = "profile", default_value = "")]
    profile: String,

    command: String,
}

fn main() {
    let mut opts = Opt::from_args();
    if opts.seed == 0 {
        opts.seed = random();
    }
    println!("revcache-perf: seed {}", opts.seed);

    let res = match opts.command.as_str() {
        "pool" => pool::perf(opts),
        "revcache" | "revision" => revcache::perf(opts),
        "assoc" => assoc::perf(opts),
        command => Err(format!("invalid command {}", command)),
    };

    if let Err(err) = res {
        println!("revcache-perf: error {}", err)
    }
}

/// Read profile file, empty path yields an empty toml table so that every
/// property falls back to its default.
fn load_profile(opts: &Opt) -> result::Result<toml::Value, String> {
    use std::{fs, str::from_utf8};

    if opts.profile.is_empty() {
        return Ok(toml::Value::Table(toml::value::Table::new()));
    }

    let data = fs::read(&opts.profile).map_err(|e| format!("{}: {}", opts.profile, e))?;
    let s = from_utf8(&data).map_err(|e| format!("profile must be toml text: {}", e))?;
    s.parse().map_err(|e| format!("invalid profile format: {}", e))
}

/// Lookup property `$name` in toml `$value` under section `$section`,
/// convert it using `$fn`, fall back to `$def` if missing.
#[macro_export]
macro_rules! get_property {
    ($value:expr, $section:expr, $name:expr, $fn:ident, $def:expr) => {
        match $value.get($section).and_then(|s| s.get($name)) {
            Some(v) => v.$fn().unwrap_or($def),
            None => $def,
        }
    };
}
