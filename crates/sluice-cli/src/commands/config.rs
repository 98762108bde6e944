//! `sluice config`: print the effective engine configuration.

use sluice_exec::ExecConfig;
use std::path::Path;

pub fn execute(config: &ExecConfig, source: Option<&Path>) {
    match source {
        Some(path) => println!("Source:             {}", path.display()),
        None => println!("Source:             defaults"),
    }
    println!("Parallelism:        {}", config.parallelism);
    println!("Min idle:           {:?}", config.min_idle);
    println!("Max idle:           {:?}", config.max_idle);
    println!("Thread prefix:      {}", config.thread_name_prefix);
}
