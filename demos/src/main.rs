//! rl_trainer demos
//!
//! # PPO on CartPole
//!
//! ```bash
//! # Single worker, in-process sampling
//! cargo run --release -- local-ppo
//!
//! # Multiple worker threads behind a SampleCollector
//! cargo run --release -- distributed-ppo
//!
//! # Either mode accepts an agent configuration document
//! cargo run --release -- distributed-ppo agent.json
//! ```
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

mod cartpole;
mod cartpole_ppo;
mod nets;

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(2).map(String::as_str);

    if args.len() > 1 {
        let result = match args[1].as_str() {
            "local-ppo" => cartpole_ppo::run_local(config_path),
            "distributed-ppo" => cartpole_ppo::run_distributed(config_path),
            _ => {
                println!("Unknown demo: {}", args[1]);
                println!();
                print_usage();
                return;
            }
        };
        if let Err(e) = result {
            log::error!("Training failed: {}", e);
            std::process::exit(1);
        }
    } else {
        print_usage();
    }
}

fn print_usage() {
    println!("Usage: cargo run --release -- <demo> [agent.json]");
    println!();
    println!("=============================================================================");
    println!("                              PPO (CartPole)");
    println!("=============================================================================");
    println!();
    println!("  local-ppo                         One worker on the training thread");
    println!("                                    Collect and update alternate");
    println!();
    println!("  distributed-ppo                   Worker threads + SampleCollector");
    println!("                                    Quorum-based rounds, worker respawn");
    println!();
    println!("=============================================================================");
    println!("                              CONFIGURATION");
    println!("=============================================================================");
    println!();
    println!("  Without a path the built-in document is used:");
    println!();
    println!("{}", cartpole_ppo::DEFAULT_CONFIG);
    println!();
}
