//! match-runner: headless sweeper loop for the matchmaking engine.
//!
//! Usage:
//!   match-runner --db engine.db
//!   match-runner --db engine.db --config engine.json --interval-ms 1000
//!   match-runner --db engine.db --once

use anyhow::Result;
use matchcall_core::{EngineClock, EngineConfig, MatchEngine};
use std::env;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or("engine.db");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str());
    let interval_ms = parse_arg(&args, "--interval-ms", 1000u64);
    let limit = parse_arg(&args, "--limit", 100usize);
    let once = args.iter().any(|a| a == "--once");

    let config = match config_path {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    println!("match-runner");
    println!("  db:          {db}");
    println!("  config:      {}", config_path.unwrap_or("(defaults)"));
    println!("  interval_ms: {interval_ms}");
    println!("  limit:       {limit}");
    println!();

    let engine = MatchEngine::open(db, config, EngineClock::wall())?;

    loop {
        let expired = engine.expire_tickets_batch(limit)?;
        let timed_out = engine.expire_ringing_batch(limit)?;
        if expired > 0 || timed_out > 0 {
            log::info!("sweep: {expired} ticket(s) expired, {timed_out} call(s) timed out");
        }
        if once {
            println!("=== SWEEP SUMMARY ===");
            println!("  tickets expired:  {expired}");
            println!("  calls timed out:  {timed_out}");
            println!("  waiting tickets:  {}", engine.waiting_ticket_count()?);
            println!("  match sessions:   {}", engine.match_session_count()?);
            break;
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }

    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
