//! bedrockdb server binary: parses a handful of CLI flags, builds a
//! `Coordinator` over the chosen data directory, and runs the network shell
//! until the listener errors out or the process is killed.

use std::path::PathBuf;

use bedrockdb::concurrency::Variant;
use bedrockdb::Config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if let Some(v) = args.get(i + 1) {
                    let port: u16 = v.parse()?;
                    config.bind_addr = format!("127.0.0.1:{}", port);
                    i += 1;
                }
            }
            "--data-dir" | "-d" => {
                if let Some(v) = args.get(i + 1) {
                    config.data_dir = PathBuf::from(v);
                    i += 1;
                }
            }
            "--checkpoint-threshold" => {
                if let Some(v) = args.get(i + 1) {
                    config.checkpoint_threshold = v.parse()?;
                    i += 1;
                }
            }
            "--cc-variant" => {
                if let Some(v) = args.get(i + 1) {
                    config.cc_variant = parse_variant(v)?;
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                eprintln!("unrecognized argument '{}', pass --help for usage", other);
                std::process::exit(2);
            }
        }
        i += 1;
    }

    log::info!("starting bedrockdb on {}", config.bind_addr);
    let shell = bedrockdb::build(config)?;
    shell.run()?;
    Ok(())
}

fn parse_variant(name: &str) -> Result<Variant, Box<dyn std::error::Error>> {
    match name.to_ascii_lowercase().as_str() {
        "wait-die" | "waitdie" => Ok(Variant::WaitDie),
        "tso" => Ok(Variant::Tso),
        "occ" => Ok(Variant::Occ),
        "mvcc-tso" => Ok(Variant::Mvcc(bedrockdb::concurrency::MvccPolicy::Tso)),
        "mvcc-2pl" | "mvcc-mv2pl" => Ok(Variant::Mvcc(bedrockdb::concurrency::MvccPolicy::Mv2pl)),
        "mvcc-si" | "mvcc-snapshot" => Ok(Variant::Mvcc(bedrockdb::concurrency::MvccPolicy::SnapshotFcw)),
        other => Err(format!("unknown concurrency control variant '{}'", other).into()),
    }
}

fn print_help() {
    println!("bedrockdb - a teaching-grade relational database server");
    println!();
    println!("Usage: bedrockdb [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -p, --port PORT                Port to listen on (default: 5433)");
    println!("  -d, --data-dir DIR             Data directory (default: ./data)");
    println!("      --checkpoint-threshold N   Writes between automatic checkpoints (default: 200)");
    println!("      --cc-variant VARIANT       wait-die | tso | occ | mvcc-tso | mvcc-2pl | mvcc-si (default: wait-die)");
    println!("  -h, --help                     Show this help");
}
