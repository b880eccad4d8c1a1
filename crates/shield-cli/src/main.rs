//! Shield CLI: derive, audit and recover nested multisig addresses
//!
//! # Usage
//!
//! ```bash
//! shield --config shield.toml --id <64 hex chars> [--counter N]
//! shield --config shield.toml --verify context.json
//! shield --config shield.toml --id <hex> --recover <address>
//! shield --config shield.toml --validate
//! ```

mod config;

use anyhow::{Context, Result};
use serde::Deserialize;
use shield_derive::{
    decode_p2sh, derive_address, encode_nested_address, recover_context, verify_context,
    DerivedAddress, ShieldError, TweakContext, ID_LEN,
};
use std::ops::RangeInclusive;
use std::path::PathBuf;

const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// What the invocation asks for.
#[derive(Debug, PartialEq)]
enum Mode {
    Derive { id: String, counter: u64 },
    Verify { context_path: PathBuf },
    Recover {
        id: String,
        address: String,
        start: u64,
        max_attempts: u32,
    },
    Validate,
    Help,
    Version,
}

#[derive(Debug, PartialEq)]
struct Invocation {
    config_path: PathBuf,
    mode: Mode,
}

/// A stored context as read from disk, before range checks.
#[derive(Debug, Deserialize)]
struct StoredContext {
    id: String,
    counter: u64,
    threshold: u64,
    nonce: String,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = parse_args(&args)?;

    match invocation.mode {
        Mode::Help => {
            print_help();
            return Ok(());
        }
        Mode::Version => {
            println!("shield {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Load config
    let mut shield_config = config::ShieldConfig::from_file(&invocation.config_path)
        .with_context(|| {
            format!(
                "Failed to load config from {}",
                invocation.config_path.display()
            )
        })?;

    // Apply env overrides
    shield_config.apply_env_overrides();

    // Validate
    shield_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&shield_config.general.log_level),
    )
    .init();

    let network = shield_config.network()?;
    let threshold = shield_config.threshold()?;
    let master_keys = shield_config.master_keys()?;

    match invocation.mode {
        Mode::Validate => {
            println!("✅ Configuration is valid.");
            println!("  Network:     {}", network);
            println!(
                "  Policy:      {}-of-{}",
                threshold,
                master_keys.len()
            );
        }
        Mode::Derive { id, counter } => {
            let id = parse_id(&id)?;
            let counter =
                u32::try_from(counter).map_err(|_| ShieldError::CounterOutOfRange(counter))?;

            log::info!("Deriving {}-of-{} address", threshold, master_keys.len());
            let derived = derive_address(&id, counter, threshold, &master_keys, network)?;
            if derived.context.counter != counter {
                log::warn!(
                    "Counter advanced from {} to {}",
                    counter,
                    derived.context.counter
                );
            }
            print_json(&derived)?;
        }
        Mode::Verify { context_path } => {
            let context = load_context(&context_path)?;
            anyhow::ensure!(
                context.threshold == threshold,
                "stored threshold {} differs from configured threshold {}",
                context.threshold,
                threshold
            );

            let script = verify_context(&context, &master_keys)
                .context("Stored context does not reproduce")?;
            let address = encode_nested_address(&script.redeem_script, network)?;
            log::info!("Context reproduces {}", address);

            print_json(&DerivedAddress {
                context: script.context,
                redeem_script: script.redeem_script,
                address,
            })?;
        }
        Mode::Recover {
            id,
            address,
            start,
            max_attempts,
        } => {
            let id = parse_id(&id)?;
            let counters = search_window(start, max_attempts)?;
            let (version, _) = decode_p2sh(&address)?;
            anyhow::ensure!(
                version == shield_derive::address::p2sh_version(network),
                "address {} does not belong to network {}",
                address,
                network
            );

            log::info!("Searching counters {:?}", counters);
            match recover_context(&id, threshold, &master_keys, network, &address, counters.clone())? {
                Some(context) => print_json(&context)?,
                None => anyhow::bail!(
                    "No counter in {}..={} derives {}",
                    counters.start(),
                    counters.end(),
                    address
                ),
            }
        }
        Mode::Help | Mode::Version => {}
    }

    Ok(())
}

/// Parse CLI args by hand, no clap dependency
fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut config_path = PathBuf::from("shield.toml");
    let mut id = None;
    let mut counter = 0u64;
    let mut verify = None;
    let mut recover = None;
    let mut max_attempts = DEFAULT_MAX_ATTEMPTS;
    let mut validate_only = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                config_path = PathBuf::from(take_value(args, &mut i, "--config")?);
            }
            "--id" => {
                id = Some(take_value(args, &mut i, "--id")?.to_string());
            }
            "--counter" => {
                let v = take_value(args, &mut i, "--counter")?;
                counter = v
                    .parse()
                    .with_context(|| format!("--counter: not a number: {}", v))?;
            }
            "--verify" => {
                verify = Some(PathBuf::from(take_value(args, &mut i, "--verify")?));
            }
            "--recover" => {
                recover = Some(take_value(args, &mut i, "--recover")?.to_string());
            }
            "--max-attempts" => {
                let v = take_value(args, &mut i, "--max-attempts")?;
                max_attempts = v
                    .parse()
                    .with_context(|| format!("--max-attempts: not a number: {}", v))?;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                return Ok(Invocation {
                    config_path,
                    mode: Mode::Help,
                });
            }
            "--version" | "-V" => {
                return Ok(Invocation {
                    config_path,
                    mode: Mode::Version,
                });
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    let mode = if validate_only {
        Mode::Validate
    } else if let Some(context_path) = verify {
        Mode::Verify { context_path }
    } else if let Some(address) = recover {
        let id = id.ok_or_else(|| anyhow::anyhow!("--recover requires --id"))?;
        Mode::Recover {
            id,
            address,
            start: counter,
            max_attempts,
        }
    } else {
        let id = id.ok_or_else(|| anyhow::anyhow!("--id is required (see --help)"))?;
        Mode::Derive { id, counter }
    };

    Ok(Invocation { config_path, mode })
}

/// Counters searched by `--recover`: `max_attempts` counters from `start`,
/// clamped at `u32::MAX`.
fn search_window(start: u64, max_attempts: u32) -> Result<RangeInclusive<u32>> {
    let start = u32::try_from(start).map_err(|_| ShieldError::CounterOutOfRange(start))?;
    anyhow::ensure!(max_attempts > 0, "--max-attempts must be at least 1");
    Ok(start..=start.saturating_add(max_attempts - 1))
}

fn take_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} requires an argument", flag))
}

/// Parse a hex identifier; it must decode to exactly 32 bytes.
fn parse_id(s: &str) -> Result<[u8; ID_LEN]> {
    let bytes = hex::decode(s.trim()).with_context(|| "--id must be hex")?;
    let len = bytes.len();
    let id: [u8; ID_LEN] = bytes
        .try_into()
        .map_err(|_| ShieldError::InvalidIdLength(len))?;
    Ok(id)
}

fn load_context(path: &std::path::Path) -> Result<TweakContext> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read context file: {}", path.display()))?;
    let stored: StoredContext =
        serde_json::from_str(&contents).context("Failed to parse context JSON")?;

    let id = hex::decode(&stored.id).context("context.id must be hex")?;
    let nonce = hex::decode(&stored.nonce).context("context.nonce must be hex")?;
    Ok(TweakContext::from_raw(
        &id,
        stored.counter,
        stored.threshold,
        &nonce,
    )?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_help() {
    println!(
        r#"Shield: deterministic nested multisig addresses from tweaked master keys

USAGE:
    shield [OPTIONS]

OPTIONS:
    -c, --config <PATH>      Config file path (default: shield.toml)
    --id <HEX>               32-byte identifier, hex-encoded
    --counter <N>            Starting counter, also where --recover starts (default: 0)
    --verify <PATH>          Reproduce the script and address of a stored context (JSON)
    --recover <ADDRESS>      Find the counter that produced ADDRESS for --id
    --max-attempts <N>       Counters searched by --recover (default: 1000)
    --validate               Validate config file and exit
    -h, --help               Show this help message
    -V, --version            Show version

ENVIRONMENT VARIABLES (override config file):
    SHIELD_LOG_LEVEL         Log level (error/warn/info/debug/trace)
    SHIELD_NETWORK           Bitcoin network (bitcoin/testnet/signet/regtest)
    SHIELD_THRESHOLD         Signatures required
    SHIELD_MASTER_KEYS       Comma-separated hex master keys

EXAMPLES:
    # Derive the address for an identifier
    shield --config shield.toml --id 68656c6c6f20776f726c6468656c6c6f20776f726c6468656c6c6f20776f726c

    # Audit a previously issued context
    shield --config shield.toml --verify context.json
"#
    );
}
