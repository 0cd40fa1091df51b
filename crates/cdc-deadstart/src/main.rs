//! Operator CLI for a `cdc-mainframe` installation (`spec.md` §6.5): boot,
//! shutdown, and the tape load/unload/status verbs, plus the config/
//! logging glue that is ambient rather than part of the core (SPEC_FULL
//! §B, §D).
//!
//! No argument-parsing crate is pulled in — the pack this binary is
//! built from never reaches for one, so verb dispatch is a plain match
//! over `std::env::args()`, the way a small single-purpose operator tool
//! is written here.

use std::fs;

use anyhow::{bail, Context, Result};
use cdc_config::Config;
use cdc_mainframe::Installation;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cdc_deadstart=debug")))
        .init();
}

fn load_config(path: &str) -> Result<Config> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))
}

fn usage() -> ! {
    eprintln!(
        "usage:\n  \
         cdc-deadstart <config.json> boot [mainframe-id] [tape-name=image-path ...]\n  \
         cdc-deadstart <config.json> tape-status <tape-name>"
    );
    std::process::exit(2);
}

fn cmd_boot(config: &Config, rest: &[String]) -> Result<()> {
    let mut args = rest.iter();
    let mainframe_id: u32 = match args.next() {
        Some(s) => s.parse().with_context(|| format!("invalid mainframe id {s}"))?,
        None => 0,
    };

    let mut installation = Installation::new(config)?;

    for spec in args {
        let Some((name, path)) = spec.split_once('=') else {
            bail!("expected tape-name=image-path, got {spec}");
        };
        let image = fs::read(path).with_context(|| format!("reading tape image {path}"))?;
        if !installation.load_tape(name, image) {
            bail!("no configured tape named {name}");
        }
        info!(tape = name, path, "tape loaded");
    }

    if !installation.deadstart(mainframe_id) {
        bail!("no such mainframe: {mainframe_id}");
    }
    info!(mainframe_id, "deadstart issued");
    info!("type 'shutdown' and press enter to stop the installation");
    installation.run_until_shutdown(true);
    info!("installation stopped");
    Ok(())
}

fn cmd_tape_status(config: &Config, rest: &[String]) -> Result<()> {
    let Some(name) = rest.first() else {
        bail!("tape-status requires a tape name");
    };
    let installation = Installation::new(config)?;
    match installation.tape_status(name) {
        Some(status) => println!("{name}: {status:?}"),
        None => bail!("no configured tape named {name}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [config_path, verb, rest @ ..] = args.as_slice() else {
        usage();
    };

    let config = load_config(config_path)?;
    config.validate().context("invalid configuration")?;

    match verb.as_str() {
        "boot" => cmd_boot(&config, rest),
        "tape-status" => cmd_tape_status(&config, rest),
        other => {
            eprintln!("unknown verb: {other}");
            usage();
        }
    }
}
