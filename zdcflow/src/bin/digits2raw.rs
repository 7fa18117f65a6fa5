//! `digits2raw [INPUT] -o zdc.raw`
//!
//! Convert time frames of ZDC digits into raw channel payloads. Frames are
//! read from INPUT, or from standard input, and converted in order on a
//! processing thread.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{stdin, BufWriter, Read};
use std::sync::Arc;
use tracing::info;

use zdcflow::{processor, Digits2RawArgs};
use zdctools::cfg::{self, ModuleConfig, RawConfig, SimCondition};
use zdctools::raw::{Digits2Raw, EmptyBunches};
use zdctools::{de, ser};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

fn filling(path: &str) -> Result<EmptyBunches> {
    let mut text = String::new();
    File::open(path)
        .with_context(|| format!("opening filling scheme {}", path))?
        .read_to_string(&mut text)?;
    let mut filled = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bc: u16 = line
            .parse()
            .with_context(|| format!("{}:{}: bad bunch crossing {:?}", path, i + 1, line))?;
        filled.push(bc);
    }
    info!("{} filled bunch crossings", filled.len());
    Ok(EmptyBunches::from_filled(filled))
}

fn main() -> Result<()> {
    let args: Digits2RawArgs = argh::from_env();

    if args.version {
        println!(concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION);
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let module_config = match &args.module_config {
        Some(p) => cfg::from_json_file(p).with_context(|| format!("loading module configuration {}", p))?,
        None => ModuleConfig::standard(),
    };
    let sim_condition: SimCondition = match &args.sim_condition {
        Some(p) => cfg::from_json_file(p).with_context(|| format!("loading simulation conditions {}", p))?,
        None => return Err(anyhow!("no simulation conditions provided (--sim-condition)")),
    };
    let empty = match &args.filling {
        Some(p) => filling(p)?,
        None => EmptyBunches::from_filled([]),
    };
    let raw_config = RawConfig {
        continuous: !args.triggered,
        seed: args.seed,
    };
    let rng = match raw_config.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let mut d2r = Digits2Raw::new(raw_config);
    d2r.set_module_config(module_config);
    d2r.set_sim_condition(sim_condition);
    d2r.set_empty_bunches(empty);
    let converter = Arc::new(Mutex::new(d2r));

    let frames = match &args.input {
        Some(p) => de::digits(File::open(p).with_context(|| format!("opening {}", p))?)?,
        None => de::digits(stdin().lock())?,
    };
    info!("{} time frames", frames.len());

    let (tx_frames, rx_frames) = flume::bounded(4);
    let (tx_out, rx_out) = flume::unbounded();
    let handle = processor::digits2raw(rx_frames, tx_out, converter.clone(), rng);

    // Feed from another thread so that output is written while converting
    let feeder = std::thread::spawn(move || {
        for frame in frames {
            if tx_frames.send(frame).is_err() {
                break;
            }
        }
    });

    let mut wtr = BufWriter::new(File::create(&args.output).with_context(|| format!("creating {}", args.output))?);
    let mut tsv = match &args.tsv {
        Some(p) => Some(
            csv::WriterBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_path(p)
                .with_context(|| format!("creating {}", p))?,
        ),
        None => None,
    };
    let mut n_payloads = 0;
    for payloads in rx_out.iter() {
        ser::payloads(&mut wtr, &payloads)?;
        if let Some(t) = tsv.as_mut() {
            ser::payload_tsv(t, &payloads)?;
        }
        n_payloads += payloads.len();
    }

    feeder.join().map_err(|_| anyhow!("frame reader panicked"))?;
    let n_frames = handle.join().map_err(|_| anyhow!("converter panicked"))??;
    info!("{} frames converted into {} payloads", n_frames, n_payloads);
    Ok(())
}
