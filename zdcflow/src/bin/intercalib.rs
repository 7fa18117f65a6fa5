//! `intercalib [INPUT...]`
//!
//! Inter-calibrate the ZDC towers. Reconstructed time frames from every
//! INPUT are accumulated on several threads, or a binned input is read with
//! `--binned`, and the fitted coefficients are written as tab-separated
//! values: group, six parameters, six errors, chi2, events.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{stdout, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use zdcflow::{processor, InterCalibArgs};
use zdctools::cfg::{self, InterCalibConfig};
use zdctools::intercalib::{InterCalib, C_NAMES, H_NAMES, NGROUPS};
use zdctools::{de, ser};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn tsv_writer(path: &str) -> Result<csv::Writer<File>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("creating {}", path))
}

fn accumulate(args: &InterCalibArgs, config: &InterCalibConfig) -> Result<InterCalib> {
    let stats = Arc::new(Mutex::new(Default::default()));
    let (tx, rx) = flume::bounded(2 * args.threads.max(1));
    let handles = processor::intercalib(rx, config, args.threads, stats.clone());
    for path in &args.input {
        let frames = de::rec_events(File::open(path).with_context(|| format!("opening {}", path))?)?;
        info!("{}: {} time frames", path, frames.len());
        for ev in frames {
            tx.send(ev).map_err(|_| anyhow!("accumulating threads stopped"))?;
        }
    }
    drop(tx);
    let ic = processor::merge(handles, config)?;
    info!("{:?}", *stats.lock());
    Ok(ic)
}

fn main() -> Result<()> {
    let args: InterCalibArgs = argh::from_env();

    if args.version {
        println!(concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION);
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    let mut config: InterCalibConfig = match &args.config {
        Some(p) => cfg::from_json_file(p).with_context(|| format!("loading configuration {}", p))?,
        None => InterCalibConfig::default(),
    };
    if args.cross_check {
        config.cross_check = true;
    }

    let mut ic = match &args.binned {
        Some(p) => {
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_path(p)
                .with_context(|| format!("opening {}", p))?;
            let bins = de::sparse_bins_tsv(&mut rdr)?;
            let mut ic = InterCalib::new(config);
            ic.process_binned(&args.name, &bins, args.trigger_class)?;
            ic
        }
        None => {
            if args.input.is_empty() {
                warn!("No input given");
            }
            let start = now_ms();
            let mut ic = accumulate(&args, &config)?;
            ic.data_mut().set_creation_time(start);
            ic.data_mut().set_creation_time(now_ms());
            ic
        }
    };

    ic.end_of_run();
    let results = ic.mini_all();

    let stdout = stdout();
    let out: Box<dyn Write> = match &args.output {
        Some(p) => Box::new(File::create(p).with_context(|| format!("creating {}", p))?),
        None => Box::new(stdout.lock()),
    };
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_writer(out);
    ser::calibration_tsv(&mut wtr, &results)?;
    wtr.flush()?;

    if let Some(prefix) = &args.histos {
        for (name, h) in H_NAMES.iter().zip(ic.histos()) {
            let mut w = tsv_writer(&format!("{}{}.tsv", prefix, name))?;
            ser::histogram_tsv(&mut w, h)?;
        }
        for (name, h) in C_NAMES.iter().zip(ic.correlations()) {
            let mut w = tsv_writer(&format!("{}{}.tsv", prefix, name))?;
            ser::histogram2d_tsv(&mut w, h)?;
        }
        info!("{} histograms written", 3 * NGROUPS);
    }
    Ok(())
}
