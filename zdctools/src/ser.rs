//! Serialization of ZDC objects
//!
//! Time frames of digits and reconstructed events are written as zstd
//! compressed JSON lines, one frame per line. Raw payloads are written as
//! their flat little-endian image. Payload dumps, calibration tables and
//! histograms are tab-separated values.

use serde::Serialize;
use std::io::Write;
use zstd::stream;

use crate::digit::DigitFrame;
use crate::hist::{FlatHisto1D, FlatHisto2D};
use crate::intercalib::{CalibrationResult, GROUP_NAMES};
use crate::payload::ChannelPayload;
use crate::rec::RecEvent;
use crate::Result;

/// Write one value as a compressed JSON line
///
/// `zstd` streams concatenate, so every frame may be compressed on its own
/// and the file read back with a single decoder.
pub fn json_line<T: Serialize>(wtr: &mut impl Write, value: &T) -> Result<()> {
    let mut zwtr = stream::write::Encoder::new(wtr, 0)?;
    serde_json::to_writer(&mut zwtr, value)?;
    zwtr.write_all(b"\n")?;
    zwtr.finish()?;
    Ok(())
}

pub fn digits(wtr: &mut impl Write, frame: &DigitFrame) -> Result<()> {
    json_line(wtr, frame)
}

pub fn rec_events(wtr: &mut impl Write, ev: &RecEvent) -> Result<()> {
    json_line(wtr, ev)
}

/// Raw payloads, 36 bytes each
pub fn payloads(wtr: &mut impl Write, payloads: &[ChannelPayload]) -> Result<()> {
    for p in payloads {
        wtr.write_all(&p.to_le_bytes())?;
    }
    Ok(())
}

/// Decoded payloads, one channel per line
pub fn payload_tsv(wtr: &mut csv::Writer<impl Write>, payloads: &[ChannelPayload]) -> Result<()> {
    for p in payloads {
        let f = p.decode();
        let flags = |v: &[bool]| v.iter().map(|&b| if b { '1' } else { '0' }).collect::<String>();
        let mut rec = vec![
            f.orbit.to_string(),
            f.bc.to_string(),
            f.board.to_string(),
            f.ch.to_string(),
            f.hits.to_string(),
            format!("{:.3}", p.pedestal()),
            f.error.to_string(),
            flags(&f.alice),
            flags(&[f.hit, f.auto_m]),
            flags(&f.auto),
        ];
        rec.extend(f.samples.iter().map(|s| s.to_string()));
        wtr.write_record(&rec)?;
    }
    Ok(())
}

/// Calibration table: group, coefficients, errors, chi, events
pub fn calibration_tsv(wtr: &mut csv::Writer<impl Write>, results: &[CalibrationResult]) -> Result<()> {
    for r in results {
        let mut rec = vec![GROUP_NAMES.get(r.group).unwrap_or(&"?").to_string()];
        rec.extend(r.par.iter().map(|v| v.to_string()));
        rec.extend(r.err.iter().map(|v| v.to_string()));
        rec.push(r.chi.to_string());
        rec.push(r.entries.to_string());
        wtr.write_record(&rec)?;
    }
    Ok(())
}

/// Histogram as (bin center, content) records
pub fn histogram_tsv(wtr: &mut csv::Writer<impl Write>, h: &FlatHisto1D) -> Result<()> {
    for (ib, v) in h.data.iter().enumerate() {
        wtr.write_record(&[h.bin_center(ib).to_string(), v.to_string()])?;
    }
    Ok(())
}

/// Histogram as (x center, y center, content) records
pub fn histogram2d_tsv(wtr: &mut csv::Writer<impl Write>, h: &FlatHisto2D) -> Result<()> {
    for ix in 0..h.nx {
        for iy in 0..h.ny {
            let (x, y) = h.bin_center(ix, iy);
            wtr.write_record(&[x.to_string(), y.to_string(), h.get(ix, iy).to_string()])?;
        }
    }
    Ok(())
}
