//! Deserialization of ZDC objects, the inverse of `ser`

use serde::de::DeserializeOwned;
use std::io::{BufRead, BufReader, Read};
use zstd::stream;

use crate::digit::DigitFrame;
use crate::intercalib::SparseBin;
use crate::payload::ChannelPayload;
use crate::rec::RecEvent;
use crate::{Result, ZdcError, NW_PER_BC};

const PAYLOAD_BYTES: usize = 4 * 3 * NW_PER_BC;

/// Read back compressed JSON lines
///
/// The decoder runs over concatenated zstd frames, so files written frame by
/// frame are read in one go.
pub fn json_lines<T: DeserializeOwned>(rdr: impl Read) -> Result<Vec<T>> {
    let zrdr = stream::read::Decoder::new(rdr)?;
    let mut out = Vec::new();
    for line in BufReader::new(zrdr).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

pub fn digits(rdr: impl Read) -> Result<Vec<DigitFrame>> {
    json_lines(rdr)
}

pub fn rec_events(rdr: impl Read) -> Result<Vec<RecEvent>> {
    json_lines(rdr)
}

/// Raw payloads; a truncated trailing record is an error
pub fn payloads(rdr: impl Read) -> Result<Vec<ChannelPayload>> {
    let mut brdr = BufReader::new(rdr);
    let mut out = Vec::new();
    let mut buf = [0u8; PAYLOAD_BYTES];
    loop {
        let mut n = 0;
        while n < PAYLOAD_BYTES {
            match brdr.read(&mut buf[n..])? {
                0 => break,
                k => n += k,
            }
        }
        match n {
            0 => break,
            PAYLOAD_BYTES => {
                let p = ChannelPayload::from_le_bytes(&buf);
                if !p.is_well_formed() {
                    return Err(ZdcError::Payload(format!(
                        "record {} has format tags {:?}",
                        out.len(),
                        p.tags()
                    )));
                }
                out.push(p);
            }
            _ => {
                return Err(ZdcError::Payload(format!("truncated record of {} bytes", n)));
            }
        }
    }
    Ok(out)
}

/// Binned input: tab-separated tc, t1..t4, trigger class, content
pub fn sparse_bins_tsv(rdr: &mut csv::Reader<impl Read>) -> Result<Vec<SparseBin>> {
    let mut bins = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let mut v = [0.; 7];
        for (i, x) in v.iter_mut().enumerate() {
            let field = record
                .get(i)
                .ok_or_else(|| ZdcError::Parse(format!("missing column {} in {:?}", i, record)))?;
            *x = field
                .trim()
                .parse()
                .map_err(|_| ZdcError::Parse(format!("bad number {:?}", field)))?;
        }
        bins.push(SparseBin {
            x: [v[0], v[1], v[2], v[3], v[4], v[5]],
            content: v[6],
        });
    }
    Ok(bins)
}

/// Any JSON object, configurations included
pub fn json<T: DeserializeOwned>(rdr: impl Read) -> Result<T> {
    Ok(serde_json::from_reader(BufReader::new(rdr))?)
}
