//! Reconstructed events: an append-only store of bunch crossings with flat
//! arrays of energies, TDC hits and info words addressed by reference ranges
//!
//! Records are appended one bunch crossing at a time: `add_bc` opens a new
//! bunch crossing whose ranges start at the current end of each array, and
//! every `add_*` call that follows extends the most recent bunch crossing.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::{InteractionRecord, NCHANNELS, NMODULES};

/// Channel id field value announcing a bitmap encoded info
pub const INFO_PATTERN_CH: u16 = 0x1f;
/// Format marker of the bitmap words
pub const INFO_PATTERN_MARKER: u16 = 0x8000;
/// Channels covered by one bitmap word
pub const INFO_PATTERN_WIDTH: usize = 15;
/// Flagged channels from which the bitmap encoding is used
pub const INFO_PATTERN_THRESHOLD: usize = 3;

/// (first, entries) reference into one of the flat arrays
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRef {
    pub first: u32,
    pub entries: u32,
}

impl RangeRef {
    pub fn new(first: usize) -> Self {
        RangeRef {
            first: first as u32,
            entries: 0,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.first as usize..(self.first + self.entries) as usize
    }
}

/// One reconstructed bunch crossing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BcRecData {
    pub ir: InteractionRecord,
    pub channels: u32,
    pub triggers: u32,
    #[serde(default)]
    pub module_triggers: [u16; NMODULES],
    pub refe: RangeRef,
    pub reft: RangeRef,
    pub refi: RangeRef,
}

impl BcRecData {
    pub fn new(first_e: usize, first_t: usize, first_i: usize, ir: InteractionRecord) -> Self {
        BcRecData {
            ir,
            refe: RangeRef::new(first_e),
            reft: RangeRef::new(first_t),
            refi: RangeRef::new(first_i),
            ..Default::default()
        }
    }
}

/// Reconstructed energy of one channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZdcEnergy {
    pub ch: u8,
    pub energy: f32,
}

/// One TDC hit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZdcTdcData {
    pub id: u8,
    pub val: i16,
    pub amp: i16,
}

/// Channel id of a single-channel info word
#[inline]
pub fn info_channel(info: u16) -> u8 {
    ((info >> 10) & 0x1f) as u8
}

/// Status code of an info word
#[inline]
pub fn info_code(info: u16) -> u16 {
    info & 0x03ff
}

#[inline]
pub fn make_info(ch: u8, code: u16) -> u16 {
    (code & 0x03ff) | ((ch as u16 & 0x1f) << 10)
}

/// A decoded info entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoEntry {
    pub ch: u8,
    pub code: u16,
}

/// Decode a sequence of info words, expanding bitmap encodings into one entry
/// per flagged channel. A bitmap header is followed by up to two words with
/// bit 15 set; a truncated bitmap decodes the words that are present.
pub fn decode_info(words: &[u16]) -> Vec<InfoEntry> {
    let mut out = Vec::new();
    let mut it = words.iter().peekable();
    while let Some(&w) = it.next() {
        let ch = info_channel(w);
        let code = info_code(w);
        if ch as u16 != INFO_PATTERN_CH {
            out.push(InfoEntry { ch, code });
            continue;
        }
        for part in 0..2 {
            match it.peek() {
                Some(&&bits) if bits & INFO_PATTERN_MARKER != 0 => {
                    it.next();
                    for b in 0..INFO_PATTERN_WIDTH {
                        let ich = part * INFO_PATTERN_WIDTH + b;
                        if ich < NCHANNELS && bits >> b & 1 == 1 {
                            out.push(InfoEntry { ch: ich as u8, code });
                        }
                    }
                }
                _ => break,
            }
        }
    }
    out
}

/// Append-only store of reconstructed bunch crossings and their data.
/// Once a time frame is complete, `into_shared` turns the arrays into
/// reference counted slices that stages can share without copying.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecEvent {
    pub rec_bc: Vec<BcRecData>,
    pub energy: Vec<ZdcEnergy>,
    pub tdc_data: Vec<ZdcTdcData>,
    pub info: Vec<u16>,
}

impl RecEvent {
    pub fn new() -> Self {
        Default::default()
    }

    /// Add new bunch crossing without data
    pub fn add_bc(&mut self, ir: InteractionRecord) {
        self.rec_bc.push(BcRecData::new(
            self.energy.len(),
            self.tdc_data.len(),
            self.info.len(),
            ir,
        ));
    }

    pub fn add_bc_with(&mut self, ir: InteractionRecord, channels: u32, triggers: u32) {
        self.add_bc(ir);
        if let Some(b) = self.rec_bc.last_mut() {
            b.channels = channels;
            b.triggers = triggers;
        }
    }

    /// The bunch crossing being filled. Adding data before the first
    /// bunch crossing is a caller bug: logged, and the data is dropped.
    fn current(&mut self, what: &str) -> Option<&mut BcRecData> {
        let cur = self.rec_bc.last_mut();
        if cur.is_none() {
            error!("Adding {} before any bunch crossing", what);
        }
        cur
    }

    pub fn add_energy(&mut self, ch: u8, energy: f32) {
        if let Some(b) = self.current("energy") {
            b.refe.entries += 1;
            self.energy.push(ZdcEnergy { ch, energy });
        }
    }

    pub fn add_tdc(&mut self, id: u8, val: i16, amp: i16) {
        if let Some(b) = self.current("TDC") {
            b.reft.entries += 1;
            self.tdc_data.push(ZdcTdcData { id, val, amp });
        }
    }

    /// Add a raw info word
    pub fn add_info_word(&mut self, info: u16) {
        if let Some(b) = self.current("info") {
            b.refi.entries += 1;
            self.info.push(info);
        }
    }

    /// Add info for a single channel
    pub fn add_info(&mut self, ch: u8, code: u16) {
        if ch as usize >= NCHANNELS {
            error!("Adding info (0x{:x}) for not existent channel {}", code, ch);
            return;
        }
        self.add_info_word(make_info(ch, code));
    }

    /// Add the same info code for a set of channels. Fewer than three
    /// channels are sent one word each, otherwise as a header followed by
    /// two bitmap words.
    pub fn add_info_pattern(&mut self, flags: &[bool; NCHANNELS], code: u16) {
        let cnt = flags.iter().filter(|&&f| f).count();
        if cnt == 0 {
            return;
        }
        if cnt < INFO_PATTERN_THRESHOLD {
            for (ich, _) in flags.iter().enumerate().filter(|(_, f)| **f) {
                self.add_info(ich as u8, code);
            }
        } else {
            self.add_info_word((code & 0x03ff) | (INFO_PATTERN_CH << 10));
            for part in flags.chunks(INFO_PATTERN_WIDTH) {
                let mut bits = INFO_PATTERN_MARKER;
                for (b, _) in part.iter().enumerate().filter(|(_, f)| **f) {
                    bits |= 1 << b;
                }
                self.add_info_word(bits);
            }
        }
    }

    /// Freeze the store into shareable arrays
    pub fn into_shared(self) -> SharedRecEvent {
        SharedRecEvent {
            rec_bc: Arc::from(self.rec_bc),
            energy: Arc::from(self.energy),
            tdc_data: Arc::from(self.tdc_data),
            info: Arc::from(self.info),
        }
    }

    pub fn len(&self) -> usize {
        self.rec_bc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rec_bc.is_empty()
    }
}

/// A finished time frame of reconstructed events
#[derive(Clone, Debug)]
pub struct SharedRecEvent {
    pub rec_bc: Arc<[BcRecData]>,
    pub energy: Arc<[ZdcEnergy]>,
    pub tdc_data: Arc<[ZdcTdcData]>,
    pub info: Arc<[u16]>,
}
