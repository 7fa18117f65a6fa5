//! Digitized bunch crossings, the input of the raw data conversion

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::bit::BitOps;
use crate::{InteractionRecord, NCH_PER_MODULE, NDIGI_CHANNELS, NMODULES, NTIME_BINS_PER_BC};

/// One digitized bunch crossing. Channel samples live in a flat array
/// shared by the whole time frame and are addressed by `first`/`entries`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BcData {
    pub ir: InteractionRecord,
    pub first: u32,
    pub entries: u32,
    /// Digitizer channels that were read out
    pub channels: u32,
    /// Autotrigger bits, one per digitizer channel
    pub triggers: u32,
    /// External (Alice) trigger present in this bunch crossing
    pub ext_triggers: bool,
    /// Per-module trigger status: bits 0-3 Alice 0-3, bit 4 autotrigger -1,
    /// bits 5-8 autotrigger 0-3
    #[serde(default)]
    pub module_triggers: [u16; NMODULES],
}

impl BcData {
    pub fn new(ir: InteractionRecord, first: u32, entries: u32, channels: u32, triggers: u32) -> Self {
        BcData {
            ir,
            first,
            entries,
            channels,
            triggers,
            ..Default::default()
        }
    }

    /// The channel digits of this bunch crossing out of the time frame array
    pub fn channel_data<'a>(&self, tfdata: &'a [ChannelData]) -> &'a [ChannelData] {
        let first = self.first as usize;
        let last = first + self.entries as usize;
        tfdata.get(first..last).unwrap_or(&[])
    }

    /// Channel map as printed in debug dumps: R for read out channels,
    /// T/. for trigger channels with/without a hit, H for hits elsewhere.
    pub fn describe(&self, trigger_mask: u32) -> String {
        let mut s = String::new();
        let _ = write!(s, "Orbit {:9} bc {:4} nch {:2} pos {}", self.ir.orbit, self.ir.bc, self.entries, self.first);
        s.push_str("\nRead:");
        push_module_map(&mut s, |ic| if self.channels.check(ic) { 'R' } else { ' ' });
        s.push_str("\nHits:");
        push_module_map(&mut s, |ic| {
            match (trigger_mask.check(ic), self.triggers.check(ic)) {
                (true, true) => 'T',
                (true, false) => '.',
                (false, true) => 'H',
                (false, false) => ' ',
            }
        });
        s.push_str("\nAUTO:");
        for (im, &bb) in self.module_triggers.iter().enumerate() {
            let _ = write!(
                s,
                " {} {}{}{}{}{}",
                im,
                if bb.check(8) { '3' } else { '-' },
                if bb.check(7) { '2' } else { '-' },
                if bb.check(6) { '1' } else { '-' },
                if bb.check(5) { '0' } else { '-' },
                if bb.check(4) { 'M' } else { '-' },
            );
        }
        s.push_str("\nALIT:");
        for (im, &bb) in self.module_triggers.iter().enumerate() {
            let _ = write!(
                s,
                " {} {}{}{}{} ",
                im,
                if bb.check(3) { '3' } else { '-' },
                if bb.check(2) { '2' } else { '-' },
                if bb.check(1) { '1' } else { '-' },
                if bb.check(0) { '0' } else { '-' },
            );
        }
        s
    }
}

fn push_module_map(s: &mut String, f: impl Fn(usize) -> char) {
    for ic in 0..NDIGI_CHANNELS {
        if ic % NCH_PER_MODULE == 0 {
            if ic == 0 {
                let _ = write!(s, " {}[", ic / NCH_PER_MODULE);
            } else {
                let _ = write!(s, "] {}[", ic / NCH_PER_MODULE);
            }
        }
        s.push(f(ic));
    }
    s.push(']');
}

/// Samples of one channel in one bunch crossing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    /// Reconstructed channel id the samples belong to
    pub id: u8,
    pub data: [i16; NTIME_BINS_PER_BC],
}

impl ChannelData {
    pub fn new(id: u8, data: [i16; NTIME_BINS_PER_BC]) -> Self {
        ChannelData { id, data }
    }
}

/// Digits of one time frame
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DigitFrame {
    pub bc: Vec<BcData>,
    pub ch: Vec<ChannelData>,
}

impl DigitFrame {
    /// Append a bunch crossing together with its channel digits
    pub fn push(&mut self, mut bcd: BcData, chs: &[ChannelData]) {
        bcd.first = self.ch.len() as u32;
        bcd.entries = chs.len() as u32;
        self.ch.extend_from_slice(chs);
        self.bc.push(bcd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_references() {
        let mut frame = DigitFrame::default();
        let a = ChannelData::new(0, [1; NTIME_BINS_PER_BC]);
        let b = ChannelData::new(6, [2; NTIME_BINS_PER_BC]);
        frame.push(BcData::new(InteractionRecord::new(1, 10), 0, 0, 0x1, 0x1), &[a]);
        frame.push(BcData::new(InteractionRecord::new(1, 11), 0, 0, 0x10, 0), &[]);
        frame.push(BcData::new(InteractionRecord::new(1, 12), 0, 0, 0x11, 0), &[a, b]);
        assert_eq!(&[a], frame.bc[0].channel_data(&frame.ch));
        assert!(frame.bc[1].channel_data(&frame.ch).is_empty());
        assert_eq!(&[a, b], frame.bc[2].channel_data(&frame.ch));
    }

    #[test]
    fn describe_marks_triggers() {
        let mut bcd = BcData::new(InteractionRecord::new(3, 42), 0, 1, 0b0011, 0b0101);
        bcd.module_triggers[0] = 0b1_0001_0001;
        let s = bcd.describe(0b0110);
        assert!(s.contains("Read: 0[RR  ] 1["));
        assert!(s.contains("Hits: 0[H.T ] 1["));
        assert!(s.contains("AUTO: 0 3---M"));
        assert!(s.contains("ALIT: 0 ---0 "));
    }
}
