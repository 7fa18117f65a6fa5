pub mod bit;
pub mod cfg;
pub mod de;
pub mod digit;
pub mod error;
pub mod fit;
pub mod flat;
pub mod hist;
pub mod intercalib;
pub mod payload;
pub mod phase;
pub mod raw;
pub mod rec;
pub mod ser;

pub use error::{Result, ZdcError};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Number of front-end modules
pub const NMODULES: usize = 8;
/// Channels read out by each module
pub const NCH_PER_MODULE: usize = 4;
/// Digitizer channels, one bit each in the trigger words
pub const NDIGI_CHANNELS: usize = NMODULES * NCH_PER_MODULE;
/// Reconstructed channels
pub const NCHANNELS: usize = 26;
/// TDC channels
pub const NTDC_CHANNELS: usize = 10;
/// Samples taken in one bunch crossing
pub const NTIME_BINS_PER_BC: usize = 12;
/// GBT words sent for one channel in one bunch crossing
pub const NW_PER_BC: usize = 3;
/// Bunch crossings in one orbit
pub const LHC_MAX_BUNCHES: usize = 3564;
/// Last bunch crossing of an orbit, always flushed
pub const LAST_BC: u16 = (LHC_MAX_BUNCHES - 1) as u16;

// Reconstructed channel ids
pub const ID_ZNAC: u8 = 0;
pub const ID_ZNA1: u8 = 1;
pub const ID_ZNA2: u8 = 2;
pub const ID_ZNA3: u8 = 3;
pub const ID_ZNA4: u8 = 4;
pub const ID_ZNASUM: u8 = 5;
pub const ID_ZPAC: u8 = 6;
pub const ID_ZPA1: u8 = 7;
pub const ID_ZPA2: u8 = 8;
pub const ID_ZPA3: u8 = 9;
pub const ID_ZPA4: u8 = 10;
pub const ID_ZPASUM: u8 = 11;
pub const ID_ZEM1: u8 = 12;
pub const ID_ZEM2: u8 = 13;
pub const ID_ZNCC: u8 = 14;
pub const ID_ZNC1: u8 = 15;
pub const ID_ZNC2: u8 = 16;
pub const ID_ZNC3: u8 = 17;
pub const ID_ZNC4: u8 = 18;
pub const ID_ZNCSUM: u8 = 19;
pub const ID_ZPCC: u8 = 20;
pub const ID_ZPC1: u8 = 21;
pub const ID_ZPC2: u8 = 22;
pub const ID_ZPC3: u8 = 23;
pub const ID_ZPC4: u8 = 24;
pub const ID_ZPCSUM: u8 = 25;

pub const CHANNEL_NAMES: [&str; NCHANNELS] = [
    "ZNAC", "ZNA1", "ZNA2", "ZNA3", "ZNA4", "ZNAS",
    "ZPAC", "ZPA1", "ZPA2", "ZPA3", "ZPA4", "ZPAS",
    "ZEM1", "ZEM2",
    "ZNCC", "ZNC1", "ZNC2", "ZNC3", "ZNC4", "ZNCS",
    "ZPCC", "ZPC1", "ZPC2", "ZPC3", "ZPC4", "ZPCS",
];

// TDC channel ids
pub const TDC_ZNAC: u8 = 0;
pub const TDC_ZNAS: u8 = 1;
pub const TDC_ZPAC: u8 = 2;
pub const TDC_ZPAS: u8 = 3;
pub const TDC_ZEM1: u8 = 4;
pub const TDC_ZEM2: u8 = 5;
pub const TDC_ZNCC: u8 = 6;
pub const TDC_ZNCS: u8 = 7;
pub const TDC_ZPCC: u8 = 8;
pub const TDC_ZPCS: u8 = 9;

/// Bunch crossing identifier: orbit counter and bunch crossing within it
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub orbit: u32,
    pub bc: u16,
}

impl InteractionRecord {
    pub fn new(orbit: u32, bc: u16) -> Self {
        InteractionRecord { orbit, bc }
    }

    /// Bunch crossings counted from orbit 0, bc 0
    pub fn to_long(self) -> i64 {
        self.orbit as i64 * LHC_MAX_BUNCHES as i64 + self.bc as i64
    }

    /// Signed distance in bunch crossings from `other` to `self`
    pub fn difference(self, other: InteractionRecord) -> i64 {
        self.to_long() - other.to_long()
    }
}

impl Ord for InteractionRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.orbit, self.bc).cmp(&(other.orbit, other.bc))
    }
}

impl PartialOrd for InteractionRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for InteractionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:9}.{:04}", self.orbit, self.bc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difference_across_orbits() {
        let a = InteractionRecord::new(10, 3563);
        let b = InteractionRecord::new(11, 2);
        assert_eq!(3, b.difference(a));
        assert_eq!(-3, a.difference(b));
        assert!(a < b);
    }

    #[test]
    fn channel_names() {
        assert_eq!("ZEM2", CHANNEL_NAMES[ID_ZEM2 as usize]);
        assert_eq!("ZPCS", CHANNEL_NAMES[ID_ZPCSUM as usize]);
    }
}
