//! Bitmask tools for working with channel and module patterns

use bit_iter::BitIter;

use crate::{NCH_PER_MODULE, NCHANNELS};

/// Convert 0-indexed channels into a bitmask
pub fn chans_to_mask(chs: &[u8]) -> u32 {
    let mut m = 0;
    for ch in chs {
        m |= 1 << ch;
    }
    m
}

/// Returns all 0-indexed channels in mask
pub fn mask_to_chans(m: u32) -> Vec<u8> {
    BitIter::from(m).map(|b| b as u8).collect()
}

/// Digitizer channel bits belonging to module `im`
pub fn module_mask(im: usize) -> u32 {
    0xf << (im * NCH_PER_MODULE)
}

/// Flag array over reconstructed channels from a list of channel ids
pub fn chans_to_flags(chs: &[u8]) -> [bool; NCHANNELS] {
    let mut flags = [false; NCHANNELS];
    for &ch in chs {
        if let Some(f) = flags.get_mut(ch as usize) {
            *f = true;
        }
    }
    flags
}

// Bitwise set/clear/toggle/check/change operations for unsigned integers

use std::ops::{BitAndAssign, BitOrAssign, BitXorAssign};
use num_traits::{FromPrimitive, PrimInt, Unsigned};

pub trait BitOps:
    PrimInt
    + BitAndAssign
    + BitOrAssign
    + BitXorAssign
    + FromPrimitive
    + Unsigned
{
    fn set(&mut self, b: usize);
    fn clear(&mut self, b: usize);
    fn toggle(&mut self, b: usize);
    fn change(&mut self, b: usize, x: bool);
    fn check(self, b: usize) -> bool;
}

macro_rules! impl_bitops {
    ($($t:ty),*) => {
        $(
            impl BitOps for $t {
                #[inline]
                fn set(&mut self, b: usize) {
                    *self |= 1 << b;
                }

                #[inline]
                fn clear(&mut self, b: usize) {
                    *self &= !(1 << b);
                }

                #[inline]
                fn toggle(&mut self, b: usize) {
                    *self ^= 1 << b;
                }

                #[inline]
                fn change(&mut self, b: usize, x: bool) {
                    *self = (*self & !(1 << b)) | ((x as $t) << b);
                }

                #[inline]
                fn check(self, b: usize) -> bool {
                    self >> b & 1 == 1
                }
            }
        )*
    };
}

impl_bitops!(u8, u16, u32, u64, u128);
