//! Raw payload of one channel in one bunch crossing: three GBT words
//!
//! Each GBT word carries 80 bits of data in three 32-bit words (the top 16
//! bits of the third are unused). Fields are packed LSB first:
//!
//! ```text
//! word 0: fixed:2=0 board:4 ch:2 offset:16 hits:12 bc:12 orbit:32
//! word 1: fixed:2=1 error:2 A0 A1 A2 A3 s00..s05:12
//! word 2: fixed:2=2 Hit TM T0 T1 T2 T3 s06..s11:12
//! ```
//!
//! Packing is done with explicit shifts on a `u128` so the binary layout
//! does not depend on the target.

use crate::bit::BitOps;
use crate::{NTIME_BINS_PER_BC, NW_PER_BC};

pub const ID_W0: u32 = 0;
pub const ID_W1: u32 = 1;
pub const ID_W2: u32 = 2;
/// Heartbeat marker in the format tag
pub const ID_HB: u32 = 3;

/// 96 bits as sent for one GBT word
pub type GbtWord = [u32; 3];

/// Every field of a channel payload, samples already sign-extended
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadFields {
    pub board: u8,
    pub ch: u8,
    /// Pedestal in fixed point (x8, offset by 32768)
    pub offset: u16,
    /// Hit scaler, 12 bits
    pub hits: u16,
    pub bc: u16,
    pub orbit: u32,
    pub error: u8,
    pub alice: [bool; 4],
    pub hit: bool,
    pub auto_m: bool,
    pub auto: [bool; 4],
    pub samples: [i16; NTIME_BINS_PER_BC],
}

/// Encoded channel payload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelPayload {
    pub w: [GbtWord; NW_PER_BC],
}

#[inline]
fn to_u128(w: &GbtWord) -> u128 {
    (w[2] as u128) << 64 | (w[1] as u128) << 32 | w[0] as u128
}

#[inline]
fn from_u128(v: u128) -> GbtWord {
    [v as u32, (v >> 32) as u32, (v >> 64) as u32]
}

/// 12-bit two's complement sample to signed value
#[inline]
pub fn sign_extend_12(v: u16) -> i16 {
    let v = (v & 0xfff) as i16;
    if v > 2047 {
        v - 4096
    } else {
        v
    }
}

#[inline]
fn pack_samples(v: &mut u128, samples: &[i16]) {
    for (i, &s) in samples.iter().enumerate() {
        *v |= ((s as u16 & 0xfff) as u128) << (8 + 12 * i);
    }
}

#[inline]
fn unpack_samples(v: u128, samples: &mut [i16]) {
    for (i, s) in samples.iter_mut().enumerate() {
        *s = sign_extend_12(((v >> (8 + 12 * i)) & 0xfff) as u16);
    }
}

impl ChannelPayload {
    pub fn encode(f: &PayloadFields) -> Self {
        let mut w0: u128 = ID_W0 as u128;
        w0 |= ((f.board & 0xf) as u128) << 2;
        w0 |= ((f.ch & 0x3) as u128) << 6;
        w0 |= (f.offset as u128) << 8;
        w0 |= ((f.hits & 0xfff) as u128) << 24;
        w0 |= ((f.bc & 0xfff) as u128) << 36;
        w0 |= (f.orbit as u128) << 48;

        let mut w1: u128 = ID_W1 as u128;
        w1 |= ((f.error & 0x3) as u128) << 2;
        for (i, &a) in f.alice.iter().enumerate() {
            w1 |= (a as u128) << (4 + i);
        }
        pack_samples(&mut w1, &f.samples[..6]);

        let mut w2: u128 = ID_W2 as u128;
        w2 |= (f.hit as u128) << 2;
        w2 |= (f.auto_m as u128) << 3;
        for (i, &t) in f.auto.iter().enumerate() {
            w2 |= (t as u128) << (4 + i);
        }
        pack_samples(&mut w2, &f.samples[6..]);

        ChannelPayload {
            w: [from_u128(w0), from_u128(w1), from_u128(w2)],
        }
    }

    pub fn decode(&self) -> PayloadFields {
        let w0 = to_u128(&self.w[0]);
        let w1 = to_u128(&self.w[1]);
        let w2 = to_u128(&self.w[2]);
        let a = self.w[1][0];
        let c = self.w[2][0];
        let mut f = PayloadFields {
            board: ((w0 >> 2) & 0xf) as u8,
            ch: ((w0 >> 6) & 0x3) as u8,
            offset: ((w0 >> 8) & 0xffff) as u16,
            hits: ((w0 >> 24) & 0xfff) as u16,
            bc: ((w0 >> 36) & 0xfff) as u16,
            orbit: ((w0 >> 48) & 0xffff_ffff) as u32,
            error: ((w1 >> 2) & 0x3) as u8,
            alice: [a.check(4), a.check(5), a.check(6), a.check(7)],
            hit: c.check(2),
            auto_m: c.check(3),
            auto: [c.check(4), c.check(5), c.check(6), c.check(7)],
            samples: [0; NTIME_BINS_PER_BC],
        };
        unpack_samples(w1, &mut f.samples[..6]);
        unpack_samples(w2, &mut f.samples[6..]);
        f
    }

    /// Format tags of the three words, expected to be 0, 1, 2
    pub fn tags(&self) -> [u32; NW_PER_BC] {
        [self.w[0][0] & 0x3, self.w[1][0] & 0x3, self.w[2][0] & 0x3]
    }

    pub fn is_well_formed(&self) -> bool {
        self.tags() == [ID_W0, ID_W1, ID_W2]
    }

    /// Pedestal in ADC counts
    pub fn pedestal(&self) -> f32 {
        (self.decode().offset as i32 - 32768) as f32 / 8.
    }

    /// Flat little-endian image, 36 bytes
    pub fn to_le_bytes(&self) -> [u8; 4 * 3 * NW_PER_BC] {
        let mut b = [0u8; 4 * 3 * NW_PER_BC];
        for (i, x) in self.w.iter().flatten().enumerate() {
            b[4 * i..4 * i + 4].copy_from_slice(&x.to_le_bytes());
        }
        b
    }

    pub fn from_le_bytes(b: &[u8; 4 * 3 * NW_PER_BC]) -> Self {
        let mut p = ChannelPayload::default();
        for (i, x) in p.w.iter_mut().flatten().enumerate() {
            *x = u32::from_le_bytes([b[4 * i], b[4 * i + 1], b[4 * i + 2], b[4 * i + 3]]);
        }
        p
    }
}
