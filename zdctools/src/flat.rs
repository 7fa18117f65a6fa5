//! Flat event view: walk a reconstructed time frame one bunch crossing at a
//! time, joining the energy, TDC and info arrays through the stored ranges.

use crate::bit::BitOps;
use crate::rec::{decode_info, BcRecData, InfoEntry, RecEvent, SharedRecEvent, ZdcEnergy, ZdcTdcData};
use crate::{InteractionRecord, NCHANNELS, NTDC_CHANNELS};

/// Forward-only iterator over the bunch crossings of a time frame
pub struct RecEventFlat<'a> {
    rec_bc: &'a [BcRecData],
    energy: &'a [ZdcEnergy],
    tdc_data: &'a [ZdcTdcData],
    info: &'a [u16],
    next: usize,
}

impl<'a> RecEventFlat<'a> {
    pub fn new(
        rec_bc: &'a [BcRecData],
        energy: &'a [ZdcEnergy],
        tdc_data: &'a [ZdcTdcData],
        info: &'a [u16],
    ) -> Self {
        RecEventFlat {
            rec_bc,
            energy,
            tdc_data,
            info,
            next: 0,
        }
    }

    /// Bunch crossings not yet visited
    pub fn remaining(&self) -> usize {
        self.rec_bc.len() - self.next
    }
}

impl<'a> Iterator for RecEventFlat<'a> {
    type Item = EventView<'a>;

    fn next(&mut self) -> Option<EventView<'a>> {
        let cur = self.rec_bc.get(self.next)?;
        self.next += 1;
        Some(EventView {
            cur,
            energy: self.energy.get(cur.refe.range()).unwrap_or(&[]),
            tdc: self.tdc_data.get(cur.reft.range()).unwrap_or(&[]),
            info: self.info.get(cur.refi.range()).unwrap_or(&[]),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl RecEvent {
    pub fn flat(&self) -> RecEventFlat<'_> {
        RecEventFlat::new(&self.rec_bc, &self.energy, &self.tdc_data, &self.info)
    }
}

impl SharedRecEvent {
    pub fn flat(&self) -> RecEventFlat<'_> {
        RecEventFlat::new(&self.rec_bc, &self.energy, &self.tdc_data, &self.info)
    }
}

/// One bunch crossing with the slices of data that belong to it
#[derive(Clone, Copy, Debug)]
pub struct EventView<'a> {
    pub cur: &'a BcRecData,
    pub energy: &'a [ZdcEnergy],
    pub tdc: &'a [ZdcTdcData],
    pub info: &'a [u16],
}

impl<'a> EventView<'a> {
    pub fn ir(&self) -> InteractionRecord {
        self.cur.ir
    }

    pub fn n_energy(&self) -> usize {
        self.energy.len()
    }

    pub fn n_tdc(&self) -> usize {
        self.tdc.len()
    }

    pub fn n_info(&self) -> usize {
        self.info.len()
    }

    /// Energy of channel `ch`, if reconstructed in this bunch crossing
    pub fn ezdc(&self, ch: u8) -> Option<f32> {
        self.energy.iter().rev().find(|e| e.ch == ch).map(|e| e.energy)
    }

    /// Energy of channel `ch`, or -inf when not reconstructed
    pub fn ezdc_or_inf(&self, ch: u8) -> f64 {
        self.ezdc(ch).map_or(f64::NEG_INFINITY, f64::from)
    }

    /// Bitmask of channels with a reconstructed energy
    pub fn ezdc_decoded(&self) -> u32 {
        let mut m = 0u32;
        for e in self.energy.iter().filter(|e| (e.ch as usize) < NCHANNELS) {
            m.set(e.ch as usize);
        }
        m
    }

    /// TDC values of channel `id` in hit order
    pub fn tdc_val(&self, id: u8) -> Vec<i16> {
        self.tdc.iter().filter(|t| t.id == id).map(|t| t.val).collect()
    }

    /// TDC amplitudes of channel `id` in hit order
    pub fn tdc_amp(&self, id: u8) -> Vec<i16> {
        self.tdc.iter().filter(|t| t.id == id).map(|t| t.amp).collect()
    }

    /// Number of hits per TDC channel
    pub fn tdc_hits(&self) -> [usize; NTDC_CHANNELS] {
        let mut n = [0; NTDC_CHANNELS];
        for t in self.tdc {
            if let Some(x) = n.get_mut(t.id as usize) {
                *x += 1;
            }
        }
        n
    }

    /// Info words with bitmap encodings expanded
    pub fn decoded_info(&self) -> Vec<InfoEntry> {
        decode_info(self.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit::chans_to_flags;
    use crate::{ID_ZEM1, ID_ZNAC, TDC_ZEM1, TDC_ZEM2};

    fn sample() -> RecEvent {
        let mut ev = RecEvent::new();
        ev.add_bc_with(InteractionRecord::new(5, 100), 0x3, 0x1);
        ev.add_energy(ID_ZNAC, 10.);
        ev.add_energy(ID_ZEM1, 2.5);
        ev.add_tdc(TDC_ZEM1, -3, 200);
        ev.add_tdc(TDC_ZEM1, 5, 150);
        ev.add_tdc(TDC_ZEM2, 1, 90);
        ev.add_bc(InteractionRecord::new(5, 101));
        ev.add_bc(InteractionRecord::new(5, 102));
        ev.add_info_pattern(&chans_to_flags(&[1, 2, 3, 20]), 9);
        ev.add_energy(3, 1.);
        ev
    }

    #[test]
    fn views_follow_bunch_crossings() {
        let ev = sample();
        let views: Vec<_> = ev.flat().collect();
        assert_eq!(3, views.len());

        assert_eq!(InteractionRecord::new(5, 100), views[0].ir());
        assert_eq!(2, views[0].n_energy());
        assert_eq!(3, views[0].n_tdc());
        assert_eq!(0, views[0].n_info());
        assert_eq!(Some(10.), views[0].ezdc(ID_ZNAC));
        assert_eq!(None, views[0].ezdc(2));
        assert_eq!(f64::NEG_INFINITY, views[0].ezdc_or_inf(2));
        assert_eq!(1 | 1 << ID_ZEM1, views[0].ezdc_decoded());
        assert_eq!(vec![-3, 5], views[0].tdc_val(TDC_ZEM1));
        assert_eq!(vec![90], views[0].tdc_amp(TDC_ZEM2));
        assert_eq!(2, views[0].tdc_hits()[TDC_ZEM1 as usize]);

        assert_eq!(0, views[1].n_energy() + views[1].n_tdc() + views[1].n_info());

        assert_eq!(1, views[2].n_energy());
        assert_eq!(3, views[2].n_info());
        let chs: Vec<u8> = views[2].decoded_info().iter().map(|e| e.ch).collect();
        assert_eq!(vec![1, 2, 3, 20], chs);
    }

    #[test]
    fn iterator_is_exhausted_once() {
        let ev = sample();
        let mut it = ev.flat();
        assert_eq!(3, it.remaining());
        assert!(it.next().is_some());
        assert_eq!((2, Some(2)), it.size_hint());
        assert_eq!(2, it.by_ref().count());
        assert!(it.next().is_none());
    }

    #[test]
    fn shared_frame_iterates_the_same() {
        let ev = sample();
        let n: Vec<usize> = ev.flat().map(|v| v.n_energy()).collect();
        let shared = ev.into_shared();
        let m: Vec<usize> = shared.flat().map(|v| v.n_energy()).collect();
        assert_eq!(n, m);
    }
}
