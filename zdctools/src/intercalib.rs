//! Inter-calibration of the calorimeter towers
//!
//! For each calorimeter group the reference signal `tc` (common channel, or
//! analog sum in cross-check mode) and the four tower signals are collected
//! event by event into the upper triangle of the second-moment matrix of
//! `(tc, t1, t2, t3, t4, 1)`. The matrix is all the fit needs, and partial
//! accumulations from independent workers add up element by element.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::bit::chans_to_mask;
use crate::cfg::InterCalibConfig;
use crate::fit::{self, FitContext, NPAR};
use crate::flat::{EventView, RecEventFlat};
use crate::hist::{FlatHisto1D, FlatHisto2D};
use crate::*;

/// Calorimeter groups
pub const NGROUPS: usize = 5;
pub const HID_ZNA: usize = 0;
pub const HID_ZPA: usize = 1;
pub const HID_ZNC: usize = 2;
pub const HID_ZPC: usize = 3;
pub const HID_ZEM: usize = 4;

pub const GROUP_NAMES: [&str; NGROUPS] = ["ZNA", "ZPA", "ZNC", "ZPC", "ZEM"];

/// Names of the binned inputs, one per group
pub const BINNED_NAMES: [&str; NGROUPS] = ["hZNA", "hZPA", "hZNC", "hZPC", "hZEM"];

/// Names of the tower sum histograms followed by the reference histograms
pub const H_NAMES: [&str; 2 * NGROUPS] = [
    "hZNAS", "hZPAS", "hZNCS", "hZPCS", "hZEM2", "hZNAC", "hZPAC", "hZNCC", "hZPCC", "hZEM1",
];

/// Names of the correlation histograms
pub const C_NAMES: [&str; NGROUPS] = ["cZNA", "cZPA", "cZNC", "cZPC", "cZEM"];

/// Channels of each group: reference, four towers, analog sum
const GROUP_CHANNELS: [[u8; 6]; 4] = [
    [ID_ZNAC, ID_ZNA1, ID_ZNA2, ID_ZNA3, ID_ZNA4, ID_ZNASUM],
    [ID_ZPAC, ID_ZPA1, ID_ZPA2, ID_ZPA3, ID_ZPA4, ID_ZPASUM],
    [ID_ZNCC, ID_ZNC1, ID_ZNC2, ID_ZNC3, ID_ZNC4, ID_ZNCSUM],
    [ID_ZPCC, ID_ZPC1, ID_ZPC2, ID_ZPC3, ID_ZPC4, ID_ZPCSUM],
];

/// Accumulated moments of all groups and the creation time span of the
/// data that went into them
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterCalibData {
    pub sum: [[[f64; NPAR]; NPAR]; NGROUPS],
    pub ctime_beg: u64,
    pub ctime_end: u64,
}

impl InterCalibData {
    /// Extend the time span with creation time `t` (ms), 0 meaning unset
    pub fn set_creation_time(&mut self, t: u64) {
        if self.ctime_beg == 0 || t < self.ctime_beg {
            self.ctime_beg = t;
        }
        if t > self.ctime_end {
            self.ctime_end = t;
        }
    }

    /// Number of events accumulated in group `ih`
    pub fn entries(&self, ih: usize) -> f64 {
        self.sum[ih][5][5]
    }

    pub fn clear(&mut self, ih: Option<usize>) {
        match ih {
            Some(ih) if ih < NGROUPS => self.sum[ih] = [[0.; NPAR]; NPAR],
            _ => self.sum = [[[0.; NPAR]; NPAR]; NGROUPS],
        }
    }
}

impl AddAssign<&InterCalibData> for InterCalibData {
    fn add_assign(&mut self, other: &InterCalibData) {
        for ih in 0..NGROUPS {
            for i in 0..NPAR {
                for j in 0..NPAR {
                    self.sum[ih][i][j] += other.sum[ih][i][j];
                }
            }
        }
        if other.ctime_beg != 0 {
            self.set_creation_time(other.ctime_beg);
        }
        if other.ctime_end != 0 {
            self.set_creation_time(other.ctime_end);
        }
    }
}

/// Fitted coefficients of one group, the first fixed to 1
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub group: usize,
    pub par: [f64; NPAR],
    pub err: [f64; NPAR],
    pub chi: f64,
    pub entries: f64,
    pub converged: bool,
}

/// One filled bin of a six dimensional histogram: tc, t1..t4, trigger class
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseBin {
    pub x: [f64; 6],
    pub content: f64,
}

/// Bunch crossings seen by `process` and what happened to them
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub n_bc: usize,
    pub with_info: usize,
    pub untriggered: usize,
    pub no_zem: usize,
    pub used: usize,
}

impl AddAssign for ProcessStats {
    fn add_assign(&mut self, other: ProcessStats) {
        self.n_bc += other.n_bc;
        self.with_info += other.with_info;
        self.untriggered += other.untriggered;
        self.no_zem += other.no_zem;
        self.used += other.used;
    }
}

pub struct InterCalib {
    cfg: InterCalibConfig,
    data: InterCalibData,
    h: Vec<FlatHisto1D>,
    c: Vec<FlatHisto2D>,
    results: [Option<CalibrationResult>; NGROUPS],
}

impl InterCalib {
    pub fn new(cfg: InterCalibConfig) -> Self {
        let mut h = Vec::with_capacity(2 * NGROUPS);
        for _ in 0..2 {
            for ih in 0..NGROUPS {
                h.push(FlatHisto1D::new(cfg.nb1[ih], cfg.amin1[ih], cfg.amax1[ih]));
            }
        }
        let c = (0..NGROUPS)
            .map(|ih| FlatHisto2D::new(cfg.nb2[ih], cfg.amin2[ih], cfg.amax2[ih], cfg.nb2[ih], cfg.amin2[ih], cfg.amax2[ih]))
            .collect();
        InterCalib {
            cfg,
            data: InterCalibData::default(),
            h,
            c,
            results: [None; NGROUPS],
        }
    }

    pub fn config(&self) -> &InterCalibConfig {
        &self.cfg
    }

    pub fn data(&self) -> &InterCalibData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut InterCalibData {
        &mut self.data
    }

    /// Tower sum histograms followed by reference histograms
    pub fn histos(&self) -> &[FlatHisto1D] {
        &self.h
    }

    pub fn correlations(&self) -> &[FlatHisto2D] {
        &self.c
    }

    pub fn result(&self, ih: usize) -> Option<&CalibrationResult> {
        self.results.get(ih)?.as_ref()
    }

    /// Clear the moments and histograms of group `ih`, or of all groups
    pub fn clear(&mut self, ih: Option<usize>) {
        self.data.clear(ih);
        let range = match ih {
            Some(ih) if ih < NGROUPS => ih..ih + 1,
            _ => 0..NGROUPS,
        };
        for ii in range {
            self.h[ii].clear();
            self.h[NGROUPS + ii].clear();
            self.c[ii].clear();
        }
    }

    /// Add the accumulation of another worker
    pub fn merge(&mut self, other: &InterCalib) -> Result<()> {
        for (a, b) in self.h.iter_mut().zip(other.h.iter()) {
            a.merge(b)?;
        }
        for (a, b) in self.c.iter_mut().zip(other.c.iter()) {
            a.merge(b)?;
        }
        self.data += &other.data;
        Ok(())
    }

    fn tower_cuts(&self, ih: usize) -> Option<&[(f64, f64); 4]> {
        match ih {
            HID_ZPA => self.cfg.tower_cut_zpa.as_ref(),
            HID_ZPC => self.cfg.tower_cut_zpc.as_ref(),
            _ => None,
        }
    }

    /// Add one event to group `ih`. Returns false when the event is outside
    /// the acceptance window.
    pub fn cumulate(&mut self, ih: usize, tc: f64, t1: f64, t2: f64, t3: f64, t4: f64, w: f64) -> bool {
        if ih >= NGROUPS {
            error!("{}", ZdcError::UnknownGroup(ih));
            return false;
        }
        if !self.cfg.accepts(ih, tc) {
            return false;
        }
        let t = [t1, t2, t3, t4];
        if let Some(cuts) = self.tower_cuts(ih) {
            if t.iter().zip(cuts.iter()).any(|(&v, &(lo, hi))| v < lo || v > hi) {
                return false;
            }
        }
        let val = [tc, t1, t2, t3, t4, 1.];
        if val.iter().all(|v| v.is_finite()) {
            let sum = &mut self.data.sum[ih];
            for i in 0..NPAR {
                for j in i..NPAR {
                    sum[i][j] += val[i] * val[j] * w;
                }
            }
        }
        let sumquad = t1 + t2 + t3 + t4;
        self.h[ih].fill(sumquad, w);
        self.h[NGROUPS + ih].fill(tc, w);
        self.c[ih].fill(tc, sumquad, w);
        true
    }

    fn cumulate_group(&mut self, ev: &EventView, ih: usize, decoded: u32) {
        let chs = &GROUP_CHANNELS[ih];
        let (reference, needed) = if self.cfg.cross_check {
            (chs[5], chans_to_mask(chs))
        } else {
            (chs[0], chans_to_mask(&chs[..5]))
        };
        if decoded & needed == needed {
            self.cumulate(
                ih,
                ev.ezdc_or_inf(reference),
                ev.ezdc_or_inf(chs[1]),
                ev.ezdc_or_inf(chs[2]),
                ev.ezdc_or_inf(chs[3]),
                ev.ezdc_or_inf(chs[4]),
                1.,
            );
        }
    }

    /// Accumulate the clean hadronic events of a reconstructed time frame
    pub fn process(&mut self, events: RecEventFlat<'_>) -> ProcessStats {
        let mut stats = ProcessStats::default();
        for ev in events {
            stats.n_bc += 1;
            if ev.n_info() > 0 {
                // Pile-up or other messages: need clean data
                stats.with_info += 1;
                debug!("{} skipped with info {:?}", ev.ir(), ev.decoded_info());
                continue;
            }
            if ev.n_energy() > 0 && ev.cur.triggers == 0 {
                stats.untriggered += 1;
                warn!("{} Untriggered bunch", ev.ir());
                continue;
            }
            // Hadronic collisions have a signal in both ZEM
            let hits = ev.tdc_hits();
            if hits[TDC_ZEM1 as usize] == 0 || hits[TDC_ZEM2 as usize] == 0 {
                stats.no_zem += 1;
                continue;
            }
            stats.used += 1;
            let decoded = ev.ezdc_decoded();
            for ih in [HID_ZNA, HID_ZPA, HID_ZNC, HID_ZPC] {
                self.cumulate_group(&ev, ih, decoded);
            }
            let zem = chans_to_mask(&[ID_ZEM1, ID_ZEM2]);
            if decoded & zem == zem {
                self.cumulate(HID_ZEM, ev.ezdc_or_inf(ID_ZEM1), ev.ezdc_or_inf(ID_ZEM2), 0., 0., 0., 1.);
            }
        }
        debug!("{:?}", stats);
        stats
    }

    /// Group of a binned input from its name
    pub fn binned_group(name: &str) -> Result<usize> {
        BINNED_NAMES
            .iter()
            .position(|&n| n == name)
            .ok_or_else(|| ZdcError::UnknownHistogram(name.to_string()))
    }

    /// Replace the moments of the group named `name` with the content of a
    /// binned input, keeping trigger class `ic`. Returns the bins used.
    pub fn process_binned(&mut self, name: &str, bins: &[SparseBin], ic: i32) -> Result<usize> {
        let ih = InterCalib::binned_group(name).map_err(|e| {
            error!("{}", e);
            e
        })?;
        self.clear(Some(ih));
        info!("Histogram {} has {} bins", name, bins.len());
        let (cutl, cuth) = (self.cfg.cut_low[ih], self.cfg.cut_high[ih]);
        let mut nn = 0;
        let mut contt = 0.;
        for b in bins.iter().filter(|b| b.content > 0.) {
            let x = &b.x;
            if (x[5] - ic as f64).round_ties_even() == 0. && x[0] > cutl && x[0] < cuth {
                nn += 1;
                contt += b.content;
                self.cumulate(ih, x[0], x[1], x[2], x[3], x[4], b.content);
            }
        }
        info!(
            "Trigger class selection {} and {} bins {} events and cuts ({}:{})",
            ic, nn, contt, cutl, cuth
        );
        Ok(nn)
    }

    /// Log the accumulated statistics, returns the events of each group
    pub fn end_of_run(&self) -> [f64; NGROUPS] {
        info!("InterCalib::end_of_run ts ({}:{})", self.data.ctime_beg, self.data.ctime_end);
        let mut n = [0.; NGROUPS];
        for (ih, ni) in n.iter_mut().enumerate() {
            *ni = self.data.entries(ih);
            info!(
                "{} {} events and cuts ({}:{})",
                GROUP_NAMES[ih], ni, self.cfg.cut_low[ih], self.cfg.cut_high[ih]
            );
        }
        n
    }

    /// Fit the coefficients of group `ih`
    pub fn mini(&mut self, ih: usize) -> Result<CalibrationResult> {
        if ih >= NGROUPS {
            return Err(ZdcError::UnknownGroup(ih));
        }
        let ctx = FitContext::from_upper(&self.data.sum[ih]);
        // Only two ZEM calorimeters: equalize their response
        let out = fit::minimize(&ctx, &fit::group_params(ih == HID_ZEM));
        let res = CalibrationResult {
            group: ih,
            par: out.par,
            err: out.err,
            chi: out.chi,
            entries: self.data.entries(ih),
            converged: out.converged,
        };
        info!("{} par={:?} err={:?}", GROUP_NAMES[ih], res.par, res.err);
        self.results[ih] = Some(res);
        Ok(res)
    }

    /// Fit every group with data
    pub fn mini_all(&mut self) -> Vec<CalibrationResult> {
        let mut out = Vec::with_capacity(NGROUPS);
        for ih in 0..NGROUPS {
            if self.data.entries(ih) > 0. {
                if let Ok(r) = self.mini(ih) {
                    out.push(r);
                }
            } else {
                warn!("{} has no events, not fitted", GROUP_NAMES[ih]);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rec::RecEvent;

    fn window(low: f64, high: f64) -> InterCalibConfig {
        let mut cfg = InterCalibConfig::default();
        for ih in 0..NGROUPS {
            cfg.set_cuts(ih, low, high);
        }
        cfg
    }

    #[test]
    fn acceptance_window() {
        let mut ic = InterCalib::new(window(0., 10.));
        assert!(ic.cumulate(HID_ZNA, 5., 1., 1., 1., 1., 2.));
        assert!(!ic.cumulate(HID_ZNA, 15., 1., 1., 1., 1., 2.));
        assert!(!ic.cumulate(HID_ZNA, 10., 1., 1., 1., 1., 2.));
        assert_eq!(25. * 2., ic.data().sum[HID_ZNA][0][0]);
        assert_eq!(5. * 2., ic.data().sum[HID_ZNA][0][5]);
        assert_eq!(2., ic.data().entries(HID_ZNA));
        // Upper triangle only
        assert_eq!(0., ic.data().sum[HID_ZNA][5][0]);
        assert_eq!(2., ic.histos()[NGROUPS + HID_ZNA].integral());
    }

    #[test]
    fn non_finite_values_skip_moments() {
        let mut ic = InterCalib::new(InterCalibConfig::default());
        assert!(ic.cumulate(HID_ZPA, 5., f64::NEG_INFINITY, 1., 1., 1., 1.));
        assert_eq!(0., ic.data().entries(HID_ZPA));
        assert_eq!(1., ic.histos()[NGROUPS + HID_ZPA].integral());
    }

    #[test]
    fn tower_cuts() {
        let mut cfg = InterCalibConfig::default();
        cfg.tower_cut_zpc = Some([(0., 100.); 4]);
        let mut ic = InterCalib::new(cfg);
        assert!(!ic.cumulate(HID_ZPC, 50., 10., 10., 101., 10., 1.));
        assert!(ic.cumulate(HID_ZPC, 50., 10., 10., 100., 10., 1.));
        assert!(ic.cumulate(HID_ZPA, 50., 10., 10., 101., 10., 1.));
    }

    #[test]
    fn unknown_group() {
        let mut ic = InterCalib::new(InterCalibConfig::default());
        assert!(!ic.cumulate(NGROUPS, 1., 1., 1., 1., 1., 1.));
        assert!(matches!(ic.mini(NGROUPS), Err(ZdcError::UnknownGroup(5))));
    }

    #[test]
    fn creation_time_span() {
        let mut a = InterCalibData::default();
        a.set_creation_time(200);
        a.set_creation_time(100);
        let mut b = InterCalibData::default();
        b.set_creation_time(300);
        let mut c = InterCalibData::default();
        c += &a;
        c += &b;
        c += &InterCalibData::default();
        assert_eq!((100, 300), (c.ctime_beg, c.ctime_end));
    }

    fn tower_event(ev: &mut RecEvent, orbit: u32, bc: u16, towers: [f32; 4], zem: bool) {
        ev.add_bc_with(InteractionRecord::new(orbit, bc), 0x1, 0x1);
        ev.add_energy(ID_ZNAC, towers.iter().sum());
        for (i, &t) in towers.iter().enumerate() {
            ev.add_energy(ID_ZNA1 + i as u8, t);
        }
        ev.add_energy(ID_ZEM1, 100.);
        ev.add_energy(ID_ZEM2, 80.);
        if zem {
            ev.add_tdc(TDC_ZEM1, 0, 100);
            ev.add_tdc(TDC_ZEM2, 0, 80);
        }
    }

    #[test]
    fn process_selects_clean_events() {
        let mut ev = RecEvent::new();
        tower_event(&mut ev, 1, 10, [1., 2., 3., 4.], true);
        tower_event(&mut ev, 1, 11, [1., 2., 3., 4.], false);
        tower_event(&mut ev, 1, 12, [1., 2., 3., 4.], true);
        ev.add_info(ID_ZNA1, 1);
        ev.add_bc(InteractionRecord::new(1, 13));
        ev.add_energy(ID_ZNAC, 3.);
        ev.add_bc(InteractionRecord::new(1, 14));

        let mut ic = InterCalib::new(InterCalibConfig::default());
        let stats = ic.process(ev.flat());
        assert_eq!(
            ProcessStats {
                n_bc: 5,
                with_info: 1,
                untriggered: 1,
                no_zem: 2,
                used: 1
            },
            stats
        );
        assert_eq!(1., ic.data().entries(HID_ZNA));
        assert_eq!(100., ic.data().sum[HID_ZNA][0][0]);
        assert_eq!(0., ic.data().entries(HID_ZPA));
        assert_eq!(1., ic.data().entries(HID_ZEM));
        assert_eq!(100. * 80., ic.data().sum[HID_ZEM][0][1]);

        // The analog sum is missing: nothing for ZNA in cross-check mode
        let mut cfg = InterCalibConfig::default();
        cfg.cross_check = true;
        let mut ic = InterCalib::new(cfg);
        ic.process(ev.flat());
        assert_eq!(0., ic.data().entries(HID_ZNA));
        assert_eq!(1., ic.data().entries(HID_ZEM));
    }

    #[test]
    fn binned_input() {
        let mut ic = InterCalib::new(window(0., 100.));
        let bins = [
            SparseBin { x: [10., 1., 2., 3., 4., 1.], content: 3. },
            SparseBin { x: [10., 1., 2., 3., 4., 2.], content: 3. },
            SparseBin { x: [10., 1., 2., 3., 4., 1.2], content: 0. },
            SparseBin { x: [100., 1., 2., 3., 4., 0.9], content: 3. },
            SparseBin { x: [20., 2., 4., 6., 8., 1.1], content: 1. },
        ];
        assert_eq!(2, ic.process_binned("hZPC", &bins, 1).unwrap());
        assert_eq!(4., ic.data().entries(HID_ZPC));
        assert_eq!(3. * 100. + 400., ic.data().sum[HID_ZPC][0][0]);
        assert!(ic.process_binned("hZXX", &bins, 1).is_err());
        // The group is cleared on each call
        assert_eq!(2, ic.process_binned("hZPC", &bins, 1).unwrap());
        assert_eq!(4., ic.data().entries(HID_ZPC));
        assert_eq!([0., 0., 0., 4., 0.], ic.end_of_run());
    }

    #[test]
    fn binned_class_half_way() {
        let mut ic = InterCalib::new(window(0., 100.));
        let bins = [
            SparseBin { x: [10., 1., 2., 3., 4., 1.5], content: 1. },
            SparseBin { x: [10., 1., 2., 3., 4., 0.5], content: 2. },
            SparseBin { x: [10., 1., 2., 3., 4., 2.5], content: 4. },
            SparseBin { x: [10., 1., 2., 3., 4., -0.5], content: 8. },
        ];
        // Offsets of half a class round to the even neighbour, zero
        assert_eq!(2, ic.process_binned("hZNA", &bins, 1).unwrap());
        assert_eq!(3., ic.data().entries(HID_ZNA));
        assert_eq!(2, ic.process_binned("hZNA", &bins, 0).unwrap());
        assert_eq!(10., ic.data().entries(HID_ZNA));
    }

    #[test]
    fn clear_one_group() {
        let mut ic = InterCalib::new(InterCalibConfig::default());
        ic.cumulate(HID_ZNA, 1., 1., 1., 1., 1., 1.);
        ic.cumulate(HID_ZNC, 1., 1., 1., 1., 1., 1.);
        ic.clear(Some(HID_ZNA));
        assert_eq!(0., ic.data().entries(HID_ZNA));
        assert_eq!(1., ic.data().entries(HID_ZNC));
        ic.clear(None);
        assert_eq!(0., ic.data().entries(HID_ZNC));
        assert_eq!(0., ic.histos()[HID_ZNC].integral());
    }
}
