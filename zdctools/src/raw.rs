//! Conversion of digitized bunch crossings into the raw channel payloads sent
//! by the front-end modules
//!
//! Bunch crossings are processed strictly in order: scalers and pedestals
//! carry state from one bunch crossing to the next and are reset at every
//! orbit change. For each bunch crossing the autotrigger bits of the module
//! are computed from the current bunch, up to three following bunches and
//! the previous one. A module sends its channels when the external trigger
//! conditions are met, when running in continuous mode and the module
//! autotriggered in this or the next bunch, and always in the last bunch of
//! the orbit.

use rand::Rng;
use rand_distr::{Distribution, Normal};

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use crate::bit::{module_mask, BitOps};
use crate::cfg::{ModuleConfig, RawConfig, SimCondition};
use crate::digit::{BcData, ChannelData};
use crate::payload::{ChannelPayload, PayloadFields};
use crate::{Result, ZdcError, LAST_BC, LHC_MAX_BUNCHES, NCH_PER_MODULE, NMODULES};

/// Bunch crossings looked ahead for autotrigger and external trigger bits
pub const LOOK_AHEAD: i64 = 3;

/// Cumulative number of clean empty bunches along the orbit
///
/// A bunch is clean when neither it nor the neighbours that can leave signal
/// in the calorimeter are filled.
#[derive(Clone, Debug, PartialEq)]
pub struct EmptyBunches {
    counts: Vec<u32>,
    n_empty: u32,
}

impl EmptyBunches {
    pub fn from_pattern(pattern: &[bool; LHC_MAX_BUNCHES]) -> Self {
        let max = LHC_MAX_BUNCHES;
        let mut counts = vec![0; max];
        let mut n_empty = 0;
        for ib in 0..max {
            // Beam gas from the back of the calorimeter
            let mb = (ib + 31) % max;
            let m1 = (ib + 1) % max;
            let cb = ib;
            let p1 = (ib + max - 1) % max;
            // p2 and p3 coincide with m1
            let p2 = (ib + 1) % max;
            let p3 = (ib + 1) % max;
            if !(pattern[mb] || pattern[m1] || pattern[cb] || pattern[p1] || pattern[p2] || pattern[p3]) {
                n_empty += 1;
            }
            counts[ib] = n_empty;
        }
        info!("There are {} clean empty bunches", n_empty);
        EmptyBunches { counts, n_empty }
    }

    /// Map from the list of filled bunch crossings
    pub fn from_filled(filled: impl IntoIterator<Item = u16>) -> Self {
        let mut pattern = [false; LHC_MAX_BUNCHES];
        for bc in filled {
            if let Some(p) = pattern.get_mut(bc as usize) {
                *p = true;
            } else {
                warn!("Ignoring filled bunch {} outside the orbit", bc);
            }
        }
        EmptyBunches::from_pattern(&pattern)
    }

    /// Clean empty bunches seen up to and including `bc`
    pub fn count(&self, bc: u16) -> u32 {
        self.counts.get(bc as usize).copied().unwrap_or(0)
    }

    /// Clean empty bunches in the whole orbit
    pub fn n_empty(&self) -> u32 {
        self.n_empty
    }
}

/// Running baseline of every module input
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PedestalState {
    pub sum: [[f64; NCH_PER_MODULE]; NMODULES],
    /// Pedestal in payload units (x8, offset by 32768)
    pub ped: [[u16; NCH_PER_MODULE]; NMODULES],
}

impl PedestalState {
    pub fn reset(&mut self) {
        *self = PedestalState::default();
    }
}

/// Fixed point pedestal as sent in the payload, clamped to 16 bits
pub fn pedestal_offset(sum: f64, n_empty: u32) -> u16 {
    let v = (8. * sum / n_empty as f64 / 12. + 32768.).round_ties_even();
    if v.is_nan() {
        return 0;
    }
    v.clamp(0., u16::MAX as f64) as u16
}

/// Normal draw tolerating a zero or invalid width
fn gaus<R: Rng + ?Sized>(rng: &mut R, mean: f64, sigma: f64) -> f64 {
    match Normal::new(mean, sigma) {
        Ok(d) if sigma > 0. => d.sample(rng),
        _ => mean,
    }
}

/// Trigger words seen from one bunch crossing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerWindow {
    /// Autotrigger of the previous bunch crossing
    pub m: u32,
    /// Autotriggers of the current and the next three bunch crossings
    pub t: [u32; 4],
    /// External triggers of the current and the next three bunch crossings
    pub alice: [bool; 4],
}

impl TriggerWindow {
    /// Collect the triggers around `bcs[ibc]`. Only neighbours at the exact
    /// distance count, across an orbit boundary too.
    pub fn collect(bcs: &[BcData], ibc: usize) -> Self {
        let cur = &bcs[ibc];
        let mut w = TriggerWindow::default();
        w.t[0] = cur.triggers;
        w.alice[0] = cur.ext_triggers;
        for peek in bcs.iter().skip(ibc + 1).take(LOOK_AHEAD as usize) {
            let d = peek.ir.difference(cur.ir);
            if d > LOOK_AHEAD {
                break;
            }
            if d >= 1 {
                w.t[d as usize] = peek.triggers;
                w.alice[d as usize] |= peek.ext_triggers;
            }
        }
        if let Some(prev) = ibc.checked_sub(1).map(|i| &bcs[i]) {
            if cur.ir.difference(prev.ir) == 1 {
                w.m = prev.triggers;
            }
        }
        w
    }
}

/// Payload fields of every module input for one bunch crossing
pub type ModuleFrame = [[PayloadFields; NCH_PER_MODULE]; NMODULES];

/// Digits to raw payload converter
#[derive(Debug)]
pub struct Digits2Raw {
    cfg: RawConfig,
    module_config: Option<ModuleConfig>,
    sim_condition: Option<SimCondition>,
    empty: Option<EmptyBunches>,
    trigger_mask: u32,
    state: ConversionState,
}

#[derive(Clone, Debug, Default)]
struct ConversionState {
    scalers: [[u32; NCH_PER_MODULE]; NMODULES],
    ped: PedestalState,
    last_orbit: Option<u32>,
    last_n_empty: u32,
}

impl Digits2Raw {
    pub fn new(cfg: RawConfig) -> Self {
        Digits2Raw {
            cfg,
            module_config: None,
            sim_condition: None,
            empty: None,
            trigger_mask: 0,
            state: ConversionState::default(),
        }
    }

    pub fn set_module_config(&mut self, mc: ModuleConfig) {
        self.trigger_mask = mc.trigger_mask();
        info!("trigger_mask={:#010x} {}", self.trigger_mask, mc.describe_trigger_mask());
        self.module_config = Some(mc);
    }

    pub fn set_sim_condition(&mut self, sc: SimCondition) {
        self.sim_condition = Some(sc);
    }

    pub fn set_empty_bunches(&mut self, eb: EmptyBunches) {
        self.empty = Some(eb);
    }

    pub fn set_continuous(&mut self, continuous: bool) {
        self.cfg.continuous = continuous;
    }

    pub fn trigger_mask(&self) -> u32 {
        self.trigger_mask
    }

    /// Hit scalers of the current orbit
    pub fn scalers(&self) -> &[[u32; NCH_PER_MODULE]; NMODULES] {
        &self.state.scalers
    }

    pub fn pedestals(&self) -> &PedestalState {
        &self.state.ped
    }

    /// Convert the bunch crossings of one time frame and return the payloads
    /// that are transmitted, in order of bunch crossing, module and channel.
    pub fn process<R: Rng + ?Sized>(
        &mut self,
        bcs: &[BcData],
        chs: &[ChannelData],
        rng: &mut R,
    ) -> Result<Vec<ChannelPayload>> {
        let Digits2Raw {
            cfg,
            module_config,
            sim_condition,
            empty,
            trigger_mask,
            state,
        } = self;
        let mc = module_config.as_ref().ok_or_else(|| {
            error!("Missing ModuleConfig configuration object");
            ZdcError::MissingModuleConfig
        })?;
        let sc = sim_condition.as_ref().ok_or_else(|| {
            error!("Missing SimCondition configuration object");
            ZdcError::MissingSimCondition
        })?;
        let eb = empty.as_ref().ok_or_else(|| {
            error!("Bunch crossing map is not initialized");
            ZdcError::EmptyBunchesUninitialized
        })?;
        if eb.n_empty() == 0 {
            warn!("Bunch crossing map has zero clean empty bunches");
        }

        let mut out = Vec::new();
        for ibc in 0..bcs.len() {
            let frame = state.convert_digits(mc, sc, eb, *trigger_mask, bcs, chs, ibc, rng);
            write_digits(mc, cfg.continuous, &frame, &mut out);
        }
        debug!("{} bunch crossings, {} payloads", bcs.len(), out.len());
        Ok(out)
    }
}

impl ConversionState {
    fn update_pedestals<R: Rng + ?Sized>(&mut self, mc: &ModuleConfig, sc: &SimCondition, n: u32, rng: &mut R) {
        let deltan = n as f64 - self.last_n_empty as f64;
        for (im, module) in mc.modules.iter().enumerate() {
            for ic in 0..NCH_PER_MODULE {
                let c = sc.channel(module.channel_id[ic]);
                // One baseline fluctuation every two bunch crossings
                let sum = &mut self.ped.sum[im][ic];
                *sum += 12. * deltan * gaus(rng, c.pedestal, c.pedestal_fluct * (deltan / 2.).sqrt());
                *sum += 12. * deltan * gaus(rng, 0., c.pedestal_noise * (12. * deltan).sqrt());
                self.ped.ped[im][ic] = pedestal_offset(*sum, n);
            }
        }
        self.last_n_empty = n;
    }

    #[allow(clippy::too_many_arguments)]
    fn convert_digits<R: Rng + ?Sized>(
        &mut self,
        mc: &ModuleConfig,
        sc: &SimCondition,
        eb: &EmptyBunches,
        trigger_mask: u32,
        bcs: &[BcData],
        chs: &[ChannelData],
        ibc: usize,
        rng: &mut R,
    ) -> ModuleFrame {
        let bcd = &bcs[ibc];
        let bc = bcd.ir.bc;
        let orbit = bcd.ir.orbit;

        if self.last_orbit != Some(orbit) {
            self.scalers = Default::default();
            self.ped.reset();
            self.last_orbit = Some(orbit);
            self.last_n_empty = 0;
        }

        let n = eb.count(bc);
        if n > 0 && n != self.last_n_empty {
            self.update_pedestals(mc, sc, n, rng);
        }

        let mut frame = ModuleFrame::default();
        for (im, module) in frame.iter_mut().enumerate() {
            for (ic, f) in module.iter_mut().enumerate() {
                f.board = im as u8;
                f.ch = ic as u8;
                f.orbit = orbit;
                f.bc = bc;
                if bcd.triggers.check(im * NCH_PER_MODULE + ic) {
                    self.scalers[im][ic] += 1;
                    f.hit = true;
                }
                f.hits = (self.scalers[im][ic] & 0xfff) as u16;
                f.offset = self.ped.ped[im][ic];
            }
        }

        let w = TriggerWindow::collect(bcs, ibc);
        for (im, module) in frame.iter_mut().enumerate() {
            let tmask = module_mask(im) & trigger_mask;
            for f in module.iter_mut() {
                f.alice = w.alice;
                f.auto_m = w.m & tmask != 0;
                for (d, &t) in w.t.iter().enumerate() {
                    f.auto[d] = t & tmask != 0;
                }
            }
        }

        debug!("{}", bcd.describe(trigger_mask));
        for chd in bcd.channel_data(chs) {
            for (im, module) in mc.modules.iter().enumerate() {
                if let Some(ic) = (0..NCH_PER_MODULE)
                    .find(|&ic| module.channel_id[ic] == chd.id && module.read_channel[ic])
                {
                    frame[im][ic].samples = chd.data;
                }
            }
        }
        frame
    }
}

/// Whether module `f` (any of its inputs) is sent
pub fn module_is_sent(f: &PayloadFields, continuous: bool) -> bool {
    let [t0, t1, _, _] = f.auto;
    let [a0, a1, a2, a3] = f.alice;
    let tcond_continuous = t0 || t1;
    let tcond_triggered = a0 || a1 || (a2 && (t0 || f.auto_m)) || (a3 && t0);
    let tcond_last = f.bc == LAST_BC;
    tcond_triggered || (continuous && tcond_continuous) || tcond_last
}

fn write_digits(mc: &ModuleConfig, continuous: bool, frame: &ModuleFrame, out: &mut Vec<ChannelPayload>) {
    for (im, module) in frame.iter().enumerate() {
        // Trigger bits are the same for all the inputs of a module
        if !module_is_sent(&module[0], continuous) {
            continue;
        }
        for (ic, f) in module.iter().enumerate() {
            if mc.modules[im].read_channel[ic] {
                out.push(ChannelPayload::encode(f));
            }
        }
    }
}
