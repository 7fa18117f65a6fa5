#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zdctools::cfg::{ChannelSimCondition, InterCalibConfig, ModuleConfig, RawConfig, SimCondition};
use zdctools::digit::{BcData, ChannelData, DigitFrame};
use zdctools::intercalib::{InterCalib, NGROUPS};
use zdctools::raw::{Digits2Raw, EmptyBunches};
use zdctools::rec::RecEvent;
use zdctools::*;

pub fn rng() -> StdRng {
    StdRng::seed_from_u64(0x2dc)
}

/// Converter with the standard module map and a flat pedestal
pub fn converter(continuous: bool, filled: &[u16]) -> Digits2Raw {
    let mut d2r = Digits2Raw::new(RawConfig {
        continuous,
        seed: None,
    });
    d2r.set_module_config(ModuleConfig::standard());
    d2r.set_sim_condition(SimCondition::uniform(ChannelSimCondition {
        pedestal: 1800.,
        pedestal_fluct: 2.,
        pedestal_noise: 1.5,
    }));
    d2r.set_empty_bunches(EmptyBunches::from_filled(filled.iter().copied()));
    d2r
}

/// Every bunch crossing of `orbit`, no triggers, no channel data
pub fn quiet_orbit(orbit: u32) -> DigitFrame {
    let mut frame = DigitFrame::default();
    for bc in 0..LHC_MAX_BUNCHES as u16 {
        frame.push(BcData::new(InteractionRecord::new(orbit, bc), 0, 0, 0, 0), &[]);
    }
    frame
}

/// Bunch crossing with a pulse in the given reconstructed channels
pub fn pulse(orbit: u32, bc: u16, triggers: u32, ids: &[u8]) -> (BcData, Vec<ChannelData>) {
    let mut data = [0i16; NTIME_BINS_PER_BC];
    for (i, s) in data.iter_mut().enumerate() {
        *s = -((i as i16 - 6).pow(2) * 10) + 300;
    }
    let chs = ids.iter().map(|&id| ChannelData::new(id, data)).collect();
    let mut bcd = BcData::new(InteractionRecord::new(orbit, bc), 0, 0, 0, triggers);
    bcd.channels = triggers;
    (bcd, chs)
}

/// Reconstructed hadronic events with reference = sum of c_i * tower_i
pub fn hadronic_events(n: usize, c: [f32; 4], rng: &mut impl Rng) -> RecEvent {
    let mut ev = RecEvent::new();
    for k in 0..n {
        let ir = InteractionRecord::new(1 + (k / 1000) as u32, (k % 1000) as u16);
        ev.add_bc_with(ir, 0x1, 0x1);
        let towers: Vec<f32> = (0..4).map(|_| rng.gen_range(5.0..50.0)).collect();
        let tc: f32 = towers.iter().zip(c.iter()).map(|(t, c)| t * c).sum();
        ev.add_energy(ID_ZNAC, tc);
        for (i, &t) in towers.iter().enumerate() {
            ev.add_energy(ID_ZNA1 + i as u8, t);
        }
        ev.add_energy(ID_ZNASUM, towers.iter().sum());
        let zem1: f32 = rng.gen_range(100.0..1000.0);
        ev.add_energy(ID_ZEM1, zem1);
        ev.add_energy(ID_ZEM2, 0.5 * zem1);
        ev.add_tdc(TDC_ZEM1, 1, 100);
        ev.add_tdc(TDC_ZEM2, -1, 50);
    }
    ev
}

pub fn intercalib() -> InterCalib {
    let mut cfg = InterCalibConfig::default();
    for ih in 0..NGROUPS {
        cfg.set_cuts(ih, 0., 10_000.);
    }
    InterCalib::new(cfg)
}
