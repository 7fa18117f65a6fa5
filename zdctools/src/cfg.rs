//! Configuration objects: module map, simulation conditions and calibration
//! settings, declared in JSON files.
//!
//! ## Module map
//!
//! `ModuleConfig` lists for each of the eight modules which reconstructed
//! channel is connected to each of its four inputs, whether the input is read
//! out, and whether it contributes to the autotrigger. Only the connected
//! inputs need to be given:
//!
//! ```json
//! {"modules": [
//!     {"channel_id": [0, 1, 2, 3], "read_channel": [true, true, true, true],
//!      "trig_channel": [true, false, false, false]}
//! ]}
//! ```
//!
//! ## Simulation conditions
//!
//! `SimCondition` gives per reconstructed channel the average pedestal, its
//! slow fluctuation and the electronic noise, all in ADC counts.
//!
//! ## Inter-calibration
//!
//! `InterCalibConfig` holds the acceptance window of the reference signal of
//! each calorimeter group and the binning of the diagnostic histograms.

use itertools::Itertools;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::bit::module_mask;
use crate::intercalib::NGROUPS;
use crate::{Result, NCHANNELS, NCH_PER_MODULE, NMODULES};

/// Read a configuration object from a JSON file
pub fn from_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let file = File::open(path)?;
    let rdr = BufReader::new(file);
    Ok(serde_json::from_reader(rdr)?)
}

/// Inputs of one front-end module
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub channel_id: [u8; NCH_PER_MODULE],
    #[serde(default)]
    pub read_channel: [bool; NCH_PER_MODULE],
    #[serde(default)]
    pub trig_channel: [bool; NCH_PER_MODULE],
}

/// Module map of the front-end electronics
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ModuleConfig {
    #[serde(default, deserialize_with = "modules_up_to")]
    pub modules: [Module; NMODULES],
}

/// Up to `NMODULES` modules in order; the missing ones have nothing connected
fn modules_up_to<'de, D>(deserializer: D) -> std::result::Result<[Module; NMODULES], D::Error>
where
    D: Deserializer<'de>,
{
    let given = Vec::<Module>::deserialize(deserializer)?;
    if given.len() > NMODULES {
        return Err(de::Error::invalid_length(given.len(), &"at most 8 modules"));
    }
    let mut modules: [Module; NMODULES] = Default::default();
    for (m, g) in modules.iter_mut().zip(given) {
        *m = g;
    }
    Ok(modules)
}

impl ModuleConfig {
    /// Digitizer channels that contribute to the autotrigger
    pub fn trigger_mask(&self) -> u32 {
        let mut mask = 0;
        for (im, module) in self.modules.iter().enumerate() {
            for (ic, &t) in module.trig_channel.iter().enumerate() {
                if t {
                    mask |= 1 << (im * NCH_PER_MODULE + ic);
                }
            }
        }
        mask
    }

    /// Trigger mask in the form "0[T   ] 1[    ] ..."
    pub fn describe_trigger_mask(&self) -> String {
        let mask = self.trigger_mask();
        (0..NMODULES)
            .map(|im| {
                let m = (mask & module_mask(im)) >> (im * NCH_PER_MODULE);
                let chs: String = (0..NCH_PER_MODULE)
                    .map(|ic| if m >> ic & 1 == 1 { 'T' } else { ' ' })
                    .collect();
                format!("{}[{}]", im, chs)
            })
            .join(" ")
    }

    /// Module and input reading out channel `id`
    pub fn locate(&self, id: u8) -> Option<(usize, usize)> {
        for (im, module) in self.modules.iter().enumerate() {
            for ic in 0..NCH_PER_MODULE {
                if module.channel_id[ic] == id && module.read_channel[ic] {
                    return Some((im, ic));
                }
            }
        }
        None
    }

    /// Standard layout: every module reads out four consecutive channels and
    /// triggers on its first input. Useful for tests and simulation.
    pub fn standard() -> Self {
        let mut cfg = ModuleConfig::default();
        for (im, module) in cfg.modules.iter_mut().enumerate() {
            for ic in 0..NCH_PER_MODULE {
                let id = im * NCH_PER_MODULE + ic;
                if id < NCHANNELS {
                    module.channel_id[ic] = id as u8;
                    module.read_channel[ic] = true;
                }
            }
            module.trig_channel[0] = module.read_channel[0];
        }
        cfg
    }
}

/// Simulated baseline of one channel
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelSimCondition {
    /// Average pedestal
    pub pedestal: f64,
    /// Baseline oscillations
    #[serde(default)]
    pub pedestal_fluct: f64,
    /// Electronic noise
    #[serde(default)]
    pub pedestal_noise: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimCondition {
    pub channels: Vec<ChannelSimCondition>,
}

impl SimCondition {
    pub fn uniform(c: ChannelSimCondition) -> Self {
        SimCondition {
            channels: vec![c; NCHANNELS],
        }
    }

    pub fn channel(&self, id: u8) -> ChannelSimCondition {
        self.channels.get(id as usize).copied().unwrap_or_default()
    }
}

/// Options of the raw data conversion
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RawConfig {
    /// Continuous readout: also send data on autotrigger alone
    pub continuous: bool,
    /// Seed of the pedestal noise generator
    pub seed: Option<u64>,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            continuous: true,
            seed: None,
        }
    }
}

/// Acceptance windows and histogram binning of the inter-calibration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct InterCalibConfig {
    pub cut_low: [f64; NGROUPS],
    pub cut_high: [f64; NGROUPS],
    pub nb1: [usize; NGROUPS],
    pub amin1: [f64; NGROUPS],
    pub amax1: [f64; NGROUPS],
    pub nb2: [usize; NGROUPS],
    pub amin2: [f64; NGROUPS],
    pub amax2: [f64; NGROUPS],
    /// Use the analog sum instead of the common channel as reference
    pub cross_check: bool,
    /// Optional tower windows for the proton calorimeters, [low, high] per tower
    pub tower_cut_zpa: Option<[(f64, f64); 4]>,
    pub tower_cut_zpc: Option<[(f64, f64); 4]>,
}

impl Default for InterCalibConfig {
    fn default() -> Self {
        InterCalibConfig {
            cut_low: [f64::NEG_INFINITY; NGROUPS],
            cut_high: [f64::INFINITY; NGROUPS],
            nb1: [1000; NGROUPS],
            amin1: [0.; NGROUPS],
            amax1: [3000.; NGROUPS],
            nb2: [100; NGROUPS],
            amin2: [0.; NGROUPS],
            amax2: [3000.; NGROUPS],
            cross_check: false,
            tower_cut_zpa: None,
            tower_cut_zpc: None,
        }
    }
}

impl InterCalibConfig {
    pub fn set_cuts(&mut self, ih: usize, low: f64, high: f64) {
        self.cut_low[ih] = low;
        self.cut_high[ih] = high;
    }

    /// Reference value inside [low, high)
    pub fn accepts(&self, ih: usize, tc: f64) -> bool {
        tc >= self.cut_low[ih] && tc < self.cut_high[ih]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_trigger_mask() {
        let cfg = ModuleConfig::standard();
        assert_eq!(0x1111_1111 & !(0x1 << 28), cfg.trigger_mask() & 0x1111_1111);
        assert_eq!("0[T   ] 1[T   ]", &cfg.describe_trigger_mask()[..15]);
        assert_eq!(Some((1, 2)), cfg.locate(6));
        assert_eq!(Some((6, 1)), cfg.locate(25));
        assert_eq!(None, cfg.locate(26));
    }

    #[test]
    fn window_is_half_open() {
        let mut cfg = InterCalibConfig::default();
        cfg.set_cuts(0, 0., 10.);
        assert!(cfg.accepts(0, 0.));
        assert!(cfg.accepts(0, 9.999));
        assert!(!cfg.accepts(0, 10.));
        assert!(!cfg.accepts(0, -1e-9));
        assert!(cfg.accepts(1, 1e300));
    }

    #[test]
    fn sim_condition_defaults() {
        let s: SimCondition = serde_json::from_str(r#"{"channels": [{"pedestal": 1800.0}]}"#).unwrap();
        assert_eq!(1800., s.channel(0).pedestal);
        assert_eq!(0., s.channel(0).pedestal_noise);
        assert_eq!(ChannelSimCondition::default(), s.channel(12));
    }
}
