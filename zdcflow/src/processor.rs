use anyhow::Result;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::thread::JoinHandle;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

use zdctools::cfg::InterCalibConfig;
use zdctools::digit::DigitFrame;
use zdctools::intercalib::{InterCalib, ProcessStats};
use zdctools::payload::ChannelPayload;
use zdctools::raw::Digits2Raw;
use zdctools::rec::RecEvent;

/// Converts time frames of digits into payloads on a dedicated thread.
/// Frames are handled in arrival order; the thread ends when either channel
/// is closed and returns the number of frames converted.
pub fn digits2raw<R: Rng + Send + 'static>(
    receiver: flume::Receiver<DigitFrame>,
    sender: flume::Sender<Vec<ChannelPayload>>,
    converter: Arc<Mutex<Digits2Raw>>,
    mut rng: R,
) -> JoinHandle<Result<usize>> {
    std::thread::spawn(move || {
        let mut n = 0;
        loop {
            match receiver.recv() {
                Ok(frame) => {
                    let payloads = converter.lock().process(&frame.bc, &frame.ch, &mut rng)?;
                    n += 1;
                    if sender.send(payloads).is_err() {
                        warn!("Payload receiver gone after {} frames", n);
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        Ok(n)
    })
}

/// Accumulates reconstructed time frames on `n_threads` threads pulling from
/// the same channel. Each thread owns an accumulator, returned when the
/// channel closes so the caller can merge them. Totals of the event
/// selection are kept in `stats`.
pub fn intercalib(
    receiver: flume::Receiver<RecEvent>,
    cfg: &InterCalibConfig,
    n_threads: usize,
    stats: Arc<Mutex<ProcessStats>>,
) -> Vec<JoinHandle<InterCalib>> {
    (0..n_threads.max(1))
        .map(|iw| {
            let receiver = receiver.clone();
            let stats = stats.clone();
            let mut ic = InterCalib::new(cfg.clone());
            std::thread::spawn(move || {
                while let Ok(ev) = receiver.recv() {
                    let s = ic.process(ev.flat());
                    *stats.lock() += s;
                }
                debug!("Worker {} done", iw);
                ic
            })
        })
        .collect()
}

/// Join the accumulators of `intercalib` into one
pub fn merge(handles: Vec<JoinHandle<InterCalib>>, cfg: &InterCalibConfig) -> Result<InterCalib> {
    let mut total = InterCalib::new(cfg.clone());
    for h in handles {
        let ic = h
            .join()
            .map_err(|_| anyhow::anyhow!("inter-calibration worker panicked"))?;
        total.merge(&ic)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use zdctools::cfg::{ModuleConfig, RawConfig, SimCondition};
    use zdctools::digit::BcData;
    use zdctools::intercalib::HID_ZEM;
    use zdctools::raw::EmptyBunches;
    use zdctools::{InteractionRecord, ID_ZEM1, ID_ZEM2, LAST_BC, TDC_ZEM1, TDC_ZEM2};

    #[test]
    fn frames_keep_their_order() {
        let mut d2r = Digits2Raw::new(RawConfig {
            continuous: false,
            seed: None,
        });
        d2r.set_module_config(ModuleConfig::standard());
        d2r.set_sim_condition(SimCondition { channels: vec![] });
        d2r.set_empty_bunches(EmptyBunches::from_filled([]));
        let converter = Arc::new(Mutex::new(d2r));

        let (tx_frames, rx_frames) = flume::bounded(2);
        let (tx_out, rx_out) = flume::unbounded();
        let handle = digits2raw(rx_frames, tx_out, converter.clone(), StdRng::seed_from_u64(3));
        for orbit in 1..=5 {
            let mut frame = DigitFrame::default();
            frame.push(BcData::new(InteractionRecord::new(orbit, LAST_BC), 0, 0, 0, 0), &[]);
            tx_frames.send(frame).unwrap();
        }
        drop(tx_frames);

        let orbits: Vec<u32> = rx_out.iter().map(|p: Vec<ChannelPayload>| p[0].decode().orbit).collect();
        assert_eq!(vec![1, 2, 3, 4, 5], orbits);
        assert_eq!(5, handle.join().unwrap().unwrap());
    }

    #[test]
    fn missing_configuration_stops_the_thread() {
        let converter = Arc::new(Mutex::new(Digits2Raw::new(RawConfig::default())));
        let (tx_frames, rx_frames) = flume::unbounded();
        let (tx_out, _rx_out) = flume::unbounded();
        let handle = digits2raw(rx_frames, tx_out, converter, StdRng::seed_from_u64(3));
        tx_frames.send(DigitFrame::default()).unwrap();
        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn threads_share_the_frames() {
        let mut cfg = InterCalibConfig::default();
        cfg.set_cuts(HID_ZEM, 0., 1000.);
        let stats = Arc::new(Mutex::new(ProcessStats::default()));
        let (tx, rx) = flume::unbounded();
        let handles = intercalib(rx, &cfg, 3, stats.clone());
        for orbit in 0..10 {
            let mut ev = RecEvent::new();
            for bc in 0..10 {
                ev.add_bc_with(InteractionRecord::new(orbit, bc), 0x1, 0x1);
                ev.add_energy(ID_ZEM1, 100. + bc as f32);
                ev.add_energy(ID_ZEM2, 50. + bc as f32 / 2.);
                ev.add_tdc(TDC_ZEM1, 0, 10);
                ev.add_tdc(TDC_ZEM2, 0, 10);
            }
            tx.send(ev).unwrap();
        }
        drop(tx);
        let mut total = merge(handles, &cfg).unwrap();
        assert_eq!(100, stats.lock().used);
        assert_eq!(100., total.data().entries(HID_ZEM));
        let res = total.mini(HID_ZEM).unwrap();
        assert!((res.par[1] - 2.).abs() < 1e-6);
    }
}
