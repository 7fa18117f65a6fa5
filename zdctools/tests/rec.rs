use itertools::Itertools;
use rand::Rng;

use zdctools::bit::chans_to_flags;
use zdctools::rec::{InfoEntry, RecEvent};
use zdctools::{InteractionRecord, NCHANNELS};

mod common;

fn roundtrip(chs: &[u8], code: u16) {
    let mut ev = RecEvent::new();
    ev.add_bc(InteractionRecord::new(1, 1));
    ev.add_info_pattern(&chans_to_flags(chs), code);
    let e = ev.flat().next().unwrap();
    let expected: Vec<InfoEntry> = chs.iter().map(|&ch| InfoEntry { ch, code }).collect();
    assert_eq!(expected, e.decoded_info(), "{:?}", chs);
    let words = if chs.len() < 3 { chs.len() } else { 3 };
    assert_eq!(words, e.n_info());
}

/// Every set of up to three channels decodes to itself
#[test]
fn info_small_sets() {
    for k in 1..=3 {
        for chs in (0..NCHANNELS as u8).combinations(k) {
            roundtrip(&chs, 0x155);
        }
    }
}

#[test]
fn info_random_sets() {
    let mut rng = common::rng();
    for _ in 0..500 {
        let chs: Vec<u8> = (0..NCHANNELS as u8).filter(|_| rng.gen_bool(0.5)).collect();
        if chs.is_empty() {
            continue;
        }
        roundtrip(&chs, rng.gen_range(0..0x400));
    }
    roundtrip(&(0..NCHANNELS as u8).collect::<Vec<_>>(), 0x3ff);
}

/// Each bunch crossing sees only its own data
#[test]
fn flat_iteration() {
    let mut rng = common::rng();
    let ev = common::hadronic_events(50, [1., 1., 1., 1.], &mut rng);
    let shared = ev.clone().into_shared();
    let mut n = 0;
    for (a, b) in ev.flat().zip(shared.flat()) {
        assert_eq!(a.ir(), b.ir());
        assert_eq!(8, a.n_energy());
        assert_eq!(2, a.n_tdc());
        assert_eq!(0, a.n_info());
        assert_eq!(a.ezdc(zdctools::ID_ZEM2), b.ezdc(zdctools::ID_ZEM2));
        n += 1;
    }
    assert_eq!(50, n);
    assert_eq!(50, ev.len());
}
