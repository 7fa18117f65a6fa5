//! Bounded least squares fit of the relative calibration coefficients
//!
//! The objective is the quadratic form `chi = s^T A s` with
//! `s = (p0, -p1, ..., -p5)` and `A` the symmetrised second-moment matrix of
//! `(tc, t1, t2, t3, t4, 1)`. Minimizing it finds the coefficients that best
//! reproduce the reference signal as a weighted sum of the towers.
//!
//! Parameters have a start value, a step and bounds. A zero step fixes the
//! parameter at its start value. The remaining parameters are found with an
//! active set method: the free block is solved exactly, parameters outside
//! their bounds are clamped, and clamped parameters whose gradient points
//! back inside are released again.

use nalgebra::{DMatrix, DVector};
use parking_lot::{const_mutex, Mutex};

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Number of fit parameters: reference, four towers, offset
pub const NPAR: usize = 6;

const MAX_ITERATIONS: usize = 50;
const SVD_EPS: f64 = 1e-12;
/// Relative gradient below which a clamped parameter stays clamped
const GRAD_TOL: f64 = 1e-10;

/// One fit runs at a time across the process
static FIT_LOCK: Mutex<()> = const_mutex(());

/// Symmetric matrix read by the objective function
#[derive(Clone, Debug, PartialEq)]
pub struct FitContext {
    pub add: [[f64; NPAR]; NPAR],
}

impl FitContext {
    /// Symmetrise an upper triangular accumulation
    pub fn from_upper(sum: &[[f64; NPAR]; NPAR]) -> Self {
        let mut add = [[0.; NPAR]; NPAR];
        for i in 0..NPAR {
            for j in 0..NPAR {
                add[i][j] = if j < i { sum[j][i] } else { sum[i][j] };
            }
        }
        FitContext { add }
    }

    #[inline]
    fn sign(i: usize) -> f64 {
        if i == 0 {
            1.
        } else {
            -1.
        }
    }

    /// Matrix of the form in the parameters themselves
    fn signed(&self, i: usize, j: usize) -> f64 {
        FitContext::sign(i) * FitContext::sign(j) * self.add[i][j]
    }

    pub fn chi(&self, par: &[f64; NPAR]) -> f64 {
        let mut chi = 0.;
        for i in 0..NPAR {
            for j in 0..NPAR {
                chi += self.signed(i, j) * par[i] * par[j];
            }
        }
        chi
    }

    /// d chi / d p_i
    fn gradient(&self, par: &[f64; NPAR], i: usize) -> f64 {
        2. * (0..NPAR).map(|j| self.signed(i, j) * par[j]).sum::<f64>()
    }
}

/// Start value, step and limits of one parameter
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamSpec {
    pub start: f64,
    pub step: f64,
    pub low: f64,
    pub high: f64,
}

impl ParamSpec {
    pub const fn new(start: f64, step: f64, low: f64, high: f64) -> Self {
        ParamSpec {
            start,
            step,
            low,
            high,
        }
    }

    pub const fn fixed(value: f64) -> Self {
        ParamSpec::new(value, 0., value, value)
    }

    pub fn is_fixed(&self) -> bool {
        self.step == 0.
    }
}

/// Parameter setup of a calorimeter group. With `two_channels` only the
/// first tower is fitted and the others are pinned to zero.
pub fn group_params(two_channels: bool) -> [ParamSpec; NPAR] {
    let tower = ParamSpec::new(1., 0.1, 0.2, 5.);
    let unused = if two_channels { ParamSpec::fixed(0.) } else { tower };
    [
        ParamSpec::fixed(1.),
        tower,
        unused,
        unused,
        unused,
        // Offset: allowed range [-20, 20], not fitted
        ParamSpec::new(0., 0., -20., 20.),
    ]
}

/// Outcome of one minimization
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitOutput {
    pub par: [f64; NPAR],
    pub err: [f64; NPAR],
    pub chi: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Fixed,
    Free,
    AtLow,
    AtHigh,
}

fn solve(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    a.clone()
        .lu()
        .solve(b)
        .or_else(|| a.svd(true, true).solve(b, SVD_EPS).ok())
}

/// Minimize `ctx` under the bounds of `params`, holding the fit lock
pub fn minimize(ctx: &FitContext, params: &[ParamSpec; NPAR]) -> FitOutput {
    let _guard = FIT_LOCK.lock();
    minimize_unlocked(ctx, params)
}

fn minimize_unlocked(ctx: &FitContext, params: &[ParamSpec; NPAR]) -> FitOutput {
    let mut par = [0.; NPAR];
    let mut state = [State::Free; NPAR];
    for i in 0..NPAR {
        par[i] = params[i].start;
        if params[i].is_fixed() {
            state[i] = State::Fixed;
        }
    }

    let mut out = FitOutput::default();
    for it in 1..=MAX_ITERATIONS {
        out.iterations = it;
        let free: Vec<usize> = (0..NPAR).filter(|&i| state[i] == State::Free).collect();
        if !free.is_empty() {
            let a = DMatrix::from_fn(free.len(), free.len(), |r, c| ctx.signed(free[r], free[c]));
            let b = DVector::from_fn(free.len(), |r, _| {
                -(0..NPAR)
                    .filter(|&j| state[j] != State::Free)
                    .map(|j| ctx.signed(free[r], j) * par[j])
                    .sum::<f64>()
            });
            match solve(a, &b) {
                Some(x) => {
                    for (r, &i) in free.iter().enumerate() {
                        par[i] = x[r];
                    }
                }
                None => {
                    warn!("Singular fit matrix, keeping current parameters");
                    break;
                }
            }
        }

        // Clamp parameters that left their limits
        let mut clamped = false;
        for &i in &free {
            let p = &params[i];
            if par[i].is_nan() || par[i] < p.low {
                par[i] = p.low;
                state[i] = State::AtLow;
                clamped = true;
            } else if par[i] > p.high {
                par[i] = p.high;
                state[i] = State::AtHigh;
                clamped = true;
            }
        }
        if clamped {
            continue;
        }

        // Release the clamped parameter pulling hardest towards the inside
        let tol = GRAD_TOL * (1. + ctx.add[0][0].abs());
        let mut release: Option<(usize, f64)> = None;
        for i in 0..NPAR {
            let g = ctx.gradient(&par, i);
            let pull = match state[i] {
                State::AtLow if g < -tol => -g,
                State::AtHigh if g > tol => g,
                _ => continue,
            };
            if release.map_or(true, |(_, best)| pull > best) {
                release = Some((i, pull));
            }
        }
        match release {
            Some((i, _)) => state[i] = State::Free,
            None => {
                out.converged = true;
                break;
            }
        }
    }

    let free: Vec<usize> = (0..NPAR).filter(|&i| state[i] == State::Free).collect();
    if !free.is_empty() {
        let a = DMatrix::from_fn(free.len(), free.len(), |r, c| ctx.signed(free[r], free[c]));
        let cov = a.clone().try_inverse().or_else(|| a.pseudo_inverse(SVD_EPS).ok());
        if let Some(cov) = cov {
            for (r, &i) in free.iter().enumerate() {
                out.err[i] = cov[(r, r)].max(0.).sqrt();
            }
        }
    }
    out.par = par;
    out.chi = ctx.chi(&par);
    if !out.converged {
        warn!("Fit did not converge after {} iterations", out.iterations);
    }
    debug!("chi={} par={:?} err={:?}", out.chi, out.par, out.err);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Upper triangular moments of events with tc = sum(c_i t_i) + noise
    fn moments(c: [f64; 4], noise: f64, n: usize) -> [[f64; NPAR]; NPAR] {
        let mut sum = [[0.; NPAR]; NPAR];
        for k in 0..n {
            let x = k as f64;
            let t = [
                10. + (x * 0.37).sin() * 5.,
                20. + (x * 1.13).cos() * 7.,
                15. + (x * 0.71).sin() * 3.,
                5. + (x * 2.03).cos() * 4.,
            ];
            let tc = c.iter().zip(t.iter()).map(|(a, b)| a * b).sum::<f64>() + noise * (x * 3.7).sin();
            let v = [tc, t[0], t[1], t[2], t[3], 1.];
            for i in 0..NPAR {
                for j in i..NPAR {
                    sum[i][j] += v[i] * v[j];
                }
            }
        }
        sum
    }

    #[test]
    fn symmetrise() {
        let mut sum = [[0.; NPAR]; NPAR];
        sum[1][3] = 2.;
        sum[0][0] = 1.;
        let ctx = FitContext::from_upper(&sum);
        assert_eq!(2., ctx.add[3][1]);
        assert_eq!(2., ctx.add[1][3]);
        // (p0 - p1 t...)^2 form: cross terms enter with the sign of s
        let mut par = [0.; NPAR];
        par[0] = 1.;
        par[1] = 1.;
        par[3] = 1.;
        assert_eq!(1. + 2. * 2., ctx.chi(&par));
    }

    #[test]
    fn recovers_coefficients() {
        let c = [1.2, 0.8, 1.0, 2.0];
        let ctx = FitContext::from_upper(&moments(c, 0., 200));
        let out = minimize(&ctx, &group_params(false));
        assert!(out.converged);
        assert_eq!(1., out.par[0]);
        assert_eq!(0., out.par[5]);
        for i in 0..4 {
            assert!((out.par[i + 1] - c[i]).abs() < 1e-6, "{:?}", out.par);
        }
        assert!(out.chi.abs() < 1e-6);
        assert_eq!(0., out.err[0]);
        assert!(out.err[1] > 0.);
    }

    #[test]
    fn clamps_to_bounds() {
        let c = [9.0, 0.1, 1.0, 1.0];
        let ctx = FitContext::from_upper(&moments(c, 0.5, 300));
        let out = minimize(&ctx, &group_params(false));
        assert!(out.converged);
        assert_eq!(5., out.par[1]);
        assert_eq!(0., out.err[1]);
        for p in &out.par[1..5] {
            assert!((0.2..=5.).contains(p));
        }
        // Any feasible move from the optimum increases chi
        for i in 1..5 {
            for d in [-1e-3, 1e-3] {
                let mut q = out.par;
                q[i] = (q[i] + d).clamp(0.2, 5.);
                assert!(ctx.chi(&q) >= out.chi - 1e-9);
            }
        }
    }

    #[test]
    fn two_channel_group() {
        let ctx = FitContext::from_upper(&moments([1.5, 0., 0., 0.], 0., 100));
        let out = minimize(&ctx, &group_params(true));
        assert!((out.par[1] - 1.5).abs() < 1e-9);
        assert_eq!([0., 0., 0.], [out.par[2], out.par[3], out.par[4]]);
        assert_eq!([0., 0., 0.], [out.err[2], out.err[3], out.err[4]]);
    }

    #[test]
    fn empty_matrix_keeps_start() {
        let ctx = FitContext::from_upper(&[[0.; NPAR]; NPAR]);
        let out = minimize(&ctx, &group_params(false));
        assert_eq!(0., out.chi);
        for p in &out.par[1..5] {
            assert!((0.2..=5.).contains(p));
        }
    }
}
