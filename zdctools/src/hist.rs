//! Fixed binning histograms backed by a flat vector, cheap to merge and to
//! send between workers

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

use crate::{Result, ZdcError};

/// Equal-width bins over `[xmin, xmax)`; values outside are dropped
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlatHisto1D {
    pub nbins: usize,
    pub xmin: f64,
    pub xmax: f64,
    pub data: Vec<f64>,
}

#[inline]
fn bin_of(x: f64, n: usize, min: f64, max: f64) -> Option<usize> {
    if !(x >= min && x < max) {
        return None;
    }
    let ib = ((x - min) / (max - min) * n as f64) as usize;
    Some(ib.min(n - 1))
}

impl FlatHisto1D {
    pub fn new(nbins: usize, xmin: f64, xmax: f64) -> Self {
        FlatHisto1D {
            nbins,
            xmin,
            xmax,
            data: vec![0.; nbins],
        }
    }

    pub fn bin_width(&self) -> f64 {
        (self.xmax - self.xmin) / self.nbins as f64
    }

    pub fn bin_center(&self, ib: usize) -> f64 {
        self.xmin + (ib as f64 + 0.5) * self.bin_width()
    }

    pub fn bin(&self, x: f64) -> Option<usize> {
        if self.nbins == 0 {
            return None;
        }
        bin_of(x, self.nbins, self.xmin, self.xmax)
    }

    /// Add `w` to the bin of `x`; false if `x` is out of range
    pub fn fill(&mut self, x: f64, w: f64) -> bool {
        match self.bin(x) {
            Some(ib) => {
                self.data[ib] += w;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.);
    }

    pub fn integral(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn same_binning(&self, other: &FlatHisto1D) -> bool {
        self.nbins == other.nbins && self.xmin == other.xmin && self.xmax == other.xmax
    }

    pub fn merge(&mut self, other: &FlatHisto1D) -> Result<()> {
        if !self.same_binning(other) {
            return Err(ZdcError::BinningMismatch(format!(
                "{}:[{},{}) vs {}:[{},{})",
                self.nbins, self.xmin, self.xmax, other.nbins, other.xmin, other.xmax
            )));
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }
}

/// Two dimensional histogram, x major
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlatHisto2D {
    pub nx: usize,
    pub xmin: f64,
    pub xmax: f64,
    pub ny: usize,
    pub ymin: f64,
    pub ymax: f64,
    pub data: Vec<f64>,
}

impl FlatHisto2D {
    pub fn new(nx: usize, xmin: f64, xmax: f64, ny: usize, ymin: f64, ymax: f64) -> Self {
        FlatHisto2D {
            nx,
            xmin,
            xmax,
            ny,
            ymin,
            ymax,
            data: vec![0.; nx * ny],
        }
    }

    pub fn bin(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if self.nx == 0 || self.ny == 0 {
            return None;
        }
        Some((
            bin_of(x, self.nx, self.xmin, self.xmax)?,
            bin_of(y, self.ny, self.ymin, self.ymax)?,
        ))
    }

    pub fn bin_center(&self, ix: usize, iy: usize) -> (f64, f64) {
        let wx = (self.xmax - self.xmin) / self.nx as f64;
        let wy = (self.ymax - self.ymin) / self.ny as f64;
        (self.xmin + (ix as f64 + 0.5) * wx, self.ymin + (iy as f64 + 0.5) * wy)
    }

    pub fn get(&self, ix: usize, iy: usize) -> f64 {
        self.data[ix * self.ny + iy]
    }

    pub fn fill(&mut self, x: f64, y: f64, w: f64) -> bool {
        match self.bin(x, y) {
            Some((ix, iy)) => {
                self.data[ix * self.ny + iy] += w;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.);
    }

    pub fn integral(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn same_binning(&self, other: &FlatHisto2D) -> bool {
        self.nx == other.nx
            && self.xmin == other.xmin
            && self.xmax == other.xmax
            && self.ny == other.ny
            && self.ymin == other.ymin
            && self.ymax == other.ymax
    }

    pub fn merge(&mut self, other: &FlatHisto2D) -> Result<()> {
        if !self.same_binning(other) {
            return Err(ZdcError::BinningMismatch(format!(
                "{}x{} vs {}x{}",
                self.nx, self.ny, other.nx, other.ny
            )));
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }
}

impl AddAssign<&FlatHisto1D> for FlatHisto1D {
    /// Panics on a binning mismatch, use `merge` to handle it
    fn add_assign(&mut self, other: &FlatHisto1D) {
        assert!(self.same_binning(other), "histogram binning mismatch");
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }
}

impl AddAssign<&FlatHisto2D> for FlatHisto2D {
    /// Panics on a binning mismatch, use `merge` to handle it
    fn add_assign(&mut self, other: &FlatHisto2D) {
        assert!(self.same_binning(other), "histogram binning mismatch");
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }
}
