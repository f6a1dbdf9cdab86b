//! # DESI spectra
//!
//! The redshift pipeline never looks at spectra; the exporters do. This module holds the
//! minimal spectrum model they need:
//!
//! - [`Spectrum`] – one spectrum (wavelength, flux, inverse variance) on a single grid,
//! - [`CameraSpectra`] – the per-camera (`b`, `r`, `z`) spectra of one target, as stored in a
//!   DESI coadd file, and their combination into a single `brz` spectrum,
//! - [`SpectrumReader`] – the seam through which coadd files are read (FITS decoding lives
//!   outside this crate),
//! - [`coadd_path`] – the mapping from the redshift file recorded in the database to the
//!   coadd file holding the spectra,
//! - [`write_ascii`] – the plain-text `lambda flux dflux` format of the exported spectra.
use std::{
    collections::BTreeMap,
    fmt,
    io::{BufWriter, Write},
    sync::LazyLock,
};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::{constants::TargetId, mosthosts_errors::MostHostsError};

static REDSHIFT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)/(zbest|redrock)(-[0-9]-[0-9]{1,6}-thru[0-9]{8}\.fits)$")
        .expect("valid redshift file regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    ivar: Vec<f64>,
}

impl Spectrum {
    /// Build a spectrum.
    ///
    /// Arguments
    /// ---------
    /// * `wavelength`: strictly increasing wavelengths, in Ångström
    /// * `flux`: flux density at each wavelength
    /// * `ivar`: inverse variance of the flux; non-positive means "no information"
    ///
    /// Return
    /// ------
    /// * the spectrum, or [`MostHostsError::InvalidSpectrum`] if the arrays are empty, of
    ///   different lengths, or the wavelengths are not increasing
    pub fn new(wavelength: Vec<f64>, flux: Vec<f64>, ivar: Vec<f64>) -> Result<Self, MostHostsError> {
        if wavelength.is_empty() {
            return Err(MostHostsError::InvalidSpectrum("empty spectrum".into()));
        }
        if flux.len() != wavelength.len() || ivar.len() != wavelength.len() {
            return Err(MostHostsError::InvalidSpectrum(format!(
                "array lengths differ: {} wavelengths, {} fluxes, {} ivars",
                wavelength.len(),
                flux.len(),
                ivar.len()
            )));
        }
        if wavelength.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(MostHostsError::InvalidSpectrum(
                "wavelengths are not strictly increasing".into(),
            ));
        }
        Ok(Spectrum {
            wavelength,
            flux,
            ivar,
        })
    }

    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn ivar(&self) -> &[f64] {
        &self.ivar
    }

    /// 1σ flux uncertainties, `sqrt(1/ivar)`.
    ///
    /// Samples without information (`ivar <= 0`) get the uncertainty of an ivar a thousand
    /// times smaller than the smallest positive one, so that every sample has a finite error.
    ///
    /// Return
    /// ------
    /// * the uncertainties, or [`MostHostsError::InvalidSpectrum`] if no ivar is positive
    pub fn errors(&self) -> Result<Vec<f64>, MostHostsError> {
        let min_positive = self
            .ivar
            .iter()
            .copied()
            .filter(|v| *v > 0.0 && v.is_finite())
            .reduce(f64::min)
            .ok_or_else(|| {
                MostHostsError::InvalidSpectrum("inverse variance is zero or negative everywhere".into())
            })?;
        let tiny = min_positive / 1000.0;
        Ok(self
            .ivar
            .iter()
            .map(|&v| {
                let v = if v > 0.0 && v.is_finite() { v } else { tiny };
                v.recip().sqrt()
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Camera {
    B,
    R,
    Z,
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Camera::B => "b",
            Camera::R => "r",
            Camera::Z => "z",
        })
    }
}

/// The per-camera spectra of one target in one coadd.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSpectra {
    cameras: BTreeMap<Camera, Spectrum>,
}

impl CameraSpectra {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, camera: Camera, spectrum: Spectrum) -> Option<Spectrum> {
        self.cameras.insert(camera, spectrum)
    }

    pub fn get(&self, camera: Camera) -> Option<&Spectrum> {
        self.cameras.get(&camera)
    }

    /// Combine the cameras into a single `brz` spectrum.
    ///
    /// The result lives on the union of the camera wavelength grids. Where cameras overlap
    /// at the same wavelength, fluxes are averaged with inverse-variance weights and the
    /// inverse variances add up. If none of the overlapping samples has a positive ivar, the
    /// plain mean flux is kept with a zero ivar.
    pub fn combine(&self) -> Result<Spectrum, MostHostsError> {
        if self.cameras.is_empty() {
            return Err(MostHostsError::InvalidSpectrum("no camera to combine".into()));
        }

        // wavelength bits -> (Σ f w, Σ w, Σ f, n)
        let mut grid: BTreeMap<u64, (f64, f64, f64, usize)> = BTreeMap::new();
        for spectrum in self.cameras.values() {
            for ((&lambda, &flux), &ivar) in spectrum
                .wavelength
                .iter()
                .zip(&spectrum.flux)
                .zip(&spectrum.ivar)
            {
                let w = if ivar > 0.0 { ivar } else { 0.0 };
                let entry = grid.entry(ordered_bits(lambda)).or_insert((0.0, 0.0, 0.0, 0));
                entry.0 += flux * w;
                entry.1 += w;
                entry.2 += flux;
                entry.3 += 1;
            }
        }

        let mut wavelength = Vec::with_capacity(grid.len());
        let mut flux = Vec::with_capacity(grid.len());
        let mut ivar = Vec::with_capacity(grid.len());
        for (bits, (sum_fw, sum_w, sum_f, n)) in grid {
            wavelength.push(from_ordered_bits(bits));
            if sum_w > 0.0 {
                flux.push(sum_fw / sum_w);
            } else {
                flux.push(sum_f / n as f64);
            }
            ivar.push(sum_w);
        }
        Spectrum::new(wavelength, flux, ivar)
    }
}

/// Map a finite f64 to a u64 whose unsigned order is the float order.
fn ordered_bits(x: f64) -> u64 {
    let bits = x.to_bits();
    if bits >> 63 == 0 {
        bits | (1 << 63)
    } else {
        !bits
    }
}

fn from_ordered_bits(bits: u64) -> f64 {
    if bits >> 63 == 1 {
        f64::from_bits(bits & !(1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}

/// Reads the spectra of one target from a DESI coadd file.
pub trait SpectrumReader {
    fn read(&self, path: &Utf8Path, target_id: TargetId) -> Result<CameraSpectra, MostHostsError>;
}

/// Path of the coadd file matching a redshift file recorded in the database.
///
/// Arguments
/// ---------
/// * `redux_dir`: root of the spectroscopic reductions
/// * `redshift_file`: `<dir>/zbest-<spectro>-<tile>-thru<night>.fits` (or `redrock-...`)
///
/// Return
/// ------
/// * `<redux_dir>/<dir>/coadd-<spectro>-<tile>-thru<night>.fits`
pub fn coadd_path(redux_dir: &Utf8Path, redshift_file: &str) -> Result<Utf8PathBuf, MostHostsError> {
    let caps = REDSHIFT_FILE.captures(redshift_file).ok_or_else(|| {
        MostHostsError::InvalidSpectrum(format!("unexpected redshift file name {redshift_file}"))
    })?;
    Ok(redux_dir.join(&caps[1]).join(format!("coadd{}", &caps[3])))
}

/// Write a spectrum as ASCII: a `lambda flux dflux` header, then one sample per line.
pub fn write_ascii<W: Write>(writer: W, spectrum: &Spectrum) -> Result<(), MostHostsError> {
    let errors = spectrum.errors()?;
    let mut out = BufWriter::new(writer);
    writeln!(out, "lambda flux dflux")?;
    for ((lambda, flux), dflux) in spectrum.wavelength.iter().zip(&spectrum.flux).zip(&errors) {
        writeln!(out, "{lambda:.2} {flux:.5e} {dflux:.5e}")?;
    }
    out.flush()?;
    Ok(())
}
