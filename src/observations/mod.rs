//! # DESI spectroscopic observations
//!
//! An [`Observation`] is one redshift measurement returned by the positional match: a DESI
//! target observed on one tile/petal ([`ExposureGroup`]), coadded up to a given [`Night`],
//! with its Redrock redshift, uncertainty and warning flag (`ZWARN`).
//!
//! A [`CanonicalObservation`] is the deduplicated form produced by
//! [`crate::dedup::Deduplicator`]: at most one per (candidate, target, exposure group).
//! It can only be built inside the crate, so any value of that type has gone through
//! deduplication.
use std::{fmt, ops::Deref};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{Redshift, TargetId, TileId},
    night::Night,
};

/// Physical grouping under which DESI coadds a target over time: a tile and a petal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExposureGroup {
    pub tile_id: TileId,
    pub petal: i16,
}

impl ExposureGroup {
    pub fn new(tile_id: TileId, petal: i16) -> Self {
        ExposureGroup { tile_id, petal }
    }
}

impl fmt::Display for ExposureGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile {} petal {}", self.tile_id, self.petal)
    }
}

/// One spectroscopic measurement associated with a candidate by position.
///
/// # Fields
///
/// * `target_id` - DESI target identifier
/// * `exposure_group` - tile/petal of the coadd
/// * `device` - fiber positioner (`device_loc`), when the store reports it
/// * `night` - last night included in the coadd
/// * `redshift`, `redshift_error` - Redrock `Z` and `ZERR`
/// * `quality_flag` - Redrock `ZWARN`; `0` means trustworthy
/// * `source_path` - redshift file of the coadd, opaque to the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub target_id: TargetId,
    pub exposure_group: ExposureGroup,
    pub device: Option<i32>,
    pub night: Night,
    pub redshift: Redshift,
    pub redshift_error: f64,
    pub quality_flag: i64,
    pub chi2: Option<f64>,
    pub delta_chi2: Option<f64>,
    pub spectype: Option<String>,
    pub subtype: Option<String>,
    pub source_path: Option<String>,
}

impl Observation {
    /// Create an observation with only the fields the reconciliation needs.
    ///
    /// Arguments
    /// ---------
    /// * `target_id`: DESI target identifier
    /// * `exposure_group`: tile/petal of the coadd
    /// * `night`: last night included in the coadd
    /// * `redshift`: measured redshift
    /// * `redshift_error`: 1σ uncertainty on the redshift
    /// * `quality_flag`: `ZWARN` (0 = trustworthy)
    pub fn new(
        target_id: TargetId,
        exposure_group: ExposureGroup,
        night: Night,
        redshift: Redshift,
        redshift_error: f64,
        quality_flag: i64,
    ) -> Self {
        Observation {
            target_id,
            exposure_group,
            device: None,
            night,
            redshift,
            redshift_error,
            quality_flag,
            chi2: None,
            delta_chi2: None,
            spectype: None,
            subtype: None,
            source_path: None,
        }
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_device(mut self, device: i32) -> Self {
        self.device = Some(device);
        self
    }

    pub fn is_trustworthy(&self) -> bool {
        self.quality_flag == 0
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target {} {} night {}",
            self.target_id, self.exposure_group, self.night
        )
    }
}

/// An observation that survived deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalObservation(Observation);

impl CanonicalObservation {
    pub(crate) fn new(observation: Observation) -> Self {
        CanonicalObservation(observation)
    }

    pub fn into_inner(self) -> Observation {
        self.0
    }
}

impl Deref for CanonicalObservation {
    type Target = Observation;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
