//! # Observation store interface
//!
//! The cross-match never searches the sky itself: radius queries are delegated to a
//! spatially-queryable store. This module defines that seam as the [`ObservationStore`]
//! trait and ships two implementations:
//!
//! - [`memory::MemoryStore`] – an in-memory catalog with brute-force separations, used for
//!   fixtures, tests and small offline runs,
//! - [`postgres::PgStore`] – the DESI PostgreSQL database with the `q3c` extension.
//!
//! ## Contract
//!
//! - [`ObservationStore::radial_join`] receives the **whole** candidate batch and returns
//!   every (candidate, observation) pair within `radius`, in any order. Pairs refer to the
//!   candidate by its index in the input slice. Implementations batch the candidates; they
//!   must not issue one query per candidate. A coadd within radius that has no redshift
//!   entry is not an observation; it is reported in [`RadialJoin::missing`] so that the
//!   candidate can be flagged instead of silently losing it.
//! - [`ObservationStore::target_join`] does the same against the DESI target-selection
//!   catalogs (the secondary-target table), independently of any spectroscopy.
//! - A store handle is owned by a single thread. Concurrent exporters create one store per
//!   worker.
pub mod memory;
pub mod postgres;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    candidates::{Candidate, HostRecord},
    constants::{Degree, TargetId},
    mosthosts_errors::MostHostsError,
    night::Night,
    observations::{ExposureGroup, Observation},
    release::Release,
};

/// A raw positional match: candidate index into the queried batch, and the observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMatch {
    pub candidate: usize,
    pub observation: Observation,
}

/// A coadd within radius of a candidate whose redshift entry does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingRedshift {
    pub candidate: usize,
    pub schema: String,
    pub target_id: TargetId,
    pub exposure_group: ExposureGroup,
    pub night: Night,
}

impl fmt::Display for MissingRedshift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: no redshift entry for target {} {} night {}",
            self.schema, self.target_id, self.exposure_group, self.night
        )
    }
}

/// Answer of [`ObservationStore::radial_join`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadialJoin {
    pub matches: Vec<RawMatch>,
    pub missing: Vec<MissingRedshift>,
}

/// A DESI target-selection entry (not a spectrum).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    /// `main`, `sv1`, `sv2`, `sv3` or `backup`
    pub survey: String,
    /// `bright` or `dark`
    pub program: String,
    pub target_id: TargetId,
    pub desi_target: i64,
    pub bgs_target: i64,
    pub mws_target: i64,
    pub scnd_target: i64,
}

/// A positional match between a candidate and a target-selection entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetMatch {
    pub candidate: usize,
    pub target: TargetRecord,
}

pub trait ObservationStore {
    /// Find all spectroscopic observations of `release` within `radius` of each candidate.
    ///
    /// Arguments
    /// ---------
    /// * `release`: the DESI release whose tables are searched
    /// * `candidates`: the batch of positions to match
    /// * `radius`: the matching radius in degrees
    ///
    /// Return
    /// ------
    /// * every (candidate index, observation) pair within `radius`, unordered, and the coadds
    ///   within `radius` that lack a redshift entry
    fn radial_join(
        &mut self,
        release: Release,
        candidates: &[Candidate],
        radius: Degree,
    ) -> Result<RadialJoin, MostHostsError>;

    /// Find all DESI target-selection entries within `radius` of each candidate.
    fn target_join(
        &mut self,
        candidates: &[Candidate],
        radius: Degree,
    ) -> Result<Vec<TargetMatch>, MostHostsError>;

    /// Load the MostHosts host table, when the store carries it.
    fn load_hosts(&mut self) -> Result<Vec<HostRecord>, MostHostsError> {
        Err(MostHostsError::Config(
            "this observation store does not carry the MostHosts table".into(),
        ))
    }
}
