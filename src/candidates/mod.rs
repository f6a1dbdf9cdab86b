//! # Host-galaxy candidates
//!
//! A [`Candidate`] is one sky position to search DESI for: a possible host galaxy of a
//! supernova from the MostHosts catalog. Several hosts can share a supernova name; they are
//! distinguished by the MostHosts host `index`, carried here as the optional `group_key`.
//!
//! Candidates are validated once on construction (`ra ∈ [0,360)`, `dec ∈ [-90,90]`) and are
//! immutable afterwards. [`HostRecord`] pairs a candidate with the supernova metadata of the
//! MostHosts table, which the exporters and the SkyPortal uploader need but the
//! cross-match itself does not.
pub mod mosthosts_reader;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{constants::Degree, mosthosts_errors::MostHostsError, sky::is_valid_radec};

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    name: String,
    ra: Degree,
    dec: Degree,
    group_key: Option<i64>,
}

impl Candidate {
    /// Create a new candidate
    ///
    /// Arguments
    /// ---------
    /// * `name`: identifier of the candidate (not necessarily unique)
    /// * `ra`: right ascension in degrees, in `[0, 360)`
    /// * `dec`: declination in degrees, in `[-90, 90]`
    /// * `group_key`: optional secondary identifier (MostHosts host index)
    ///
    /// Return
    /// ------
    /// * the candidate, or [`MostHostsError::InvalidPosition`] if the position is out of range
    pub fn new(
        name: impl Into<String>,
        ra: Degree,
        dec: Degree,
        group_key: Option<i64>,
    ) -> Result<Self, MostHostsError> {
        let name = name.into();
        if !is_valid_radec(ra, dec) {
            return Err(MostHostsError::InvalidPosition { name, ra, dec });
        }
        Ok(Candidate {
            name,
            ra,
            dec,
            group_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ra(&self) -> Degree {
        self.ra
    }

    pub fn dec(&self) -> Degree {
        self.dec
    }

    pub fn group_key(&self) -> Option<i64> {
        self.group_key
    }

    pub fn key(&self) -> CandidateKey {
        CandidateKey {
            name: self.name.clone(),
            group_key: self.group_key,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.6}, {:+.6})", self.key(), self.ra, self.dec)
    }
}

/// Identity of a candidate in output tables: its name and host index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateKey {
    pub name: String,
    pub group_key: Option<i64>,
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group_key {
            Some(k) => write!(f, "{} host {}", self.name, k),
            None => f.write_str(&self.name),
        }
    }
}

/// Supernova metadata attached to a MostHosts host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupernovaInfo {
    pub snname: String,
    pub tns_name: Option<String>,
    pub iau_name: Option<String>,
    pub ptfiptf_name: Option<String>,
    pub sn_ra: Option<Degree>,
    pub sn_dec: Option<Degree>,
    pub sn_z: Option<f64>,
    pub program: Option<String>,
}

impl SupernovaInfo {
    /// Name used on SkyPortal: TNS name, else IAU name, else PTF/iPTF name, else `snname`.
    pub fn display_name(&self) -> &str {
        self.tns_name
            .as_deref()
            .or(self.iau_name.as_deref())
            .or(self.ptfiptf_name.as_deref())
            .unwrap_or(&self.snname)
    }

    /// IAU name, falling back to the TNS name.
    pub fn iau_or_tns(&self) -> Option<&str> {
        self.iau_name.as_deref().or(self.tns_name.as_deref())
    }
}

/// One row of the MostHosts table: a candidate host and its supernova.
#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    pub candidate: Candidate,
    pub supernova: SupernovaInfo,
}

impl HostRecord {
    pub fn candidates(records: &[HostRecord]) -> Vec<Candidate> {
        records.iter().map(|r| r.candidate.clone()).collect()
    }
}
