//! # Redshift reconciliation
//!
//! Combines the canonical observations of one candidate into a single best redshift.
//!
//! ## Method
//!
//! Only trustworthy observations (`quality_flag == 0`) contribute. With weights
//! $w_i = 1/\sigma_i^2$:
//!
//! ```text
//! z          = Σ z_i w_i / Σ w_i
//! dz         = sqrt(1 / Σ w_i)
//! dispersion = max(z_i) - min(z_i)
//! ```
//!
//! The dispersion is a consistency check, not an uncertainty: when it exceeds the configured
//! threshold (`0.001` by default) a warning listing every contributing redshift is logged
//! for human review. The result is still reported.
//!
//! A candidate whose observations are all flagged is [`ReconciledRedshift::Unresolved`]; no
//! numeric placeholder is ever produced.
//!
//! ## Errors
//!
//! A trustworthy observation with a non-positive or non-finite uncertainty, or a non-finite
//! redshift, is rejected with [`MostHostsError::DataIntegrity`]. It is never silently dropped
//! or replaced.
use std::fmt::Display;

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    candidates::Candidate,
    constants::{Redshift, DEFAULT_DISPERSION_THRESHOLD},
    mosthosts_errors::MostHostsError,
    observations::{CanonicalObservation, Observation},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReconciledRedshift {
    Resolved {
        z: Redshift,
        dz: f64,
        dispersion: f64,
        n_contributing: usize,
    },
    /// No trustworthy observation.
    Unresolved,
}

impl ReconciledRedshift {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ReconciledRedshift::Resolved { .. })
    }

    pub fn z(&self) -> Option<Redshift> {
        match self {
            ReconciledRedshift::Resolved { z, .. } => Some(*z),
            ReconciledRedshift::Unresolved => None,
        }
    }

    pub fn dz(&self) -> Option<f64> {
        match self {
            ReconciledRedshift::Resolved { dz, .. } => Some(*dz),
            ReconciledRedshift::Unresolved => None,
        }
    }

    pub fn dispersion(&self) -> Option<f64> {
        match self {
            ReconciledRedshift::Resolved { dispersion, .. } => Some(*dispersion),
            ReconciledRedshift::Unresolved => None,
        }
    }

    pub fn n_contributing(&self) -> usize {
        match self {
            ReconciledRedshift::Resolved { n_contributing, .. } => *n_contributing,
            ReconciledRedshift::Unresolved => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedshiftReconciler {
    dispersion_threshold: f64,
}

impl Default for RedshiftReconciler {
    fn default() -> Self {
        RedshiftReconciler {
            dispersion_threshold: DEFAULT_DISPERSION_THRESHOLD,
        }
    }
}

fn integrity_error(subject: &dyn Display, obs: &Observation, what: &str) -> MostHostsError {
    MostHostsError::DataIntegrity(format!(
        "{subject}: target {} tile {} petal {} night {} has {what} (z={}, zerr={})",
        obs.target_id,
        obs.exposure_group.tile_id,
        obs.exposure_group.petal,
        obs.night,
        obs.redshift,
        obs.redshift_error
    ))
}

impl RedshiftReconciler {
    pub fn new(dispersion_threshold: f64) -> Result<Self, MostHostsError> {
        if !dispersion_threshold.is_finite() || dispersion_threshold < 0.0 {
            return Err(MostHostsError::Config(format!(
                "dispersion threshold must be a non-negative number, got {dispersion_threshold}"
            )));
        }
        Ok(RedshiftReconciler {
            dispersion_threshold,
        })
    }

    pub fn dispersion_threshold(&self) -> f64 {
        self.dispersion_threshold
    }

    /// Reconcile the canonical observations of a candidate.
    ///
    /// Arguments
    /// ---------
    /// * `candidate`: the candidate, named in log and error messages
    /// * `observations`: its canonical observations (trustworthy or not)
    ///
    /// Return
    /// ------
    /// * [`ReconciledRedshift::Resolved`] if at least one observation is trustworthy,
    ///   [`ReconciledRedshift::Unresolved`] otherwise
    /// * [`MostHostsError::DataIntegrity`] if a trustworthy observation is unusable
    pub fn reconcile(
        &self,
        candidate: &Candidate,
        observations: &[CanonicalObservation],
    ) -> Result<ReconciledRedshift, MostHostsError> {
        self.reconcile_observations(candidate, observations.iter().map(|o| &**o))
    }

    /// Same as [`RedshiftReconciler::reconcile`] on any set of observations, e.g. the
    /// observations of a single DESI target.
    pub fn reconcile_observations<'a>(
        &self,
        subject: &dyn Display,
        observations: impl IntoIterator<Item = &'a Observation>,
    ) -> Result<ReconciledRedshift, MostHostsError> {
        let trusted: Vec<&Observation> = observations
            .into_iter()
            .filter(|o| o.is_trustworthy())
            .collect();
        if trusted.is_empty() {
            return Ok(ReconciledRedshift::Unresolved);
        }

        let mut sum_w = 0.0;
        let mut sum_zw = 0.0;
        for obs in &trusted {
            if !obs.redshift.is_finite() {
                return Err(integrity_error(subject, obs, "a non-finite redshift"));
            }
            if !obs.redshift_error.is_finite() || obs.redshift_error <= 0.0 {
                return Err(integrity_error(
                    subject,
                    obs,
                    "a non-positive redshift uncertainty",
                ));
            }
            let w = obs.redshift_error.powi(-2);
            sum_w += w;
            sum_zw += obs.redshift * w;
        }
        if !sum_w.is_finite() || sum_w <= 0.0 {
            return Err(MostHostsError::DataIntegrity(format!(
                "{subject}: total weight of {} observations is {sum_w}",
                trusted.len()
            )));
        }

        let (min, max) = trusted
            .iter()
            .map(|o| o.redshift)
            .minmax()
            .into_option()
            .unwrap_or_default();
        let dispersion = max - min;
        if dispersion > self.dispersion_threshold {
            warn!(
                "{subject} has divergent redshifts (spread {dispersion:.5}): [{}]",
                trusted.iter().map(|o| format!("{:.5}", o.redshift)).join(", ")
            );
        }

        Ok(ReconciledRedshift::Resolved {
            z: sum_zw / sum_w,
            dz: sum_w.recip().sqrt(),
            dispersion,
            n_contributing: trusted.len(),
        })
    }
}
