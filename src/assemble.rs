//! # Result assembly
//!
//! Joins the per-candidate outcomes of the pipeline back onto the candidate list and builds
//! the output views:
//!
//! - **full observation table** ([`ObservationRow`]): every canonical observation of every
//!   candidate, flagged ones included. Candidates without any observation appear exactly once
//!   with empty observation columns.
//! - **summary table** ([`SummaryRow`]): exactly one row per candidate, with a
//!   [`SummaryStatus`] and the reconciled redshift when resolved.
//! - **secondary-target table** ([`TargetRow`]): optional, the DESI target-selection entries
//!   within radius of each candidate.
//!
//! Results are matched to candidates by their position in the input batch, may arrive in any
//! order, and may be missing: a candidate without a result is reported as
//! [`SummaryStatus::Failed`]. All rows are sorted before they are returned.
use std::{cmp::Ordering, collections::HashMap};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    candidates::Candidate,
    constants::{Degree, Redshift, TargetId, TileId},
    matcher::MatchOutcome,
    mosthosts_errors::MostHostsError,
    night::Night,
    observations::CanonicalObservation,
    reconcile::ReconciledRedshift,
    release::Release,
    store::TargetRecord,
};

/// Everything the pipeline produced for one candidate.
#[derive(Debug)]
pub struct CandidateResult {
    /// Position of the candidate in the input batch.
    pub index: usize,
    pub observations: MatchOutcome<CanonicalObservation>,
    pub redshift: Result<ReconciledRedshift, MostHostsError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Resolved,
    Unresolved,
    NoMatch,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub name: String,
    pub group_key: Option<i64>,
    pub ra: Degree,
    pub dec: Degree,
    pub target_id: Option<TargetId>,
    pub tile_id: Option<TileId>,
    pub petal: Option<i16>,
    pub device: Option<i32>,
    pub night: Option<Night>,
    pub z: Option<Redshift>,
    pub zerr: Option<f64>,
    pub zwarn: Option<i64>,
    pub chi2: Option<f64>,
    pub deltachi2: Option<f64>,
    pub spectype: Option<String>,
    pub subtype: Option<String>,
    pub filename: Option<String>,
}

impl ObservationRow {
    fn empty(candidate: &Candidate) -> Self {
        ObservationRow {
            name: candidate.name().to_string(),
            group_key: candidate.group_key(),
            ra: candidate.ra(),
            dec: candidate.dec(),
            target_id: None,
            tile_id: None,
            petal: None,
            device: None,
            night: None,
            z: None,
            zerr: None,
            zwarn: None,
            chi2: None,
            deltachi2: None,
            spectype: None,
            subtype: None,
            filename: None,
        }
    }

    fn new(candidate: &Candidate, obs: &CanonicalObservation) -> Self {
        ObservationRow {
            target_id: Some(obs.target_id),
            tile_id: Some(obs.exposure_group.tile_id),
            petal: Some(obs.exposure_group.petal),
            device: obs.device,
            night: Some(obs.night),
            z: Some(obs.redshift),
            zerr: Some(obs.redshift_error),
            zwarn: Some(obs.quality_flag),
            chi2: obs.chi2,
            deltachi2: obs.delta_chi2,
            spectype: obs.spectype.clone(),
            subtype: obs.subtype.clone(),
            filename: obs.source_path.clone(),
            ..ObservationRow::empty(candidate)
        }
    }

    #[allow(clippy::type_complexity)]
    fn sort_key(
        &self,
    ) -> (
        &str,
        Option<i64>,
        Option<TargetId>,
        Option<TileId>,
        Option<i16>,
        Option<i32>,
        Option<Night>,
    ) {
        (
            &self.name,
            self.group_key,
            self.target_id,
            self.tile_id,
            self.petal,
            self.device,
            self.night,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub name: String,
    pub group_key: Option<i64>,
    pub ra: Degree,
    pub dec: Degree,
    pub status: SummaryStatus,
    /// Number of canonical observations, trustworthy or not.
    pub n_obs: usize,
    pub z: Option<Redshift>,
    pub dz: Option<f64>,
    pub dispersion: Option<f64>,
    pub n_contributing: Option<usize>,
    pub error: Option<String>,
}

impl SummaryRow {
    fn new(candidate: &Candidate, status: SummaryStatus, n_obs: usize) -> Self {
        SummaryRow {
            name: candidate.name().to_string(),
            group_key: candidate.group_key(),
            ra: candidate.ra(),
            dec: candidate.dec(),
            status,
            n_obs,
            z: None,
            dz: None,
            dispersion: None,
            n_contributing: None,
            error: None,
        }
    }

    fn failed(candidate: &Candidate, n_obs: usize, error: String) -> Self {
        SummaryRow {
            error: Some(error),
            ..SummaryRow::new(candidate, SummaryStatus::Failed, n_obs)
        }
    }

    pub fn redshift(&self) -> ReconciledRedshift {
        match (self.z, self.dz, self.dispersion, self.n_contributing) {
            (Some(z), Some(dz), Some(dispersion), Some(n_contributing)) => {
                ReconciledRedshift::Resolved {
                    z,
                    dz,
                    dispersion,
                    n_contributing,
                }
            }
            _ => ReconciledRedshift::Unresolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRow {
    pub name: String,
    pub group_key: Option<i64>,
    pub ra: Degree,
    pub dec: Degree,
    pub survey: String,
    pub program: String,
    pub target_id: TargetId,
    pub desi_target: i64,
    pub bgs_target: i64,
    pub mws_target: i64,
    pub scnd_target: i64,
}

impl TargetRow {
    pub fn new(candidate: &Candidate, target: TargetRecord) -> Self {
        TargetRow {
            name: candidate.name().to_string(),
            group_key: candidate.group_key(),
            ra: candidate.ra(),
            dec: candidate.dec(),
            survey: target.survey,
            program: target.program,
            target_id: target.target_id,
            desi_target: target.desi_target,
            bgs_target: target.bgs_target,
            mws_target: target.mws_target,
            scnd_target: target.scnd_target,
        }
    }
}

/// The output views of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTables {
    pub release: Release,
    pub observations: Vec<ObservationRow>,
    pub summary: Vec<SummaryRow>,
    pub targets: Option<Vec<TargetRow>>,
}

impl ResultTables {
    pub fn summary_for(&self, name: &str, group_key: Option<i64>) -> Option<&SummaryRow> {
        self.summary
            .iter()
            .find(|r| r.name == name && r.group_key == group_key)
    }

    pub fn count(&self, status: SummaryStatus) -> usize {
        self.summary.iter().filter(|r| r.status == status).count()
    }
}

fn cmp_position(a: Degree, b: Degree) -> Ordering {
    a.total_cmp(&b)
}

/// Build the output tables of a run.
///
/// Arguments
/// ---------
/// * `release`: the release the candidates were matched against
/// * `candidates`: the input batch
/// * `results`: per-candidate results, in any order, possibly incomplete
/// * `targets`: the secondary-target matches, when requested
///
/// Return
/// ------
/// * the three views, sorted by candidate then observation
pub fn assemble(
    release: Release,
    candidates: &[Candidate],
    results: Vec<CandidateResult>,
    targets: Option<Vec<(Candidate, TargetRecord)>>,
) -> ResultTables {
    let mut by_index: HashMap<usize, CandidateResult> = HashMap::with_capacity(results.len());
    for result in results {
        if result.index >= candidates.len() {
            warn!(
                "Dropping result for candidate #{} outside a batch of {}",
                result.index,
                candidates.len()
            );
            continue;
        }
        if by_index.contains_key(&result.index) {
            warn!(
                "Duplicate result for {}, keeping the first",
                candidates[result.index]
            );
            continue;
        }
        by_index.insert(result.index, result);
    }

    let mut observations = Vec::new();
    let mut summary = Vec::with_capacity(candidates.len());

    for (index, candidate) in candidates.iter().enumerate() {
        let Some(result) = by_index.remove(&index) else {
            observations.push(ObservationRow::empty(candidate));
            summary.push(SummaryRow::failed(candidate, 0, "no result".into()));
            continue;
        };

        let canonical = result.observations.observations();
        if canonical.is_empty() {
            observations.push(ObservationRow::empty(candidate));
        } else {
            observations.extend(canonical.iter().map(|o| ObservationRow::new(candidate, o)));
        }

        let row = match (&result.observations, result.redshift) {
            (MatchOutcome::NoMatch, Ok(_)) => {
                SummaryRow::new(candidate, SummaryStatus::NoMatch, 0)
            }
            (_, Err(err)) => SummaryRow::failed(candidate, canonical.len(), err.to_string()),
            (MatchOutcome::Matched(_), Ok(ReconciledRedshift::Unresolved)) => {
                SummaryRow::new(candidate, SummaryStatus::Unresolved, canonical.len())
            }
            (
                MatchOutcome::Matched(_),
                Ok(ReconciledRedshift::Resolved {
                    z,
                    dz,
                    dispersion,
                    n_contributing,
                }),
            ) => SummaryRow {
                z: Some(z),
                dz: Some(dz),
                dispersion: Some(dispersion),
                n_contributing: Some(n_contributing),
                ..SummaryRow::new(candidate, SummaryStatus::Resolved, canonical.len())
            },
        };
        summary.push(row);
    }

    observations.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            .then_with(|| cmp_position(a.ra, b.ra))
            .then_with(|| cmp_position(a.dec, b.dec))
    });
    summary.sort_by(|a, b| {
        (&a.name, a.group_key)
            .cmp(&(&b.name, b.group_key))
            .then_with(|| cmp_position(a.ra, b.ra))
            .then_with(|| cmp_position(a.dec, b.dec))
    });

    let targets = targets.map(|pairs| {
        let mut rows: Vec<TargetRow> = pairs
            .into_iter()
            .map(|(candidate, target)| TargetRow::new(&candidate, target))
            .collect();
        rows.sort_by(|a, b| {
            (&a.name, a.group_key, &a.survey, &a.program, a.target_id).cmp(&(
                &b.name,
                b.group_key,
                &b.survey,
                &b.program,
                b.target_id,
            ))
        });
        rows
    });

    ResultTables {
        release,
        observations,
        summary,
        targets,
    }
}
