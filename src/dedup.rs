//! # Observation deduplication
//!
//! DESI's cumulative coadds include every previous exposure of a tile/petal, so the same
//! target appears once per night it was re-observed. Only the most recent coadd carries
//! information; the earlier ones are redundant.
//!
//! The [`Deduplicator`] keeps, for every (candidate, target, exposure group), the
//! observation with the **maximum night**. With [`DedupGranularity::Device`] the fiber
//! positioner is added to the key.
//!
//! ## Invariants
//!
//! - The quality flag is not part of the key: a later flagged coadd supersedes an earlier
//!   trustworthy one.
//! - Ties on the night keep the first row encountered and log a warning. They are never an
//!   error.
//! - The output is sorted by (target, tile, petal, device, night) so that it does not depend
//!   on the order in which the store returned rows.
use std::collections::{hash_map::Entry, HashMap};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    candidates::Candidate,
    constants::TargetId,
    matcher::{CandidateMatch, MatchOutcome, MatchSet},
    observations::{CanonicalObservation, ExposureGroup, Observation},
};

/// Scope of the deduplication key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupGranularity {
    /// One observation per (target, tile, petal).
    #[default]
    ExposureGroup,
    /// One observation per (target, tile, petal, device).
    Device,
}

impl DedupGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupGranularity::ExposureGroup => "exposure_group",
            DedupGranularity::Device => "device",
        }
    }
}

type DedupKey = (TargetId, ExposureGroup, Option<i32>);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deduplicator {
    granularity: DedupGranularity,
}

impl Deduplicator {
    pub fn new(granularity: DedupGranularity) -> Self {
        Deduplicator { granularity }
    }

    pub fn granularity(&self) -> DedupGranularity {
        self.granularity
    }

    fn key(&self, observation: &Observation) -> DedupKey {
        let device = match self.granularity {
            DedupGranularity::ExposureGroup => None,
            DedupGranularity::Device => observation.device,
        };
        (observation.target_id, observation.exposure_group, device)
    }

    /// Collapse the observations of one candidate.
    ///
    /// Arguments
    /// ---------
    /// * `candidate`: the candidate the observations were matched to (used in log messages)
    /// * `observations`: the raw matched observations, in store order
    ///
    /// Return
    /// ------
    /// * the canonical observations, one per key, sorted
    pub fn deduplicate_observations(
        &self,
        candidate: &Candidate,
        observations: Vec<Observation>,
    ) -> Vec<CanonicalObservation> {
        let mut kept: Vec<Observation> = Vec::with_capacity(observations.len());
        let mut index: HashMap<DedupKey, usize> = HashMap::new();

        for obs in observations {
            match index.entry(self.key(&obs)) {
                Entry::Vacant(slot) => {
                    slot.insert(kept.len());
                    kept.push(obs);
                }
                Entry::Occupied(slot) => {
                    let current = &mut kept[*slot.get()];
                    if obs.night > current.night {
                        *current = obs;
                    } else if obs.night == current.night {
                        match self.granularity {
                            DedupGranularity::ExposureGroup => warn!(
                                "{candidate}: {obs} appears more than once, keeping the first row"
                            ),
                            DedupGranularity::Device => {
                                debug!("{candidate}: duplicate row for {obs}, keeping the first")
                            }
                        }
                    }
                }
            }
        }

        kept.sort_by(|a, b| {
            (a.target_id, a.exposure_group, a.device, a.night).cmp(&(
                b.target_id,
                b.exposure_group,
                b.device,
                b.night,
            ))
        });
        kept.into_iter().map(CanonicalObservation::new).collect()
    }

    /// Deduplicate a whole match set, keeping candidates without matches as they are.
    pub fn deduplicate(&self, matches: MatchSet) -> MatchSet<CanonicalObservation> {
        let release = matches.release();
        let entries = matches
            .into_entries()
            .into_iter()
            .map(|CandidateMatch { candidate, outcome, missing }| {
                let outcome = match outcome {
                    MatchOutcome::Matched(observations) => {
                        let n_raw = observations.len();
                        let canonical = self.deduplicate_observations(&candidate, observations);
                        debug!(
                            "{candidate}: {n_raw} raw observations, {} canonical",
                            canonical.len()
                        );
                        MatchOutcome::Matched(canonical)
                    }
                    MatchOutcome::NoMatch => MatchOutcome::NoMatch,
                };
                CandidateMatch {
                    candidate,
                    outcome,
                    missing,
                }
            })
            .collect();
        MatchSet::from_entries(release, entries)
    }
}

#[cfg(test)]
mod dedup_test {
    use super::*;
    use crate::{night::Night, release::Release};

    fn obs(target_id: i64, tile: i64, night: u32, z: f64) -> Observation {
        Observation::new(
            target_id,
            ExposureGroup::new(tile, 4),
            Night::new(night).unwrap(),
            z,
            0.001,
            0,
        )
    }

    fn candidate() -> Candidate {
        Candidate::new("SN2020xyz", 150.0, -10.0, None).unwrap()
    }

    #[test]
    fn test_latest_night_is_kept() {
        let dedup = Deduplicator::default();
        let out = dedup.deduplicate_observations(
            &candidate(),
            vec![obs(1, 100, 20230101, 0.10), obs(1, 100, 20230115, 0.11)],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].night, Night::new(20230115).unwrap());
        assert_eq!(out[0].redshift, 0.11);

        let reversed = dedup.deduplicate_observations(
            &candidate(),
            vec![obs(1, 100, 20230115, 0.11), obs(1, 100, 20230101, 0.10)],
        );
        assert_eq!(out, reversed);
    }

    #[test]
    fn test_distinct_groups_are_kept() {
        let out = Deduplicator::default().deduplicate_observations(
            &candidate(),
            vec![
                obs(2, 100, 20230101, 0.1),
                obs(1, 200, 20230101, 0.1),
                obs(1, 100, 20230101, 0.1),
            ],
        );
        let keys: Vec<_> = out
            .iter()
            .map(|o| (o.target_id, o.exposure_group.tile_id))
            .collect();
        assert_eq!(keys, vec![(1, 100), (1, 200), (2, 100)]);
    }

    #[test]
    fn test_tie_keeps_first_row() {
        let out = Deduplicator::default().deduplicate_observations(
            &candidate(),
            vec![obs(1, 100, 20230101, 0.10), obs(1, 100, 20230101, 0.20)],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].redshift, 0.10);
    }

    #[test]
    fn test_quality_flag_is_not_part_of_the_key() {
        let mut flagged = obs(1, 100, 20230115, 0.9);
        flagged.quality_flag = 4;
        let out = Deduplicator::default()
            .deduplicate_observations(&candidate(), vec![obs(1, 100, 20230101, 0.1), flagged]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quality_flag, 4);
    }

    #[test]
    fn test_device_granularity() {
        let a = obs(1, 100, 20230101, 0.1).with_device(10);
        let b = obs(1, 100, 20230101, 0.1).with_device(11);

        let coarse = Deduplicator::default()
            .deduplicate_observations(&candidate(), vec![a.clone(), b.clone()]);
        assert_eq!(coarse.len(), 1);

        let fine = Deduplicator::new(DedupGranularity::Device)
            .deduplicate_observations(&candidate(), vec![b, a]);
        let devices: Vec<_> = fine.iter().map(|o| o.device).collect();
        assert_eq!(devices, vec![Some(10), Some(11)]);
    }

    #[test]
    fn test_no_match_is_preserved() {
        let set = MatchSet::from_entries(
            Release::Daily,
            vec![CandidateMatch {
                candidate: candidate(),
                outcome: MatchOutcome::NoMatch,
                missing: Vec::new(),
            }],
        );
        let out = Deduplicator::default().deduplicate(set);
        assert_eq!(out.entries()[0].outcome, MatchOutcome::NoMatch);
        assert_eq!(out.release(), Release::Daily);
    }
}
