//! # Positional matcher
//!
//! Associates every candidate with the DESI observations lying within a fixed angular radius
//! of its position.
//!
//! ## Overview
//!
//! The matcher does not search the sky itself. It validates its inputs, hands the **whole**
//! candidate batch to an [`ObservationStore`] in one call (which issues one bulk radius join
//! per release schema), and regroups the returned (candidate, observation) pairs into a
//! [`MatchSet`]: one entry per input candidate, in input order.
//!
//! Candidates without any observation within radius are **not** dropped; they carry the
//! explicit [`MatchOutcome::NoMatch`] marker so that later stages can report them.
//!
//! Rows the store located but could not read a redshift from are kept on the entry as
//! [`MissingRedshift`] records, so the candidate can be reported as failed rather than
//! silently looking unmatched.
//!
//! The matching is deliberately one-sided and many-to-many: a candidate may match several
//! DESI targets, and a DESI target may match several candidates.
//!
//! ## Errors
//!
//! Matching failures are batch-level: an empty candidate list
//! ([`MostHostsError::EmptyCandidateList`]), a store error, or a store answer referencing a
//! candidate outside the batch ([`MostHostsError::DataIntegrity`]) abort the whole batch.
//! Only [`PositionalMatcher::find_single`] raises [`MostHostsError::NoMatchFound`].
use std::collections::BTreeMap;

use log::{debug, info};

use crate::{
    candidates::Candidate,
    constants::{Degree, DEFAULT_MATCH_RADIUS},
    dedup::Deduplicator,
    mosthosts_errors::MostHostsError,
    observations::{CanonicalObservation, Observation},
    release::Release,
    store::{MissingRedshift, ObservationStore, RadialJoin, TargetMatch, TargetRecord},
};

/// Result of the positional match for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome<T = Observation> {
    /// At least one observation was found within radius.
    Matched(Vec<T>),
    /// Nothing within radius.
    NoMatch,
}

impl<T> MatchOutcome<T> {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }

    /// The matched observations, empty for [`MatchOutcome::NoMatch`].
    pub fn observations(&self) -> &[T] {
        match self {
            MatchOutcome::Matched(obs) => obs,
            MatchOutcome::NoMatch => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch<T = Observation> {
    pub candidate: Candidate,
    pub outcome: MatchOutcome<T>,
    /// Observations within radius whose redshift entry is absent.
    pub missing: Vec<MissingRedshift>,
}

/// The match result of a whole batch, one entry per input candidate, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSet<T = Observation> {
    release: Release,
    entries: Vec<CandidateMatch<T>>,
}

impl<T> MatchSet<T> {
    pub(crate) fn from_entries(release: Release, entries: Vec<CandidateMatch<T>>) -> Self {
        MatchSet { release, entries }
    }

    pub fn release(&self) -> Release {
        self.release
    }

    pub fn entries(&self) -> &[CandidateMatch<T>] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<CandidateMatch<T>> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of candidates with at least one observation.
    pub fn n_matched(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_match()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionalMatcher {
    radius: Degree,
}

impl Default for PositionalMatcher {
    fn default() -> Self {
        PositionalMatcher {
            radius: DEFAULT_MATCH_RADIUS,
        }
    }
}

impl PositionalMatcher {
    /// Create a matcher with a given radius.
    ///
    /// Arguments
    /// ---------
    /// * `radius`: matching radius in degrees, finite and strictly positive
    ///
    /// Return
    /// ------
    /// * the matcher, or [`MostHostsError::Config`] for an unusable radius
    pub fn new(radius: Degree) -> Result<Self, MostHostsError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(MostHostsError::Config(format!(
                "matching radius must be a positive number of degrees, got {radius}"
            )));
        }
        Ok(PositionalMatcher { radius })
    }

    pub fn radius(&self) -> Degree {
        self.radius
    }

    /// Match a batch of candidates against one DESI release.
    ///
    /// Arguments
    /// ---------
    /// * `store`: the spatially-queryable observation store
    /// * `candidates`: the batch; must not be empty
    /// * `release`: the release to search
    ///
    /// Return
    /// ------
    /// * a [`MatchSet`] with exactly one entry per candidate, in input order
    pub fn match_candidates<S: ObservationStore + ?Sized>(
        &self,
        store: &mut S,
        candidates: &[Candidate],
        release: Release,
    ) -> Result<MatchSet, MostHostsError> {
        if candidates.is_empty() {
            return Err(MostHostsError::EmptyCandidateList);
        }

        info!(
            "Looking for {release} spectra at {} positions within {:.3}\"",
            candidates.len(),
            self.radius * 3600.0
        );
        let RadialJoin { matches, missing } =
            store.radial_join(release, candidates, self.radius)?;
        debug!(
            "{release}: store returned {} raw pairs and {} rows without redshift",
            matches.len(),
            missing.len()
        );

        let out_of_batch = |idx: usize| {
            MostHostsError::DataIntegrity(format!(
                "{release}: store returned a match for candidate #{idx} in a batch of {}",
                candidates.len()
            ))
        };
        let mut grouped: Vec<Vec<Observation>> = vec![Vec::new(); candidates.len()];
        for pair in matches {
            grouped
                .get_mut(pair.candidate)
                .ok_or_else(|| out_of_batch(pair.candidate))?
                .push(pair.observation);
        }
        let mut unreadable: Vec<Vec<MissingRedshift>> = vec![Vec::new(); candidates.len()];
        for row in missing {
            let idx = row.candidate;
            unreadable
                .get_mut(idx)
                .ok_or_else(|| out_of_batch(idx))?
                .push(row);
        }

        let entries: Vec<CandidateMatch> = candidates
            .iter()
            .zip(grouped)
            .zip(unreadable)
            .map(|((candidate, observations), missing)| CandidateMatch {
                candidate: candidate.clone(),
                outcome: if observations.is_empty() {
                    MatchOutcome::NoMatch
                } else {
                    MatchOutcome::Matched(observations)
                },
                missing,
            })
            .collect();

        let set = MatchSet::from_entries(release, entries);
        info!(
            "{release}: {} of {} candidates have at least one observation",
            set.n_matched(),
            set.len()
        );
        Ok(set)
    }

    /// Match a batch of candidates against the DESI target-selection catalog.
    ///
    /// Return
    /// ------
    /// * the (candidate, target) pairs within radius, grouped by candidate in input order
    pub fn match_targets<S: ObservationStore + ?Sized>(
        &self,
        store: &mut S,
        candidates: &[Candidate],
    ) -> Result<Vec<(Candidate, TargetRecord)>, MostHostsError> {
        if candidates.is_empty() {
            return Err(MostHostsError::EmptyCandidateList);
        }

        let mut by_candidate: BTreeMap<usize, Vec<TargetRecord>> = BTreeMap::new();
        for TargetMatch { candidate, target } in store.target_join(candidates, self.radius)? {
            if candidate >= candidates.len() {
                return Err(MostHostsError::DataIntegrity(format!(
                    "target catalog returned a match for candidate #{candidate} in a batch of {}",
                    candidates.len()
                )));
            }
            by_candidate.entry(candidate).or_default().push(target);
        }
        info!(
            "{} of {} candidates are DESI targets",
            by_candidate.len(),
            candidates.len()
        );

        Ok(by_candidate
            .into_iter()
            .flat_map(|(idx, targets)| {
                let candidate = &candidates[idx];
                targets.into_iter().map(move |t| (candidate.clone(), t))
            })
            .collect())
    }

    /// Look up the canonical observations of a single candidate.
    ///
    /// Arguments
    /// ---------
    /// * `store`: the observation store
    /// * `candidate`: the position to search
    /// * `release`: the release to search
    /// * `dedup`: deduplication applied to the raw matches
    ///
    /// Return
    /// ------
    /// * the canonical observations, [`MostHostsError::NoMatchFound`] if nothing lies
    ///   within radius, or [`MostHostsError::DataIntegrity`] if a row within radius has no
    ///   redshift entry
    pub fn find_single<S: ObservationStore + ?Sized>(
        &self,
        store: &mut S,
        candidate: &Candidate,
        release: Release,
        dedup: &Deduplicator,
    ) -> Result<Vec<CanonicalObservation>, MostHostsError> {
        let set = self.match_candidates(store, std::slice::from_ref(candidate), release)?;
        let deduped = dedup.deduplicate(set);
        let Some(entry) = deduped.into_entries().pop() else {
            return Err(MostHostsError::NoMatchFound(candidate.to_string()));
        };
        if !entry.missing.is_empty() {
            return Err(MostHostsError::DataIntegrity(
                entry.missing.iter().map(|m| m.to_string()).collect::<Vec<_>>().join("; "),
            ));
        }
        match entry.outcome {
            MatchOutcome::Matched(observations) => Ok(observations),
            MatchOutcome::NoMatch => Err(MostHostsError::NoMatchFound(candidate.to_string())),
        }
    }
}

#[cfg(test)]
mod matcher_test {
    use super::*;
    use crate::{
        constants::ARCSEC_TO_DEG,
        night::Night,
        observations::ExposureGroup,
        store::{memory::MemoryStore, RawMatch},
    };

    fn obs(target_id: i64, night: u32) -> Observation {
        Observation::new(
            target_id,
            ExposureGroup::new(80605, 2),
            Night::new(night).unwrap(),
            0.05,
            0.001,
            0,
        )
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .insert_observation("daily", 150.0, -10.0, obs(1, 20230101))
            .unwrap();
        store
            .insert_observation("daily", 150.0, -10.0 + 0.3 * ARCSEC_TO_DEG, obs(2, 20230101))
            .unwrap();
        store
    }

    #[test]
    fn test_one_entry_per_candidate_in_input_order() {
        let candidates = vec![
            Candidate::new("far", 10.0, 10.0, None).unwrap(),
            Candidate::new("near", 150.0, -10.0, Some(0)).unwrap(),
        ];
        let set = PositionalMatcher::default()
            .match_candidates(&mut store(), &candidates, Release::Daily)
            .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.n_matched(), 1);
        assert_eq!(set.entries()[0].candidate.name(), "far");
        assert_eq!(set.entries()[0].outcome, MatchOutcome::NoMatch);
        assert_eq!(set.entries()[1].outcome.observations().len(), 2);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let err = PositionalMatcher::default()
            .match_candidates(&mut store(), &[], Release::Daily)
            .unwrap_err();
        assert_eq!(err, MostHostsError::EmptyCandidateList);
    }

    #[test]
    fn test_unknown_release_fails_before_query() {
        let err = "edr".parse::<Release>().unwrap_err();
        assert_eq!(err, MostHostsError::UnknownCatalog("edr".into()));
    }

    #[test]
    fn test_find_single_raises_no_match() {
        let candidate = Candidate::new("lonely", 200.0, 45.0, None).unwrap();
        let err = PositionalMatcher::default()
            .find_single(
                &mut store(),
                &candidate,
                Release::Daily,
                &Deduplicator::default(),
            )
            .unwrap_err();
        assert!(err.is_no_match());
    }

    #[test]
    fn test_find_single_returns_canonical_observations() {
        let candidate = Candidate::new("near", 150.0, -10.0, None).unwrap();
        let found = PositionalMatcher::default()
            .find_single(
                &mut store(),
                &candidate,
                Release::Daily,
                &Deduplicator::default(),
            )
            .unwrap();
        let ids: Vec<_> = found.iter().map(|o| o.target_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_invalid_radius() {
        assert!(PositionalMatcher::new(0.0).is_err());
        assert!(PositionalMatcher::new(f64::NAN).is_err());
        assert!(PositionalMatcher::new(2.0 * ARCSEC_TO_DEG).is_ok());
    }

    struct BrokenStore;

    impl ObservationStore for BrokenStore {
        fn radial_join(
            &mut self,
            _release: Release,
            _candidates: &[Candidate],
            _radius: Degree,
        ) -> Result<RadialJoin, MostHostsError> {
            Ok(RadialJoin {
                matches: vec![RawMatch {
                    candidate: 7,
                    observation: obs(1, 20230101),
                }],
                ..Default::default()
            })
        }

        fn target_join(
            &mut self,
            _candidates: &[Candidate],
            _radius: Degree,
        ) -> Result<Vec<TargetMatch>, MostHostsError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_out_of_batch_index_is_integrity_error() {
        let candidates = vec![Candidate::new("a", 1.0, 1.0, None).unwrap()];
        let err = PositionalMatcher::default()
            .match_candidates(&mut BrokenStore, &candidates, Release::Iron)
            .unwrap_err();
        assert!(matches!(err, MostHostsError::DataIntegrity(_)));
    }

    #[test]
    fn test_missing_redshift_is_kept_on_the_entry() {
        let mut store = store();
        store
            .insert_missing_redshift(
                "daily",
                150.0,
                -10.0,
                5,
                ExposureGroup::new(80606, 1),
                Night::new(20230102).unwrap(),
            )
            .unwrap();
        store
            .insert_missing_redshift(
                "daily",
                30.0,
                30.0,
                6,
                ExposureGroup::new(80607, 1),
                Night::new(20230103).unwrap(),
            )
            .unwrap();
        let candidates = vec![
            Candidate::new("near", 150.0, -10.0, None).unwrap(),
            Candidate::new("blank", 30.0, 30.0, None).unwrap(),
        ];
        let set = PositionalMatcher::default()
            .match_candidates(&mut store, &candidates, Release::Daily)
            .unwrap();

        let near = &set.entries()[0];
        assert_eq!(near.outcome.observations().len(), 2);
        assert_eq!(near.missing.len(), 1);
        assert_eq!(near.missing[0].target_id, 5);

        // nothing readable within radius, but not an empty sky either
        let blank = &set.entries()[1];
        assert_eq!(blank.outcome, MatchOutcome::NoMatch);
        assert_eq!(blank.missing.len(), 1);
        assert_eq!(blank.missing[0].candidate, 1);
    }

    #[test]
    fn test_find_single_refuses_a_missing_redshift() {
        let mut store = store();
        store
            .insert_missing_redshift(
                "daily",
                150.0,
                -10.0,
                5,
                ExposureGroup::new(80606, 1),
                Night::new(20230102).unwrap(),
            )
            .unwrap();
        let candidate = Candidate::new("near", 150.0, -10.0, None).unwrap();
        let err = PositionalMatcher::default()
            .find_single(&mut store, &candidate, Release::Daily, &Deduplicator::default())
            .unwrap_err();
        assert!(matches!(&err, MostHostsError::DataIntegrity(msg) if msg.contains("target 5")));
    }

    #[test]
    fn test_match_targets_groups_by_candidate() {
        let mut store = store();
        let target = |id| TargetRecord {
            survey: "main".into(),
            program: "bright".into(),
            target_id: id,
            desi_target: 1 << 60,
            bgs_target: 0,
            mws_target: 0,
            scnd_target: 0,
        };
        store.insert_target(150.0, -10.0, target(11));
        store.insert_target(10.0, 10.0, target(12));

        let candidates = vec![
            Candidate::new("near", 150.0, -10.0, None).unwrap(),
            Candidate::new("far", 10.0, 10.0, None).unwrap(),
            Candidate::new("none", 50.0, 50.0, None).unwrap(),
        ];
        let found = PositionalMatcher::default()
            .match_targets(&mut store, &candidates)
            .unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|(c, t)| (c.name().to_string(), t.target_id))
            .collect();
        assert_eq!(names, vec![("near".into(), 11), ("far".into(), 12)]);
    }
}
