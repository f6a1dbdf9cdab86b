//! # Cross-match pipeline
//!
//! [`CrossMatchPipeline`] chains the stages of a run:
//!
//! ```text
//! candidates ─▶ PositionalMatcher ─▶ Deduplicator ─▶ RedshiftReconciler ─▶ assemble ─▶ ResultTables
//! ```
//!
//! The pipeline holds only its parameters. The observation store is passed to every call
//! and the configuration to the constructor, so that one process can run several releases
//! or radii side by side.
//!
//! ## Errors
//!
//! Matching errors abort the batch and are returned. Reconciliation errors are per candidate:
//! they are logged with the candidate's identity and reported in the summary table with
//! status `failed`, and the other candidates are unaffected. A candidate with an observation
//! whose redshift entry is absent fails the same way, whatever else it matched.
use itertools::Itertools;
use log::{error, info};

use crate::{
    assemble::{assemble, CandidateResult, ResultTables, SummaryStatus},
    cache::{CachePolicy, ResultCache},
    candidates::Candidate,
    config::PipelineConfig,
    dedup::Deduplicator,
    matcher::{CandidateMatch, PositionalMatcher},
    mosthosts_errors::MostHostsError,
    reconcile::RedshiftReconciler,
    release::Release,
    store::ObservationStore,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossMatchPipeline {
    release: Release,
    matcher: PositionalMatcher,
    dedup: Deduplicator,
    reconciler: RedshiftReconciler,
    include_targets: bool,
}

impl CrossMatchPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, MostHostsError> {
        config.validate()?;
        Ok(CrossMatchPipeline {
            release: config.release,
            matcher: PositionalMatcher::new(config.radius())?,
            dedup: Deduplicator::new(config.granularity),
            reconciler: RedshiftReconciler::new(config.dispersion_threshold)?,
            include_targets: config.include_targets,
        })
    }

    pub fn with_release(mut self, release: Release) -> Self {
        self.release = release;
        self
    }

    pub fn release(&self) -> Release {
        self.release
    }

    pub fn matcher(&self) -> &PositionalMatcher {
        &self.matcher
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn reconciler(&self) -> &RedshiftReconciler {
        &self.reconciler
    }

    /// The parameters that determine the output tables, in a stable textual form.
    pub fn fingerprint(&self) -> String {
        format!(
            "release={};radius={:016x};granularity={};targets={}",
            self.release,
            self.matcher.radius().to_bits(),
            self.dedup.granularity().as_str(),
            self.include_targets
        )
    }

    /// Run the cross-match on a batch of candidates.
    ///
    /// Arguments
    /// ---------
    /// * `store`: the observation store to query
    /// * `candidates`: the batch; must not be empty
    ///
    /// Return
    /// ------
    /// * the assembled [`ResultTables`], with one summary row per candidate
    /// * a batch-level error if the match itself failed
    pub fn run<S: ObservationStore + ?Sized>(
        &self,
        store: &mut S,
        candidates: &[Candidate],
    ) -> Result<ResultTables, MostHostsError> {
        let matches = self
            .matcher
            .match_candidates(store, candidates, self.release)?;
        let deduped = self.dedup.deduplicate(matches);

        let results: Vec<CandidateResult> = deduped
            .into_entries()
            .into_iter()
            .enumerate()
            .map(|(index, CandidateMatch { candidate, outcome, missing })| {
                let redshift = if missing.is_empty() {
                    self.reconciler.reconcile(&candidate, outcome.observations())
                } else {
                    Err(MostHostsError::DataIntegrity(
                        missing.iter().map(|m| m.to_string()).join("; "),
                    ))
                };
                if let Err(e) = &redshift {
                    error!("Unable to reconcile the redshift of {candidate}: {e}");
                }
                CandidateResult {
                    index,
                    observations: outcome,
                    redshift,
                }
            })
            .collect();

        let targets = if self.include_targets {
            Some(self.matcher.match_targets(store, candidates)?)
        } else {
            None
        };

        let tables = assemble(self.release, candidates, results, targets);
        info!(
            "{}: {} candidates, {} resolved, {} unresolved, {} without match, {} failed",
            self.release,
            tables.summary.len(),
            tables.count(SummaryStatus::Resolved),
            tables.count(SummaryStatus::Unresolved),
            tables.count(SummaryStatus::NoMatch),
            tables.count(SummaryStatus::Failed)
        );
        Ok(tables)
    }

    /// Same as [`CrossMatchPipeline::run`], going through a [`ResultCache`].
    pub fn run_cached<S: ObservationStore + ?Sized>(
        &self,
        store: &mut S,
        candidates: &[Candidate],
        cache: &ResultCache,
        policy: CachePolicy,
    ) -> Result<ResultTables, MostHostsError> {
        let key = ResultCache::key(&self.fingerprint(), candidates);
        cache.get_or_build(self.release, &key, policy, || self.run(store, candidates))
    }
}

#[cfg(test)]
mod pipeline_test {
    use super::*;
    use crate::{
        constants::ARCSEC_TO_DEG,
        night::Night,
        observations::{ExposureGroup, Observation},
        store::memory::MemoryStore,
    };
    use camino::Utf8Path;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for (night, z) in [(20230101, 0.101), (20230115, 0.1)] {
            store
                .insert_observation(
                    "daily",
                    40.0,
                    5.0,
                    Observation::new(7, ExposureGroup::new(1, 1), Night::new(night).unwrap(), z, 0.01, 0),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_run_is_idempotent() {
        let pipeline = CrossMatchPipeline::new(&PipelineConfig::default()).unwrap();
        let candidates = vec![
            Candidate::new("x", 40.0, 5.0, None).unwrap(),
            Candidate::new("y", 41.0, 5.0, None).unwrap(),
        ];
        let mut store = store();
        let first = pipeline.run(&mut store, &candidates).unwrap();
        let second = pipeline.run(&mut store, &candidates).unwrap();
        assert_eq!(first, second);

        let x = first.summary_for("x", None).unwrap();
        assert_eq!(x.status, SummaryStatus::Resolved);
        assert_eq!(x.n_obs, 1);
        assert_eq!(x.z, Some(0.1));
        assert_eq!(first.summary_for("y", None).unwrap().status, SummaryStatus::NoMatch);
        assert_eq!(first.targets, None);
    }

    #[test]
    fn test_missing_redshift_fails_the_candidate() {
        let pipeline = CrossMatchPipeline::new(&PipelineConfig::default()).unwrap();
        let mut store = store();
        for (ra, target_id) in [(40.0, 8), (41.0, 9)] {
            store
                .insert_missing_redshift(
                    "daily",
                    ra,
                    5.0,
                    target_id,
                    ExposureGroup::new(2, 4),
                    Night::new(20230120).unwrap(),
                )
                .unwrap();
        }
        let candidates = vec![
            Candidate::new("x", 40.0, 5.0, None).unwrap(),
            Candidate::new("y", 41.0, 5.0, None).unwrap(),
            Candidate::new("z", 42.0, 5.0, None).unwrap(),
        ];
        let tables = pipeline.run(&mut store, &candidates).unwrap();

        // readable observations do not mask the unreadable one
        let x = tables.summary_for("x", None).unwrap();
        assert_eq!(x.status, SummaryStatus::Failed);
        assert!(x.error.as_deref().unwrap().contains("target 8"));

        let y = tables.summary_for("y", None).unwrap();
        assert_eq!(y.status, SummaryStatus::Failed);
        assert!(y.error.as_deref().unwrap().contains("no redshift entry"));

        assert_eq!(tables.summary_for("z", None).unwrap().status, SummaryStatus::NoMatch);
    }

    #[test]
    fn test_fingerprint_tracks_parameters() {
        let base = CrossMatchPipeline::new(&PipelineConfig::default()).unwrap();
        let wider = CrossMatchPipeline::new(&PipelineConfig {
            radius_arcsec: 2.0,
            ..PipelineConfig::default()
        })
        .unwrap();
        assert_ne!(base.fingerprint(), wider.fingerprint());
        assert_ne!(
            base.fingerprint(),
            base.with_release(Release::Iron).fingerprint()
        );
        assert!((wider.matcher().radius() - 2.0 * ARCSEC_TO_DEG).abs() < 1e-15);
    }

    #[test]
    fn test_run_cached_skips_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Utf8Path::from_path(dir.path()).unwrap(), None);
        let pipeline = CrossMatchPipeline::new(&PipelineConfig::default()).unwrap();
        let candidates = vec![Candidate::new("x", 40.0, 5.0, None).unwrap()];

        let mut store = store();
        let first = pipeline
            .run_cached(&mut store, &candidates, &cache, CachePolicy::Use)
            .unwrap();
        assert_eq!(store.queries_issued(), 1);
        let second = pipeline
            .run_cached(&mut store, &candidates, &cache, CachePolicy::Use)
            .unwrap();
        assert_eq!(store.queries_issued(), 1);
        assert_eq!(first, second);

        pipeline
            .run_cached(&mut store, &candidates, &cache, CachePolicy::Refresh)
            .unwrap();
        assert_eq!(store.queries_issued(), 2);
    }
}
