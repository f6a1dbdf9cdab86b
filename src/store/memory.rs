//! In-memory observation store.
//!
//! Holds a per-schema list of positioned observations and target-selection entries and
//! answers radius queries by brute force. Coadds lacking a redshift entry can be inserted
//! too, to reproduce an inconsistent database. Meant for fixtures, tests and small offline
//! catalogs; it is not a spatial index.
use std::collections::HashMap;

use log::debug;

use crate::{
    candidates::{Candidate, HostRecord},
    constants::{Degree, TargetId},
    mosthosts_errors::MostHostsError,
    night::Night,
    observations::{ExposureGroup, Observation},
    release::Release,
    sky::angular_separation,
    store::{MissingRedshift, ObservationStore, RadialJoin, RawMatch, TargetMatch, TargetRecord},
};

#[derive(Debug, Clone)]
struct Positioned<T> {
    ra: Degree,
    dec: Degree,
    item: T,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    observations: HashMap<&'static str, Vec<Positioned<Observation>>>,
    missing: HashMap<&'static str, Vec<Positioned<(TargetId, ExposureGroup, Night)>>>,
    targets: Vec<Positioned<TargetRecord>>,
    hosts: Vec<HostRecord>,
    queries: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observation of `schema` (e.g. `"fuji"`) located at `(ra, dec)`.
    ///
    /// Arguments
    /// ---------
    /// * `schema`: the release schema the observation belongs to; must be one of the
    ///   schemas listed by [`Release::schemas`]
    /// * `ra`, `dec`: fiber target position in degrees
    /// * `observation`: the observation row
    pub fn insert_observation(
        &mut self,
        schema: &str,
        ra: Degree,
        dec: Degree,
        observation: Observation,
    ) -> Result<(), MostHostsError> {
        let schema = known_schema(schema)?;
        self.observations
            .entry(schema)
            .or_default()
            .push(Positioned {
                ra,
                dec,
                item: observation,
            });
        Ok(())
    }

    /// Add a coadd of `schema` at `(ra, dec)` whose redshift entry is missing.
    pub fn insert_missing_redshift(
        &mut self,
        schema: &str,
        ra: Degree,
        dec: Degree,
        target_id: TargetId,
        exposure_group: ExposureGroup,
        night: Night,
    ) -> Result<(), MostHostsError> {
        let schema = known_schema(schema)?;
        self.missing.entry(schema).or_default().push(Positioned {
            ra,
            dec,
            item: (target_id, exposure_group, night),
        });
        Ok(())
    }

    pub fn insert_target(&mut self, ra: Degree, dec: Degree, target: TargetRecord) {
        self.targets.push(Positioned {
            ra,
            dec,
            item: target,
        });
    }

    pub fn insert_host(&mut self, host: HostRecord) {
        self.hosts.push(host);
    }

    /// Number of bulk queries answered so far.
    pub fn queries_issued(&self) -> usize {
        self.queries
    }
}

fn known_schema(schema: &str) -> Result<&'static str, MostHostsError> {
    Release::ALL
        .iter()
        .flat_map(|r| r.schemas().iter())
        .find(|s| **s == schema)
        .copied()
        .ok_or_else(|| MostHostsError::UnknownCatalog(schema.to_string()))
}

fn within<'a, T>(
    entries: &'a [Positioned<T>],
    candidates: &'a [Candidate],
    radius: Degree,
) -> impl Iterator<Item = (usize, &'a T)> + 'a {
    candidates.iter().enumerate().flat_map(move |(idx, c)| {
        entries
            .iter()
            .filter(move |e| angular_separation(c.ra(), c.dec(), e.ra, e.dec) <= radius)
            .map(move |e| (idx, &e.item))
    })
}

impl ObservationStore for MemoryStore {
    fn radial_join(
        &mut self,
        release: Release,
        candidates: &[Candidate],
        radius: Degree,
    ) -> Result<RadialJoin, MostHostsError> {
        let mut join = RadialJoin::default();
        for schema in release.schemas() {
            self.queries += 1;
            if let Some(entries) = self.observations.get(schema) {
                join.matches.extend(within(entries, candidates, radius).map(
                    |(candidate, obs)| RawMatch {
                        candidate,
                        observation: obs.clone(),
                    },
                ));
            }
            if let Some(entries) = self.missing.get(schema) {
                join.missing.extend(within(entries, candidates, radius).map(
                    |(candidate, &(target_id, exposure_group, night))| MissingRedshift {
                        candidate,
                        schema: schema.to_string(),
                        target_id,
                        exposure_group,
                        night,
                    },
                ));
            }
        }
        debug!(
            "In-memory radial join on {release}: {} candidates, {} pairs, {} without redshift",
            candidates.len(),
            join.matches.len(),
            join.missing.len()
        );
        Ok(join)
    }

    fn target_join(
        &mut self,
        candidates: &[Candidate],
        radius: Degree,
    ) -> Result<Vec<TargetMatch>, MostHostsError> {
        self.queries += 1;
        Ok(within(&self.targets, candidates, radius)
            .map(|(candidate, target)| TargetMatch {
                candidate,
                target: target.clone(),
            })
            .collect())
    }

    fn load_hosts(&mut self) -> Result<Vec<HostRecord>, MostHostsError> {
        Ok(self.hosts.clone())
    }
}

#[cfg(test)]
mod memory_store_test {
    use super::*;
    use crate::{constants::ARCSEC_TO_DEG, night::Night, observations::ExposureGroup};

    fn obs(target_id: i64) -> Observation {
        Observation::new(
            target_id,
            ExposureGroup::new(1000, 3),
            Night::new(20230101).unwrap(),
            0.1,
            0.001,
            0,
        )
    }

    #[test]
    fn test_radius_is_respected() {
        let mut store = MemoryStore::new();
        store
            .insert_observation("daily", 150.0, -10.0 + 0.5 * ARCSEC_TO_DEG, obs(1))
            .unwrap();
        store
            .insert_observation("daily", 150.0, -10.0 + 2.0 * ARCSEC_TO_DEG, obs(2))
            .unwrap();

        let candidates = vec![Candidate::new("a", 150.0, -10.0, None).unwrap()];
        let matches = store
            .radial_join(Release::Daily, &candidates, ARCSEC_TO_DEG)
            .unwrap()
            .matches;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].observation.target_id, 1);
        assert_eq!(store.queries_issued(), 1);
    }

    #[test]
    fn test_fujilupe_unions_schemas() {
        let mut store = MemoryStore::new();
        store.insert_observation("fuji", 10.0, 10.0, obs(1)).unwrap();
        store
            .insert_observation("guadalupe", 10.0, 10.0, obs(2))
            .unwrap();
        store.insert_observation("iron", 10.0, 10.0, obs(3)).unwrap();

        let candidates = vec![Candidate::new("a", 10.0, 10.0, None).unwrap()];
        let matches = store
            .radial_join(Release::Fujilupe, &candidates, ARCSEC_TO_DEG)
            .unwrap()
            .matches;
        let mut ids: Vec<_> = matches.iter().map(|m| m.observation.target_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_missing_redshift_is_reported() {
        let mut store = MemoryStore::new();
        store
            .insert_missing_redshift(
                "daily",
                150.0,
                -10.0,
                7,
                ExposureGroup::new(1000, 3),
                Night::new(20230115).unwrap(),
            )
            .unwrap();

        let candidates = vec![
            Candidate::new("far", 10.0, 10.0, None).unwrap(),
            Candidate::new("near", 150.0, -10.0, None).unwrap(),
        ];
        let join = store
            .radial_join(Release::Daily, &candidates, ARCSEC_TO_DEG)
            .unwrap();
        assert!(join.matches.is_empty());
        assert_eq!(join.missing.len(), 1);
        assert_eq!(join.missing[0].candidate, 1);
        assert_eq!(
            join.missing[0].to_string(),
            "daily: no redshift entry for target 7 tile 1000 petal 3 night 20230115"
        );
    }

    #[test]
    fn test_unknown_schema_is_rejected() {
        let mut store = MemoryStore::new();
        let err = store
            .insert_observation("public", 10.0, 10.0, obs(1))
            .unwrap_err();
        assert_eq!(err, MostHostsError::UnknownCatalog("public".into()));
    }
}
