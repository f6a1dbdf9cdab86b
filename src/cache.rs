//! # Result cache
//!
//! A run against the full MostHosts table takes minutes of database time, so the assembled
//! [`ResultTables`] are cached on disk as JSON.
//!
//! ## Key
//!
//! The cache key is the SHA-256 digest of everything the tables depend on: the pipeline
//! fingerprint (release, radius, deduplication granularity, target flag) and every candidate
//! (name, host index and the exact bit pattern of its position). Changing any of them
//! selects a different entry; nothing has to be invalidated by hand.
//!
//! ## Invalidation
//!
//! - [`CachePolicy::Refresh`] ignores any existing entry and regenerates it,
//! - entries older than `max_age` are regenerated,
//! - unreadable entries are regenerated with a warning.
//!
//! A cache problem never fails a run.
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    time::{Duration, SystemTime},
};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::{
    assemble::ResultTables, candidates::Candidate, config::CacheConfig,
    mosthosts_errors::MostHostsError, release::Release,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Use a valid cached entry when there is one.
    #[default]
    Use,
    /// Always regenerate and overwrite the entry.
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultCache {
    dir: Utf8PathBuf,
    max_age: Option<Duration>,
}

impl ResultCache {
    pub fn new(dir: impl Into<Utf8PathBuf>, max_age: Option<Duration>) -> Self {
        ResultCache {
            dir: dir.into(),
            max_age,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.dir.clone(), config.max_age())
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Compute the cache key of a run.
    ///
    /// Arguments
    /// ---------
    /// * `fingerprint`: description of the pipeline parameters
    /// * `candidates`: the input batch, in order
    ///
    /// Return
    /// ------
    /// * the hex-encoded SHA-256 digest
    pub fn key(fingerprint: &str, candidates: &[Candidate]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_bytes());
        for candidate in candidates {
            hasher.update([0u8]);
            hasher.update(candidate.name().as_bytes());
            hasher.update([0u8]);
            match candidate.group_key() {
                Some(k) => {
                    hasher.update([1u8]);
                    hasher.update(k.to_le_bytes());
                }
                None => hasher.update([0u8]),
            }
            hasher.update(candidate.ra().to_bits().to_le_bytes());
            hasher.update(candidate.dec().to_bits().to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn path(&self, release: Release, key: &str) -> Utf8PathBuf {
        self.dir.join(format!("{release}-{key}.json"))
    }

    fn is_stale(&self, path: &Utf8Path) -> Result<bool, MostHostsError> {
        let Some(max_age) = self.max_age else {
            return Ok(false);
        };
        let modified = fs::metadata(path)?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age > max_age)
    }

    /// Read a cached entry.
    ///
    /// Return
    /// ------
    /// * `Some(tables)` for a present, fresh and readable entry, `None` otherwise
    pub fn load(&self, release: Release, key: &str) -> Option<ResultTables> {
        let path = self.path(release, key);
        if !path.is_file() {
            debug!("No cache entry at {path}");
            return None;
        }
        match self.is_stale(&path) {
            Ok(false) => {}
            Ok(true) => {
                info!("Cache entry {path} is older than the allowed age, regenerating");
                return None;
            }
            Err(e) => {
                warn!("Unable to check the age of {path} ({e}), regenerating");
                return None;
            }
        }

        let read = || -> Result<ResultTables, MostHostsError> {
            let file = File::open(&path)?;
            Ok(serde_json::from_reader(BufReader::new(file))?)
        };
        match read() {
            Ok(tables) if tables.release == release => {
                info!("Read cached results from {path}");
                Some(tables)
            }
            Ok(tables) => {
                warn!(
                    "Cache entry {path} holds {} results instead of {release}, regenerating",
                    tables.release
                );
                None
            }
            Err(e) => {
                warn!("Unable to read cache entry {path} ({e}), regenerating");
                None
            }
        }
    }

    /// Write an entry, atomically replacing any previous one.
    pub fn store(&self, key: &str, tables: &ResultTables) -> Result<Utf8PathBuf, MostHostsError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(tables.release, key);
        let tmp = path.with_extension("json.tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(writer, tables)?;
        }
        fs::rename(&tmp, &path)?;
        debug!("Wrote cache entry {path}");
        Ok(path)
    }

    /// Return the cached tables for `key`, or build and cache them.
    ///
    /// Arguments
    /// ---------
    /// * `release`: release of the run (part of the file name)
    /// * `key`: cache key from [`ResultCache::key`]
    /// * `policy`: whether an existing entry may be used
    /// * `build`: regenerates the tables on a miss
    pub fn get_or_build<F>(
        &self,
        release: Release,
        key: &str,
        policy: CachePolicy,
        build: F,
    ) -> Result<ResultTables, MostHostsError>
    where
        F: FnOnce() -> Result<ResultTables, MostHostsError>,
    {
        if policy == CachePolicy::Use {
            if let Some(tables) = self.load(release, key) {
                return Ok(tables);
            }
        }
        let tables = build()?;
        if let Err(e) = self.store(key, &tables) {
            warn!("Unable to write cache entry for {release}: {e}");
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod cache_test {
    use super::*;
    use std::cell::Cell;

    fn tables(release: Release) -> ResultTables {
        ResultTables {
            release,
            observations: Vec::new(),
            summary: Vec::new(),
            targets: None,
        }
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("a", 10.0, 10.0, Some(0)).unwrap(),
            Candidate::new("b", 20.0, -5.0, None).unwrap(),
        ]
    }

    #[test]
    fn test_key_depends_on_every_input() {
        let cands = candidates();
        let key = ResultCache::key("daily", &cands);
        assert_eq!(key.len(), 64);
        assert_eq!(key, ResultCache::key("daily", &cands));
        assert_ne!(key, ResultCache::key("iron", &cands));

        let mut moved = cands.clone();
        moved[1] = Candidate::new("b", 20.0, -5.000001, None).unwrap();
        assert_ne!(key, ResultCache::key("daily", &moved));

        let mut rekeyed = cands.clone();
        rekeyed[1] = Candidate::new("b", 20.0, -5.0, Some(0)).unwrap();
        assert_ne!(key, ResultCache::key("daily", &rekeyed));
    }

    #[test]
    fn test_get_or_build_uses_and_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(Utf8Path::from_path(dir.path()).unwrap(), None);
        let builds = Cell::new(0);
        let build = || {
            builds.set(builds.get() + 1);
            Ok(tables(Release::Fuji))
        };

        let key = ResultCache::key("fp", &candidates());
        cache
            .get_or_build(Release::Fuji, &key, CachePolicy::Use, build)
            .unwrap();
        cache
            .get_or_build(Release::Fuji, &key, CachePolicy::Use, build)
            .unwrap();
        assert_eq!(builds.get(), 1);
        assert!(cache.path(Release::Fuji, &key).is_file());

        cache
            .get_or_build(Release::Fuji, &key, CachePolicy::Refresh, build)
            .unwrap();
        assert_eq!(builds.get(), 2);
    }

    #[test]
    fn test_stale_and_corrupt_entries_are_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let stale = ResultCache::new(root, Some(Duration::ZERO));
        stale.store("k", &tables(Release::Daily)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(stale.load(Release::Daily, "k"), None);

        let cache = ResultCache::new(root, None);
        assert!(cache.load(Release::Daily, "k").is_some());
        fs::write(cache.path(Release::Daily, "k"), "{not json").unwrap();
        assert_eq!(cache.load(Release::Daily, "k"), None);
    }
}
