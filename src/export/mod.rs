//! # Bulk spectrum export
//!
//! Exports the DESI spectra of every MostHosts host with at least one trustworthy redshift,
//! for ingestion by an external spectrum repository.
//!
//! ## Flow
//!
//! 1. The coordinator selects the hosts from the result tables of a cross-match run.
//! 2. Each host is a task on a [`worker_pool::WorkerPool`]. A worker owns its own
//!    observation store, re-runs the single-candidate lookup, reads the coadd spectrum of
//!    every trustworthy observation through a [`SpectrumReader`], combines the cameras and
//!    writes `<out>/<h0>/<h1>/<name>_host<k>_<dex>.csv`, where `h0h1` is the
//!    [`pearson::Bucket`] of the supernova name.
//! 3. The coordinator sorts the exported spectra, computes the variance-weighted redshift
//!    of each DESI target and writes one ingest file `<out>/<h0><h1>.csv` per bucket
//!    ([`ingest`]).
//!
//! A host whose task fails is logged and reported in [`ExportReport::failed`]; the other
//! hosts are still exported.
pub mod ingest;
pub mod pearson;
pub mod worker_pool;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::{self, File},
    io::{BufWriter, ErrorKind},
};

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use log::{error, info, warn};

use crate::{
    assemble::ResultTables,
    candidates::{CandidateKey, HostRecord},
    constants::TargetId,
    dedup::Deduplicator,
    export::{
        ingest::{write_ingest, IngestRow},
        pearson::Bucket,
        worker_pool::WorkerPool,
    },
    matcher::PositionalMatcher,
    mosthosts_errors::MostHostsError,
    night::Night,
    observations::CanonicalObservation,
    reconcile::RedshiftReconciler,
    release::Release,
    spectrum::{coadd_path, write_ascii, SpectrumReader},
    store::ObservationStore,
};

/// One spectrum written by the exporter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedSpectrum {
    pub snname: String,
    pub host: Option<i64>,
    pub target_id: TargetId,
    /// Running number of the spectrum among the host's exports.
    pub dex: usize,
    pub night: Night,
    pub bucket: Bucket,
    pub path: Utf8PathBuf,
}

/// What a worker returns for one host.
#[derive(Debug, Clone)]
pub struct HostExport {
    pub spectra: Vec<ExportedSpectrum>,
    pub observations: Vec<CanonicalObservation>,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub spectra: Vec<ExportedSpectrum>,
    pub ingest_files: Vec<Utf8PathBuf>,
    /// Hosts whose export failed, with the reason.
    pub failed: Vec<(CandidateKey, String)>,
}

pub struct SpectrumExporter<'a, R: ?Sized> {
    release: Release,
    matcher: PositionalMatcher,
    dedup: Deduplicator,
    reconciler: RedshiftReconciler,
    pool: WorkerPool,
    out_dir: Utf8PathBuf,
    redux_dir: Utf8PathBuf,
    reader: &'a R,
}

/// File-system safe form of a supernova name.
pub fn clean_name(snname: &str) -> String {
    snname.replace('/', "_")
}

/// Hosts having at least one trustworthy canonical observation in `tables`, without
/// duplicates, in table order.
pub fn hosts_to_export<'h>(hosts: &'h [HostRecord], tables: &ResultTables) -> Vec<&'h HostRecord> {
    let trusted: HashSet<(&str, Option<i64>)> = tables
        .observations
        .iter()
        .filter(|row| row.zwarn == Some(0))
        .map(|row| (row.name.as_str(), row.group_key))
        .collect();
    let mut seen = HashSet::new();
    hosts
        .iter()
        .filter(|h| trusted.contains(&(h.candidate.name(), h.candidate.group_key())))
        .filter(|h| seen.insert(h.candidate.key()))
        .collect()
}

impl<'a, R: SpectrumReader + Sync + ?Sized> SpectrumExporter<'a, R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        release: Release,
        matcher: PositionalMatcher,
        dedup: Deduplicator,
        reconciler: RedshiftReconciler,
        pool: WorkerPool,
        out_dir: impl Into<Utf8PathBuf>,
        redux_dir: impl Into<Utf8PathBuf>,
        reader: &'a R,
    ) -> Self {
        SpectrumExporter {
            release,
            matcher,
            dedup,
            reconciler,
            pool,
            out_dir: out_dir.into(),
            redux_dir: redux_dir.into(),
            reader,
        }
    }

    fn spectrum_path(&self, bucket: Bucket, host: &HostRecord, dex: usize) -> Utf8PathBuf {
        let clean = clean_name(&host.supernova.snname);
        let file = match host.candidate.group_key() {
            Some(k) => format!("{clean}_host{k}_{dex}.csv"),
            None => format!("{clean}_{dex}.csv"),
        };
        bucket_dir(&self.out_dir, bucket).join(file)
    }

    /// Export the spectra of one host, using the worker's own store.
    pub fn export_host<S: ObservationStore + ?Sized>(
        &self,
        store: &mut S,
        host: &HostRecord,
    ) -> Result<HostExport, MostHostsError> {
        let observations =
            self.matcher
                .find_single(store, &host.candidate, self.release, &self.dedup)?;
        let bucket = Bucket::of(&host.supernova.snname);

        let mut spectra = Vec::new();
        for obs in observations.iter().filter(|o| o.is_trustworthy()) {
            let Some(source) = obs.source_path.as_deref() else {
                warn!("{}: no redshift file recorded for {}, skipping", host.candidate, **obs);
                continue;
            };
            let path = coadd_path(&self.redux_dir, source)?;
            let cameras = match self.reader.read(&path, obs.target_id) {
                Ok(c) => c,
                Err(MostHostsError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
                    error!(
                        "Failed to find {path} for target {} of {}: {e}; skipping",
                        obs.target_id, host.candidate
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            let spectrum = cameras.combine()?;

            let dex = spectra.len();
            let outfile = self.spectrum_path(bucket, host, dex);
            if let Some(parent) = outfile.parent() {
                fs::create_dir_all(parent)?;
            }
            write_ascii(File::create(&outfile)?, &spectrum)?;

            spectra.push(ExportedSpectrum {
                snname: host.supernova.snname.clone(),
                host: host.candidate.group_key(),
                target_id: obs.target_id,
                dex,
                night: obs.night,
                bucket,
                path: outfile,
            });
        }
        info!("{}: exported {} spectra", host.candidate, spectra.len());
        Ok(HostExport {
            spectra,
            observations,
        })
    }

    /// Export every eligible host and write the per-bucket ingest files.
    ///
    /// Arguments
    /// ---------
    /// * `hosts`: the full MostHosts table (used to count host candidates per supernova)
    /// * `tables`: the result of a cross-match run on the same release
    /// * `open_store`: opens one observation store per worker
    ///
    /// Return
    /// ------
    /// * the exported spectra, the ingest files written and the failed hosts
    pub fn export<S, F>(
        &self,
        hosts: &[HostRecord],
        tables: &ResultTables,
        open_store: F,
    ) -> Result<ExportReport, MostHostsError>
    where
        S: ObservationStore,
        F: Fn() -> Result<S, MostHostsError> + Sync,
    {
        let selected = hosts_to_export(hosts, tables);
        info!(
            "Exporting spectra of {} hosts on {} workers",
            selected.len(),
            self.pool.n_workers()
        );
        fs::create_dir_all(&self.out_dir)?;

        let outcomes = self.pool.run(selected, open_store, |store, host| {
            self.export_host(store, host)
        })?;

        let mut report = ExportReport::default();
        let mut observations: HashMap<CandidateKey, Vec<CanonicalObservation>> = HashMap::new();
        let mut by_host: HashMap<CandidateKey, &HostRecord> = HashMap::new();
        for outcome in outcomes {
            let key = outcome.task.candidate.key();
            match outcome.result {
                Ok(export) => {
                    report.spectra.extend(export.spectra);
                    observations.insert(key.clone(), export.observations);
                    by_host.insert(key, outcome.task);
                }
                Err(e) => {
                    error!("Export of {key} failed: {e}");
                    report.failed.push((key, e.to_string()));
                }
            }
        }
        report.failed.sort();
        report.spectra.sort_by(|a, b| {
            (a.bucket, &a.snname, a.host, a.target_id, a.dex).cmp(&(
                b.bucket,
                &b.snname,
                b.host,
                b.target_id,
                b.dex,
            ))
        });

        let hosts_per_sn = hosts.iter().counts_by(|h| h.supernova.snname.as_str());

        let mut buckets: BTreeMap<Bucket, Vec<IngestRow<'_>>> = BTreeMap::new();
        for spectrum in &report.spectra {
            let key = CandidateKey {
                name: spectrum.snname.clone(),
                group_key: spectrum.host,
            };
            let (Some(host), Some(host_obs)) = (by_host.get(&key), observations.get(&key)) else {
                error!("No host record for exported spectrum {}", spectrum.path);
                continue;
            };
            let host_z = match self.reconciler.reconcile_observations(
                &format!("{key} target {}", spectrum.target_id),
                host_obs
                    .iter()
                    .filter(|o| o.target_id == spectrum.target_id)
                    .map(|o| &**o),
            ) {
                Ok(z) => z.z(),
                Err(e) => {
                    error!("{e}");
                    None
                }
            };
            buckets.entry(spectrum.bucket).or_default().push(IngestRow {
                supernova: &host.supernova,
                host_ra: host.candidate.ra(),
                host_dec: host.candidate.dec(),
                n_host_candidates: hosts_per_sn
                    .get(spectrum.snname.as_str())
                    .copied()
                    .unwrap_or(1),
                spectrum,
                host_z,
            });
        }

        let mut ingest_files = Vec::with_capacity(buckets.len());
        for (bucket, rows) in &buckets {
            let path = self.out_dir.join(format!("{bucket}.csv"));
            info!("Writing {path}; {} rows", rows.len());
            write_ingest(BufWriter::new(File::create(&path)?), rows)?;
            ingest_files.push(path);
        }
        report.ingest_files = ingest_files;

        info!(
            "Exported {} spectra in {} ingest files, {} hosts failed",
            report.spectra.len(),
            report.ingest_files.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// Directory holding the exported spectra of a bucket.
pub fn bucket_dir(out_dir: &Utf8Path, bucket: Bucket) -> Utf8PathBuf {
    out_dir
        .join(bucket.high().to_string())
        .join(bucket.low().to_string())
}
