//! Upload of host-galaxy spectra to the MostHosts SkyPortal group.
//!
//! Each spectrum is labelled `Host <k> <yyyy-mm-dd>`, so the spectra already on a source
//! tell which (host, night) pairs are done. An [`UploadLedger`] kept on disk records the
//! same pairs between runs and avoids refetching every source.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind},
    sync::LazyLock,
    time::Duration,
};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    assemble::ResultTables,
    candidates::HostRecord,
    constants::TargetId,
    mosthosts_errors::MostHostsError,
    night::Night,
    skyportal::{RemoteSpectrum, SpectrumService},
    spectrum::{coadd_path, Spectrum, SpectrumReader},
};

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Host (\d+) (\d{4}-\d{2}-\d{2}) ?(\d+)?$").expect("valid label regex")
});

pub fn spectrum_label(host: i64, night: Night) -> String {
    format!("Host {host} {}", night.iso_date())
}

/// Host number and night of a label written by [`spectrum_label`].
///
/// A trailing counter (`Host 1 2023-01-15 2`) is accepted and ignored.
pub fn parse_label(label: &str) -> Option<(i64, Night)> {
    let caps = LABEL.captures(label.trim())?;
    let host = caps[1].parse().ok()?;
    let night = caps[2].parse().ok()?;
    Some((host, night))
}

/// (host, night) pairs uploaded so far, per SkyPortal object id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadLedger {
    entries: BTreeMap<String, BTreeMap<i64, BTreeSet<Night>>>,
}

impl UploadLedger {
    /// Read a ledger, starting empty when the file does not exist.
    pub fn load(path: &Utf8Path) -> Result<Self, MostHostsError> {
        match File::open(path) {
            Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No upload ledger at {path}, starting a new one");
                Ok(UploadLedger::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), MostHostsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        serde_json::to_writer_pretty(BufWriter::new(File::create(&tmp)?), self)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn contains(&self, obj_id: &str, host: i64, night: Night) -> bool {
        self.entries
            .get(obj_id)
            .and_then(|hosts| hosts.get(&host))
            .is_some_and(|nights| nights.contains(&night))
    }

    /// Record a pair; returns `false` if it was already known.
    pub fn record(&mut self, obj_id: &str, host: i64, night: Night) -> bool {
        self.entries
            .entry(obj_id.to_string())
            .or_default()
            .entry(host)
            .or_default()
            .insert(night)
    }

    /// Record the spectra already on a source, from their labels.
    pub fn record_remote(&mut self, obj_id: &str, spectra: &[RemoteSpectrum]) -> usize {
        let mut added = 0;
        for spectrum in spectra {
            match spectrum.label.as_deref().and_then(parse_label) {
                Some((host, night)) => {
                    if self.record(obj_id, host, night) {
                        added += 1;
                    }
                }
                None => debug!(
                    "{obj_id}: spectrum {} has no host label ({:?})",
                    spectrum.id, spectrum.label
                ),
            }
        }
        added
    }

    pub fn n_objects(&self) -> usize {
        self.entries.len()
    }
}

/// Body of `POST /api/spectra`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumUpload {
    pub obj_id: String,
    pub label: String,
    pub wavelengths: Vec<f64>,
    pub fluxes: Vec<f64>,
    pub errors: Vec<f64>,
    pub instrument_id: i64,
    pub observed_at: String,
    pub group_ids: Vec<i64>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SpectrumUpload {
    pub fn new(
        item: &UploadItem,
        spectrum: &Spectrum,
        instrument_id: i64,
        group_id: i64,
    ) -> Result<Self, MostHostsError> {
        Ok(SpectrumUpload {
            obj_id: item.obj_id.clone(),
            label: spectrum_label(item.host, item.night),
            wavelengths: spectrum.wavelength().to_vec(),
            fluxes: spectrum.flux().to_vec(),
            errors: spectrum.errors()?,
            instrument_id,
            observed_at: format!("{}T00:00:00", item.night.iso_date()),
            group_ids: vec![group_id],
            kind: "host_center".into(),
        })
    }
}

/// One spectrum to put on SkyPortal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UploadItem {
    pub obj_id: String,
    pub host: i64,
    pub night: Night,
    pub target_id: TargetId,
    pub redshift_file: String,
}

/// Trustworthy canonical observations of `tables` that can be uploaded, one item per
/// (object, host, night), sorted.
///
/// Hosts without a host number or without a recorded redshift file are skipped.
pub fn plan_uploads(hosts: &[HostRecord], tables: &ResultTables) -> Vec<UploadItem> {
    let obj_ids: HashMap<(&str, Option<i64>), &str> = hosts
        .iter()
        .map(|h| {
            (
                (h.candidate.name(), h.candidate.group_key()),
                h.supernova.display_name(),
            )
        })
        .collect();

    let mut items = BTreeMap::new();
    for row in tables.observations.iter().filter(|r| r.zwarn == Some(0)) {
        let (Some(host), Some(night), Some(target_id), Some(file)) =
            (row.group_key, row.night, row.target_id, row.filename.as_ref())
        else {
            continue;
        };
        let Some(obj_id) = obj_ids.get(&(row.name.as_str(), row.group_key)) else {
            warn!("{} host {host} is not in the host table", row.name);
            continue;
        };
        items
            .entry((obj_id.to_string(), host, night))
            .or_insert_with(|| UploadItem {
                obj_id: obj_id.to_string(),
                host,
                night,
                target_id,
                redshift_file: file.clone(),
            });
    }
    items.into_values().collect()
}

#[derive(Debug, Default, PartialEq)]
pub struct UploadReport {
    pub uploaded: Vec<UploadItem>,
    /// Already on SkyPortal (from the ledger or the source's labels).
    pub skipped: Vec<UploadItem>,
    pub failed: Vec<(UploadItem, String)>,
}

pub struct SpectrumUploader<'a, C, R: ?Sized> {
    service: &'a C,
    reader: &'a R,
    redux_dir: Utf8PathBuf,
    instrument_id: i64,
    group_id: i64,
    pause: Duration,
    dry_run: bool,
}

impl<'a, C: SpectrumService, R: SpectrumReader + ?Sized> SpectrumUploader<'a, C, R> {
    pub fn new(
        service: &'a C,
        reader: &'a R,
        redux_dir: impl Into<Utf8PathBuf>,
        instrument_id: i64,
        group_id: i64,
    ) -> Self {
        SpectrumUploader {
            service,
            reader,
            redux_dir: redux_dir.into(),
            instrument_id,
            group_id,
            pause: Duration::ZERO,
            dry_run: false,
        }
    }

    /// Pause between two successive uploads.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Log what would be uploaded without posting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    async fn upload_one(&self, item: &UploadItem) -> Result<(), MostHostsError> {
        let path = coadd_path(&self.redux_dir, &item.redshift_file)?;
        let spectrum = self.reader.read(&path, item.target_id)?.combine()?;
        let upload = SpectrumUpload::new(item, &spectrum, self.instrument_id, self.group_id)?;
        if self.dry_run {
            info!(
                "Would upload {} to {} ({} samples)",
                upload.label,
                upload.obj_id,
                spectrum.len()
            );
            return Ok(());
        }
        self.service.post_spectrum(&upload).await?;
        info!("Uploaded {} to {}", upload.label, upload.obj_id);
        Ok(())
    }

    /// Upload every item not yet on SkyPortal.
    ///
    /// Arguments
    /// ---------
    /// * `items`: the planned uploads, see [`plan_uploads`]
    /// * `ledger`: updated with the labels found on SkyPortal and with each successful upload
    ///   (untouched by the uploads of a dry run)
    ///
    /// Return
    /// ------
    /// * what was uploaded, skipped and failed; a failed item does not stop the others
    pub async fn upload(
        &self,
        items: &[UploadItem],
        ledger: &mut UploadLedger,
    ) -> Result<UploadReport, MostHostsError> {
        let mut report = UploadReport::default();
        let mut refreshed = BTreeSet::new();

        for item in items {
            if !ledger.contains(&item.obj_id, item.host, item.night)
                && refreshed.insert(item.obj_id.clone())
            {
                match self.service.spectra_for_obj(&item.obj_id).await {
                    Ok(remote) => {
                        let added = ledger.record_remote(&item.obj_id, &remote);
                        debug!("{}: {} known spectra on SkyPortal", item.obj_id, added);
                    }
                    Err(e) => {
                        error!("Failed to read the spectra of {}: {e}", item.obj_id);
                        report.failed.push((item.clone(), e.to_string()));
                        continue;
                    }
                }
            }
            if ledger.contains(&item.obj_id, item.host, item.night) {
                report.skipped.push(item.clone());
                continue;
            }

            match self.upload_one(item).await {
                Ok(()) => {
                    if !self.dry_run {
                        ledger.record(&item.obj_id, item.host, item.night);
                        if !self.pause.is_zero() {
                            tokio::time::sleep(self.pause).await;
                        }
                    }
                    report.uploaded.push(item.clone());
                }
                Err(e) => {
                    error!(
                        "Failed to upload host {} {} of {}: {e}",
                        item.host, item.night, item.obj_id
                    );
                    report.failed.push((item.clone(), e.to_string()));
                }
            }
        }
        info!(
            "{} {} spectra, {} already present, {} failed",
            if self.dry_run { "Would upload" } else { "Uploaded" },
            report.uploaded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod upload_test {
    use super::*;
    use crate::{
        assemble::ObservationRow,
        candidates::{Candidate, SupernovaInfo},
        release::Release,
        spectrum::{Camera, CameraSpectra},
    };
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn night(n: u32) -> Night {
        Night::new(n).unwrap()
    }

    #[test]
    fn test_label_roundtrip() {
        let label = spectrum_label(2, night(20230115));
        assert_eq!(label, "Host 2 2023-01-15");
        assert_eq!(parse_label(&label), Some((2, night(20230115))));
        assert_eq!(parse_label("Host 2 2023-01-15 3"), Some((2, night(20230115))));
        assert_eq!(parse_label("Keck LRIS 2023-01-15"), None);
        assert_eq!(parse_label("Host 2 2023-02-30"), None);
    }

    #[test]
    fn test_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("ledger.json")).unwrap();

        let mut ledger = UploadLedger::load(&path).unwrap();
        assert_eq!(ledger.n_objects(), 0);
        assert!(ledger.record("2020xyz", 0, night(20230115)));
        assert!(!ledger.record("2020xyz", 0, night(20230115)));
        ledger.save(&path).unwrap();

        let reloaded = UploadLedger::load(&path).unwrap();
        assert_eq!(reloaded, ledger);
        assert!(reloaded.contains("2020xyz", 0, night(20230115)));
        assert!(!reloaded.contains("2020xyz", 1, night(20230115)));
    }

    #[test]
    fn test_record_remote_reads_labels() {
        let mut ledger = UploadLedger::default();
        let remote = vec![
            RemoteSpectrum {
                id: 1,
                label: Some("Host 0 2023-01-15".into()),
                observed_at: None,
            },
            RemoteSpectrum {
                id: 2,
                label: Some("classification spectrum".into()),
                observed_at: None,
            },
            RemoteSpectrum {
                id: 3,
                label: None,
                observed_at: None,
            },
        ];
        assert_eq!(ledger.record_remote("2020xyz", &remote), 1);
        assert!(ledger.contains("2020xyz", 0, night(20230115)));
    }

    fn observation_row(name: &str, k: i64, night: u32, zwarn: i64) -> ObservationRow {
        ObservationRow {
            name: name.into(),
            group_key: Some(k),
            ra: 150.0,
            dec: -10.0,
            target_id: Some(39627),
            tile_id: Some(1000),
            petal: Some(3),
            device: Some(41),
            night: Some(Night::new(night).unwrap()),
            z: Some(0.045),
            zerr: Some(0.002),
            zwarn: Some(zwarn),
            chi2: None,
            deltachi2: None,
            spectype: None,
            subtype: None,
            filename: Some(format!("tiles/1000/{night}/zbest-3-1000-thru{night}.fits")),
        }
    }

    fn hosts() -> Vec<HostRecord> {
        vec![HostRecord {
            candidate: Candidate::new("SN2020xyz", 150.0, -10.0, Some(0)).unwrap(),
            supernova: SupernovaInfo {
                snname: "SN2020xyz".into(),
                tns_name: Some("2020xyz".into()),
                ..SupernovaInfo::default()
            },
        }]
    }

    fn tables() -> ResultTables {
        ResultTables {
            release: Release::Daily,
            observations: vec![
                observation_row("SN2020xyz", 0, 20230115, 0),
                observation_row("SN2020xyz", 0, 20230120, 0),
                observation_row("SN2020xyz", 0, 20230125, 4),
                observation_row("unknown", 0, 20230115, 0),
            ],
            summary: Vec::new(),
            targets: None,
        }
    }

    #[test]
    fn test_plan_uploads() {
        let items = plan_uploads(&hosts(), &tables());
        let planned: Vec<_> = items.iter().map(|i| (i.obj_id.as_str(), i.night)).collect();
        assert_eq!(
            planned,
            vec![("2020xyz", night(20230115)), ("2020xyz", night(20230120))]
        );
    }

    struct FakeReader;

    impl SpectrumReader for FakeReader {
        fn read(&self, _: &Utf8Path, _: TargetId) -> Result<CameraSpectra, MostHostsError> {
            let mut cameras = CameraSpectra::new();
            cameras.insert(
                Camera::B,
                Spectrum::new(vec![4000.0, 4001.0], vec![1.0, 2.0], vec![4.0, 0.25])?,
            );
            Ok(cameras)
        }
    }

    #[derive(Default)]
    struct FakeService {
        remote: Vec<RemoteSpectrum>,
        posted: Mutex<Vec<SpectrumUpload>>,
    }

    impl SpectrumService for FakeService {
        async fn spectra_for_obj(&self, _: &str) -> Result<Vec<RemoteSpectrum>, MostHostsError> {
            Ok(self.remote.clone())
        }

        async fn post_spectrum(&self, upload: &SpectrumUpload) -> Result<Value, MostHostsError> {
            self.posted.lock().unwrap().push(upload.clone());
            Ok(json!({"id": 1}))
        }
    }

    #[tokio::test]
    async fn test_upload_skips_existing_labels() {
        let service = FakeService {
            remote: vec![RemoteSpectrum {
                id: 7,
                label: Some("Host 0 2023-01-15".into()),
                observed_at: None,
            }],
            ..FakeService::default()
        };
        let reader = FakeReader;
        let items = plan_uploads(&hosts(), &tables());
        let mut ledger = UploadLedger::default();

        let uploader = SpectrumUploader::new(&service, &reader, "/redux", 5, 36);
        let report = uploader.upload(&items, &mut ledger).await.unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.uploaded.len(), 1);
        assert!(report.failed.is_empty());

        let posted = service.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].label, "Host 0 2023-01-20");
        assert_eq!(posted[0].observed_at, "2023-01-20T00:00:00");
        assert_eq!(posted[0].group_ids, vec![36]);
        assert_eq!(posted[0].errors, vec![0.5, 2.0]);
        assert!(ledger.contains("2020xyz", 0, night(20230120)));

        // second run has nothing left to do
        drop(posted);
        let report = uploader.upload(&items, &mut ledger).await.unwrap();
        assert_eq!(report.skipped.len(), 2);
        assert!(report.uploaded.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_posts_nothing() {
        let service = FakeService::default();
        let reader = FakeReader;
        let items = plan_uploads(&hosts(), &tables());
        let mut ledger = UploadLedger::default();

        let report = SpectrumUploader::new(&service, &reader, "/redux", 5, 36)
            .dry_run(true)
            .upload(&items, &mut ledger)
            .await
            .unwrap();
        assert_eq!(report.uploaded.len(), 2);
        assert!(service.posted.lock().unwrap().is_empty());
        assert!(!ledger.contains("2020xyz", 0, night(20230115)));
    }

    #[test]
    fn test_payload_field_names() {
        let item = UploadItem {
            obj_id: "2020xyz".into(),
            host: 1,
            night: night(20230115),
            target_id: 1,
            redshift_file: String::new(),
        };
        let spectrum = Spectrum::new(vec![4000.0], vec![1.0], vec![1.0]).unwrap();
        let payload = serde_json::to_value(SpectrumUpload::new(&item, &spectrum, 5, 36).unwrap())
            .unwrap();
        assert_eq!(payload["type"], "host_center");
        assert_eq!(payload["label"], "Host 1 2023-01-15");
        assert_eq!(payload["instrument_id"], 5);
    }
}
