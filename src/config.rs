//! # Pipeline configuration
//!
//! All the knobs of a run are gathered in a [`PipelineConfig`], read from a TOML file. Every
//! field has a default, so an empty file (or no file at all) is a valid configuration:
//!
//! ```toml
//! release = "fujilupe"
//! radius_arcsec = 1.0
//! dispersion_threshold = 0.001
//! granularity = "exposure_group"
//! include_targets = true
//! output_dir = "out"
//!
//! [database]
//! host = "decatdb.lbl.gov"
//! credentials_file = "/home/me/secrets/decatdb_desi_desi"
//!
//! [cache]
//! dir = "cache"
//! max_age_hours = 24.0
//!
//! [skyportal]
//! token = "..."
//! ```
//!
//! The configuration is passed explicitly to the pipeline and to the exporters; nothing is
//! read from global state.
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        ArcSec, Degree, ARCSEC_TO_DEG, DEFAULT_DISPERSION_THRESHOLD, DEFAULT_EXPORT_WORKERS,
        DEFAULT_SKYPORTAL_URL, MOSTHOSTS_GROUP_ID,
    },
    dedup::DedupGranularity,
    mosthosts_errors::MostHostsError,
    release::Release,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub release: Release,
    pub radius_arcsec: ArcSec,
    pub dispersion_threshold: f64,
    pub granularity: DedupGranularity,
    /// Also match the candidates against the DESI target-selection catalog.
    pub include_targets: bool,
    pub output_dir: Utf8PathBuf,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub export: ExportConfig,
    pub skyportal: SkyPortalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            release: Release::Daily,
            radius_arcsec: 1.0,
            dispersion_threshold: DEFAULT_DISPERSION_THRESHOLD,
            granularity: DedupGranularity::ExposureGroup,
            include_targets: false,
            output_dir: Utf8PathBuf::from("."),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            export: ExportConfig::default(),
            skyportal: SkyPortalConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, MostHostsError> {
        let config: PipelineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Utf8Path) -> Result<Self, MostHostsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn radius(&self) -> Degree {
        self.radius_arcsec * ARCSEC_TO_DEG
    }

    /// Check the values that TOML typing cannot.
    pub fn validate(&self) -> Result<(), MostHostsError> {
        if !self.radius_arcsec.is_finite() || self.radius_arcsec <= 0.0 {
            return Err(MostHostsError::Config(format!(
                "radius_arcsec must be positive, got {}",
                self.radius_arcsec
            )));
        }
        if !self.dispersion_threshold.is_finite() || self.dispersion_threshold < 0.0 {
            return Err(MostHostsError::Config(format!(
                "dispersion_threshold must be non-negative, got {}",
                self.dispersion_threshold
            )));
        }
        if self.export.workers == 0 {
            return Err(MostHostsError::Config(
                "export.workers must be at least 1".into(),
            ));
        }
        if self.skyportal.max_attempts == 0 {
            return Err(MostHostsError::Config(
                "skyportal.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Connection parameters of the DESI database.
///
/// Credentials are either given inline (`user` + `password`) or read from
/// `credentials_file`, a file whose first line is `user password`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub credentials_file: Option<Utf8PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: "decatdb.lbl.gov".into(),
            port: 5432,
            dbname: "desidb".into(),
            user: None,
            password: None,
            credentials_file: None,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the (user, password) pair.
    ///
    /// Return
    /// ------
    /// * the inline credentials if both are set, else the content of `credentials_file`
    /// * [`MostHostsError::Config`] if neither is available
    pub fn credentials(&self) -> Result<(String, String), MostHostsError> {
        match (&self.user, &self.password, &self.credentials_file) {
            (Some(user), Some(password), _) => Ok((user.clone(), password.clone())),
            (_, _, Some(path)) => read_credentials_file(path),
            _ => Err(MostHostsError::Config(
                "database credentials need either user and password, or credentials_file".into(),
            )),
        }
    }
}

/// Read a one-line `user password` credentials file.
pub fn read_credentials_file(path: &Utf8Path) -> Result<(String, String), MostHostsError> {
    let contents = std::fs::read_to_string(path)?;
    let mut fields = contents.lines().next().unwrap_or_default().split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(user), Some(password), None) => Ok((user.to_string(), password.to_string())),
        _ => Err(MostHostsError::Config(format!(
            "{path}: expected a single line \"user password\""
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: Utf8PathBuf,
    /// Entries older than this are regenerated. No limit when absent.
    pub max_age_hours: Option<f64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: Utf8PathBuf::from("cache"),
            max_age_hours: None,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_hours
            .filter(|h| h.is_finite() && *h >= 0.0)
            .map(|h| Duration::from_secs_f64(h * 3600.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub workers: usize,
    pub out_dir: Utf8PathBuf,
    /// Root of the DESI spectroscopic reductions.
    pub redux_dir: Utf8PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            workers: DEFAULT_EXPORT_WORKERS,
            out_dir: Utf8PathBuf::from("exported_spectra"),
            redux_dir: Utf8PathBuf::from("/global/cfs/cdirs/desi/spectro/redux"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkyPortalConfig {
    pub url: String,
    pub token: Option<String>,
    pub group_id: i64,
    pub instrument: String,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    /// Pause between successive uploads.
    pub sleep_ms: u64,
    pub ledger_path: Utf8PathBuf,
}

impl Default for SkyPortalConfig {
    fn default() -> Self {
        SkyPortalConfig {
            url: DEFAULT_SKYPORTAL_URL.into(),
            token: None,
            group_id: MOSTHOSTS_GROUP_ID,
            instrument: "DESI".into(),
            max_attempts: 3,
            initial_backoff_ms: 500,
            sleep_ms: 100,
            ledger_path: Utf8PathBuf::from("skyportal_ledger.json"),
        }
    }
}
