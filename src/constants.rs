//! # Constants and type definitions for MostHosts
//!
//! This module centralizes the **angular constants**, **pipeline defaults**, and **common type
//! aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Unit conversions (degrees ↔ radians, arcseconds ↔ degrees)
//! - Default search radius and dispersion threshold of the cross-match pipeline
//! - Core type aliases shared by the matcher, the reconciler and the exporters
//! - The SkyPortal group and instrument identifiers used by the MostHosts program

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Arcseconds → degrees
pub const ARCSEC_TO_DEG: f64 = 1.0 / 3600.0;

// -------------------------------------------------------------------------------------------------
// Pipeline defaults
// -------------------------------------------------------------------------------------------------

/// Default positional matching radius (1 arcsecond), in degrees
pub const DEFAULT_MATCH_RADIUS: Degree = ARCSEC_TO_DEG;

/// Redshift spread above which a reconciled host is flagged for human review
pub const DEFAULT_DISPERSION_THRESHOLD: f64 = 0.001;

/// Default number of worker threads used by the bulk spectrum exporter
pub const DEFAULT_EXPORT_WORKERS: usize = 10;

/// SkyPortal group holding the MostHosts sources
pub const MOSTHOSTS_GROUP_ID: i64 = 36;

/// Base URL of the DESI SkyPortal instance
pub const DEFAULT_SKYPORTAL_URL: &str = "https://desi-skyportal.lbl.gov";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in arcseconds
pub type ArcSec = f64;
/// Angle in radians
pub type Radian = f64;
/// Survey-assigned DESI target identifier (not unique across releases)
pub type TargetId = i64;
/// DESI tile identifier
pub type TileId = i64;
/// Redshift (dimensionless)
pub type Redshift = f64;
