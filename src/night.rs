//! # DESI observing nights
//!
//! DESI labels every coadd with the integer night `YYYYMMDD` of its last contributing
//! exposure. Later nights supersede earlier ones for the same tile/petal because the
//! cumulative coadds include all previous data.
//!
//! [`Night`] wraps that integer, parses both `yyyymmdd` and `yyyy-mm-dd`, and converts to a
//! [`hifitime::Epoch`] when an absolute date is needed (e.g. the `observed_at` field of a
//! SkyPortal spectrum).
use std::{fmt, str::FromStr, sync::LazyLock};

use hifitime::Epoch;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mosthosts_errors::MostHostsError;

static COMPACT_NIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").expect("valid night regex"));
static DASHED_NIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("valid night regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Night(u32);

impl Night {
    /// Build a night from its `YYYYMMDD` integer form, checking the calendar date.
    pub fn new(yyyymmdd: u32) -> Result<Self, MostHostsError> {
        let night = Night(yyyymmdd);
        night.epoch()?;
        Ok(night)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn year(&self) -> i32 {
        (self.0 / 10_000) as i32
    }

    pub fn month(&self) -> u8 {
        ((self.0 / 100) % 100) as u8
    }

    pub fn day(&self) -> u8 {
        (self.0 % 100) as u8
    }

    /// `yyyy-mm-dd`, the form used in SkyPortal labels and the ingest catalog.
    pub fn iso_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year(), self.month(), self.day())
    }

    /// UTC midnight at the start of the night's calendar date.
    pub fn epoch(&self) -> Result<Epoch, MostHostsError> {
        Epoch::maybe_from_gregorian_utc(self.year(), self.month(), self.day(), 0, 0, 0, 0)
            .map_err(|_| MostHostsError::InvalidNight(self.0.to_string()))
    }
}

impl fmt::Display for Night {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for Night {
    type Error = MostHostsError;

    fn try_from(yyyymmdd: u32) -> Result<Self, Self::Error> {
        Night::new(yyyymmdd)
    }
}

impl From<Night> for u32 {
    fn from(night: Night) -> Self {
        night.0
    }
}

impl FromStr for Night {
    type Err = MostHostsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let caps = COMPACT_NIGHT
            .captures(trimmed)
            .or_else(|| DASHED_NIGHT.captures(trimmed))
            .ok_or_else(|| MostHostsError::InvalidNight(s.to_string()))?;

        let field = |i: usize| -> Result<u32, MostHostsError> {
            caps[i]
                .parse::<u32>()
                .map_err(|_| MostHostsError::InvalidNight(s.to_string()))
        };
        Night::new(field(1)? * 10_000 + field(2)? * 100 + field(3)?)
    }
}

#[cfg(test)]
mod night_test {
    use super::*;

    #[test]
    fn test_parse_both_forms() {
        let a: Night = "20230115".parse().unwrap();
        let b: Night = "2023-01-15".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_u32(), 20230115);
        assert_eq!(a.iso_date(), "2023-01-15");
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            "2023/01/15".parse::<Night>(),
            Err(MostHostsError::InvalidNight(_))
        ));
        assert!("20231345".parse::<Night>().is_err());
        assert!(Night::new(20230230).is_err());
    }

    #[test]
    fn test_deserialization_checks_the_date() {
        let night: Night = serde_json::from_str("20230115").unwrap();
        assert_eq!(night, Night::new(20230115).unwrap());
        assert_eq!(serde_json::to_string(&night).unwrap(), "20230115");

        let err = serde_json::from_str::<Night>("20230230").unwrap_err();
        assert!(err.to_string().contains("20230230"), "{err}");
        assert!(serde_json::from_str::<Vec<Night>>("[20230101, 99999999]").is_err());
    }

    #[test]
    fn test_ordering_follows_date() {
        let early = Night::new(20230101).unwrap();
        let late = Night::new(20230115).unwrap();
        assert!(late > early);
    }
}
