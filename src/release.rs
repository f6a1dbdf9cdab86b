//! # DESI data releases
//!
//! The cross-match can run against a small, fixed set of DESI spectroscopic releases:
//!
//! - `daily` – the continuously updated reduction of the ongoing survey,
//! - `everest`, `fuji`, `guadalupe`, `iron` – frozen reductions,
//! - `fujilupe` – the union of `fuji` and `guadalupe`.
//!
//! Each release is stored in its own database schema. Schema names used in SQL are taken
//! **only** from [`Release::schemas`], never from user input, so an unrecognized name is
//! rejected with [`MostHostsError::UnknownCatalog`] before any query is built.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::mosthosts_errors::MostHostsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Release {
    Daily,
    Everest,
    Fuji,
    Guadalupe,
    Iron,
    Fujilupe,
}

impl Release {
    pub const ALL: [Release; 6] = [
        Release::Daily,
        Release::Everest,
        Release::Fuji,
        Release::Guadalupe,
        Release::Iron,
        Release::Fujilupe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Release::Daily => "daily",
            Release::Everest => "everest",
            Release::Fuji => "fuji",
            Release::Guadalupe => "guadalupe",
            Release::Iron => "iron",
            Release::Fujilupe => "fujilupe",
        }
    }

    /// Database schemas holding the observation tables of this release.
    pub fn schemas(&self) -> &'static [&'static str] {
        match self {
            Release::Daily => &["daily"],
            Release::Everest => &["everest"],
            Release::Fuji => &["fuji"],
            Release::Guadalupe => &["guadalupe"],
            Release::Iron => &["iron"],
            Release::Fujilupe => &["fuji", "guadalupe"],
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Release {
    type Err = MostHostsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Release::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| MostHostsError::UnknownCatalog(s.to_string()))
    }
}

impl TryFrom<String> for Release {
    type Error = MostHostsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Release> for String {
    fn from(value: Release) -> Self {
        value.as_str().to_string()
    }
}
