#![allow(dead_code)]

use std::io::{Error, ErrorKind};

use approx::assert_relative_eq;
use camino::Utf8Path;
use mosthosts::{
    assemble::SummaryRow,
    candidates::{Candidate, HostRecord, SupernovaInfo},
    constants::TargetId,
    mosthosts_errors::MostHostsError,
    night::Night,
    observations::{ExposureGroup, Observation},
    spectrum::{Camera, CameraSpectra, Spectrum, SpectrumReader},
    store::memory::MemoryStore,
};

pub fn night(n: u32) -> Night {
    Night::new(n).unwrap()
}

pub fn redrock_file(tile: i64, petal: i16, n: u32) -> String {
    format!("daily/tiles/cumulative/{tile}/{n}/redrock-{petal}-{tile}-thru{n}.fits")
}

pub fn observation(
    target_id: TargetId,
    tile: i64,
    petal: i16,
    n: u32,
    z: f64,
    zerr: f64,
    zwarn: i64,
) -> Observation {
    Observation::new(
        target_id,
        ExposureGroup::new(tile, petal),
        night(n),
        z,
        zerr,
        zwarn,
    )
    .with_source_path(redrock_file(tile, petal, n))
}

pub fn host(snname: &str, k: i64, ra: f64, dec: f64) -> HostRecord {
    HostRecord {
        candidate: Candidate::new(snname, ra, dec, Some(k)).unwrap(),
        supernova: SupernovaInfo {
            snname: snname.into(),
            ..SupernovaInfo::default()
        },
    }
}

/// SN2020xyz with one trustworthy and one suspect observation, SN2021abc with a single
/// trustworthy observation whose coadd is missing on disk, and SN2022none with nothing.
pub fn fixture() -> (MemoryStore, Vec<HostRecord>) {
    let mut store = MemoryStore::new();
    store
        .insert_observation("daily", 150.0, -10.0, observation(39627, 1000, 3, 20230115, 0.045, 0.002, 0))
        .unwrap();
    store
        .insert_observation("daily", 150.0, -10.0, observation(39627, 1001, 3, 20230116, 0.9, 0.01, 1))
        .unwrap();
    store
        .insert_observation("daily", 20.0, 5.0, observation(41000, 2000, 7, 20230201, 0.12, 0.001, 0))
        .unwrap();

    let hosts = vec![
        host("SN2020xyz", 0, 150.0, -10.0),
        host("SN2021abc", 0, 20.0, 5.0),
        host("SN2022none", 0, 300.0, 45.0),
    ];
    for h in &hosts {
        store.insert_host(h.clone());
    }
    (store, hosts)
}

pub fn assert_resolved(row: &SummaryRow, z: f64, dz: f64, n_contributing: usize) {
    assert_relative_eq!(row.z.unwrap(), z, epsilon = 1e-12);
    assert_relative_eq!(row.dz.unwrap(), dz, epsilon = 1e-12);
    assert_eq!(row.n_contributing, Some(n_contributing));
}

/// Coadd reader serving a flat two-sample spectrum, except for tile 2000 whose files are
/// missing.
pub struct FakeReader;

impl SpectrumReader for FakeReader {
    fn read(&self, path: &Utf8Path, target_id: TargetId) -> Result<CameraSpectra, MostHostsError> {
        if path.as_str().contains("/2000/") {
            return Err(Error::new(ErrorKind::NotFound, format!("{path} for {target_id}")).into());
        }
        let mut cameras = CameraSpectra::new();
        cameras.insert(
            Camera::B,
            Spectrum::new(vec![3600.0, 3601.0], vec![1.0, 2.0], vec![1.0, 4.0])?,
        );
        cameras.insert(
            Camera::R,
            Spectrum::new(vec![5800.0, 5801.0], vec![3.0, 4.0], vec![1.0, 1.0])?,
        );
        Ok(cameras)
    }
}
