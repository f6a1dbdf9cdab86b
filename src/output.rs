//! CSV output of the result tables.
//!
//! Files written in the output directory:
//!
//! - `mosthosts_desi_<release>.csv` – the summary table,
//! - `mosthosts_desi_<release>_desiobs.csv` – the full observation table,
//! - `mosthosts_desi_maintargets.csv` – the secondary-target table, when it was computed.
//!
//! Absent values are written as empty fields.
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use serde::Serialize;

use crate::{assemble::ResultTables, mosthosts_errors::MostHostsError, release::Release};

pub fn summary_file_name(release: Release) -> String {
    format!("mosthosts_desi_{release}.csv")
}

pub fn observations_file_name(release: Release) -> String {
    format!("mosthosts_desi_{release}_desiobs.csv")
}

pub const TARGETS_FILE_NAME: &str = "mosthosts_desi_maintargets.csv";

/// Serialize `rows` to a CSV file with a header line.
pub fn write_csv<T: Serialize>(path: &Utf8Path, rows: &[T]) -> Result<(), MostHostsError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {path}", rows.len());
    Ok(())
}

/// Write every table of a run in `dir`, creating it if needed.
///
/// Return
/// ------
/// * the paths of the files written
pub fn write_tables(
    dir: &Utf8Path,
    tables: &ResultTables,
) -> Result<Vec<Utf8PathBuf>, MostHostsError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(3);

    let summary = dir.join(summary_file_name(tables.release));
    write_csv(&summary, &tables.summary)?;
    written.push(summary);

    let observations = dir.join(observations_file_name(tables.release));
    write_csv(&observations, &tables.observations)?;
    written.push(observations);

    if let Some(targets) = &tables.targets {
        let path = dir.join(TARGETS_FILE_NAME);
        write_csv(&path, targets)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod output_test {
    use super::*;
    use crate::{
        assemble::{ObservationRow, SummaryRow, SummaryStatus},
        night::Night,
    };

    #[test]
    fn test_write_tables() {
        let dir = tempfile::tempdir().unwrap();
        let out = Utf8Path::from_path(dir.path()).unwrap().join("nested");

        let tables = ResultTables {
            release: Release::Iron,
            observations: vec![ObservationRow {
                name: "SN2020xyz".into(),
                group_key: Some(0),
                ra: 150.0,
                dec: -10.0,
                target_id: Some(39627),
                tile_id: Some(1000),
                petal: Some(3),
                device: None,
                night: Some(Night::new(20230115).unwrap()),
                z: Some(0.045),
                zerr: Some(0.002),
                zwarn: Some(0),
                chi2: None,
                deltachi2: None,
                spectype: Some("GALAXY".into()),
                subtype: None,
                filename: None,
            }],
            summary: vec![SummaryRow {
                name: "SN2020xyz".into(),
                group_key: Some(0),
                ra: 150.0,
                dec: -10.0,
                status: SummaryStatus::NoMatch,
                n_obs: 0,
                z: None,
                dz: None,
                dispersion: None,
                n_contributing: None,
                error: None,
            }],
            targets: None,
        };

        let written = write_tables(&out, &tables).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[0].ends_with("mosthosts_desi_iron.csv"));

        let summary = fs::read_to_string(&written[0]).unwrap();
        let mut lines = summary.lines();
        assert_eq!(
            lines.next().unwrap(),
            "name,group_key,ra,dec,status,n_obs,z,dz,dispersion,n_contributing,error"
        );
        assert_eq!(lines.next().unwrap(), "SN2020xyz,0,150.0,-10.0,no_match,0,,,,,");

        let obs = fs::read_to_string(&written[1]).unwrap();
        assert!(obs
            .lines()
            .nth(1)
            .unwrap()
            .starts_with("SN2020xyz,0,150.0,-10.0,39627,1000,3,,20230115,0.045,0.002,0,"));
    }
}
