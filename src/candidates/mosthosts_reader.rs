//! Reader for MostHosts host tables exported as CSV.
//!
//! Required columns are `snname`, `ra` and `dec`; `index`, `tns_name`, `iau_name`,
//! `ptfiptf_name`, `sn_ra`, `sn_dec`, `sn_z` and `program` are optional. Empty fields and the
//! literal string `None` (as written by older pandas exports) both mean "absent".
use camino::Utf8Path;
use serde::Deserialize;

use crate::{
    candidates::{Candidate, HostRecord, SupernovaInfo},
    constants::Degree,
    mosthosts_errors::MostHostsError,
};

#[derive(Debug, Clone, Deserialize)]
pub struct MostHostsRow {
    pub snname: String,
    #[serde(default)]
    pub index: Option<i64>,
    pub ra: Degree,
    pub dec: Degree,
    #[serde(default)]
    pub tns_name: Option<String>,
    #[serde(default)]
    pub iau_name: Option<String>,
    #[serde(default)]
    pub ptfiptf_name: Option<String>,
    #[serde(default)]
    pub sn_ra: Option<Degree>,
    #[serde(default)]
    pub sn_dec: Option<Degree>,
    #[serde(default)]
    pub sn_z: Option<f64>,
    #[serde(default)]
    pub program: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "None")
}

impl MostHostsRow {
    pub fn into_host_record(self) -> Result<HostRecord, MostHostsError> {
        let candidate = Candidate::new(self.snname.clone(), self.ra, self.dec, self.index)?;
        Ok(HostRecord {
            candidate,
            supernova: SupernovaInfo {
                snname: self.snname,
                tns_name: present(self.tns_name),
                iau_name: present(self.iau_name),
                ptfiptf_name: present(self.ptfiptf_name),
                sn_ra: self.sn_ra,
                sn_dec: self.sn_dec,
                sn_z: self.sn_z,
                program: present(self.program),
            },
        })
    }
}

/// Read a MostHosts CSV table.
///
/// Arguments
/// ---------
/// * `path`: path to a CSV file with a header line
///
/// Return
/// ------
/// * one [`HostRecord`] per row, in file order
/// * an error if a row cannot be parsed or holds an invalid position
pub fn read_mosthosts_csv(path: &Utf8Path) -> Result<Vec<HostRecord>, MostHostsError> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize::<MostHostsRow>()
        .map(|row| row?.into_host_record())
        .collect()
}

#[cfg(test)]
mod mosthosts_reader_test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_mosthosts_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "snname,index,ra,dec,tns_name,iau_name,ptfiptf_name,sn_ra,sn_dec,sn_z,program"
        )
        .unwrap();
        writeln!(
            file,
            "PTF10abc,1,150.0,-10.0,None,SN2010xx,PTF10abc,150.0001,-10.0002,0.05,ptf/zsnls"
        )
        .unwrap();
        writeln!(file, "SN2021zzz,,10.5,20.25,2021zzz,,,,,,").unwrap();
        file.flush().unwrap();

        let path = Utf8Path::from_path(file.path()).unwrap();
        let records = read_mosthosts_csv(path).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].candidate.group_key(), Some(1));
        assert_eq!(records[0].supernova.tns_name, None);
        assert_eq!(records[0].supernova.display_name(), "SN2010xx");
        assert_eq!(records[0].supernova.sn_z, Some(0.05));

        assert_eq!(records[1].candidate.group_key(), None);
        assert_eq!(records[1].supernova.display_name(), "2021zzz");
        assert_eq!(records[1].supernova.sn_ra, None);
    }

    #[test]
    fn test_invalid_position_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "snname,index,ra,dec").unwrap();
        writeln!(file, "bad,1,400.0,0.0").unwrap();
        file.flush().unwrap();

        let path = Utf8Path::from_path(file.path()).unwrap();
        let err = read_mosthosts_csv(path).unwrap_err();
        assert!(matches!(err, MostHostsError::InvalidPosition { .. }));
    }
}
