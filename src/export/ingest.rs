//! Tab-separated ingest catalog of exported spectra.
//!
//! One file per hash bucket, with the 45 columns expected by the spectrum repository's bulk
//! upload form. Text values are double-quoted, numbers are bare, and absent values are
//! written as the quoted string `"NULL"`. Double quotes inside a text value become single
//! quotes and tabs or line breaks become spaces, so that every line keeps one value per column.
use std::io::Write;

use crate::{
    candidates::SupernovaInfo,
    constants::Redshift,
    export::ExportedSpectrum,
    mosthosts_errors::MostHostsError,
};

pub const FIELDS: [&str; 45] = [
    "Obj. IAU-name*",
    "Obj. internal-name*",
    "Source Group-Id*",
    "RA",
    "DEC",
    "Obj. Type-Id",
    "Redshift",
    "Host-name",
    "Host-redshift",
    "Obj. Prop-period value",
    "Prop-period units",
    "Assoc. Groups",
    "Ascii-filename*",
    "FITS-filename*",
    "Obs-date* [YYYY-MM-DD HH:MM:SS] / JD",
    "Instrument-Id*",
    "Exp-time (sec)",
    "WL Units-id",
    "WL Medium-Id",
    "Flux Unit Coeff",
    "Flux Units-Id",
    "Flux Calib. By-Id",
    "Extinction-Corrected-Id",
    "Observer/s",
    "Reducer/s",
    "Reduction-date [YYYY-MM-DD HH:MM:SS] / JD",
    "Aperture (Slit)",
    "Dichroic",
    "Grism",
    "Grating",
    "Blaze",
    "Airmass",
    "Hour Angle",
    "Spec Type-Id",
    "Spec Quality-Id",
    "Spec. Prop-period value",
    "Prop-period units",
    "Assoc. Groups",
    "Spec-Remarks",
    "Publish (bibcode)",
    "Contrib",
    "Related-file1",
    "RF1 Comments",
    "Related-file2",
    "RF2 Comments",
];

const NULL: &str = "\"NULL\"";
const APERTURE: &str = "\"1.47\"\"\"";

/// Everything needed to write one ingest line.
#[derive(Debug, Clone)]
pub struct IngestRow<'a> {
    pub supernova: &'a SupernovaInfo,
    pub host_ra: f64,
    pub host_dec: f64,
    /// Number of MostHosts host candidates of the supernova.
    pub n_host_candidates: usize,
    pub spectrum: &'a ExportedSpectrum,
    /// Variance-weighted redshift of the target, `None` when unresolved.
    pub host_z: Option<Redshift>,
}

fn quoted(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '\t' | '\n' | '\r' => ' ',
            c => c,
        })
        .collect();
    format!("\"{cleaned}\"")
}

fn int(n: i64) -> String {
    n.to_string()
}

impl IngestRow<'_> {
    fn value(&self, field: &str) -> String {
        match field {
            "Obj. IAU-name*" => self.supernova.iau_or_tns().map_or(NULL.into(), quoted),
            "Obj. internal-name*" => quoted(&self.spectrum.snname),
            "Source Group-Id*" => int(78),
            "RA" => self.supernova.sn_ra.map_or(NULL.into(), |v| format!("{v:?}")),
            "DEC" => self.supernova.sn_dec.map_or(NULL.into(), |v| format!("{v:?}")),
            "Obj. Type-Id" => int(1),
            "Redshift" => self
                .supernova
                .sn_z
                .filter(|z| *z >= 0.0)
                .map_or(NULL.into(), |z| format!("{z:.6}")),
            "Host-name" => {
                let mut name = match self.spectrum.host {
                    Some(k) => format!("host {k}"),
                    None => "host".to_string(),
                };
                if self.n_host_candidates > 1 {
                    name.push_str(&format!(" ({} host candidates)", self.n_host_candidates));
                }
                quoted(&name)
            }
            "Host-redshift" => self.host_z.map_or(NULL.into(), |z| format!("{z:.6}")),
            "Ascii-filename*" => quoted(self.spectrum.path.file_name().unwrap_or_default()),
            "Obs-date* [YYYY-MM-DD HH:MM:SS] / JD" => quoted(&self.spectrum.night.iso_date()),
            "Instrument-Id*" => int(258),
            "WL Units-id" => int(11),
            "WL Medium-Id" => int(2),
            "Flux Unit Coeff" => int(1),
            "Flux Units-Id" => int(6),
            "Observer/s" | "Reducer/s" => quoted("DESI"),
            "Aperture (Slit)" => APERTURE.into(),
            "Spec Type-Id" => int(20),
            "Spec Quality-Id" => int(3),
            "Spec-Remarks" => quoted(&format!(
                "host ra={:.5} dec={:.5}",
                self.host_ra, self.host_dec
            )),
            "Contrib" => quoted("Sougmagnac et. al. 2024"),
            _ => NULL.into(),
        }
    }

    pub fn line(&self) -> String {
        FIELDS
            .iter()
            .map(|f| self.value(f))
            .collect::<Vec<_>>()
            .join("\t")
    }
}

pub fn header() -> String {
    FIELDS.iter().map(|f| quoted(f)).collect::<Vec<_>>().join("\t")
}

/// Write a complete ingest file: the header and one line per row.
pub fn write_ingest<W: Write>(mut writer: W, rows: &[IngestRow<'_>]) -> Result<(), MostHostsError> {
    writeln!(writer, "{}", header())?;
    for row in rows {
        writeln!(writer, "{}", row.line())?;
    }
    writer.flush()?;
    Ok(())
}
