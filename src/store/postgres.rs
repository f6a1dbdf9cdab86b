//! PostgreSQL + q3c observation store.
//!
//! Talks to the DESI database (`desidb`), where every release lives in its own schema with
//! the `tiles_fibermap`, `cumulative_tiles` and `tiles_redshifts` tables, the MostHosts host
//! table lives in `static.mosthosts` and the target-selection catalog in
//! `general.maintargets`.
//!
//! A [`PgStore`] owns **one** connection and a private current-thread tokio runtime to drive
//! it, so that the synchronous pipeline can use it directly. It is not shared between
//! threads; the bulk exporter opens one store per worker. The connection is released when
//! the store is dropped.
//!
//! Candidate batches are staged in a temporary table (`mosthosts_search`) indexed with
//! `q3c_ang2ipix`, then matched with a single `q3c_join` per release schema.
use log::{debug, error, info};
use sqlx::{
    postgres::{PgConnectOptions, PgRow},
    Connection, PgConnection, Row,
};
use tokio::runtime::{Builder, Runtime};

use crate::{
    candidates::{mosthosts_reader::MostHostsRow, Candidate, HostRecord},
    config::DatabaseConfig,
    constants::Degree,
    mosthosts_errors::MostHostsError,
    night::Night,
    observations::{ExposureGroup, Observation},
    release::Release,
    store::{MissingRedshift, ObservationStore, RadialJoin, RawMatch, TargetMatch, TargetRecord},
};

const STAGING_TABLE: &str = "mosthosts_search";

pub struct PgStore {
    runtime: Runtime,
    conn: PgConnection,
}

impl PgStore {
    /// Open a connection to the DESI database.
    ///
    /// Arguments
    /// ---------
    /// * `config`: host, port, database name and credentials
    ///
    /// Return
    /// ------
    /// * a connected store, or a [`MostHostsError::DatabaseError`]
    pub fn connect(config: &DatabaseConfig) -> Result<Self, MostHostsError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (user, password) = config.credentials()?;
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.dbname)
            .username(&user)
            .password(&password);
        let conn = runtime.block_on(PgConnection::connect_with(&options))?;
        debug!(
            "Connected to {}@{}:{}/{}",
            user, config.host, config.port, config.dbname
        );
        Ok(PgStore { runtime, conn })
    }

    /// Close the connection explicitly, reporting any error on shutdown.
    pub fn close(self) -> Result<(), MostHostsError> {
        let PgStore { runtime, conn } = self;
        runtime.block_on(conn.close())?;
        Ok(())
    }

    fn stage_candidates(&mut self, candidates: &[Candidate]) -> Result<(), MostHostsError> {
        let idx: Vec<i32> = (0..candidates.len())
            .map(|i| {
                i32::try_from(i).map_err(|_| {
                    MostHostsError::Config(format!("too many candidates in one batch: {i}"))
                })
            })
            .collect::<Result<_, _>>()?;
        let ras: Vec<f64> = candidates.iter().map(Candidate::ra).collect();
        let decs: Vec<f64> = candidates.iter().map(Candidate::dec).collect();

        let PgStore { runtime, conn } = self;
        runtime.block_on(async {
            sqlx::query(&format!(
                "CREATE TEMPORARY TABLE IF NOT EXISTS {STAGING_TABLE} \
                 (idx integer, ra double precision, dec double precision)"
            ))
            .execute(&mut *conn)
            .await?;
            sqlx::query(&format!("TRUNCATE {STAGING_TABLE}"))
                .execute(&mut *conn)
                .await?;
            sqlx::query(&format!(
                "INSERT INTO {STAGING_TABLE} (idx, ra, dec) \
                 SELECT * FROM UNNEST($1::integer[], $2::double precision[], $3::double precision[])"
            ))
            .bind(&idx)
            .bind(&ras)
            .bind(&decs)
            .execute(&mut *conn)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {STAGING_TABLE}_q3c ON {STAGING_TABLE} (q3c_ang2ipix(ra, dec))"
            ))
            .execute(&mut *conn)
            .await?;
            sqlx::query(&format!("ANALYZE {STAGING_TABLE}"))
                .execute(&mut *conn)
                .await?;
            Ok::<(), sqlx::Error>(())
        })
        .map_err(MostHostsError::query_failed(format!(
            "staging {} candidates in {STAGING_TABLE}",
            candidates.len()
        )))?;
        debug!("Staged {} candidates in {STAGING_TABLE}", candidates.len());
        Ok(())
    }

    fn fetch(&mut self, sql: &str, radius: Degree, context: String) -> Result<Vec<PgRow>, MostHostsError> {
        let PgStore { runtime, conn } = self;
        runtime
            .block_on(sqlx::query(sql).bind(radius).fetch_all(&mut *conn))
            .map_err(MostHostsError::query_failed(context))
    }
}

fn observation_query(schema: &str) -> String {
    format!(
        "SELECT s.idx, f.targetid::bigint AS targetid, f.tileid::bigint AS tileid, \
                f.petal_loc::smallint AS petal_loc, f.device_loc::integer AS device_loc, \
                c.night::integer AS night, c.filename, \
                r.z, r.zerr, r.zwarn::bigint AS zwarn, r.chi2, r.deltachi2, r.spectype, r.subtype \
         FROM {STAGING_TABLE} s \
         INNER JOIN {schema}.tiles_fibermap f \
           ON q3c_join(s.ra, s.dec, f.target_ra, f.target_dec, $1) \
         INNER JOIN {schema}.cumulative_tiles c ON c.id = f.cumultile_id \
         LEFT JOIN {schema}.tiles_redshifts r \
           ON r.cumultile_id = f.cumultile_id AND r.targetid = f.targetid"
    )
}

/// Describes a query in error messages.
fn query_context(release: Release, schema: &str) -> String {
    format!("{release}: q3c_join of {STAGING_TABLE} with {schema}.tiles_fibermap")
}

/// Convert one joined row, recording it in `join` as a match or as a missing redshift.
fn collect_row(row: &PgRow, schema: &str, join: &mut RadialJoin) -> Result<(), MostHostsError> {
    let idx: i32 = row.try_get("idx")?;
    let candidate = usize::try_from(idx).map_err(|_| {
        MostHostsError::DataIntegrity(format!("{schema}: negative staging index {idx}"))
    })?;
    let target_id: i64 = row.try_get("targetid")?;
    let tile_id: i64 = row.try_get("tileid")?;
    let petal: i16 = row.try_get("petal_loc")?;
    let raw_night: i32 = row.try_get("night")?;
    let night = u32::try_from(raw_night)
        .map_err(|_| MostHostsError::InvalidNight(raw_night.to_string()))
        .and_then(Night::new)?;
    let group = ExposureGroup::new(tile_id, petal);

    let z: Option<f64> = row.try_get("z")?;
    let zerr: Option<f64> = row.try_get("zerr")?;
    let zwarn: Option<i64> = row.try_get("zwarn")?;
    let (Some(z), Some(zerr), Some(zwarn)) = (z, zerr, zwarn) else {
        let missing = MissingRedshift {
            candidate,
            schema: schema.to_string(),
            target_id,
            exposure_group: group,
            night,
        };
        error!("{missing} (candidate #{idx})");
        join.missing.push(missing);
        return Ok(());
    };

    let mut observation = Observation::new(target_id, group, night, z, zerr, zwarn);
    observation.device = row.try_get("device_loc")?;
    observation.chi2 = row.try_get("chi2")?;
    observation.delta_chi2 = row.try_get("deltachi2")?;
    observation.spectype = row.try_get("spectype")?;
    observation.subtype = row.try_get("subtype")?;
    observation.source_path = row.try_get("filename")?;

    join.matches.push(RawMatch {
        candidate,
        observation,
    });
    Ok(())
}

impl ObservationStore for PgStore {
    fn radial_join(
        &mut self,
        release: Release,
        candidates: &[Candidate],
        radius: Degree,
    ) -> Result<RadialJoin, MostHostsError> {
        self.stage_candidates(candidates)?;

        let mut join = RadialJoin::default();
        for schema in release.schemas() {
            info!("Sending q3c_join query for {schema} ({} candidates)", candidates.len());
            let rows = self.fetch(
                &observation_query(schema),
                radius,
                query_context(release, schema),
            )?;
            let (matches_before, missing_before) = (join.matches.len(), join.missing.len());
            for row in &rows {
                collect_row(row, schema, &mut join)?;
            }
            info!(
                "...{schema}: {} rows, {} usable matches, {} without redshift",
                rows.len(),
                join.matches.len() - matches_before,
                join.missing.len() - missing_before
            );
        }
        Ok(join)
    }

    fn target_join(
        &mut self,
        candidates: &[Candidate],
        radius: Degree,
    ) -> Result<Vec<TargetMatch>, MostHostsError> {
        self.stage_candidates(candidates)?;
        let sql = format!(
            "SELECT s.idx, t.survey, t.whenobs, t.targetid::bigint AS targetid, \
                    t.desi_target::bigint AS desi_target, t.bgs_target::bigint AS bgs_target, \
                    t.mws_target::bigint AS mws_target, t.scnd_target::bigint AS scnd_target \
             FROM {STAGING_TABLE} s \
             INNER JOIN general.maintargets t ON q3c_join(s.ra, s.dec, t.ra, t.dec, $1)"
        );
        info!("Searching DESI targets for {} candidates", candidates.len());
        self.fetch(&sql, radius, "q3c_join with general.maintargets".into())?
            .iter()
            .map(|row| {
                let idx: i32 = row.try_get("idx")?;
                Ok(TargetMatch {
                    candidate: usize::try_from(idx).map_err(|_| {
                        MostHostsError::DataIntegrity(format!("negative staging index {idx}"))
                    })?,
                    target: TargetRecord {
                        survey: row.try_get("survey")?,
                        program: row.try_get("whenobs")?,
                        target_id: row.try_get("targetid")?,
                        desi_target: row.try_get("desi_target")?,
                        bgs_target: row.try_get("bgs_target")?,
                        mws_target: row.try_get("mws_target")?,
                        scnd_target: row.try_get("scnd_target")?,
                    },
                })
            })
            .collect()
    }

    fn load_hosts(&mut self) -> Result<Vec<HostRecord>, MostHostsError> {
        let PgStore { runtime, conn } = self;
        let rows = runtime.block_on(
            sqlx::query(
                "SELECT snname, \"index\"::bigint AS host_index, ra, dec, tns_name, iau_name, \
                        ptfiptf_name, sn_ra, sn_dec, sn_z, program \
                 FROM static.mosthosts ORDER BY snname, \"index\"",
            )
            .fetch_all(&mut *conn),
        )
        .map_err(MostHostsError::query_failed("reading static.mosthosts"))?;
        info!("Loaded {} MostHosts hosts", rows.len());
        rows.iter()
            .map(|row| {
                MostHostsRow {
                    snname: row.try_get("snname")?,
                    index: row.try_get("host_index")?,
                    ra: row.try_get("ra")?,
                    dec: row.try_get("dec")?,
                    tns_name: row.try_get("tns_name")?,
                    iau_name: row.try_get("iau_name")?,
                    ptfiptf_name: row.try_get("ptfiptf_name")?,
                    sn_ra: row.try_get("sn_ra")?,
                    sn_dec: row.try_get("sn_dec")?,
                    sn_z: row.try_get("sn_z")?,
                    program: row.try_get("program")?,
                }
                .into_host_record()
            })
            .collect()
    }
}

#[cfg(test)]
mod postgres_store_test {
    use super::*;

    #[test]
    fn test_observation_query_uses_schema_tables() {
        let sql = observation_query("fuji");
        assert!(sql.contains("fuji.tiles_fibermap"));
        assert!(sql.contains("fuji.cumulative_tiles"));
        assert!(sql.contains("fuji.tiles_redshifts"));
        assert!(sql.contains("q3c_join(s.ra, s.dec, f.target_ra, f.target_dec, $1)"));
    }

    #[test]
    fn test_query_failure_names_the_release_and_schema() {
        let err = MostHostsError::query_failed(query_context(Release::Fujilupe, "guadalupe"))(
            sqlx::Error::RowNotFound,
        );
        let message = err.to_string();
        assert!(message.contains("fujilupe"), "{message}");
        assert!(message.contains("guadalupe.tiles_fibermap"), "{message}");
        assert!(matches!(err, MostHostsError::QueryFailed { .. }));
    }
}
