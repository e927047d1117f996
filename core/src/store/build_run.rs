use super::PipelineStore;
use crate::{error::PipelineResult, types::RunId};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// One dataset build, as recorded for later debugging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildRunRecord {
    pub run_id:           RunId,
    pub reference_date:   String,
    pub version:          String,
    pub started_at:       String,
    pub offer_events:     u64,
    pub instances:        u64,
    pub orphans_dropped:  u64,
    pub cache_hit:        bool,
    pub rows_written:     u64,
    pub dropped_no_user:  u64,
    pub dropped_no_offer: u64,
}

impl PipelineStore {
    pub fn insert_build_run(&self, r: &BuildRunRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO build_run (
                run_id, reference_date, version, started_at, offer_events, instances,
                orphans_dropped, cache_hit, rows_written, dropped_no_user, dropped_no_offer
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                r.run_id,
                r.reference_date,
                r.version,
                r.started_at,
                r.offer_events as i64,
                r.instances as i64,
                r.orphans_dropped as i64,
                if r.cache_hit { 1i64 } else { 0i64 },
                r.rows_written as i64,
                r.dropped_no_user as i64,
                r.dropped_no_offer as i64,
            ],
        )?;
        Ok(())
    }

    /// All recorded builds, oldest first.
    pub fn build_runs(&self) -> PipelineResult<Vec<BuildRunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, reference_date, version, started_at, offer_events, instances,
                    orphans_dropped, cache_hit, rows_written, dropped_no_user, dropped_no_offer
             FROM build_run
             ORDER BY started_at ASC, rowid ASC",
        )?;
        let runs = stmt
            .query_map([], |row| {
                Ok(BuildRunRecord {
                    run_id:           row.get(0)?,
                    reference_date:   row.get(1)?,
                    version:          row.get(2)?,
                    started_at:       row.get(3)?,
                    offer_events:     row.get::<_, i64>(4)? as u64,
                    instances:        row.get::<_, i64>(5)? as u64,
                    orphans_dropped:  row.get::<_, i64>(6)? as u64,
                    cache_hit:        row.get::<_, i64>(7)? != 0,
                    rows_written:     row.get::<_, i64>(8)? as u64,
                    dropped_no_user:  row.get::<_, i64>(9)? as u64,
                    dropped_no_offer: row.get::<_, i64>(10)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
