use super::PipelineStore;
use crate::{
    error::PipelineResult,
    event::{EventKey, EventKind},
    types::Hour,
};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

impl PipelineStore {
    /// Every cached entry, or None when the cache is absent, incomplete,
    /// or holds rows this build cannot interpret.
    pub fn expiration_entries(&self) -> PipelineResult<Option<HashMap<EventKey, Option<Hour>>>> {
        let declared: Option<i64> = self
            .conn
            .query_row("SELECT entry_count FROM cache_meta WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        let Some(declared) = declared else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT user_id, offer_id, event, time, expiration FROM expiration_cache",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if rows.len() as i64 != declared {
            log::warn!(
                "Expiration cache declares {declared} entries but holds {}; ignoring it",
                rows.len()
            );
            return Ok(None);
        }

        let mut entries = HashMap::with_capacity(rows.len());
        for (user_id, offer_id, event, time, expiration) in rows {
            let (Some(kind), Ok(time)) = (EventKind::parse_str(&event), Hour::try_from(time)) else {
                log::warn!("Expiration cache holds an unreadable row ({event}, {time}); ignoring it");
                return Ok(None);
            };
            let expiration = match expiration.map(Hour::try_from).transpose() {
                Ok(e) => e,
                Err(_) => return Ok(None),
            };
            entries.insert(EventKey { user_id, offer_id, kind, time }, expiration);
        }
        Ok(Some(entries))
    }

    /// Replace the whole cache in one transaction. The meta row is part of
    /// the same transaction, so a crash leaves either the old cache or none.
    pub fn replace_expirations(&mut self, entries: &[(EventKey, Option<Hour>)]) -> PipelineResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cache_meta", [])?;
        tx.execute("DELETE FROM expiration_cache", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO expiration_cache (user_id, offer_id, event, time, expiration)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (key, expiration) in entries {
                stmt.execute(params![
                    key.user_id,
                    key.offer_id,
                    key.kind.as_str(),
                    key.time as i64,
                    expiration.map(|e| e as i64),
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO cache_meta (id, entry_count, written_at) VALUES (1, ?1, ?2)",
            params![entries.len() as i64, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn clear_expirations(&mut self) -> PipelineResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cache_meta", [])?;
        tx.execute("DELETE FROM expiration_cache", [])?;
        tx.commit()?;
        Ok(())
    }

    pub fn expiration_entry_count(&self) -> PipelineResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM expiration_cache", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Test hook: drop the meta row while leaving the entries in place,
    /// which is what an interrupted non-transactional writer would leave.
    #[doc(hidden)]
    pub fn forget_cache_meta(&self) -> PipelineResult<()> {
        self.conn.execute("DELETE FROM cache_meta", [])?;
        Ok(())
    }
}
