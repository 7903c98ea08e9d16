use super::models::{FeedbackEntry, NewVerdict, StoreStats, UserLabel, VerdictRecord};
use super::{Database, DbError, Result};
use rusqlite::{params, OptionalExtension, Row};

const RECORD_COLUMNS: &str =
    "hash, filename, score, user_val, quality_score, status, verdict, analyzed_at, labeled_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VerdictRecord> {
    Ok(VerdictRecord {
        hash: row.get(0)?,
        filename: row.get(1)?,
        score: row.get(2)?,
        user_label: UserLabel::from_column(row.get(3)?),
        quality_score: row.get(4)?,
        status: row.get(5)?,
        verdict: row.get(6)?,
        analyzed_at: row.get(7)?,
        labeled_at: row.get(8)?,
    })
}

impl Database {
    /// Insert a record, or replace the score fields of an existing one.
    ///
    /// `user_val` is never touched here: a label set by feedback survives re-analysis.
    pub fn upsert_result(&self, v: &NewVerdict) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO scans (
                hash, filename, score, quality_score, status, verdict, analyzed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(hash) DO UPDATE SET
                filename = excluded.filename,
                score = excluded.score,
                quality_score = excluded.quality_score,
                status = excluded.status,
                verdict = excluded.verdict,
                analyzed_at = excluded.analyzed_at
            ",
            params![v.hash, v.filename, v.score, v.quality_score, v.status, v.verdict, now],
        )?;
        log::debug!("Stored {} ({}) score={:.3}", v.hash, v.filename, v.score);
        Ok(())
    }

    /// Record a reviewer label on an existing record. Leaves every other field alone.
    ///
    /// Feedback for a hash that was never analyzed is rejected with
    /// [`DbError::UnknownHash`] and changes nothing.
    pub fn apply_feedback(&self, entry: &FeedbackEntry) -> Result<()> {
        self.set_label(&entry.hash, UserLabel::from(entry.valid))
    }

    /// Return a record to the unlabeled state.
    pub fn clear_feedback(&self, hash: &str) -> Result<()> {
        self.set_label(hash, UserLabel::Unset)
    }

    fn set_label(&self, hash: &str, label: UserLabel) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let labeled_at = match label {
            UserLabel::Unset => None,
            _ => Some(now),
        };
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE scans SET user_val = ?1, labeled_at = ?2 WHERE hash = ?3",
            params![label.to_column(), labeled_at, hash],
        )?;
        if changed == 0 {
            return Err(DbError::UnknownHash(hash.to_string()));
        }
        log::info!("Feedback for {}: {}", hash, label.as_str());
        Ok(())
    }

    pub fn get(&self, hash: &str) -> Result<Option<VerdictRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM scans WHERE hash = ?1"),
                params![hash],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Records whose hash starts with `prefix` (for abbreviated hashes on the CLI).
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Vec<VerdictRecord>> {
        let conn = self.lock();
        let pattern = format!("{}%", prefix.replace('%', "").replace('_', ""));
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM scans WHERE hash LIKE ?1 ORDER BY hash LIMIT 10"
        ))?;
        let records = stmt
            .query_map(params![pattern], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Most recently analyzed records first.
    pub fn recent(&self, limit: usize) -> Result<Vec<VerdictRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM scans ORDER BY analyzed_at DESC, hash LIMIT ?1"
        ))?;
        let records = stmt
            .query_map(params![limit as i64], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock();
        let (total, valid, invalid, defective, mean_score): (i64, i64, i64, i64, Option<f64>) =
            conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(user_val = 1), 0),
                    COALESCE(SUM(user_val = 0), 0),
                    COALESCE(SUM(status = 'defective'), 0),
                    AVG(score)
                 FROM scans",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;
        Ok(StoreStats {
            total: total as u64,
            valid: valid as u64,
            invalid: invalid as u64,
            unset: (total - valid - invalid) as u64,
            defective: defective as u64,
            mean_score,
        })
    }
}
