//! SQLite-backed mail cache

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use rusqlite_migration::{M, Migrations};

use super::coverage::CoverageSet;
use super::traits::{CoverageStore, MailCache, RecordStore, TrimStats};
use crate::models::{EmailRecord, Interval, MessageId};
use crate::search::SenderPattern;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Fetched message metadata, keyed by Message-ID
            CREATE TABLE emails (
                message_id TEXT PRIMARY KEY,
                from_address TEXT NOT NULL,
                subject TEXT NOT NULL,
                date INTEGER NOT NULL,      -- epoch millis
                deep_link TEXT,
                cached_at TEXT NOT NULL     -- RFC 3339
            );

            CREATE INDEX idx_emails_date ON emails(date);
            CREATE INDEX idx_emails_from ON emails(from_address);
            CREATE INDEX idx_emails_cached_at ON emails(cached_at);

            -- Canonical cover of fully fetched time, epoch millis
            CREATE TABLE covered_intervals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_at INTEGER NOT NULL,
                end_at INTEGER NOT NULL,
                CHECK (start_at <= end_at)
            );
            "#,
        ),
    ])
}

/// SQLite mail cache
///
/// The connection mutex serializes every read-merge-write of the coverage
/// table; SQLite alone does not order two writers that both read the old
/// cover before writing.
pub struct SqliteMailCache {
    conn: Mutex<Connection>,
}

impl SqliteMailCache {
    /// Open (or create) the cache database at `db_path`
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed while a gap commits; NORMAL sync is safe
        // with WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("mail cache connection lock poisoned"))
    }
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to begin transaction")
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn load_coverage(conn: &Connection) -> Result<CoverageSet> {
    let mut stmt =
        conn.prepare_cached("SELECT start_at, end_at FROM covered_intervals ORDER BY start_at")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut intervals = Vec::with_capacity(rows.len());
    for (start, end) in rows {
        let interval = Interval::new(from_millis(start)?, from_millis(end)?)
            .context("Corrupt covered interval")?;
        intervals.push(interval);
    }
    Ok(CoverageSet::from_intervals(intervals))
}

/// Replace the whole coverage table with `cover`
fn store_coverage(conn: &Connection, cover: &CoverageSet) -> Result<()> {
    conn.execute("DELETE FROM covered_intervals", [])?;
    let mut stmt =
        conn.prepare_cached("INSERT INTO covered_intervals (start_at, end_at) VALUES (?, ?)")?;
    for interval in cover.iter() {
        stmt.execute(params![to_millis(interval.start()), to_millis(interval.end())])?;
    }
    Ok(())
}

fn insert_records(conn: &Connection, records: &[EmailRecord]) -> Result<usize> {
    let cached_at = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO emails
         (message_id, from_address, subject, date, deep_link, cached_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    for record in records {
        stmt.execute(params![
            record.message_id.as_str(),
            record.from_address,
            record.subject,
            to_millis(record.date),
            record.deep_link,
            cached_at,
        ])?;
    }
    Ok(records.len())
}

type RawRecord = (String, String, String, i64, Option<String>);

fn raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record((id, from_address, subject, date, deep_link): RawRecord) -> Result<EmailRecord> {
    Ok(EmailRecord {
        message_id: MessageId::new(id),
        from_address,
        subject,
        date: from_millis(date)?,
        deep_link,
    })
}

impl CoverageStore for SqliteMailCache {
    fn covered_intervals(&self) -> Result<Vec<Interval>> {
        let conn = self.lock()?;
        Ok(load_coverage(&conn)?.into_vec())
    }

    fn add_coverage(&self, interval: Interval) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn)?;
        let mut cover = load_coverage(&tx)?;
        cover.insert(interval);
        store_coverage(&tx, &cover)?;
        tx.commit().context("Failed to commit coverage")?;
        Ok(())
    }

    fn trim_coverage(&self, cutoff: DateTime<Utc>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn)?;
        let mut cover = load_coverage(&tx)?;
        cover.trim(cutoff);
        store_coverage(&tx, &cover)?;
        tx.commit().context("Failed to commit coverage trim")?;
        Ok(())
    }
}

impl RecordStore for SqliteMailCache {
    fn upsert_records(&self, records: &[EmailRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = begin(&mut conn)?;
        let written = insert_records(&tx, records)?;
        tx.commit().context("Failed to commit records")?;
        Ok(written)
    }

    fn search_records(
        &self,
        pattern: &SenderPattern,
        window: Option<&Interval>,
    ) -> Result<Vec<EmailRecord>> {
        let conn = self.lock()?;

        // The date window narrows rows in SQL; the sender pattern is applied
        // here since SQLite has no built-in REGEXP.
        let rows = match window {
            Some(window) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT message_id, from_address, subject, date, deep_link
                     FROM emails WHERE date >= ? AND date <= ?",
                )?;
                let rows = stmt
                    .query_map(
                        params![to_millis(window.start()), to_millis(window.end())],
                        raw_record,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT message_id, from_address, subject, date, deep_link FROM emails",
                )?;
                let rows = stmt
                    .query_map([], raw_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        drop(conn);

        rows.into_iter()
            .filter(|row| pattern.is_match(&row.1))
            .map(into_record)
            .collect()
    }

    fn trim_records(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM emails WHERE date < ?", [to_millis(cutoff)])?;
        Ok(removed)
    }

    fn get_record(&self, id: &MessageId) -> Result<Option<EmailRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT message_id, from_address, subject, date, deep_link
                 FROM emails WHERE message_id = ?",
                [id.as_str()],
                raw_record,
            )
            .optional()?;
        row.map(into_record).transpose()
    }

    fn count_records(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl MailCache for SqliteMailCache {
    fn commit_gap(&self, records: &[EmailRecord], gap: &Interval) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn)?;

        // Records first: a cover entry must never exist without its records
        if !records.is_empty() {
            insert_records(&tx, records)?;
        }
        let mut cover = load_coverage(&tx)?;
        cover.insert(*gap);
        store_coverage(&tx, &cover)?;

        tx.commit().context("Failed to commit fetched gap")?;
        Ok(())
    }

    fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<TrimStats> {
        let mut conn = self.lock()?;
        let tx = begin(&mut conn)?;

        let records_removed =
            tx.execute("DELETE FROM emails WHERE date < ?", [to_millis(cutoff)])?;
        let mut cover = load_coverage(&tx)?;
        let intervals_before = cover.len();
        cover.trim(cutoff);
        store_coverage(&tx, &cover)?;

        tx.commit().context("Failed to commit retention trim")?;
        Ok(TrimStats {
            records_removed,
            intervals_before,
            intervals_after: cover.len(),
        })
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM emails; DELETE FROM covered_intervals;")?;
        Ok(())
    }
}
