use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use deedsync_core::{
    Cursor, CursorStore, DocNumber, InsertOutcome, Partition, PartitionId, Record, RecordStore,
    StoreError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS partitions (
  partition_id TEXT PRIMARY KEY,
  district_code TEXT NOT NULL,
  district TEXT NOT NULL,
  display_name TEXT NOT NULL,
  state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  partition_id TEXT NOT NULL,
  doc_number INTEGER NOT NULL CHECK (doc_number >= 1),
  registration_year INTEGER NOT NULL,
  serial TEXT,
  property_description TEXT,
  dates_text TEXT,
  nature_and_value TEXT,
  parties TEXT,
  doc_info TEXT,
  market_value INTEGER,
  consideration_value INTEGER,
  date_of_execution TEXT,
  date_of_presentation TEXT,
  date_of_registration TEXT,
  created_at TEXT NOT NULL,
  UNIQUE(partition_id, doc_number),
  FOREIGN KEY (partition_id) REFERENCES partitions(partition_id)
);

CREATE TABLE IF NOT EXISTS cursors (
  partition_id TEXT PRIMARY KEY,
  last_doc_number INTEGER NOT NULL CHECK (last_doc_number >= 1),
  updated_at TEXT NOT NULL,
  FOREIGN KEY (partition_id) REFERENCES partitions(partition_id)
);

CREATE INDEX IF NOT EXISTS idx_records_partition_year ON records(partition_id, registration_year);
";

const MIGRATION_002_SQL: &str = r"
ALTER TABLE records ADD COLUMN village TEXT;
ALTER TABLE records ADD COLUMN extent TEXT;
ALTER TABLE records ADD COLUMN extent_unit TEXT;
ALTER TABLE records ADD COLUMN deed_type TEXT;
ALTER TABLE records ADD COLUMN source_hash TEXT;

CREATE INDEX IF NOT EXISTS idx_records_village ON records(village);
";

const RECORD_COLUMNS: &str = "partition_id, doc_number, registration_year, serial,
    property_description, dates_text, nature_and_value, parties, doc_info,
    market_value, consideration_value, date_of_execution, date_of_presentation,
    date_of_registration, village, extent, extent_unit, deed_type, source_hash, created_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// Stored coverage for one partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionStats {
    pub partition_id: PartitionId,
    pub display_name: String,
    pub records: u64,
    pub min_doc_number: Option<DocNumber>,
    pub max_doc_number: Option<DocNumber>,
    /// Next unexplored number, when a cursor exists.
    pub frontier: Option<DocNumber>,
}

impl SqliteStore {
    /// Open a SQLite-backed deed store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        if !table_exists(&self.conn, "records")? {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            tracing::info!(version = 1, "schema migration applied");
            return Ok(1);
        }

        if table_has_column(&self.conn, "records", "source_hash")? {
            // Tables already in v2 shape but the migration rows are missing.
            record_schema_version(&self.conn, 1)?;
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }

        if table_has_column(&self.conn, "records", "doc_number")? {
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        Err(anyhow!("database schema is invalid: records has no doc_number column"))
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        if table_has_column(&self.conn, "records", "source_hash")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(());
        }

        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;
        tx.execute_batch(MIGRATION_002_SQL).context("failed to add v2 record columns")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![2_i64, now_rfc3339()?],
        )
        .context("failed to record migration version 2")?;
        tx.commit().context("failed to commit migration v2")?;
        tracing::info!(version = 2, "schema migration applied");
        Ok(())
    }

    /// Insert or refresh partition reference data. Records and cursors are untouched.
    ///
    /// # Errors
    /// Returns an error when any write in the transaction fails.
    pub fn seed_partitions(&mut self, partitions: &[Partition]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start seed transaction")?;
        for partition in partitions {
            tx.execute(
                "INSERT INTO partitions(partition_id, district_code, district, display_name, state)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(partition_id) DO UPDATE SET
                   district_code = excluded.district_code,
                   district = excluded.district,
                   display_name = excluded.display_name,
                   state = excluded.state",
                params![
                    partition.id.as_str(),
                    partition.district_code,
                    partition.district,
                    partition.display_name,
                    partition.state,
                ],
            )
            .with_context(|| format!("failed to seed partition {}", partition.id))?;
        }
        tx.commit().context("failed to commit seed transaction")?;
        Ok(partitions.len())
    }

    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_partitions(&self) -> Result<Vec<Partition>> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_id, district_code, district, display_name, state
             FROM partitions
             ORDER BY district ASC, partition_id ASC",
        )?;
        let rows = stmt.query_map([], partition_from_row)?;
        let mut partitions = Vec::new();
        for row in rows {
            partitions.push(row?);
        }
        Ok(partitions)
    }

    /// # Errors
    /// Returns an error when the row cannot be read.
    pub fn get_partition(&self, partition: &PartitionId) -> Result<Option<Partition>> {
        self.conn
            .query_row(
                "SELECT partition_id, district_code, district, display_name, state
                 FROM partitions WHERE partition_id = ?1",
                params![partition.as_str()],
                partition_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load partition {partition}"))
    }

    /// Insert a record unless `(partition_id, doc_number)` is already stored.
    ///
    /// # Errors
    /// Returns an error on constraint violations other than the uniqueness key,
    /// or when the write fails.
    pub fn insert_record_if_absent(&mut self, record: &Record) -> Result<InsertOutcome> {
        let changed = self
            .conn
            .execute(
                &format!(
                    "INSERT INTO records({RECORD_COLUMNS}) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                        ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
                    )
                    ON CONFLICT(partition_id, doc_number) DO NOTHING"
                ),
                params![
                    record.partition_id.as_str(),
                    doc_to_sql(record.doc_number)?,
                    record.registration_year,
                    record.serial,
                    record.property_description,
                    record.dates_text,
                    record.nature_and_value,
                    record.parties,
                    record.doc_info,
                    record.market_value.map(money_to_sql).transpose()?,
                    record.consideration_value.map(money_to_sql).transpose()?,
                    record.date_of_execution,
                    record.date_of_presentation,
                    record.date_of_registration,
                    record.village,
                    record.extent,
                    record.extent_unit,
                    record.deed_type,
                    record.source_hash,
                    rfc3339(record.created_at)?,
                ],
            )
            .with_context(|| {
                format!("failed to insert record {}/{}", record.partition_id, record.doc_number)
            })?;

        Ok(if changed == 0 { InsertOutcome::AlreadyPresent } else { InsertOutcome::Inserted })
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_record(&self, partition: &PartitionId, doc_number: DocNumber) -> Result<Option<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE partition_id = ?1 AND doc_number = ?2"
        ))?;
        let mut rows = stmt.query(params![partition.as_str(), doc_to_sql(doc_number)?])?;
        match rows.next()? {
            Some(row) => Ok(Some(record_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Records of one partition in document order, at most `limit` of them.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_records(&self, partition: &PartitionId, limit: usize) -> Result<Vec<Record>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE partition_id = ?1
             ORDER BY doc_number ASC
             LIMIT ?2"
        ))?;
        let mut rows = stmt.query(params![partition.as_str(), limit])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }

    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn existing_doc_numbers(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<BTreeSet<DocNumber>> {
        let mut stmt = self.conn.prepare(
            "SELECT doc_number FROM records
             WHERE partition_id = ?1 AND doc_number BETWEEN ?2 AND ?3
             ORDER BY doc_number ASC",
        )?;
        let rows = stmt.query_map(
            params![partition.as_str(), doc_to_sql(start)?, doc_to_sql(end)?],
            |row| row.get::<_, i64>(0),
        )?;
        let mut docs = BTreeSet::new();
        for row in rows {
            docs.insert(doc_from_sql(row?)?);
        }
        Ok(docs)
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_in_range(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<u64> {
        let count = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM records
                 WHERE partition_id = ?1 AND doc_number BETWEEN ?2 AND ?3",
                params![partition.as_str(), doc_to_sql(start)?, doc_to_sql(end)?],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to count records for partition {partition}"))?;
        u64::try_from(count).context("negative record count")
    }

    /// # Errors
    /// Returns an error when the query fails.
    pub fn doc_number_bounds(&self, partition: &PartitionId) -> Result<Option<(DocNumber, DocNumber)>> {
        let (min, max) = self
            .conn
            .query_row(
                "SELECT MIN(doc_number), MAX(doc_number) FROM records WHERE partition_id = ?1",
                params![partition.as_str()],
                |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .with_context(|| format!("failed to read bounds for partition {partition}"))?;
        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((doc_from_sql(min)?, doc_from_sql(max)?))),
            _ => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_cursor(&self, partition: &PartitionId) -> Result<Option<Cursor>> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_id, last_doc_number, updated_at FROM cursors WHERE partition_id = ?1",
        )?;
        let mut rows = stmt.query(params![partition.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(cursor_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Last writer wins.
    ///
    /// # Errors
    /// Returns an error when the partition is unknown or the write fails.
    pub fn set_cursor(
        &mut self,
        partition: &PartitionId,
        frontier: DocNumber,
        now: OffsetDateTime,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO cursors(partition_id, last_doc_number, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(partition_id) DO UPDATE SET
                   last_doc_number = excluded.last_doc_number,
                   updated_at = excluded.updated_at",
                params![partition.as_str(), doc_to_sql(frontier)?, rfc3339(now)?],
            )
            .with_context(|| format!("failed to write cursor for partition {partition}"))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_cursors(&self) -> Result<Vec<Cursor>> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_id, last_doc_number, updated_at FROM cursors ORDER BY partition_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut cursors = Vec::new();
        while let Some(row) = rows.next()? {
            cursors.push(cursor_from_row(row)?);
        }
        Ok(cursors)
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn partition_stats(&self) -> Result<Vec<PartitionStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.partition_id, p.display_name,
                    COUNT(r.doc_number), MIN(r.doc_number), MAX(r.doc_number),
                    c.last_doc_number
             FROM partitions p
             LEFT JOIN records r ON r.partition_id = p.partition_id
             LEFT JOIN cursors c ON c.partition_id = p.partition_id
             GROUP BY p.partition_id
             ORDER BY p.partition_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut stats = Vec::new();
        while let Some(row) = rows.next()? {
            stats.push(PartitionStats {
                partition_id: PartitionId::new(row.get::<_, String>(0)?),
                display_name: row.get(1)?,
                records: u64::try_from(row.get::<_, i64>(2)?).context("negative record count")?,
                min_doc_number: row.get::<_, Option<i64>>(3)?.map(doc_from_sql).transpose()?,
                max_doc_number: row.get::<_, Option<i64>>(4)?.map(doc_from_sql).transpose()?,
                frontier: row.get::<_, Option<i64>>(5)?.map(doc_from_sql).transpose()?,
            });
        }
        Ok(stats)
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

impl RecordStore for SqliteStore {
    fn upsert_if_absent(&mut self, record: &Record) -> Result<InsertOutcome, StoreError> {
        self.insert_record_if_absent(record).map_err(store_error)
    }

    fn existing_doc_numbers(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<BTreeSet<DocNumber>, StoreError> {
        SqliteStore::existing_doc_numbers(self, partition, start, end).map_err(store_error)
    }

    fn count_in_range(
        &self,
        partition: &PartitionId,
        start: DocNumber,
        end: DocNumber,
    ) -> Result<u64, StoreError> {
        SqliteStore::count_in_range(self, partition, start, end).map_err(store_error)
    }

    fn doc_number_bounds(
        &self,
        partition: &PartitionId,
    ) -> Result<Option<(DocNumber, DocNumber)>, StoreError> {
        SqliteStore::doc_number_bounds(self, partition).map_err(store_error)
    }
}

impl CursorStore for SqliteStore {
    fn get_cursor(&self, partition: &PartitionId) -> Result<Option<Cursor>, StoreError> {
        SqliteStore::get_cursor(self, partition).map_err(store_error)
    }

    fn set_cursor(
        &mut self,
        partition: &PartitionId,
        frontier: DocNumber,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        SqliteStore::set_cursor(self, partition, frontier, now).map_err(store_error)
    }
}

/// SQLite failures mean the store is unavailable; anything else is bad data.
fn store_error(err: anyhow::Error) -> StoreError {
    if err.downcast_ref::<rusqlite::Error>().is_some() {
        StoreError::Unavailable(format!("{err:#}"))
    } else {
        StoreError::Corrupt(format!("{err:#}"))
    }
}

fn partition_from_row(row: &Row<'_>) -> rusqlite::Result<Partition> {
    Ok(Partition {
        id: PartitionId::new(row.get::<_, String>(0)?),
        district_code: row.get(1)?,
        district: row.get(2)?,
        display_name: row.get(3)?,
        state: row.get(4)?,
    })
}

fn record_from_row(row: &Row<'_>) -> Result<Record> {
    Ok(Record {
        partition_id: PartitionId::new(row.get::<_, String>(0)?),
        doc_number: doc_from_sql(row.get(1)?)?,
        registration_year: row.get(2)?,
        serial: row.get(3)?,
        property_description: row.get(4)?,
        dates_text: row.get(5)?,
        nature_and_value: row.get(6)?,
        parties: row.get(7)?,
        doc_info: row.get(8)?,
        market_value: row.get::<_, Option<i64>>(9)?.map(money_from_sql).transpose()?,
        consideration_value: row.get::<_, Option<i64>>(10)?.map(money_from_sql).transpose()?,
        date_of_execution: row.get(11)?,
        date_of_presentation: row.get(12)?,
        date_of_registration: row.get(13)?,
        village: row.get(14)?,
        extent: row.get(15)?,
        extent_unit: row.get(16)?,
        deed_type: row.get(17)?,
        source_hash: row.get(18)?,
        created_at: parse_rfc3339(&row.get::<_, String>(19)?)?,
    })
}

fn cursor_from_row(row: &Row<'_>) -> Result<Cursor> {
    Ok(Cursor {
        partition_id: PartitionId::new(row.get::<_, String>(0)?),
        frontier: doc_from_sql(row.get(1)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(2)?)?,
    })
}

fn doc_to_sql(doc_number: DocNumber) -> Result<i64> {
    i64::try_from(doc_number).with_context(|| format!("document number out of range: {doc_number}"))
}

fn doc_from_sql(raw: i64) -> Result<DocNumber> {
    DocNumber::try_from(raw).with_context(|| format!("invalid stored document number: {raw}"))
}

fn money_to_sql(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("monetary value out of range: {value}"))
}

fn money_from_sql(raw: i64) -> Result<u64> {
    u64::try_from(raw).with_context(|| format!("invalid stored monetary value: {raw}"))
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "records")? {
        return Ok((0, false));
    }

    if table_has_column(conn, "records", "source_hash")? {
        return Ok((2, true));
    }

    if table_has_column(conn, "records", "doc_number")? {
        return Ok((1, true));
    }

    Err(anyhow!("database schema is invalid: records has no doc_number column"))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
