use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use points_ledger_core::{
    format_iso_date, parse_iso_date, points_from_weight, reconcile, round_points, LedgerError,
    LedgerRow, MergeDisposition, MergedRow, PointsSnapshot, Predicate, QueryPlan,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS ledger_rows (
  customer_code INTEGER PRIMARY KEY,
  serial_number INTEGER,
  address1 TEXT NOT NULL DEFAULT '',
  address2 TEXT NOT NULL DEFAULT '',
  address3 TEXT NOT NULL DEFAULT '',
  address4 TEXT NOT NULL DEFAULT '',
  pin_code TEXT NOT NULL DEFAULT '',
  phone TEXT NOT NULL DEFAULT '',
  mobile TEXT NOT NULL DEFAULT '',
  total_points REAL NOT NULL DEFAULT 0 CHECK (total_points >= 0),
  claimed_points REAL NOT NULL DEFAULT 0 CHECK (claimed_points >= 0),
  unclaimed_points REAL NOT NULL DEFAULT 0 CHECK (unclaimed_points >= 0),
  last_sales_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_ledger_rows_total_points ON ledger_rows(total_points);
CREATE INDEX IF NOT EXISTS idx_ledger_rows_unclaimed_points ON ledger_rows(unclaimed_points);
CREATE INDEX IF NOT EXISTS idx_ledger_rows_last_sales_date ON ledger_rows(last_sales_date);
";

const ROW_COLUMNS: &str = "customer_code, serial_number, address1, address2, address3, address4, \
                           pin_code, phone, mobile, total_points, claimed_points, \
                           unclaimed_points, last_sales_date";

// The SET list deliberately omits claimed_points: the merge path must never
// touch a customer's claimed balance.
const UPSERT_SQL: &str = "
INSERT INTO ledger_rows (
  customer_code, serial_number, address1, address2, address3, address4,
  pin_code, phone, mobile, total_points, claimed_points, unclaimed_points,
  last_sales_date
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
ON CONFLICT(customer_code) DO UPDATE SET
  serial_number = excluded.serial_number,
  address1 = excluded.address1,
  address2 = excluded.address2,
  address3 = excluded.address3,
  address4 = excluded.address4,
  pin_code = excluded.pin_code,
  phone = excluded.phone,
  mobile = excluded.mobile,
  total_points = excluded.total_points,
  unclaimed_points = excluded.unclaimed_points,
  last_sales_date = excluded.last_sales_date
";

pub struct LedgerStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

/// How many merged rows took each upsert path.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportCounts {
    pub inserted: usize,
    pub updated: usize,
}

/// One executed query page plus the matching row count before pagination.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueryOutcome {
    pub rows: Vec<LedgerRow>,
    pub total_count: u64,
}

/// Contact-detail fields of a ledger row; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactUpdate {
    pub serial_number: Option<i64>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub address3: Option<String>,
    pub address4: Option<String>,
    pub pin_code: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
}

impl LedgerStore {
    /// Open a SQLite-backed ledger store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
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
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Run quick-check and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status,
        })
    }

    /// Load the customer code → point balances mapping the reconciliation
    /// engine merges against.
    ///
    /// # Errors
    /// Returns an error when the snapshot rows cannot be read or decoded.
    pub fn fetch_snapshot(&self) -> Result<BTreeMap<i64, PointsSnapshot>> {
        read_snapshot(&self.conn)
    }

    /// Persist reconciled rows: inserts take the full-row path, updates
    /// rewrite the merged fields and leave `claimed_points` untouched.
    ///
    /// # Errors
    /// Returns an error when any write in the transaction fails.
    pub fn upsert(&mut self, merged: &[MergedRow]) -> Result<ImportCounts> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start upsert transaction")?;
        let counts = write_merged(&tx, merged)?;
        tx.commit().context("failed to commit upsert transaction")?;
        Ok(counts)
    }

    /// Reconcile and persist one import batch in a single transaction.
    ///
    /// The snapshot read and the merged write share one IMMEDIATE
    /// transaction, so concurrent imports serialize at this boundary instead
    /// of racing on the read-modify-write.
    ///
    /// # Errors
    /// Returns [`LedgerError::SnapshotUnavailable`] when the snapshot read
    /// fails and [`LedgerError::PersistFailed`] when the write does; either
    /// way nothing is persisted.
    pub fn import_batch(&mut self, accepted: &[LedgerRow]) -> Result<ImportCounts> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| LedgerError::SnapshotUnavailable(err.to_string()))?;

        let snapshot =
            read_snapshot(&tx).map_err(|err| LedgerError::SnapshotUnavailable(err.to_string()))?;
        let merged = reconcile(accepted, &snapshot);
        let counts =
            write_merged(&tx, &merged).map_err(|err| LedgerError::PersistFailed(err.to_string()))?;
        tx.commit().map_err(|err| LedgerError::PersistFailed(err.to_string()))?;

        Ok(counts)
    }

    /// Execute a query plan and report the page rows plus total match count.
    ///
    /// # Errors
    /// Returns [`LedgerError::QueryFailed`] when execution fails.
    pub fn query(&self, plan: &QueryPlan) -> Result<QueryOutcome> {
        run_query(&self.conn, plan).map_err(|err| LedgerError::QueryFailed(err.to_string()).into())
    }

    /// Fetch one ledger row by customer code.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_row(&self, customer_code: i64) -> Result<Option<LedgerRow>> {
        read_row(&self.conn, customer_code)
    }

    /// Irreversibly remove one customer's ledger row. Returns whether a row
    /// existed.
    ///
    /// # Errors
    /// Returns an error when the delete statement fails.
    pub fn delete_by_code(&mut self, customer_code: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM ledger_rows WHERE customer_code = ?1", params![customer_code])
            .context("failed to delete ledger row")?;
        Ok(affected > 0)
    }

    /// Transfer points from unclaimed to claimed by equal amounts.
    ///
    /// # Errors
    /// Returns an error when the amount is not positive, exceeds the
    /// unclaimed balance, the customer is unknown, or the write fails.
    pub fn claim_points(&mut self, customer_code: i64, points: Decimal) -> Result<LedgerRow> {
        if points <= Decimal::ZERO {
            bail!("claim amount must be positive");
        }
        let points = round_points(points);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start claim transaction")?;
        let Some(current) = read_row(&tx, customer_code)? else {
            bail!("no ledger row for customer code {customer_code}");
        };
        if points > current.unclaimed_points {
            bail!(
                "claim of {points} exceeds unclaimed balance {}",
                current.unclaimed_points
            );
        }

        let claimed_points = round_points(current.claimed_points + points);
        let unclaimed_points = round_points(current.unclaimed_points - points);
        tx.execute(
            "UPDATE ledger_rows SET claimed_points = ?1, unclaimed_points = ?2
             WHERE customer_code = ?3",
            params![
                points_to_real(claimed_points)?,
                points_to_real(unclaimed_points)?,
                customer_code
            ],
        )
        .context("failed to update claimed balances")?;
        tx.commit().context("failed to commit claim transaction")?;

        Ok(LedgerRow { claimed_points, unclaimed_points, ..current })
    }

    /// Manually accrue points from a purchase net weight, creating the row
    /// when the customer is new.
    ///
    /// # Errors
    /// Returns an error when the weight is not positive or the write fails.
    pub fn accrue_weight(
        &mut self,
        customer_code: i64,
        net_weight: Decimal,
        sales_date: Option<Date>,
    ) -> Result<LedgerRow> {
        if net_weight <= Decimal::ZERO {
            bail!("net weight must be positive");
        }
        let points = points_from_weight(net_weight);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start accrual transaction")?;
        let updated = match read_row(&tx, customer_code)? {
            Some(current) => {
                let total_points = round_points(current.total_points + points);
                let unclaimed_points = round_points(current.unclaimed_points + points);
                let last_sales_date = sales_date.or(current.last_sales_date);
                tx.execute(
                    "UPDATE ledger_rows
                     SET total_points = ?1, unclaimed_points = ?2, last_sales_date = ?3
                     WHERE customer_code = ?4",
                    params![
                        points_to_real(total_points)?,
                        points_to_real(unclaimed_points)?,
                        last_sales_date.map(format_iso_date),
                        customer_code
                    ],
                )
                .context("failed to update accrued balances")?;
                LedgerRow { total_points, unclaimed_points, last_sales_date, ..current }
            }
            None => {
                let row = LedgerRow {
                    customer_code,
                    serial_number: None,
                    address1: String::new(),
                    address2: String::new(),
                    address3: String::new(),
                    address4: String::new(),
                    pin_code: String::new(),
                    phone: String::new(),
                    mobile: String::new(),
                    total_points: points,
                    claimed_points: Decimal::ZERO,
                    unclaimed_points: points,
                    last_sales_date: sales_date,
                };
                write_merged(
                    &tx,
                    &[MergedRow { disposition: MergeDisposition::Insert, row: row.clone() }],
                )?;
                row
            }
        };
        tx.commit().context("failed to commit accrual transaction")?;

        Ok(updated)
    }

    /// Explicit point correction: set total and claimed, recompute unclaimed.
    ///
    /// # Errors
    /// Returns an error when a balance is negative, claimed exceeds total,
    /// the customer is unknown, or the write fails.
    pub fn adjust_points(
        &mut self,
        customer_code: i64,
        total: Decimal,
        claimed: Decimal,
    ) -> Result<LedgerRow> {
        if total.is_sign_negative() || claimed.is_sign_negative() {
            bail!("point balances cannot be negative");
        }
        let total_points = round_points(total);
        let claimed_points = round_points(claimed);
        if claimed_points > total_points {
            bail!("claimed points {claimed_points} cannot exceed total points {total_points}");
        }
        let unclaimed_points = total_points - claimed_points;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start adjustment transaction")?;
        let Some(current) = read_row(&tx, customer_code)? else {
            bail!("no ledger row for customer code {customer_code}");
        };
        tx.execute(
            "UPDATE ledger_rows
             SET total_points = ?1, claimed_points = ?2, unclaimed_points = ?3
             WHERE customer_code = ?4",
            params![
                points_to_real(total_points)?,
                points_to_real(claimed_points)?,
                points_to_real(unclaimed_points)?,
                customer_code
            ],
        )
        .context("failed to update adjusted balances")?;
        tx.commit().context("failed to commit adjustment transaction")?;

        Ok(LedgerRow { total_points, claimed_points, unclaimed_points, ..current })
    }

    /// Edit contact-detail fields only; point balances are untouched.
    ///
    /// # Errors
    /// Returns an error when no field is given, the customer is unknown, or
    /// the write fails.
    pub fn update_contact(
        &mut self,
        customer_code: i64,
        update: &ContactUpdate,
    ) -> Result<LedgerRow> {
        let mut assignments: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(serial_number) = update.serial_number {
            assignments.push("serial_number = ?");
            values.push(Value::Integer(serial_number));
        }
        let text_fields = [
            ("address1 = ?", update.address1.as_ref()),
            ("address2 = ?", update.address2.as_ref()),
            ("address3 = ?", update.address3.as_ref()),
            ("address4 = ?", update.address4.as_ref()),
            ("pin_code = ?", update.pin_code.as_ref()),
            ("phone = ?", update.phone.as_ref()),
            ("mobile = ?", update.mobile.as_ref()),
        ];
        for (assignment, value) in text_fields {
            if let Some(value) = value {
                assignments.push(assignment);
                values.push(Value::Text(value.clone()));
            }
        }
        if assignments.is_empty() {
            bail!("no contact fields to update");
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start contact update transaction")?;
        if read_row(&tx, customer_code)?.is_none() {
            bail!("no ledger row for customer code {customer_code}");
        }

        values.push(Value::Integer(customer_code));
        let sql = format!(
            "UPDATE ledger_rows SET {} WHERE customer_code = ?",
            assignments.join(", ")
        );
        tx.execute(&sql, params_from_iter(values.iter()))
            .context("failed to update contact fields")?;

        let updated = read_row(&tx, customer_code)?
            .ok_or_else(|| anyhow!("ledger row disappeared during contact update"))?;
        tx.commit().context("failed to commit contact update transaction")?;
        Ok(updated)
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format migration timestamp")?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn points_to_real(value: Decimal) -> Result<f64> {
    value.to_f64().ok_or_else(|| anyhow!("point value {value} is not representable"))
}

fn real_to_points(value: f64) -> Result<Decimal> {
    // Stored values carry one decimal place; re-rounding on read keeps any
    // binary representation error from leaking into arithmetic.
    Decimal::from_f64(value)
        .map(round_points)
        .ok_or_else(|| anyhow!("stored point value {value} is not a finite decimal"))
}

fn parse_stored_date(value: Option<String>) -> Result<Option<Date>> {
    match value {
        Some(raw) => parse_iso_date(&raw)
            .map(Some)
            .ok_or_else(|| anyhow!("invalid stored sales date: {raw}")),
        None => Ok(None),
    }
}

fn read_snapshot(conn: &Connection) -> Result<BTreeMap<i64, PointsSnapshot>> {
    let mut stmt = conn
        .prepare("SELECT customer_code, total_points, unclaimed_points FROM ledger_rows")
        .context("failed to prepare snapshot query")?;
    let mut rows = stmt.query([])?;

    let mut snapshot = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let customer_code: i64 = row.get(0)?;
        let total: f64 = row.get(1)?;
        let unclaimed: f64 = row.get(2)?;
        snapshot.insert(
            customer_code,
            PointsSnapshot {
                total_points: real_to_points(total)?,
                unclaimed_points: real_to_points(unclaimed)?,
            },
        );
    }
    Ok(snapshot)
}

fn write_merged(conn: &Connection, merged: &[MergedRow]) -> Result<ImportCounts> {
    let mut counts = ImportCounts::default();
    for entry in merged {
        let row = &entry.row;
        conn.execute(
            UPSERT_SQL,
            params![
                row.customer_code,
                row.serial_number,
                row.address1,
                row.address2,
                row.address3,
                row.address4,
                row.pin_code,
                row.phone,
                row.mobile,
                points_to_real(row.total_points)?,
                points_to_real(row.claimed_points)?,
                points_to_real(row.unclaimed_points)?,
                row.last_sales_date.map(format_iso_date),
            ],
        )
        .with_context(|| format!("failed to upsert ledger row {}", row.customer_code))?;

        match entry.disposition {
            MergeDisposition::Insert => counts.inserted += 1,
            MergeDisposition::Update => counts.updated += 1,
        }
    }
    Ok(counts)
}

fn ledger_row_from_sql(row: &rusqlite::Row<'_>) -> Result<LedgerRow> {
    let total: f64 = row.get(9)?;
    let claimed: f64 = row.get(10)?;
    let unclaimed: f64 = row.get(11)?;
    let date_raw: Option<String> = row.get(12)?;

    Ok(LedgerRow {
        customer_code: row.get(0)?,
        serial_number: row.get(1)?,
        address1: row.get(2)?,
        address2: row.get(3)?,
        address3: row.get(4)?,
        address4: row.get(5)?,
        pin_code: row.get(6)?,
        phone: row.get(7)?,
        mobile: row.get(8)?,
        total_points: real_to_points(total)?,
        claimed_points: real_to_points(claimed)?,
        unclaimed_points: real_to_points(unclaimed)?,
        last_sales_date: parse_stored_date(date_raw)?,
    })
}

fn read_row(conn: &Connection, customer_code: i64) -> Result<Option<LedgerRow>> {
    let sql = format!("SELECT {ROW_COLUMNS} FROM ledger_rows WHERE customer_code = ?1");
    let mut stmt = conn.prepare(&sql).context("failed to prepare row lookup")?;
    let mut rows = stmt.query(params![customer_code])?;
    match rows.next()? {
        Some(row) => Ok(Some(ledger_row_from_sql(row)?)),
        None => Ok(None),
    }
}

fn predicate_clause(predicate: &Predicate) -> Result<(&'static str, Value)> {
    Ok(match predicate {
        Predicate::CustomerCodeEquals(code) => ("customer_code = ?", Value::Integer(*code)),
        Predicate::CustomerCodeContains(needle) => (
            "CAST(customer_code AS TEXT) LIKE '%' || ? || '%'",
            Value::Text(needle.clone()),
        ),
        Predicate::AddressContains(needle) => {
            ("address1 LIKE '%' || ? || '%'", Value::Text(needle.clone()))
        }
        Predicate::MobileContains(needle) => {
            ("mobile LIKE '%' || ? || '%'", Value::Text(needle.clone()))
        }
        Predicate::TotalPointsAtLeast(bound) => {
            ("total_points >= ?", Value::Real(points_to_real(*bound)?))
        }
        Predicate::TotalPointsAtMost(bound) => {
            ("total_points <= ?", Value::Real(points_to_real(*bound)?))
        }
        Predicate::UnclaimedPointsAtLeast(bound) => {
            ("unclaimed_points >= ?", Value::Real(points_to_real(*bound)?))
        }
        Predicate::UnclaimedPointsAtMost(bound) => {
            ("unclaimed_points <= ?", Value::Real(points_to_real(*bound)?))
        }
        Predicate::SalesDateOnOrAfter(bound) => {
            ("last_sales_date >= ?", Value::Text(format_iso_date(*bound)))
        }
        Predicate::SalesDateOnOrBefore(bound) => {
            ("last_sales_date <= ?", Value::Text(format_iso_date(*bound)))
        }
    })
}

fn run_query(conn: &Connection, plan: &QueryPlan) -> Result<QueryOutcome> {
    let mut clauses: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for predicate in &plan.predicates {
        let (clause, value) = predicate_clause(predicate)?;
        clauses.push(clause);
        values.push(value);
    }
    let where_sql =
        if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) };

    let count_sql = format!("SELECT COUNT(*) FROM ledger_rows{where_sql}");
    let total_count: i64 = conn
        .query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))
        .context("failed to count matching rows")?;

    // Secondary customer_code ordering keeps pages deterministic when the
    // sort column has ties.
    let select_sql = format!(
        "SELECT {ROW_COLUMNS} FROM ledger_rows{where_sql} \
         ORDER BY {} {}, customer_code ASC LIMIT ? OFFSET ?",
        plan.order_by.as_str(),
        plan.direction.as_str()
    );
    let mut select_values = values;
    select_values.push(Value::Integer(i64::from(plan.limit)));
    select_values.push(Value::Integer(i64::try_from(plan.offset).unwrap_or(i64::MAX)));

    let mut stmt = conn.prepare(&select_sql).context("failed to prepare page query")?;
    let mut sql_rows = stmt.query(params_from_iter(select_values.iter()))?;
    let mut rows = Vec::new();
    while let Some(row) = sql_rows.next()? {
        rows.push(ledger_row_from_sql(row)?);
    }

    Ok(QueryOutcome { rows, total_count: u64::try_from(total_count).unwrap_or(0) })
}
