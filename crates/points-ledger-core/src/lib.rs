use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

/// Page size the surrounding application uses when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Column headers of the external batch input format.
pub const CUSTOMER_CODE_COLUMN: &str = "CUSTOMER CODE";
pub const NET_WEIGHT_COLUMN: &str = "NET WEIGHT";
pub const SERIAL_NUMBER_COLUMN: &str = "SL NO";
pub const LAST_SALES_DATE_COLUMN: &str = "LAST SALES DATE";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("snapshot unavailable: {0}")]
    SnapshotUnavailable(String),
    #[error("persist failed: {0}")]
    PersistFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("batch format error: {0}")]
    BatchFormat(String),
}

/// Why one raw input row was excluded from a batch. Row-level and
/// recoverable: the row is skipped and the batch continues.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("customer code is missing or not an integer")]
    InvalidCustomerCode,
    #[error("net weight is missing or not a finite decimal")]
    InvalidWeight,
    #[error("record could not be read: {0}")]
    Unreadable(String),
}

/// One customer's point balance record.
///
/// Invariant: `unclaimed_points = total_points - claimed_points` after every
/// mutation, with all three values carrying one decimal place.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LedgerRow {
    pub customer_code: i64,
    pub serial_number: Option<i64>,
    pub address1: String,
    pub address2: String,
    pub address3: String,
    pub address4: String,
    pub pin_code: String,
    pub phone: String,
    pub mobile: String,
    pub total_points: Decimal,
    pub claimed_points: Decimal,
    pub unclaimed_points: Decimal,
    #[serde(default, with = "iso_date")]
    pub last_sales_date: Option<Date>,
}

/// Serde helper storing calendar dates as ISO `YYYY-MM-DD` strings.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    /// # Errors
    /// Fails when the date cannot be rendered in calendar form.
    pub fn serialize<S: Serializer>(
        value: &Option<Date>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => serializer.serialize_some(&super::format_iso_date(*date)),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    /// Fails when the stored string is not an ISO calendar date.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Date>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(value) => super::parse_iso_date(&value)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO date: {value}"))),
            None => Ok(None),
        }
    }
}

/// An untyped record straight out of the batch reader. Validated into a
/// [`LedgerRow`] immediately; never passed unvalidated past the boundary.
pub type RawRow = BTreeMap<String, String>;

/// A raw row plus the input line it came from, for rejection reporting.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SourceRow {
    pub line: u64,
    pub raw: RawRow,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub line: u64,
    pub reason: RejectionReason,
}

/// Outcome of validating one import batch: rows ready for reconciliation
/// plus the rejects with their reasons.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub accepted: Vec<LedgerRow>,
    pub rejected: Vec<RejectedRow>,
}

/// The two point balances the reconciliation engine needs from the store.
/// `claimed_points` is deliberately absent: the merge path must never touch
/// it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct PointsSnapshot {
    pub total_points: Decimal,
    pub unclaimed_points: Decimal,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDisposition {
    Insert,
    Update,
}

/// One reconciled row, tagged with which store path it takes.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    pub disposition: MergeDisposition,
    pub row: LedgerRow,
}

/// Round a point value to the ledger's one-decimal precision. The result
/// always carries exactly one decimal place, so `3` renders as `3.0`.
#[must_use]
pub fn round_points(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(1);
    rounded
}

/// Derive accrued points from a purchase net weight: `round(weight / 10, 1)`.
#[must_use]
pub fn points_from_weight(net_weight: Decimal) -> Decimal {
    round_points(net_weight / Decimal::TEN)
}

/// Parse a date in the external input format `dd-mm-yyyy`.
#[must_use]
pub fn parse_external_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[day]-[month]-[year]")).ok()
}

/// Parse an ISO calendar date `yyyy-mm-dd`.
#[must_use]
pub fn parse_iso_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// Render a calendar date in ISO form.
#[must_use]
pub fn format_iso_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

fn field<'a>(raw: &'a RawRow, key: &str) -> &'a str {
    raw.get(key).map_or("", |value| value.trim())
}

/// Validate one raw input row into a typed ledger row.
///
/// Customer code must parse as an integer and net weight as a non-negative
/// decimal; everything else is non-critical and degrades instead of
/// rejecting. The derived points seed both `total_points` and
/// `unclaimed_points`; a brand-new row starts with zero claimed points.
///
/// # Errors
/// Returns the row-level [`RejectionReason`] when a critical field is
/// missing or malformed.
pub fn validate_row(raw: &RawRow) -> Result<LedgerRow, RejectionReason> {
    let customer_code = i64::from_str(field(raw, CUSTOMER_CODE_COLUMN))
        .map_err(|_| RejectionReason::InvalidCustomerCode)?;

    let net_weight = Decimal::from_str(field(raw, NET_WEIGHT_COLUMN))
        .map_err(|_| RejectionReason::InvalidWeight)?;
    if net_weight.is_sign_negative() {
        return Err(RejectionReason::InvalidWeight);
    }
    let points = points_from_weight(net_weight);

    let serial_number = i64::from_str(field(raw, SERIAL_NUMBER_COLUMN)).ok();
    let last_sales_date = parse_external_date(field(raw, LAST_SALES_DATE_COLUMN));

    Ok(LedgerRow {
        customer_code,
        serial_number,
        address1: field(raw, "ADDRESS1").to_string(),
        address2: field(raw, "ADDRESS2").to_string(),
        address3: field(raw, "ADDRESS3").to_string(),
        address4: field(raw, "ADDRESS4").to_string(),
        pin_code: field(raw, "PIN CODE").to_string(),
        phone: field(raw, "PHONE").to_string(),
        mobile: field(raw, "MOBILE").to_string(),
        total_points: points,
        claimed_points: Decimal::ZERO,
        unclaimed_points: points,
        last_sales_date,
    })
}

/// Read a headered batch input stream into raw rows.
///
/// Records the reader cannot decode become row-level rejections rather than
/// aborting the batch; only a broken stream is an operation-level failure.
///
/// # Errors
/// Returns [`LedgerError::BatchFormat`] when the header row cannot be read.
pub fn read_raw_rows<R: Read>(
    reader: R,
) -> Result<(Vec<SourceRow>, Vec<RejectedRow>), LedgerError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|err| LedgerError::BatchFormat(err.to_string()))?
        .clone();

    let mut rows = Vec::new();
    let mut rejected = Vec::new();

    for (index, record) in csv_reader.records().enumerate() {
        let fallback_line = u64::try_from(index).unwrap_or(u64::MAX).saturating_add(2);
        match record {
            Ok(record) => {
                let line = record.position().map_or(fallback_line, csv::Position::line);
                let raw: RawRow = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                rows.push(SourceRow { line, raw });
            }
            Err(err) => {
                let line = err.position().map_or(fallback_line, csv::Position::line);
                rejected.push(RejectedRow {
                    line,
                    reason: RejectionReason::Unreadable(err.to_string()),
                });
            }
        }
    }

    Ok((rows, rejected))
}

/// Read and validate an entire batch input stream in one pass.
///
/// # Errors
/// Returns [`LedgerError::BatchFormat`] when the stream itself is unreadable;
/// individual bad rows are collected, never fatal.
pub fn parse_and_validate<R: Read>(reader: R) -> Result<BatchOutcome, LedgerError> {
    let (rows, mut rejected) = read_raw_rows(reader)?;

    let mut accepted = Vec::new();
    for source in rows {
        match validate_row(&source.raw) {
            Ok(row) => accepted.push(row),
            Err(reason) => rejected.push(RejectedRow { line: source.line, reason }),
        }
    }
    rejected.sort_by_key(|row| row.line);

    Ok(BatchOutcome { accepted, rejected })
}

/// Columns of the page export format, mirroring the displayed table.
pub const EXPORT_HEADERS: [&str; 10] = [
    CUSTOMER_CODE_COLUMN,
    "ADDRESS1",
    "ADDRESS2",
    "ADDRESS3",
    "ADDRESS4",
    "MOBILE",
    "TOTAL POINTS",
    "CLAIMED POINTS",
    "UNCLAIMED POINTS",
    LAST_SALES_DATE_COLUMN,
];

/// Render a page of ledger rows as headered CSV for the export surface.
///
/// # Errors
/// Returns [`LedgerError::BatchFormat`] when the sink rejects a write.
pub fn write_rows_csv<W: Write>(writer: W, rows: &[LedgerRow]) -> Result<(), LedgerError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(EXPORT_HEADERS)
        .map_err(|err| LedgerError::BatchFormat(err.to_string()))?;

    for row in rows {
        let date = row.last_sales_date.map(format_iso_date).unwrap_or_default();
        csv_writer
            .write_record([
                row.customer_code.to_string(),
                row.address1.clone(),
                row.address2.clone(),
                row.address3.clone(),
                row.address4.clone(),
                row.mobile.clone(),
                format!("{:.1}", row.total_points),
                format!("{:.1}", row.claimed_points),
                format!("{:.1}", row.unclaimed_points),
                date,
            ])
            .map_err(|err| LedgerError::BatchFormat(err.to_string()))?;
    }

    csv_writer.flush().map_err(|err| LedgerError::BatchFormat(err.to_string()))
}

fn fold_accrual(into: &mut LedgerRow, accrued_total: Decimal, accrued_unclaimed: Decimal) {
    into.total_points = round_points(into.total_points + accrued_total);
    into.unclaimed_points = round_points(into.unclaimed_points + accrued_unclaimed);
    // Keeps the row internally consistent; the store's update path still
    // never writes claimed_points.
    into.claimed_points = round_points(into.total_points - into.unclaimed_points);
}

/// Merge validated accrual rows into the current ledger snapshot.
///
/// Pure given its two inputs. Emits one merged row per distinct customer
/// code, in first-seen batch order: unknown codes pass through as inserts,
/// known codes become updates with additively merged point totals, and
/// duplicate codes within the batch fold into the running merged value
/// rather than the pre-batch snapshot.
#[must_use]
pub fn reconcile(
    valid_rows: &[LedgerRow],
    snapshot: &BTreeMap<i64, PointsSnapshot>,
) -> Vec<MergedRow> {
    let mut merged: Vec<MergedRow> = Vec::new();
    let mut by_code: BTreeMap<i64, usize> = BTreeMap::new();

    for row in valid_rows {
        if let Some(&index) = by_code.get(&row.customer_code) {
            let target = &mut merged[index].row;
            fold_accrual(target, row.total_points, row.unclaimed_points);
            target.serial_number = row.serial_number.or(target.serial_number);
            target.address1.clone_from(&row.address1);
            target.address2.clone_from(&row.address2);
            target.address3.clone_from(&row.address3);
            target.address4.clone_from(&row.address4);
            target.pin_code.clone_from(&row.pin_code);
            target.phone.clone_from(&row.phone);
            target.mobile.clone_from(&row.mobile);
            if row.last_sales_date.is_some() {
                target.last_sales_date = row.last_sales_date;
            }
            continue;
        }

        let entry = match snapshot.get(&row.customer_code) {
            Some(existing) => {
                let mut updated = row.clone();
                updated.total_points = round_points(existing.total_points + row.total_points);
                updated.unclaimed_points =
                    round_points(existing.unclaimed_points + row.unclaimed_points);
                updated.claimed_points =
                    round_points(updated.total_points - updated.unclaimed_points);
                MergedRow { disposition: MergeDisposition::Update, row: updated }
            }
            None => MergedRow { disposition: MergeDisposition::Insert, row: row.clone() },
        };
        by_code.insert(row.customer_code, merged.len());
        merged.push(entry);
    }

    merged
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    CustomerCode,
    SerialNumber,
    Address1,
    Mobile,
    TotalPoints,
    ClaimedPoints,
    UnclaimedPoints,
    LastSalesDate,
}

impl SortColumn {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomerCode => "customer_code",
            Self::SerialNumber => "serial_number",
            Self::Address1 => "address1",
            Self::Mobile => "mobile",
            Self::TotalPoints => "total_points",
            Self::ClaimedPoints => "claimed_points",
            Self::UnclaimedPoints => "unclaimed_points",
            Self::LastSalesDate => "last_sales_date",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "customer_code" => Some(Self::CustomerCode),
            "serial_number" => Some(Self::SerialNumber),
            "address1" => Some(Self::Address1),
            "mobile" => Some(Self::Mobile),
            "total_points" => Some(Self::TotalPoints),
            "claimed_points" => Some(Self::ClaimedPoints),
            "unclaimed_points" => Some(Self::UnclaimedPoints),
            "last_sales_date" => Some(Self::LastSalesDate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// A multi-dimensional filter/sort/page request as the caller submitted it.
///
/// Filter values are raw strings on purpose: coercion happens in [`plan`],
/// and a malformed value means "no constraint", never an error.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub customer_code: Option<String>,
    pub address: Option<String>,
    pub mobile: Option<String>,
    pub total_points_min: Option<String>,
    pub total_points_max: Option<String>,
    pub unclaimed_points_min: Option<String>,
    pub unclaimed_points_max: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub sort_by: Option<SortColumn>,
    pub sort_direction: Option<SortDirection>,
    /// 1-based requested page.
    pub page: u32,
}

/// One resolved predicate. All present predicates AND-combine.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Predicate {
    CustomerCodeEquals(i64),
    CustomerCodeContains(String),
    AddressContains(String),
    MobileContains(String),
    TotalPointsAtLeast(Decimal),
    TotalPointsAtMost(Decimal),
    UnclaimedPointsAtLeast(Decimal),
    UnclaimedPointsAtMost(Decimal),
    SalesDateOnOrAfter(Date),
    SalesDateOnOrBefore(Date),
}

/// The canonical predicate/order/offset/limit tuple executed by the store.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryPlan {
    pub predicates: Vec<Predicate>,
    pub order_by: SortColumn,
    pub direction: SortDirection,
    pub offset: u64,
    pub limit: u32,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).map(str::trim).filter(|trimmed| !trimmed.is_empty())
}

fn coerce_decimal(value: Option<&String>) -> Option<Decimal> {
    present(value).and_then(|raw| Decimal::from_str(raw).ok())
}

fn coerce_date(value: Option<&String>) -> Option<Date> {
    present(value).and_then(|raw| parse_iso_date(raw).or_else(|| parse_external_date(raw)))
}

/// Build the canonical query plan for one filter specification.
///
/// Never fails: malformed filter inputs degrade to "no constraint". The
/// requested page is not clamped here; an out-of-range offset yields an
/// empty page at the store, which is a valid terminal state.
#[must_use]
pub fn plan(spec: &FilterSpec, page_size: u32) -> QueryPlan {
    let page_size = page_size.max(1);
    let mut predicates = Vec::new();

    if let Some(raw) = present(spec.customer_code.as_ref()) {
        match i64::from_str(raw) {
            Ok(code) => predicates.push(Predicate::CustomerCodeEquals(code)),
            Err(_) => predicates.push(Predicate::CustomerCodeContains(raw.to_string())),
        }
    }
    if let Some(needle) = present(spec.address.as_ref()) {
        predicates.push(Predicate::AddressContains(needle.to_string()));
    }
    if let Some(needle) = present(spec.mobile.as_ref()) {
        predicates.push(Predicate::MobileContains(needle.to_string()));
    }
    if let Some(bound) = coerce_decimal(spec.total_points_min.as_ref()) {
        predicates.push(Predicate::TotalPointsAtLeast(bound));
    }
    if let Some(bound) = coerce_decimal(spec.total_points_max.as_ref()) {
        predicates.push(Predicate::TotalPointsAtMost(bound));
    }
    if let Some(bound) = coerce_decimal(spec.unclaimed_points_min.as_ref()) {
        predicates.push(Predicate::UnclaimedPointsAtLeast(bound));
    }
    if let Some(bound) = coerce_decimal(spec.unclaimed_points_max.as_ref()) {
        predicates.push(Predicate::UnclaimedPointsAtMost(bound));
    }
    if let Some(bound) = coerce_date(spec.from_date.as_ref()) {
        predicates.push(Predicate::SalesDateOnOrAfter(bound));
    }
    if let Some(bound) = coerce_date(spec.to_date.as_ref()) {
        predicates.push(Predicate::SalesDateOnOrBefore(bound));
    }

    let page = u64::from(spec.page.max(1));
    QueryPlan {
        predicates,
        order_by: spec.sort_by.unwrap_or(SortColumn::CustomerCode),
        direction: spec.sort_direction.unwrap_or(SortDirection::Ascending),
        offset: (page - 1) * u64::from(page_size),
        limit: page_size,
    }
}

/// Navigable page state derived from a store-reported total row count.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageWindow {
    pub total_count: u64,
    pub total_pages: u32,
    /// The requested page clamped into `[1, max(total_pages, 1)]`.
    pub page: u32,
    pub has_prev: bool,
    pub has_next: bool,
}

/// Compute the page window for navigation. `total_pages` is
/// `ceil(total_count / page_size)`, zero when the count is zero.
#[must_use]
pub fn page_window(total_count: u64, page_size: u32, requested_page: u32) -> PageWindow {
    let page_size = u64::from(page_size.max(1));
    let pages = total_count.div_ceil(page_size);
    let total_pages = u32::try_from(pages).unwrap_or(u32::MAX);
    let page = requested_page.clamp(1, total_pages.max(1));

    PageWindow {
        total_count,
        total_pages,
        page,
        has_prev: page > 1,
        has_next: page < total_pages,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn dec(input: &str) -> Decimal {
        match Decimal::from_str(input) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture decimal {input}: {err}"),
        }
    }

    fn raw(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect()
    }

    fn validated(pairs: &[(&str, &str)]) -> LedgerRow {
        match validate_row(&raw(pairs)) {
            Ok(row) => row,
            Err(reason) => panic!("row should validate: {reason}"),
        }
    }

    fn accrual_row(code: i64, weight: &str) -> LedgerRow {
        validated(&[(CUSTOMER_CODE_COLUMN, &code.to_string()), (NET_WEIGHT_COLUMN, weight)])
    }

    fn fixture_date(iso: &str) -> Date {
        match parse_iso_date(iso) {
            Some(date) => date,
            None => panic!("invalid fixture date {iso}"),
        }
    }

    #[test]
    fn validate_derives_points_from_net_weight() {
        let row = validated(&[(CUSTOMER_CODE_COLUMN, "101"), (NET_WEIGHT_COLUMN, "25.0")]);

        assert_eq!(row.customer_code, 101);
        assert_eq!(row.total_points, dec("2.5"));
        assert_eq!(row.unclaimed_points, dec("2.5"));
        assert_eq!(row.claimed_points, Decimal::ZERO);
    }

    #[test]
    fn validate_rounds_points_to_one_decimal_place() {
        let row = accrual_row(1, "25.5");
        assert_eq!(row.total_points, dec("2.6"));

        let row = accrual_row(1, "24.4");
        assert_eq!(row.total_points, dec("2.4"));
    }

    #[test]
    fn validate_rejects_non_numeric_customer_code() {
        let result = validate_row(&raw(&[
            (CUSTOMER_CODE_COLUMN, "abc"),
            (NET_WEIGHT_COLUMN, "10.0"),
        ]));
        assert_eq!(result, Err(RejectionReason::InvalidCustomerCode));

        let result = validate_row(&raw(&[(NET_WEIGHT_COLUMN, "10.0")]));
        assert_eq!(result, Err(RejectionReason::InvalidCustomerCode));
    }

    #[test]
    fn validate_rejects_missing_or_malformed_weight() {
        let result = validate_row(&raw(&[(CUSTOMER_CODE_COLUMN, "7")]));
        assert_eq!(result, Err(RejectionReason::InvalidWeight));

        let result = validate_row(&raw(&[
            (CUSTOMER_CODE_COLUMN, "7"),
            (NET_WEIGHT_COLUMN, "heavy"),
        ]));
        assert_eq!(result, Err(RejectionReason::InvalidWeight));

        let result = validate_row(&raw(&[
            (CUSTOMER_CODE_COLUMN, "7"),
            (NET_WEIGHT_COLUMN, "-5.0"),
        ]));
        assert_eq!(result, Err(RejectionReason::InvalidWeight));
    }

    #[test]
    fn validate_parses_external_date_into_iso_calendar_form() {
        let row = validated(&[
            (CUSTOMER_CODE_COLUMN, "5"),
            (NET_WEIGHT_COLUMN, "10"),
            (LAST_SALES_DATE_COLUMN, "31-12-2024"),
        ]);
        assert_eq!(row.last_sales_date, Some(fixture_date("2024-12-31")));
    }

    #[test]
    fn validate_accepts_rows_with_missing_or_invalid_dates() {
        let row = validated(&[
            (CUSTOMER_CODE_COLUMN, "5"),
            (NET_WEIGHT_COLUMN, "10"),
            (LAST_SALES_DATE_COLUMN, "invalid"),
        ]);
        assert_eq!(row.last_sales_date, None);

        let row = validated(&[(CUSTOMER_CODE_COLUMN, "5"), (NET_WEIGHT_COLUMN, "10")]);
        assert_eq!(row.last_sales_date, None);
    }

    #[test]
    fn validate_defaults_optional_strings_to_empty_never_null() {
        let row = validated(&[(CUSTOMER_CODE_COLUMN, "5"), (NET_WEIGHT_COLUMN, "10")]);

        assert_eq!(row.address1, "");
        assert_eq!(row.address4, "");
        assert_eq!(row.pin_code, "");
        assert_eq!(row.phone, "");
        assert_eq!(row.mobile, "");
    }

    #[test]
    fn validate_degrades_unparsable_serial_number_to_none() {
        let row = validated(&[
            (CUSTOMER_CODE_COLUMN, "5"),
            (NET_WEIGHT_COLUMN, "10"),
            (SERIAL_NUMBER_COLUMN, "12"),
        ]);
        assert_eq!(row.serial_number, Some(12));

        let row = validated(&[
            (CUSTOMER_CODE_COLUMN, "5"),
            (NET_WEIGHT_COLUMN, "10"),
            (SERIAL_NUMBER_COLUMN, "n/a"),
        ]);
        assert_eq!(row.serial_number, None);
    }

    #[test]
    fn reconcile_passes_new_customers_through_as_inserts() {
        let rows = vec![accrual_row(101, "25.0")];
        let merged = reconcile(&rows, &BTreeMap::new());

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].disposition, MergeDisposition::Insert);
        assert_eq!(merged[0].row.total_points, dec("2.5"));
        assert_eq!(merged[0].row.unclaimed_points, dec("2.5"));
        assert_eq!(merged[0].row.claimed_points, Decimal::ZERO);
    }

    #[test]
    fn reconcile_adds_accruals_onto_existing_balances() {
        let rows = vec![accrual_row(101, "20.0")];
        let snapshot: BTreeMap<i64, PointsSnapshot> = [(
            101,
            PointsSnapshot { total_points: dec("10.0"), unclaimed_points: dec("4.0") },
        )]
        .into_iter()
        .collect();

        let merged = reconcile(&rows, &snapshot);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].disposition, MergeDisposition::Update);
        assert_eq!(merged[0].row.total_points, dec("12.0"));
        assert_eq!(merged[0].row.unclaimed_points, dec("6.0"));
    }

    #[test]
    fn reconcile_folds_intra_batch_duplicates_into_running_total() {
        let rows = vec![accrual_row(7, "10.0"), accrual_row(7, "20.0")];
        let snapshot: BTreeMap<i64, PointsSnapshot> = [(
            7,
            PointsSnapshot { total_points: dec("1.0"), unclaimed_points: dec("0.5") },
        )]
        .into_iter()
        .collect();

        let merged = reconcile(&rows, &snapshot);

        assert_eq!(merged.len(), 1, "one merged row per distinct customer code");
        assert_eq!(merged[0].row.total_points, dec("4.0"));
        assert_eq!(merged[0].row.unclaimed_points, dec("3.5"));
    }

    #[test]
    fn reconcile_emits_rows_in_first_seen_order() {
        let rows = vec![accrual_row(30, "10"), accrual_row(10, "10"), accrual_row(30, "10")];
        let merged = reconcile(&rows, &BTreeMap::new());

        let codes: Vec<i64> = merged.iter().map(|entry| entry.row.customer_code).collect();
        assert_eq!(codes, vec![30, 10]);
        assert_eq!(merged[0].row.total_points, dec("2.0"));
    }

    #[test]
    fn reconcile_keeps_unclaimed_equal_to_total_minus_claimed() {
        let rows = vec![accrual_row(101, "20.0")];
        let snapshot: BTreeMap<i64, PointsSnapshot> = [(
            101,
            PointsSnapshot { total_points: dec("10.0"), unclaimed_points: dec("4.0") },
        )]
        .into_iter()
        .collect();

        let merged = reconcile(&rows, &snapshot);
        let row = &merged[0].row;

        assert_eq!(row.unclaimed_points, row.total_points - row.claimed_points);
        assert_eq!(row.claimed_points, dec("6.0"), "existing claimed balance is preserved");
    }

    #[test]
    fn repeated_reconciliation_strictly_increases_totals() {
        let rows = vec![accrual_row(3, "15.0")];

        let first = reconcile(&rows, &BTreeMap::new());
        let snapshot: BTreeMap<i64, PointsSnapshot> = first
            .iter()
            .map(|entry| {
                (
                    entry.row.customer_code,
                    PointsSnapshot {
                        total_points: entry.row.total_points,
                        unclaimed_points: entry.row.unclaimed_points,
                    },
                )
            })
            .collect();
        let second = reconcile(&rows, &snapshot);

        assert!(second[0].row.total_points > first[0].row.total_points);
        assert_eq!(second[0].row.total_points, dec("3.0"));
    }

    #[test]
    fn parse_and_validate_collects_rejections_without_aborting() {
        let input = "\
CUSTOMER CODE,NET WEIGHT,ADDRESS1,LAST SALES DATE
101,25.0,12 Main Road,31-12-2024
abc,10.0,Nowhere,
102,not-a-weight,Nowhere,
103,40,Mill Lane,15-01-2025
";
        let outcome = match parse_and_validate(input.as_bytes()) {
            Ok(outcome) => outcome,
            Err(err) => panic!("batch should parse: {err}"),
        };

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.rejected[0].line, 3);
        assert_eq!(outcome.rejected[0].reason, RejectionReason::InvalidCustomerCode);
        assert_eq!(outcome.rejected[1].line, 4);
        assert_eq!(outcome.rejected[1].reason, RejectionReason::InvalidWeight);
        assert_eq!(outcome.accepted[0].address1, "12 Main Road");
    }

    #[test]
    fn parse_and_validate_rejects_undecodable_records_per_row() {
        let mut input = b"CUSTOMER CODE,NET WEIGHT\n101,25.0\n".to_vec();
        input.extend_from_slice(&[0xff, 0xfe, b',', b'1', b'\n']);
        input.extend_from_slice(b"102,10.0\n");

        let outcome = match parse_and_validate(input.as_slice()) {
            Ok(outcome) => outcome,
            Err(err) => panic!("batch should parse: {err}"),
        };

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(matches!(outcome.rejected[0].reason, RejectionReason::Unreadable(_)));
    }

    #[test]
    fn write_rows_csv_renders_the_export_columns() {
        let mut row = accrual_row(101, "25.0");
        row.address1 = "12 Main Road".to_string();
        row.mobile = "5550000".to_string();
        row.last_sales_date = Some(fixture_date("2024-12-31"));

        let mut buffer = Vec::new();
        if let Err(err) = write_rows_csv(&mut buffer, &[row]) {
            panic!("export should succeed: {err}");
        }
        let rendered = String::from_utf8_lossy(&buffer);

        let mut lines = rendered.lines();
        assert_eq!(
            lines.next(),
            Some(
                "CUSTOMER CODE,ADDRESS1,ADDRESS2,ADDRESS3,ADDRESS4,MOBILE,\
                 TOTAL POINTS,CLAIMED POINTS,UNCLAIMED POINTS,LAST SALES DATE"
            )
        );
        assert_eq!(lines.next(), Some("101,12 Main Road,,,,5550000,2.5,0.0,2.5,2024-12-31"));
    }

    #[test]
    fn plan_with_empty_spec_has_no_predicates() {
        let plan = plan(&FilterSpec::default(), DEFAULT_PAGE_SIZE);

        assert!(plan.predicates.is_empty());
        assert_eq!(plan.order_by, SortColumn::CustomerCode);
        assert_eq!(plan.direction, SortDirection::Ascending);
        assert_eq!(plan.offset, 0);
        assert_eq!(plan.limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn plan_uses_exact_match_for_integer_customer_code() {
        let spec = FilterSpec { customer_code: Some(" 101 ".to_string()), ..FilterSpec::default() };
        let plan = plan(&spec, DEFAULT_PAGE_SIZE);
        assert_eq!(plan.predicates, vec![Predicate::CustomerCodeEquals(101)]);
    }

    #[test]
    fn plan_falls_back_to_substring_match_for_partial_customer_code() {
        let spec = FilterSpec { customer_code: Some("10a".to_string()), ..FilterSpec::default() };
        let plan = plan(&spec, DEFAULT_PAGE_SIZE);
        assert_eq!(plan.predicates, vec![Predicate::CustomerCodeContains("10a".to_string())]);
    }

    #[test]
    fn plan_treats_malformed_numeric_filters_as_absent() {
        let spec = FilterSpec {
            total_points_min: Some("lots".to_string()),
            total_points_max: Some("10.0".to_string()),
            unclaimed_points_min: Some("".to_string()),
            ..FilterSpec::default()
        };
        let plan = plan(&spec, DEFAULT_PAGE_SIZE);
        assert_eq!(plan.predicates, vec![Predicate::TotalPointsAtMost(dec("10.0"))]);
    }

    #[test]
    fn plan_accepts_iso_and_external_date_filters() {
        let spec = FilterSpec {
            from_date: Some("2024-01-01".to_string()),
            to_date: Some("31-12-2024".to_string()),
            ..FilterSpec::default()
        };
        let plan = plan(&spec, DEFAULT_PAGE_SIZE);
        assert_eq!(
            plan.predicates,
            vec![
                Predicate::SalesDateOnOrAfter(fixture_date("2024-01-01")),
                Predicate::SalesDateOnOrBefore(fixture_date("2024-12-31")),
            ]
        );
    }

    #[test]
    fn plan_computes_offset_from_one_based_page() {
        let spec = FilterSpec { page: 4, ..FilterSpec::default() };
        let plan = plan(&spec, DEFAULT_PAGE_SIZE);
        assert_eq!(plan.offset, 30);
        assert_eq!(plan.limit, 10);
    }

    #[test]
    fn sort_columns_round_trip_through_their_names() {
        let columns = [
            SortColumn::CustomerCode,
            SortColumn::SerialNumber,
            SortColumn::Address1,
            SortColumn::Mobile,
            SortColumn::TotalPoints,
            SortColumn::ClaimedPoints,
            SortColumn::UnclaimedPoints,
            SortColumn::LastSalesDate,
        ];
        for column in columns {
            assert_eq!(SortColumn::parse(column.as_str()), Some(column));
        }
        assert_eq!(SortColumn::parse("points"), None);
    }

    #[test]
    fn page_window_reports_ceiling_page_count() {
        let window = page_window(25, 10, 1);
        assert_eq!(window.total_pages, 3);
        assert!(!window.has_prev);
        assert!(window.has_next);
    }

    #[test]
    fn page_window_clamps_out_of_range_pages_for_navigation() {
        let window = page_window(25, 10, 9);
        assert_eq!(window.page, 3);
        assert!(window.has_prev);
        assert!(!window.has_next);
    }

    #[test]
    fn page_window_is_empty_but_valid_for_zero_rows() {
        let window = page_window(0, 10, 1);
        assert_eq!(window.total_pages, 0);
        assert_eq!(window.page, 1);
        assert!(!window.has_prev);
        assert!(!window.has_next);
    }

    proptest! {
        #[test]
        fn reconciled_rows_always_satisfy_the_balance_invariant(
            existing_total_tenths in 0_i64..100_000,
            existing_claimed_tenths in 0_i64..100_000,
            weight_tenths in proptest::collection::vec(0_i64..50_000, 1..8),
        ) {
            let existing_claimed_tenths = existing_claimed_tenths.min(existing_total_tenths);
            let total = Decimal::new(existing_total_tenths, 1);
            let claimed = Decimal::new(existing_claimed_tenths, 1);
            let snapshot: BTreeMap<i64, PointsSnapshot> = [(
                1,
                PointsSnapshot { total_points: total, unclaimed_points: total - claimed },
            )]
            .into_iter()
            .collect();

            let rows: Vec<LedgerRow> = weight_tenths
                .iter()
                .map(|tenths| accrual_row(1, &Decimal::new(*tenths, 1).to_string()))
                .collect();

            let merged = reconcile(&rows, &snapshot);
            prop_assert_eq!(merged.len(), 1);
            let row = &merged[0].row;
            prop_assert_eq!(row.unclaimed_points, row.total_points - row.claimed_points);
            prop_assert_eq!(row.claimed_points, claimed);
            prop_assert!(row.total_points >= total);
        }
    }
}
