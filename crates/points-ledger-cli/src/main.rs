use std::fs::File;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use points_ledger_core::{
    page_window, parse_and_validate, parse_external_date, parse_iso_date, plan, write_rows_csv,
    FilterSpec, LedgerRow, SortColumn, SortDirection, DEFAULT_PAGE_SIZE,
};
use points_ledger_store_sqlite::{ContactUpdate, LedgerStore};
use rust_decimal::Decimal;
use serde_json::Value;
use time::Date;

const CLI_CONTRACT_VERSION: &str = "ledger-cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ledger")]
#[command(about = "Customer loyalty-points ledger CLI")]
struct Cli {
    #[arg(long, default_value = "./points_ledger.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Bulk-import a headered CSV batch and reconcile it into the ledger.
    Import(ImportArgs),
    /// Run a filtered, sorted, paginated query.
    Query(QueryArgs),
    /// Transfer points from unclaimed to claimed.
    Claim(ClaimArgs),
    /// Manually accrue points from a purchase net weight.
    Accrue(AccrueArgs),
    /// Explicitly correct a customer's point balances.
    Adjust(AdjustArgs),
    /// Edit contact-detail fields.
    Edit(EditArgs),
    /// Irreversibly remove a customer's ledger row.
    Delete(DeleteArgs),
    /// Write the selected query page as CSV for the export surface.
    Export(ExportArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate,
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct FilterArgs {
    #[arg(long)]
    customer_code: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    mobile: Option<String>,
    #[arg(long)]
    total_points_min: Option<String>,
    #[arg(long)]
    total_points_max: Option<String>,
    #[arg(long)]
    unclaimed_points_min: Option<String>,
    #[arg(long)]
    unclaimed_points_max: Option<String>,
    #[arg(long)]
    from_date: Option<String>,
    #[arg(long)]
    to_date: Option<String>,
    #[arg(long, value_enum)]
    sort_by: Option<SortByArg>,
    #[arg(long, value_enum)]
    sort_order: Option<SortOrderArg>,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Debug, Args)]
struct ClaimArgs {
    #[arg(long)]
    customer_code: i64,
    #[arg(long)]
    points: Decimal,
}

#[derive(Debug, Args)]
struct AccrueArgs {
    #[arg(long)]
    customer_code: i64,
    #[arg(long)]
    net_weight: Decimal,
    #[arg(long)]
    sales_date: Option<String>,
}

#[derive(Debug, Args)]
struct AdjustArgs {
    #[arg(long)]
    customer_code: i64,
    #[arg(long)]
    total_points: Decimal,
    #[arg(long)]
    claimed_points: Decimal,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(long)]
    customer_code: i64,
    #[arg(long)]
    serial_number: Option<i64>,
    #[arg(long)]
    address1: Option<String>,
    #[arg(long)]
    address2: Option<String>,
    #[arg(long)]
    address3: Option<String>,
    #[arg(long)]
    address4: Option<String>,
    #[arg(long)]
    pin_code: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    mobile: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(long)]
    customer_code: i64,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortByArg {
    CustomerCode,
    SerialNumber,
    Address1,
    Mobile,
    TotalPoints,
    ClaimedPoints,
    UnclaimedPoints,
    LastSalesDate,
}

impl From<SortByArg> for SortColumn {
    fn from(value: SortByArg) -> Self {
        match value {
            SortByArg::CustomerCode => Self::CustomerCode,
            SortByArg::SerialNumber => Self::SerialNumber,
            SortByArg::Address1 => Self::Address1,
            SortByArg::Mobile => Self::Mobile,
            SortByArg::TotalPoints => Self::TotalPoints,
            SortByArg::ClaimedPoints => Self::ClaimedPoints,
            SortByArg::UnclaimedPoints => Self::UnclaimedPoints,
            SortByArg::LastSalesDate => Self::LastSalesDate,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortOrderArg {
    Asc,
    Desc,
}

impl From<SortOrderArg> for SortDirection {
    fn from(value: SortOrderArg) -> Self {
        match value {
            SortOrderArg::Asc => Self::Ascending,
            SortOrderArg::Desc => Self::Descending,
        }
    }
}

impl FilterArgs {
    fn to_spec(&self) -> FilterSpec {
        FilterSpec {
            customer_code: self.customer_code.clone(),
            address: self.address.clone(),
            mobile: self.mobile.clone(),
            total_points_min: self.total_points_min.clone(),
            total_points_max: self.total_points_max.clone(),
            unclaimed_points_min: self.unclaimed_points_min.clone(),
            unclaimed_points_max: self.unclaimed_points_max.clone(),
            from_date: self.from_date.clone(),
            to_date: self.to_date.clone(),
            sort_by: self.sort_by.map(SortColumn::from),
            sort_direction: self.sort_order.map(SortDirection::from),
            page: self.page,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn row_json(row: &LedgerRow) -> Result<Value> {
    serde_json::to_value(row).context("failed to serialize ledger row")
}

fn parse_cli_date(raw: &str) -> Result<Date> {
    parse_external_date(raw)
        .or_else(|| parse_iso_date(raw))
        .ok_or_else(|| anyhow!("invalid date `{raw}`; expected dd-mm-yyyy or yyyy-mm-dd"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut store = LedgerStore::open(&cli.db)?;

    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Import(args) => run_import(&args, &mut store),
        Command::Query(args) => run_query(&args.filter, &mut store),
        Command::Claim(args) => run_claim(&args, &mut store),
        Command::Accrue(args) => run_accrue(&args, &mut store),
        Command::Adjust(args) => run_adjust(&args, &mut store),
        Command::Edit(args) => run_edit(&args, &mut store),
        Command::Delete(args) => run_delete(&args, &mut store),
        Command::Export(args) => run_export(&args, &mut store),
    }
}

fn run_db(command: DbCommand, store: &mut LedgerStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate => {
            let before = store.schema_status()?;
            store.migrate()?;
            let after = store.schema_status()?;
            emit_json(serde_json::json!({
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(report).context("failed to serialize report")?)
        }
    }
}

fn run_import(args: &ImportArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;

    let file = File::open(&args.file)
        .with_context(|| format!("failed to open batch file {}", args.file.display()))?;
    let outcome = parse_and_validate(file)?;
    let counts = store.import_batch(&outcome.accepted)?;

    emit_json(serde_json::json!({
        "accepted": outcome.accepted.len(),
        "rejected": serde_json::to_value(&outcome.rejected)?,
        "inserted": counts.inserted,
        "updated": counts.updated,
        "changed": counts.inserted + counts.updated
    }))
}

fn run_query(filter: &FilterArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;
    let spec = filter.to_spec();
    let query_plan = plan(&spec, filter.page_size);
    let outcome = store.query(&query_plan)?;
    let window = page_window(outcome.total_count, filter.page_size, filter.page);

    let rows = outcome.rows.iter().map(row_json).collect::<Result<Vec<_>>>()?;
    emit_json(serde_json::json!({
        "rows": rows,
        "total_count": outcome.total_count,
        "total_pages": window.total_pages,
        "page": window.page,
        "has_prev": window.has_prev,
        "has_next": window.has_next
    }))
}

fn run_claim(args: &ClaimArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;
    let row = store.claim_points(args.customer_code, args.points)?;
    emit_json(serde_json::json!({ "row": row_json(&row)? }))
}

fn run_accrue(args: &AccrueArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;
    let sales_date = args.sales_date.as_deref().map(parse_cli_date).transpose()?;
    let row = store.accrue_weight(args.customer_code, args.net_weight, sales_date)?;
    emit_json(serde_json::json!({ "row": row_json(&row)? }))
}

fn run_adjust(args: &AdjustArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;
    let row = store.adjust_points(args.customer_code, args.total_points, args.claimed_points)?;
    emit_json(serde_json::json!({ "row": row_json(&row)? }))
}

fn run_edit(args: &EditArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;
    let update = ContactUpdate {
        serial_number: args.serial_number,
        address1: args.address1.clone(),
        address2: args.address2.clone(),
        address3: args.address3.clone(),
        address4: args.address4.clone(),
        pin_code: args.pin_code.clone(),
        phone: args.phone.clone(),
        mobile: args.mobile.clone(),
    };
    let row = store.update_contact(args.customer_code, &update)?;
    emit_json(serde_json::json!({ "row": row_json(&row)? }))
}

fn run_delete(args: &DeleteArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;
    let deleted = store.delete_by_code(args.customer_code)?;
    emit_json(serde_json::json!({
        "customer_code": args.customer_code,
        "deleted": deleted
    }))
}

fn run_export(args: &ExportArgs, store: &mut LedgerStore) -> Result<()> {
    store.migrate()?;
    let spec = args.filter.to_spec();
    let query_plan = plan(&spec, args.filter.page_size);
    let outcome = store.query(&query_plan)?;

    let out = File::create(&args.out)
        .with_context(|| format!("failed to create export file {}", args.out.display()))?;
    write_rows_csv(out, &outcome.rows)?;

    emit_json(serde_json::json!({
        "out": args.out.display().to_string(),
        "rows_written": outcome.rows.len(),
        "total_count": outcome.total_count
    }))
}
