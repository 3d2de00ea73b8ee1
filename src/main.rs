use anyhow::{bail, Context, Result};
use campaign_ledger::{
    aggregate_by_ad, compare_periods, parse_date, parse_report, summarize_account,
    AggregationQuery, Change, ClientAccount, DateRange, ImportOptions, ImportOutcome, Importer,
    SchemaNormalizer, SqliteStore,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "campaign-ledger")]
#[command(about = "Import, deduplicate and roll up ads performance exports", version)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "CAMPAIGN_LEDGER_DB", default_value = "campaign_ledger.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage clients
    #[command(subcommand)]
    Clients(ClientsCommand),
    /// Import a spreadsheet export or a text report
    Import(ImportArgs),
    /// List import batches
    History {
        #[arg(long)]
        client: Option<String>,
    },
    /// Reverse one import batch
    Undo { batch_id: String },
    /// Per-ad rollup
    Ads(AdsArgs),
    /// Account totals with comparison against the previous period
    Summary(SummaryArgs),
    /// Print a tokenized text report as JSON
    Inspect { path: PathBuf },
}

#[derive(Subcommand)]
enum ClientsCommand {
    Add {
        name: String,
        #[arg(long, default_value = "EUR")]
        currency: String,
        /// Account name as it appears in exports
        #[arg(long)]
        external_name: Option<String>,
    },
    List,
}

#[derive(Parser)]
struct ImportArgs {
    path: PathBuf,
    /// Target client, required for text reports
    #[arg(long)]
    client: Option<String>,
    /// Merge known accounts and drop rows of unknown ones
    #[arg(long, default_value_t = false)]
    skip_unknown: bool,
}

#[derive(Parser)]
struct AdsArgs {
    #[arg(long)]
    client: String,
    #[arg(long, value_parser = parse_date_arg)]
    from: Option<NaiveDate>,
    #[arg(long, value_parser = parse_date_arg)]
    to: Option<NaiveDate>,
    /// Also count rows whose ad is not delivering
    #[arg(long, default_value_t = false)]
    include_inactive: bool,
}

#[derive(Parser)]
struct SummaryArgs {
    #[arg(long)]
    client: String,
    #[arg(long, value_parser = parse_date_arg)]
    from: NaiveDate,
    #[arg(long, value_parser = parse_date_arg)]
    to: NaiveDate,
}

fn parse_date_arg(raw: &str) -> Result<NaiveDate, String> {
    parse_date(raw).ok_or_else(|| format!("not a date: '{}' (use DD/MM/YYYY or YYYY-MM-DD)", raw))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    if let Command::Inspect { path } = &cli.command {
        return run_inspect(path);
    }

    let store = SqliteStore::open(&cli.db)?;
    let importer = Importer::new(store, SchemaNormalizer::new()?);

    match cli.command {
        Command::Clients(cmd) => run_clients(&importer, cmd),
        Command::Import(args) => run_import(&importer, args),
        Command::History { client } => run_history(&importer, client.as_deref()),
        Command::Undo { batch_id } => run_undo(&importer, &batch_id),
        Command::Ads(args) => run_ads(&importer, args),
        Command::Summary(args) => run_summary(&importer, args),
        Command::Inspect { .. } => Ok(()),
    }
}

fn run_clients(importer: &Importer<SqliteStore>, cmd: ClientsCommand) -> Result<()> {
    match cmd {
        ClientsCommand::Add {
            name,
            currency,
            external_name,
        } => {
            let mut client = ClientAccount::new(name, currency);
            client.external_name = external_name;
            let client = importer.add_client(client)?;
            println!("✓ Client added: {} ({})", client.name, client.id);
        }
        ClientsCommand::List => {
            let clients = importer.clients()?;
            if clients.is_empty() {
                println!("No clients yet. Run: campaign-ledger clients add <name>");
            }
            for client in clients {
                println!(
                    "{}  {:<30} {:<4} {}",
                    client.id,
                    client.name,
                    client.currency,
                    client.external_name.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn is_text_report(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("txt" | "md")
    )
}

fn run_import(importer: &Importer<SqliteStore>, args: ImportArgs) -> Result<()> {
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    let filename = args
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    println!("📂 Importing {}", filename);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if is_text_report(&args.path) {
        let Some(client_id) = args.client.as_deref() else {
            bail!("text reports need --client <ID>");
        };
        let result = importer.import_text_report(client_id, &filename, &bytes)?;
        println!("✓ Report stored for {} (batch {})", result.client_name, result.batch_id.unwrap_or_default());
        return Ok(());
    }

    let options = ImportOptions {
        skip_unknown_accounts: args.skip_unknown,
    };
    match importer.import_spreadsheet(&filename, &bytes, options)? {
        ImportOutcome::NewAccounts(names) => {
            println!("⚠️  Unknown accounts, nothing was imported:");
            for name in names {
                println!("   - {}", name);
            }
            println!("\nAdd them with `clients add --external-name`, or re-run with --skip-unknown.");
        }
        ImportOutcome::Merged(results) => {
            for r in results {
                println!(
                    "✓ {}: {} inserted, {} already present",
                    r.client_name, r.inserted_count, r.skipped_count
                );
                if let (Some(start), Some(end)) = (r.period_start, r.period_end) {
                    println!("   period {} → {}, {} active days", start, end, r.active_days_detected.unwrap_or(0));
                }
                match r.batch_id {
                    Some(id) => println!("   batch {}", id),
                    None => println!("   no new rows, no batch recorded"),
                }
            }
        }
    }
    Ok(())
}

fn run_history(importer: &Importer<SqliteStore>, client: Option<&str>) -> Result<()> {
    let history = importer.history(client)?;
    if history.is_empty() {
        println!("No imports recorded.");
    }
    for batch in history.iter().rev() {
        println!(
            "{}  {}  {:<9} {:>6} keys  {}",
            batch.id,
            batch.timestamp.format("%Y-%m-%d %H:%M"),
            batch.source.code(),
            batch.key_count(),
            batch.description
        );
    }
    Ok(())
}

fn run_undo(importer: &Importer<SqliteStore>, batch_id: &str) -> Result<()> {
    let outcome = importer.undo(batch_id)?;
    println!("✓ Batch {} undone: {} keys removed", batch_id, outcome.removed);
    if outcome.partial {
        println!("⚠️  {} keys were already gone:", outcome.missing_keys.len());
        for key in outcome.missing_keys {
            println!("   - {}", key);
        }
    }
    Ok(())
}

fn run_ads(importer: &Importer<SqliteStore>, args: AdsArgs) -> Result<()> {
    let dataset = importer.snapshot(&args.client)?;

    let mut query = AggregationQuery::new();
    match (args.from, args.to) {
        (Some(from), Some(to)) => query = query.with_range(DateRange::new(from, to)),
        (None, None) => {}
        _ => bail!("--from and --to go together"),
    }
    if args.include_inactive {
        query = query.include_inactive();
    }

    let records = dataset.records_snapshot();
    let ads = aggregate_by_ad(&records, &dataset.creative_links, &query);

    println!(
        "{:<40} {:>10} {:>8} {:>7} {:>8} {:>8} {:>5}",
        "Ad", "Spend", "ROAS", "CTR %", "CPM", "CPA", "Days"
    );
    for ad in ads {
        println!(
            "{:<40} {:>10.2} {:>8.2} {:>7.2} {:>8.2} {:>8.2} {:>5}",
            ad.ad_name.chars().take(40).collect::<String>(),
            ad.totals.spend,
            ad.metrics.roas,
            ad.metrics.ctr * 100.0,
            ad.metrics.cpm,
            ad.metrics.cpa,
            ad.total_active_days
        );
    }
    Ok(())
}

fn describe(change: Change) -> String {
    match change {
        Change::Up(pct) => format!("▲ {:.1}%", pct * 100.0),
        Change::Down(pct) => format!("▼ {:.1}%", pct * 100.0),
        Change::Stable => "►".to_string(),
        Change::Undefined => "n/a".to_string(),
    }
}

fn run_summary(importer: &Importer<SqliteStore>, args: SummaryArgs) -> Result<()> {
    let dataset = importer.snapshot(&args.client)?;
    let records = dataset.records_snapshot();
    let range = DateRange::new(args.from, args.to);

    let summary = summarize_account(&records, &AggregationQuery::new().with_range(range));
    let comparison = compare_periods(&records, None, range);

    println!("📊 {} → {}", range.start, range.end);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Ads: {}   Active days: {}", summary.ad_count, summary.active_days);
    for change in &comparison.changes {
        println!(
            "{:<16} {:>14.2} {:>14.2}  {}",
            change.metric,
            change.current,
            change.previous,
            describe(change.change)
        );
    }

    if !summary.funnel.is_empty() {
        println!("\nFunnel");
        for step in &summary.funnel {
            match step.drop_off {
                Some(drop) => println!("  {:<20} {:>10}  -{:.1}%", step.stage.name(), step.value, drop * 100.0),
                None => println!("  {:<20} {:>10}", step.stage.name(), step.value),
            }
        }
    }
    Ok(())
}

fn run_inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let report = parse_report(&String::from_utf8_lossy(&bytes));
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
