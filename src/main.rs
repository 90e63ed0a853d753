use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use uuid::Uuid;

use logitrack::auth::Actor;
use logitrack::config;
use logitrack::filter::{FilterSpec, IssueFilter};
use logitrack::models::{Shipment, ShipmentStatus, StatusHistoryEntry};
use logitrack::realtime::ShipmentView;
use logitrack::services::ShipmentReport;
use logitrack::AppState;

#[derive(Debug, Parser)]
#[command(name = "logitrack", version, about = "Shipment tracking client")]
struct Cli {
    /// Display name recorded on writes
    #[arg(long, global = true, default_value = "cli")]
    name: String,

    /// Act as the driver with this id instead of as an admin
    #[arg(long, global = true)]
    as_driver: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List shipments matching the filters
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one shipment with its tracking link and status history
    Show { shipment: Uuid },
    /// Print summary figures
    Report {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Export shipments as CSV
    Export {
        path: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Send one position for a shipment
    PushLocation {
        shipment: Uuid,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lng: f64,
    },
    /// Follow the live shipment view until interrupted
    Watch {
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IssueArg {
    Any,
    With,
    Without,
}

#[derive(Debug, Args)]
struct FilterArgs {
    #[arg(long)]
    status: Option<ShipmentStatus>,
    /// Exact driver name
    #[arg(long)]
    driver: Option<String>,
    /// Exact company name
    #[arg(long)]
    company: Option<String>,
    /// First ship date (inclusive); needs --to
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,
    /// Last ship date (inclusive); needs --from
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,
    /// Case-insensitive text search
    #[arg(long, default_value = "")]
    search: String,
    #[arg(long, value_enum, default_value_t = IssueArg::Any)]
    issue: IssueArg,
}

impl FilterArgs {
    fn to_spec(&self) -> FilterSpec {
        let mut spec = FilterSpec::all().with_search(self.search.clone());
        if let (Some(from), Some(to)) = (self.from, self.to) {
            spec = spec.with_date_range(from, to);
        }
        if let Some(status) = self.status {
            spec = spec.with_status(status);
        }
        if let Some(driver) = &self.driver {
            spec = spec.with_driver(driver.clone());
        }
        if let Some(company) = &self.company {
            spec = spec.with_company(company.clone());
        }
        spec.with_issue(match self.issue {
            IssueArg::Any => IssueFilter::Any,
            IssueArg::With => IssueFilter::WithIssue,
            IssueArg::Without => IssueFilter::WithoutIssue,
        })
    }
}

fn print_table(shipments: &[Shipment]) {
    println!(
        "{:<36}  {:<14}  {:<24}  {:<16}  {:<16}  {:>5}  {:<10}  {:<9}",
        "ID", "NOTE", "COMPANY", "DESTINATION", "DRIVER", "QTY", "SHIPPED", "STATUS"
    );
    for s in shipments {
        println!(
            "{:<36}  {:<14}  {:<24}  {:<16}  {:<16}  {:>5}  {:<10}  {:<9}",
            s.id,
            s.delivery_note_number,
            s.company,
            s.destination,
            s.driver_name.as_deref().unwrap_or("-"),
            s.quantity,
            s.ship_date,
            s.status.label()
        );
    }
}

fn print_shipment(shipment: &Shipment, tracking_base_url: &str, history: &[StatusHistoryEntry]) {
    println!("Delivery note:  {}", shipment.delivery_note_number);
    println!("Company:        {}", shipment.company);
    println!("Destination:    {}", shipment.destination);
    println!("Driver:         {}", shipment.driver_name.as_deref().unwrap_or("-"));
    println!("Quantity:       {}", shipment.quantity);
    println!("Ship date:      {}", shipment.ship_date);
    println!("Status:         {}", shipment.status.label());
    if let (Some(date), Some(time)) = (shipment.arrival_date, shipment.arrival_time) {
        println!("Arrived:        {} {}", date, time.format("%H:%M"));
    }
    if let Some(issue) = shipment.issue.as_deref().filter(|_| shipment.has_issue()) {
        println!("Issue:          {}", issue);
    }
    if let (Some(lat), Some(lng)) = (shipment.current_lat, shipment.current_lng) {
        println!("Last position:  {:.5}, {:.5}", lat, lng);
    }
    println!("Tracking:       {}", shipment.tracking_link(tracking_base_url));
    println!("History:");
    for entry in history {
        let from = entry
            .previous_status
            .map(|s| s.label())
            .unwrap_or("-");
        println!(
            "  {}  {:<9} -> {:<9} {}",
            entry.changed_at.format("%Y-%m-%d %H:%M"),
            from,
            entry.new_status.label(),
            entry.notes.as_deref().unwrap_or("")
        );
    }
}

fn print_report(report: &ShipmentReport) {
    println!("Shipments:      {}", report.total);
    println!("  pending:      {}", report.pending);
    println!("  delivered:    {}", report.delivered);
    println!("  failed:       {}", report.failed);
    println!("Total quantity: {}", report.total_quantity);
    println!("Delivery rate:  {:.1}%", report.delivery_rate * 100.0);
    println!("Open issues:    {}", report.open_issues);
    println!("By driver:");
    for (driver, count) in &report.by_driver {
        println!("  {:<24} {}", driver, count);
    }
    println!("By company:");
    for (company, count) in &report.by_company {
        println!("  {:<24} {}", company, count);
    }
}

fn print_view(view: &ShipmentView) {
    println!(
        "-- revision {}: {} of {} shipments --",
        view.revision,
        view.shipments.len(),
        view.total
    );
    print_table(&view.shipments);
}

async fn watch(state: &AppState, filter: FilterSpec) -> anyhow::Result<()> {
    state.store.set_filter(filter);
    let mut views = state.store.subscribe_view();
    let mut notifications = state.notifier.subscribe();
    let mut handle = state
        .reconciler
        .subscribe()
        .await
        .context("opening realtime subscription")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_view(&view);
            }
            received = notifications.recv() => match received {
                Ok(notification) => eprintln!("[{:?}] {}", notification.level, notification.message),
                Err(e) => warn!(error = %e, "notification stream interrupted"),
            },
        }
    }

    handle.unsubscribe();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config().context("loading configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let state = AppState::from_config(cfg).context("initializing application state")?;
    let actor = match cli.as_driver {
        Some(driver_id) => Actor::driver(cli.name.clone(), driver_id),
        None => Actor::admin(cli.name.clone()),
    };

    match cli.command {
        Command::List { filter, json } => {
            state.shipments.refresh().await?;
            state.store.set_filter(filter.to_spec());
            let view = state.store.view();
            if json {
                println!("{}", serde_json::to_string_pretty(&view.shipments)?);
            } else {
                print_table(&view.shipments);
            }
        }
        Command::Show { shipment } => {
            let found = state.shipments.get(shipment).await?;
            let history = state.shipments.history(shipment).await?;
            print_shipment(&found, &state.config.tracking_base_url, &history);
        }
        Command::Report { filter } => {
            state.shipments.refresh().await?;
            print_report(&state.reports.summary(&filter.to_spec()));
        }
        Command::Export { path, filter } => {
            state.shipments.refresh().await?;
            let file = File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            let rows = state.reports.export(&filter.to_spec(), BufWriter::new(file))?;
            println!("Exported {} shipments to {}", rows, path.display());
        }
        Command::PushLocation { shipment, lat, lng } => {
            let ack = state
                .shipments
                .push_location(&actor, shipment, lat, lng)
                .await?;
            println!("{} at {}", ack.message, ack.timestamp);
        }
        Command::Watch { filter } => {
            watch(&state, filter.to_spec()).await?;
        }
    }

    Ok(())
}
