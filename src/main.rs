use anyhow::Context;
use clap::{Parser, Subcommand};
use ibmi_extract::api_client::ApiClient;
use ibmi_extract::autocomplete::CatalogAutocomplete;
use ibmi_extract::config::Config;
use ibmi_extract::kpi::{KpiDashboard, KpiSeries, Metric};
use ibmi_extract::models::{cell_text, ExportFormat, Granularity, TopDimension, DEFAULT_LIMIT};
use ibmi_extract::services::WorkflowService;
use ibmi_extract::session::SessionContext;
use ibmi_extract::storage::{FileStore, MemoryStore};
use ibmi_extract::token_store::{fingerprint, TokenStore};
use ibmi_extract::workflow::{ExtractionWorkflow, Preview};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Client for the IBM i extraction gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct TableArgs {
    /// Library (schema) name
    #[arg(short, long)]
    library: String,
    /// Table name
    #[arg(short, long)]
    table: String,
    /// Maximum rows to extract (1-5000)
    #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
    limit: u32,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authenticates against the gateway and stores the token
    Login {
        #[arg(long)]
        host: String,
        #[arg(long)]
        user: String,
        #[arg(long, env = "IBMI_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forgets the stored token
    Logout,
    /// Shows whether a token is stored
    Status,
    /// Checks the gateway health endpoint
    Health,
    /// Shows the first rows of a table
    Preview(TableArgs),
    /// Downloads a table as csv, xlsx or json
    Export {
        #[command(flatten)]
        table: TableArgs,
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,
        /// Target directory (defaults to IBMI_EXPORT_DIR)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Sends freshly extracted rows to the workflow service
    Forward(TableArgs),
    /// Suggests library names starting with a prefix
    Schemas { prefix: String },
    /// Suggests table names in a library starting with a prefix
    Tables {
        #[arg(short, long)]
        library: String,
        prefix: String,
    },
    /// Queries sales KPIs
    Kpis {
        #[arg(long, default_value = "2024-01-01")]
        from: String,
        #[arg(long, default_value = "2025-12-31")]
        to: String,
        #[arg(long, default_value = "monthly")]
        granularity: Granularity,
        #[arg(long, default_value = "product")]
        top_dim: TopDimension,
        #[arg(long, default_value_t = 10)]
        limit_top: u32,
        #[arg(long, default_value = "")]
        country: String,
        #[arg(long, default_value = "")]
        city: String,
        /// totalrev or qty (defaults to the metric the backend reports)
        #[arg(long)]
        metric: Option<Metric>,
    },
    /// Calls the workflow-service KPI webhook directly
    WebhookKpis {
        /// JSON filter object
        #[arg(long, default_value = "{}")]
        filters: String,
    },
    /// Prints token changes made by other processes until interrupted
    Watch,
    /// Runs the development proxy for /api and /n8n
    Proxy,
}

/// Main entry point for the CLI.
///
/// Initializes tracing and configuration, then either serves the dev proxy or
/// runs a client subcommand.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ibmi_extract=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Proxy => ibmi_extract::proxy::serve(&config).await,
        command => run(command, config).await,
    }
}

/// Opens the token storage, builds the session and API client, then runs `command`.
async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    let local = Arc::new(FileStore::open(&config.storage_path)?);
    let store = TokenStore::new(local.clone(), Arc::new(MemoryStore::new()));
    let session = Arc::new(SessionContext::new(store)?);
    let api = ApiClient::from_config(&config)?;

    match command {
        Commands::Login {
            host,
            user,
            password,
        } => {
            let mut workflow = ExtractionWorkflow::new(api, session.clone());
            workflow.login(&host, &user, &password).await?;
            println!("Logged in ({})", fingerprint(&session.token()));
        }
        Commands::Logout => {
            session.logout()?;
            println!("Logged out");
        }
        Commands::Status => match session.bearer() {
            Some(token) => println!("Logged in ({})", fingerprint(&token)),
            None => println!("Not logged in"),
        },
        Commands::Health => {
            let token = session.bearer();
            match api.health(token.as_deref()).await {
                Ok(status) => println!("OK: {}", status.message),
                Err(e) => anyhow::bail!("Health check failed: {}", e),
            }
        }
        Commands::Preview(args) => {
            let mut workflow = params_workflow(api, session, &args);
            let preview = workflow.run_preview().await?;
            print_preview(preview);
        }
        Commands::Export { table, format, out } => {
            let workflow = params_workflow(api, session, &table);
            let dir = out.unwrap_or_else(|| config.export_dir.clone());
            let path = workflow.download(format, &dir).await?;
            println!("Saved {}", path.display());
        }
        Commands::Forward(args) => {
            let workflow = params_workflow(api, session, &args);
            let outcome = workflow.send_to_workflow().await?;
            println!(
                "Sent {} row(s). Destination: {}",
                outcome.count, outcome.forwarded_to
            );
        }
        Commands::Schemas { prefix } => {
            let autocomplete = CatalogAutocomplete::new(api, session);
            let mut updates = autocomplete.subscribe();
            autocomplete.set_library(&prefix);
            wait_for_update(&mut updates).await;
            for schema in autocomplete.suggestions().schemas {
                println!("{}", schema);
            }
        }
        Commands::Tables { library, prefix } => {
            let autocomplete = CatalogAutocomplete::new(api, session);
            let mut updates = autocomplete.subscribe();
            autocomplete.select_schema(&library).await;
            drop(updates.borrow_and_update());
            autocomplete.set_table(&prefix);
            wait_for_update(&mut updates).await;
            for table in autocomplete.suggestions().tables {
                println!("{}", table);
            }
        }
        Commands::Kpis {
            from,
            to,
            granularity,
            top_dim,
            limit_top,
            country,
            city,
            metric,
        } => {
            let mut dashboard = KpiDashboard::new(api, session);
            dashboard.form.date_from = from;
            dashboard.form.date_to = to;
            dashboard.form.granularity = granularity;
            dashboard.form.top_dim = top_dim;
            dashboard.form.limit_top = limit_top;
            dashboard.form.country = country;
            dashboard.form.city = city;
            let series = dashboard.query().await.context("KPI query failed")?;
            print_kpis(series, series.plotted_metric(metric));
        }
        Commands::WebhookKpis { filters } => {
            let filters: serde_json::Value =
                serde_json::from_str(&filters).context("--filters must be a JSON object")?;
            let service = WorkflowService::new(&config);
            let answer = service.fetch_kpis(&filters).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Commands::Watch => {
            let _poller = local.clone().spawn_watcher(Duration::from_millis(500));
            let _watch = session.watch_storage();
            let mut changes = session.subscribe();
            println!("Watching {} (Ctrl-C to stop)", local.path().display());
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        match session.bearer() {
                            Some(token) => println!("Token changed: {}", fingerprint(&token)),
                            None => println!("Logged out"),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Commands::Proxy => ibmi_extract::proxy::serve(&config).await?,
    }

    Ok(())
}

fn params_workflow(
    api: ApiClient,
    session: Arc<SessionContext>,
    args: &TableArgs,
) -> ExtractionWorkflow {
    let mut workflow = ExtractionWorkflow::new(api, session);
    workflow.set_library(&args.library);
    workflow.set_table(&args.table);
    workflow.set_limit(args.limit);
    workflow
}

/// Waits for the debounced lookup to land, giving up after a few seconds.
async fn wait_for_update<T>(updates: &mut tokio::sync::watch::Receiver<T>) {
    if tokio::time::timeout(Duration::from_secs(5), updates.changed())
        .await
        .is_err()
    {
        tracing::debug!("No suggestions received");
    }
}

fn print_preview(preview: &Preview) {
    println!("Rows: {} (showing {})", preview.count, preview.rows.len());
    let columns = preview.columns();
    if columns.is_empty() {
        return;
    }
    println!("{}", columns.join(" | "));
    for row in &preview.rows {
        let cells: Vec<String> = row.values().map(cell_text).collect();
        println!("{}", cells.join(" | "));
    }
}

fn print_kpis(series: &KpiSeries, metric: Metric) {
    println!("Time series ({}):", metric.as_str());
    for (dt, value) in series.line_points(metric) {
        println!("  {}  {:.2}", dt, value);
    }
    println!("Top by {} ({}):", series.top_dim.as_str(), metric.as_str());
    for ((label, value), (_, share)) in series
        .bar_points(metric)
        .into_iter()
        .zip(series.pie_slices(metric))
    {
        println!("  {:<30} {:>14.2} {:>6.1}%", label, value, share * 100.0);
    }
    println!(
        "{} series point(s), {} top item(s)",
        series.timeseries.len(),
        series.top.len()
    );
}
