use clap::{Parser, Subcommand};
use jiggl::config::Settings;
use jiggl::database::{Database, DatabaseError};
use jiggl::dates::{self, parse_toggl_date, DateRange};
use jiggl::issue_key::IssueKeyParser;
use jiggl::jira_client::JiraClient;
use jiggl::report;
use jiggl::resolver::IssueResolver;
use jiggl::source::{FetchError, TimeEntrySource};
use jiggl::sync::{entry_from_payload, SyncError, SyncJob};
use jiggl::toggl_client::TogglClient;
use jiggl::AppState;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SYNC_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(10 * 60);

#[derive(Parser)]
#[command(name = "jiggl", version, about = "Reconcile Toggl time entries with Jira issues")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Groups, the last week of entries, then issues, parents and epics
    Sync,
    /// Replace stored time entries for a date range
    PullEntries {
        #[arg(long, value_parser = parse_toggl_date)]
        since: chrono::NaiveDate,
        #[arg(long, value_parser = parse_toggl_date)]
        until: chrono::NaiveDate,
    },
    /// Link stored time entries to their Jira issues
    PullIssues,
    /// Link stored issues to their epics
    PullEpics,
    /// Link stored issues to their parents
    PullParents,
    /// Per-user report, the last business day by default
    Report {
        #[arg(long, value_parser = parse_toggl_date, requires = "until")]
        since: Option<chrono::NaiveDate>,
        #[arg(long, value_parser = parse_toggl_date, requires = "since")]
        until: Option<chrono::NaiveDate>,
    },
    /// Project, epic and feature breakdown, last month by default
    Summary {
        #[arg(long, value_parser = parse_toggl_date, requires = "until")]
        since: Option<chrono::NaiveDate>,
        #[arg(long, value_parser = parse_toggl_date, requires = "since")]
        until: Option<chrono::NaiveDate>,
        /// Features to list, 0 for all
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
    /// Serve reports over HTTP and sync every ten minutes
    Serve,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings);
    tracing::debug!(?settings, "loaded settings");

    match run(cli.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if settings.simple_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}

#[derive(thiserror::Error, Debug)]
enum CommandError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

async fn run(command: Commands, settings: Settings) -> Result<(), CommandError> {
    let today = dates::today(settings.timezone);
    let range_or = |since: Option<chrono::NaiveDate>, until: Option<chrono::NaiveDate>, default: DateRange| {
        since.zip(until).map(|(since, until)| DateRange::new(since, until)).unwrap_or(default)
    };

    let toggl = TogglClient::new(&settings)?;
    let jira = JiraClient::new(&settings)?;
    let parser = IssueKeyParser::new(settings.jira_default_prefix.clone());
    let group = settings.toggl_group;

    match command {
        Commands::Sync => {
            let database = Database::new(&settings.db_storage).await?;
            sync_job(&toggl, jira, &database, &settings).run_sync(today).await?;
        }
        Commands::PullEntries { since, until } => {
            let database = Database::new(&settings.db_storage).await?;
            sync_job(&toggl, jira, &database, &settings)
                .pull_time_entries(&DateRange::new(since, until))
                .await?;
        }
        Commands::PullIssues => {
            let database = Database::new(&settings.db_storage).await?;
            sync_job(&toggl, jira, &database, &settings).pull_issues().await?;
        }
        Commands::PullEpics => {
            let database = Database::new(&settings.db_storage).await?;
            sync_job(&toggl, jira, &database, &settings).pull_epics().await?;
        }
        Commands::PullParents => {
            let database = Database::new(&settings.db_storage).await?;
            sync_job(&toggl, jira, &database, &settings).pull_parents().await?;
        }
        Commands::Report { since, until } => {
            let range = range_or(since, until, DateRange::last_business_day(today));
            let entries = toggl
                .fetch_time_entries(&range, group)
                .await?
                .into_iter()
                .map(|payload| entry_from_payload(payload, &parser))
                .collect::<Vec<_>>();
            let mut resolver = IssueResolver::new(jira);
            let rows = report::rows_from_entries(&entries, &mut resolver).await;
            print!("{}", report::build_detailed(rows, &range));
        }
        Commands::Summary { since, until, rows } => {
            let range = range_or(since, until, DateRange::last_month(today));
            let response = toggl.fetch_summary(&range, group).await?;
            let mut resolver = IssueResolver::new(jira);
            let summary = report::build_summary(&response, &parser, &mut resolver, &range).await;
            print!("{}", report::render_summary(&summary, rows));
        }
        Commands::Serve => serve(settings, toggl, jira).await?,
    }
    Ok(())
}

fn sync_job<'a>(
    toggl: &'a TogglClient,
    jira: JiraClient,
    database: &'a Database,
    settings: &Settings,
) -> SyncJob<'a, TogglClient, JiraClient> {
    let parser = IssueKeyParser::new(settings.jira_default_prefix.clone());
    SyncJob::new(toggl, jira, database, parser, settings.toggl_group).with_timezone(settings.timezone)
}

async fn serve(
    settings: Settings,
    toggl: TogglClient,
    jira: JiraClient,
) -> Result<(), CommandError> {
    let state = AppState {
        database: Arc::new(Database::new(&settings.db_storage).await?),
        settings: Arc::new(settings),
    };

    let collector_state = state.clone();
    tokio::spawn(async move {
        run_data_collector(collector_state, toggl, jira).await;
    });

    let address = format!("0.0.0.0:{}", state.settings.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, "serving reports");
    axum::serve(listener, jiggl::router(state)).await?;
    Ok(())
}

async fn run_data_collector(state: AppState, toggl: TogglClient, jira: JiraClient) {
    loop {
        let today = dates::today(state.settings.timezone);
        let mut job = sync_job(&toggl, jira.clone(), &state.database, &state.settings);
        if let Err(err) = job.run_sync(today).await {
            tracing::error!(error = %err, "sync failed");
        }

        tracing::info!(minutes = SYNC_INTERVAL.as_secs() / 60, "sleeping until next sync");
        tokio::time::sleep(SYNC_INTERVAL).await;
    }
}
