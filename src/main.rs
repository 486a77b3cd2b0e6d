//! caseflow: watch one case through the extraction pipeline from a terminal.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use caseflow::config::{AppConfig, ConfigError};
use caseflow::pipeline::case_processing::{
    CaseError, ServiceError, SessionNotice, SessionSeed, UploadFile,
};

#[derive(Parser, Debug)]
#[command(name = "caseflow")]
#[command(about = "Track case documents through extraction and validation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a session for one case and log its progress until Ctrl+C.
    Watch(WatchArgs),
}

#[derive(clap::Args, Debug)]
struct WatchArgs {
    case_id: String,

    /// REST base URL
    #[arg(long, env = "CASEFLOW_API_URL")]
    api_url: Option<String>,

    /// Event channel websocket URL
    #[arg(long, env = "CASEFLOW_EVENTS_URL")]
    events_url: Option<String>,

    /// SQLite cache file
    #[arg(long, env = "CASEFLOW_CACHE_PATH")]
    cache: Option<PathBuf>,

    /// Recipient for the completion notification
    #[arg(long, env = "CASEFLOW_MANAGEMENT_ID")]
    management_id: Option<String>,

    /// File to upload, as PATH:DOCUMENT_TYPE_ID (repeatable)
    #[arg(long = "upload", value_parser = parse_upload)]
    uploads: Vec<(PathBuf, String)>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Case(#[from] CaseError),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn parse_upload(raw: &str) -> Result<(PathBuf, String), String> {
    match raw.rsplit_once(':') {
        Some((path, type_id)) if !path.is_empty() && !type_id.is_empty() => {
            Ok((PathBuf::from(path), type_id.to_string()))
        }
        _ => Err(format!("expected PATH:DOCUMENT_TYPE_ID, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    caseflow::init_tracing();

    let result = match cli.command {
        Command::Watch(args) => watch(args).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "caseflow failed");
            ExitCode::FAILURE
        }
    }
}

async fn watch(args: WatchArgs) -> Result<(), CliError> {
    let mut config = AppConfig::from_env()?;
    if let Some(url) = args.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(url) = args.events_url {
        config.events_url = url;
    }
    if let Some(path) = args.cache {
        config.cache_path = path;
    }
    if let Some(id) = args.management_id.filter(|id| !id.trim().is_empty()) {
        config.management_id = Some(id);
    }

    let files = read_uploads(&args.uploads).await?;

    let live = caseflow::start_live_session(&config, &args.case_id, SessionSeed::default())?;
    let handle = live.session.handle();
    let notices = tokio::spawn(log_notices(handle.notices()));

    if !files.is_empty() {
        let report = handle.upload_files(files).await?;
        for record in report.accepted() {
            info!(
                document_id = %record.id,
                file = record.file_name.as_deref().unwrap_or("-"),
                "Upload accepted"
            );
        }
        for rejection in report.rejected() {
            warn!(error = %rejection, "Upload rejected");
        }
    }

    shutdown_signal().await;

    let seed = live.close().await?;
    notices.abort();
    info!(
        case_id = %args.case_id,
        documents = seed.snapshot.map(|s| s.documents.len()).unwrap_or(0),
        "Session closed"
    );
    Ok(())
}

async fn read_uploads(uploads: &[(PathBuf, String)]) -> Result<Vec<UploadFile>, CliError> {
    let mut files = Vec::with_capacity(uploads.len());
    for (path, type_id) in uploads {
        let bytes = tokio::fs::read(path).await.map_err(|source| CliError::Read {
            path: path.clone(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        files.push(UploadFile::new(&file_name, type_id, bytes));
    }
    Ok(files)
}

async fn log_notices(mut notices: tokio::sync::broadcast::Receiver<SessionNotice>) {
    loop {
        match notices.recv().await {
            Ok(notice) if notice.requires_action => warn!(
                kind = ?notice.kind,
                document_id = notice.document_id.as_deref().unwrap_or("-"),
                "{}",
                notice.message
            ),
            Ok(notice) => info!(
                kind = ?notice.kind,
                document_id = notice.document_id.as_deref().unwrap_or("-"),
                "{}",
                notice.message
            ),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notice log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
