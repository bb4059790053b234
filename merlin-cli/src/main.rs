use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use merlin::{
    DEFAULT_POPULATE_COUNT, Error, Merlin, PartialUpdate, ReconcileConfig, ReconcileError,
    RestConfig, SheetConfig, StoreConfig,
    reconcile_message::{
        self, MawbsByFlightMessage, PopulateMessage, ReconcileMessage, SuggestField,
        SuggestMessage,
    },
    record::timestamp,
    sheet::google::{self, TokenSource},
};
use serde::Serialize;
use tokio::{
    signal,
    sync::{mpsc, oneshot},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    info!("Starting Merlin binary...");
    if let Err(e) = run(args).await {
        error!("Error: {e:?}");
    } else {
        info!("Merlin has been terminated.");
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.to_config()?;

    let (merlin, command_sender) = Merlin::new(config)?;
    let (ready_sender, ready_receiver) = oneshot::channel();
    let merlin_task = tokio::spawn(async move { merlin.run(ready_sender).await });
    ready_receiver
        .await
        .expect("ready channel shouldn't be closed")?;

    match args.command {
        Command::Daemonize => {
            handle_status(&command_sender).await;
            daemonize().await;
        }
        Command::Status => {
            handle_status(&command_sender).await;
        }
        Command::Merge => {
            let (reply_sender, reply_receiver) = oneshot::channel();
            handle_reconcile(
                &command_sender,
                "merge feeds",
                (
                    reconcile_message::Message::MergeFeeds { reply_sender },
                    reply_receiver,
                ),
            )
            .await;
        }
        Command::UpdateReceived {
            mawb,
            pcs_received,
            checker_id,
            team_name,
        } => {
            let update = PartialUpdate {
                pcs_received: Some(pcs_received),
                checker_id,
                team_name,
                ..Default::default()
            };
            handle_reconcile(
                &command_sender,
                "update received pieces",
                ReconcileMessage {
                    mawb: mawb.into(),
                    update,
                }
                .into(),
            )
            .await;
        }
        Command::UpdateBt {
            mawb,
            bt_number,
            employee_id,
        } => {
            let update = PartialUpdate::towing(bt_number, timestamp::now(), employee_id);
            handle_reconcile(
                &command_sender,
                "update BT number",
                ReconcileMessage {
                    mawb: mawb.into(),
                    update,
                }
                .into(),
            )
            .await;
        }
        Command::SuggestMawb { query } => {
            handle_reconcile(
                &command_sender,
                "suggest mawbs",
                SuggestMessage {
                    field: SuggestField::Mawb,
                    query,
                }
                .into(),
            )
            .await;
        }
        Command::SuggestFlight { query } => {
            handle_reconcile(
                &command_sender,
                "suggest flights",
                SuggestMessage {
                    field: SuggestField::FlightNumber,
                    query,
                }
                .into(),
            )
            .await;
        }
        Command::MawbsByFlight { flight } => {
            handle_reconcile(
                &command_sender,
                "look up mawbs by flight",
                MawbsByFlightMessage { flight }.into(),
            )
            .await;
        }
        Command::Populate { count } => {
            handle_reconcile(
                &command_sender,
                "populate the sheet",
                PopulateMessage { count }.into(),
            )
            .await;
        }
        Command::GetRecord { mawb } => {
            handle_get_record(&command_sender, mawb).await;
        }
    }

    // Shutdown Merlin.
    command_sender
        .send(merlin::Command::Shutdown)
        .await
        .inspect_err(|e| {
            error!("Channel send error: {e}");
        })?;
    info!("Waiting for Merlin to terminate...");
    if let Err(e) = merlin_task.await {
        error!("Failed to wait until Merlin is terminated: {e}");
    }
    Ok(())
}

/// A future that resolves when a termination signal is received.
async fn daemonize() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Termination signal received");
}

async fn handle_status(command_sender: &mpsc::Sender<merlin::Command>) {
    info!("Handling status command");
    let (reply_sender, reply_receiver) = oneshot::channel();
    if let Err(e) = command_sender
        .send(merlin::Command::Status { reply_sender })
        .await
    {
        error!("Channel send error: {e}");
        return;
    }
    let status = match reply_receiver.await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            error!("Failed to collect status: {e}");
            return;
        }
        Err(e) => {
            error!("Failed to receive status reply: {e:?}");
            return;
        }
    };

    println!("============================");
    println!(" Status");
    println!("============================");
    print_json(&status);
}

async fn handle_reconcile<T: Serialize>(
    command_sender: &mpsc::Sender<merlin::Command>,
    action: &str,
    (message, reply_receiver): (
        reconcile_message::Message,
        oneshot::Receiver<Result<T, ReconcileError>>,
    ),
) {
    info!("Requesting to {action}");
    if let Err(e) = command_sender
        .send(merlin::Command::Reconcile(message))
        .await
    {
        error!("Channel send error: {e}");
        return;
    }

    match reply_receiver.await {
        Ok(Ok(value)) => print_json(&value),
        Ok(Err(e)) => error!("Failed to {action}: {e}"),
        Err(e) => error!("Failed to receive reply: {e:?}"),
    }
}

async fn handle_get_record(command_sender: &mpsc::Sender<merlin::Command>, mawb: String) {
    info!("Getting record {mawb}");
    let (reply_sender, reply_receiver) = oneshot::channel();
    if let Err(e) = command_sender
        .send(merlin::Command::GetRecord {
            mawb: mawb.as_str().into(),
            reply_sender,
        })
        .await
    {
        error!("Channel send error: {e}");
        return;
    }

    match reply_receiver.await {
        Ok(Ok(Some(record))) => print_json(&record),
        Ok(Ok(None)) => error!("MAWB {mawb} not found in records"),
        Ok(Err(e)) => error!("Failed to get record: {e:?}"),
        Err(e) => error!("Failed to receive reply: {e:?}"),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize reply: {e}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SheetBackend {
    Google,
    Memory,
}

#[derive(Debug, Parser)]
struct Args {
    #[clap(long)]
    db_path: PathBuf,
    #[clap(long)]
    rest_addr: Option<SocketAddr>,
    #[clap(long, value_parser = humantime::parse_duration)]
    merge_interval: Option<Duration>,
    #[clap(long, value_parser = humantime::parse_duration)]
    populate_throttle: Option<Duration>,
    #[clap(long, value_enum, default_value_t = SheetBackend::Google)]
    sheet_backend: SheetBackend,
    #[clap(long)]
    spreadsheet_id: Option<String>,
    #[clap(long, default_value = "SATS")]
    worksheet: String,
    #[clap(long)]
    token_file: Option<PathBuf>,
    #[clap(long, env = "MERLIN_SHEETS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    #[clap(long, default_value = "https://sheets.googleapis.com/")]
    sheets_api_base: Url,
    #[clap(subcommand)]
    command: Command,
}

impl Args {
    fn to_config(&self) -> Result<merlin::Config, Error> {
        let sheet = match self.sheet_backend {
            SheetBackend::Memory => SheetConfig::Memory,
            SheetBackend::Google => {
                let spreadsheet_id = self.spreadsheet_id.clone().ok_or_else(|| {
                    Error::InvalidConfig(
                        "--spreadsheet-id is required for the google backend".to_string(),
                    )
                })?;
                let token = match (&self.access_token, &self.token_file) {
                    (Some(token), _) => TokenSource::Static(token.clone()),
                    (None, Some(path)) => TokenSource::File(path.clone()),
                    (None, None) => {
                        return Err(Error::InvalidConfig(
                            "--access-token or --token-file is required for the google backend"
                                .to_string(),
                        ));
                    }
                };
                SheetConfig::Google(google::Config {
                    spreadsheet_id,
                    worksheet: self.worksheet.clone(),
                    api_base: self.sheets_api_base.clone(),
                    token,
                })
            }
        };

        let mut reconcile = ReconcileConfig::default();
        if let Some(populate_throttle) = self.populate_throttle {
            reconcile.populate_throttle = populate_throttle;
        }

        Ok(merlin::Config {
            store: StoreConfig {
                db_path: self.db_path.clone(),
            },
            sheet,
            rest: self
                .rest_addr
                .map_or(Default::default(), |addr| RestConfig { addr }),
            merge_interval: self.merge_interval,
            reconcile,
        })
    }
}

#[derive(Debug, Parser)]
enum Command {
    /// Serve HTTP until SIGINT or SIGTERM.
    Daemonize,
    Status,
    /// Create a record from both feeds and mirror it.
    Merge,
    UpdateReceived {
        mawb: String,
        pcs_received: i64,
        #[clap(long)]
        checker_id: Option<String>,
        #[clap(long)]
        team_name: Option<String>,
    },
    UpdateBt {
        mawb: String,
        #[clap(value_parser = non_blank)]
        bt_number: String,
        #[clap(long)]
        employee_id: Option<String>,
    },
    SuggestMawb {
        query: String,
    },
    SuggestFlight {
        query: String,
    },
    MawbsByFlight {
        flight: String,
    },
    /// Replace every data row of the sheet with dummy rows.
    Populate {
        #[clap(long, default_value_t = DEFAULT_POPULATE_COUNT)]
        count: usize,
    },
    GetRecord {
        mawb: String,
    },
}

fn non_blank(value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("must not be blank".to_string());
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(command: &[&str]) -> Result<Args, clap::Error> {
        let mut args = vec!["merlin", "--db-path", "merlin.sqlite3", "--sheet-backend", "memory"];
        args.extend_from_slice(command);
        Args::try_parse_from(args)
    }

    #[test]
    fn update_bt_requires_bt_number() {
        assert!(parse(&["update-bt", "MAWB1234", "   "]).is_err());
        assert!(parse(&["update-bt", "MAWB1234", ""]).is_err());

        let args = parse(&["update-bt", "MAWB1234", " BT-7 ", "--employee-id", "E42"]).unwrap();
        let Command::UpdateBt {
            bt_number,
            employee_id,
            ..
        } = args.command
        else {
            panic!("expected update-bt");
        };
        assert_eq!(bt_number, "BT-7");
        assert_eq!(employee_id.as_deref(), Some("E42"));
    }

    #[test]
    fn google_backend_needs_sheet_and_token() {
        let args = Args::try_parse_from(["merlin", "--db-path", "merlin.sqlite3", "status"]).unwrap();
        assert!(matches!(args.to_config(), Err(Error::InvalidConfig(_))));

        let args = parse(&["--populate-throttle", "1s", "status"]).unwrap();
        let config = args.to_config().unwrap();
        assert!(matches!(config.sheet, SheetConfig::Memory));
        assert_eq!(config.reconcile.populate_throttle, Duration::from_secs(1));
    }
}
