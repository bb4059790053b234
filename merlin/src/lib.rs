use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

pub use crate::{
    actors::{
        reconcile::{
            Config as ReconcileConfig, DEFAULT_POPULATE_COUNT, Error as ReconcileError,
            Reconciled, SheetSync, merge::PartialUpdate, message as reconcile_message,
        },
        rest::Config as RestConfig,
        store::{Config as StoreConfig, Error as StoreError},
    },
    command::{Command, Status},
    config::{Config, SheetConfig},
};
use crate::{
    actors::{reconcile, rest, store},
    command::handle_command,
    periodic_merge::handle_merge_tick,
    sheet::Spreadsheet,
};

mod actors;
mod command;
mod config;
pub mod feeds;
mod periodic_merge;
pub mod record;
pub mod sheet;

pub struct Merlin {
    config: Config,
    sheet: Arc<dyn Spreadsheet>,
    command_receiver: mpsc::Receiver<Command>,
}

impl Merlin {
    pub fn new(config: Config) -> Result<(Self, mpsc::Sender<Command>), Error> {
        let sheet = config.sheet.connect()?;
        Ok(Self::with_sheet(config, sheet))
    }

    /// Runs against a caller-provided spreadsheet instead of the configured one.
    pub fn with_sheet(
        config: Config,
        sheet: Arc<dyn Spreadsheet>,
    ) -> (Self, mpsc::Sender<Command>) {
        let (command_sender, command_receiver) = mpsc::channel(100);
        (
            Self {
                config,
                sheet,
                command_receiver,
            },
            command_sender,
        )
    }

    pub async fn run(mut self, ready_sender: oneshot::Sender<Result<(), Error>>) {
        info!("Merlin is running...");

        let mut runner = actman::Runner::new();

        let store_actor = match store::Actor::new(&self.config.store) {
            Ok(actor) => actor,
            Err(e) => {
                error!("Failed to create store actor: {e:?}");
                let _ = ready_sender.send(Err(e.into()));
                return;
            }
        };
        let store_handle = runner.run(store_actor);

        let reconcile_handle = runner.run(reconcile::Actor::new(
            &self.config.reconcile,
            store_handle.clone(),
            self.sheet.clone(),
        ));

        let rest_actor = match rest::Actor::new(&self.config.rest, reconcile_handle.clone()).await
        {
            Ok(actor) => actor,
            Err(e) => {
                error!("Failed to create REST actor: {e:?}");
                runner.shutdown().await;
                let _ = ready_sender.send(Err(e.into()));
                return;
            }
        };
        let _rest_handle = runner.run(rest_actor);

        if ready_sender.send(Ok(())).is_err() {
            error!("Failed to send ready signal");
        }

        let mut merge_interval = self.config.merge_interval.map(|period| {
            info!("Merging feeds every {period:?}");
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    let Some(command) = command else {
                        info!("Command channel closed.");
                        break;
                    };
                    debug!("Command received: {:?}", command);
                    if handle_command(command, &reconcile_handle, &store_handle).await {
                        break;
                    }
                }
                _ = tick(&mut merge_interval) => {
                    if let Err(e) = handle_merge_tick(&reconcile_handle).await {
                        error!("Periodic merge failed: {e}");
                    }
                }
            }
        }

        runner.shutdown().await;
    }
}

/// Resolves on the next tick, or never when the interval is disabled.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
    #[error("Spreadsheet error: {0}")]
    Sheet(#[from] sheet::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] rest::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
