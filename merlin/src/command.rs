use actman::Handle;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::error;

use crate::{
    actors::{reconcile, store},
    record::{FlightRecord, Mawb},
};

#[derive(Debug)]
pub enum Command {
    Reconcile(reconcile::message::Message),
    GetRecord {
        mawb: Mawb,
        reply_sender: oneshot::Sender<Result<Option<FlightRecord>, store::Error>>,
    },
    Status {
        reply_sender: oneshot::Sender<Result<Status, reconcile::Error>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub record_count: usize,
    pub sheet_connected: bool,
}

/// Returns `true` when the runtime should shut down.
pub async fn handle_command(
    command: Command,
    reconcile_handle: &Handle<reconcile::Actor>,
    store_handle: &Handle<store::Actor>,
) -> bool {
    match command {
        Command::Reconcile(msg) => {
            reconcile_handle.send(msg).await;
        }
        Command::GetRecord { mawb, reply_sender } => {
            handle_get_record_command(mawb, reply_sender, store_handle).await;
        }
        Command::Status { reply_sender } => {
            reconcile_handle
                .send(reconcile::message::Message::Status { reply_sender })
                .await;
        }
        Command::Shutdown => {
            return true;
        }
    }
    false
}

async fn handle_get_record_command(
    mawb: Mawb,
    reply_sender: oneshot::Sender<Result<Option<FlightRecord>, store::Error>>,
    store_handle: &Handle<store::Actor>,
) {
    let (msg, reply_receiver) = store::message::GetMessage { mawb }.into();
    store_handle.send(msg).await;
    let Ok(result) = reply_receiver.await else {
        error!("Failed to receive record from store actor");
        return;
    };
    let _ = reply_sender
        .send(result)
        .inspect_err(|_| error!("Failed to send record reply"));
}
