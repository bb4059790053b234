use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{
    actors::reconcile::{Error, Reconciled, merge::PartialUpdate},
    command::Status,
    record::{FlightRecord, Mawb},
};

pub enum Message {
    Reconcile {
        msg: ReconcileMessage,
        reply_sender: oneshot::Sender<Result<Reconciled, Error>>,
    },
    Create {
        msg: CreateMessage,
        reply_sender: oneshot::Sender<Result<Reconciled, Error>>,
    },
    MergeFeeds {
        reply_sender: oneshot::Sender<Result<Reconciled, Error>>,
    },
    Suggest {
        msg: SuggestMessage,
        reply_sender: oneshot::Sender<Result<Vec<String>, Error>>,
    },
    MawbsByFlight {
        msg: MawbsByFlightMessage,
        reply_sender: oneshot::Sender<Result<Vec<Mawb>, Error>>,
    },
    Populate {
        msg: PopulateMessage,
        reply_sender: oneshot::Sender<Result<usize, Error>>,
    },
    Status {
        reply_sender: oneshot::Sender<Result<Status, Error>>,
    },
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconcile { msg, .. } => f.debug_tuple("Reconcile").field(msg).finish(),
            Self::Create { msg, .. } => f.debug_tuple("Create").field(msg).finish(),
            Self::MergeFeeds { .. } => f.debug_tuple("MergeFeeds").finish(),
            Self::Suggest { msg, .. } => f.debug_tuple("Suggest").field(msg).finish(),
            Self::MawbsByFlight { msg, .. } => f.debug_tuple("MawbsByFlight").field(msg).finish(),
            Self::Populate { msg, .. } => f.debug_tuple("Populate").field(msg).finish(),
            Self::Status { .. } => f.debug_tuple("Status").finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileMessage {
    pub mawb: Mawb,
    pub update: PartialUpdate,
}

impl From<ReconcileMessage> for (Message, oneshot::Receiver<Result<Reconciled, Error>>) {
    fn from(msg: ReconcileMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Reconcile { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub record: FlightRecord,
}

impl From<CreateMessage> for (Message, oneshot::Receiver<Result<Reconciled, Error>>) {
    fn from(msg: CreateMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Create { msg, reply_sender }, reply_receiver)
    }
}

/// Column a suggestion query searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestField {
    Mawb,
    FlightNumber,
}

#[derive(Debug, Clone)]
pub struct SuggestMessage {
    pub field: SuggestField,
    pub query: String,
}

impl From<SuggestMessage> for (Message, oneshot::Receiver<Result<Vec<String>, Error>>) {
    fn from(msg: SuggestMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Suggest { msg, reply_sender }, reply_receiver)
    }
}

#[derive(Debug, Clone)]
pub struct MawbsByFlightMessage {
    pub flight: String,
}

impl From<MawbsByFlightMessage> for (Message, oneshot::Receiver<Result<Vec<Mawb>, Error>>) {
    fn from(msg: MawbsByFlightMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::MawbsByFlight { msg, reply_sender }, reply_receiver)
    }
}

/// Replaces every data row with `count` dummy rows.
#[derive(Debug, Clone)]
pub struct PopulateMessage {
    pub count: usize,
}

impl From<PopulateMessage> for (Message, oneshot::Receiver<Result<usize, Error>>) {
    fn from(msg: PopulateMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Populate { msg, reply_sender }, reply_receiver)
    }
}
