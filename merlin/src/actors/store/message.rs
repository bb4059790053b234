use std::fmt::{self, Debug, Formatter};

use tokio::sync::oneshot;

use crate::{
    actors::store::Error,
    record::{FlightRecord, Mawb},
};

pub enum Message {
    Get {
        msg: GetMessage,
        reply_sender: oneshot::Sender<Result<Option<FlightRecord>, Error>>,
    },
    Insert {
        msg: InsertMessage,
        reply_sender: oneshot::Sender<Result<FlightRecord, Error>>,
    },
    Save {
        msg: SaveMessage,
        reply_sender: oneshot::Sender<Result<FlightRecord, Error>>,
    },
    Count {
        reply_sender: oneshot::Sender<Result<usize, Error>>,
    },
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { msg, .. } => f.debug_tuple("Get").field(msg).finish(),
            Self::Insert { msg, .. } => f.debug_tuple("Insert").field(msg).finish(),
            Self::Save { msg, .. } => f.debug_tuple("Save").field(msg).finish(),
            Self::Count { .. } => f.debug_tuple("Count").finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GetMessage {
    pub mawb: Mawb,
}

impl From<GetMessage> for (Message, oneshot::Receiver<Result<Option<FlightRecord>, Error>>) {
    fn from(msg: GetMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Get { msg, reply_sender }, reply_receiver)
    }
}

/// Inserts a record whose mawb must not exist yet.
#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub record: FlightRecord,
}

impl From<InsertMessage> for (Message, oneshot::Receiver<Result<FlightRecord, Error>>) {
    fn from(msg: InsertMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Insert { msg, reply_sender }, reply_receiver)
    }
}

/// Inserts or overwrites the record with the same mawb.
#[derive(Debug, Clone)]
pub struct SaveMessage {
    pub record: FlightRecord,
}

impl From<SaveMessage> for (Message, oneshot::Receiver<Result<FlightRecord, Error>>) {
    fn from(msg: SaveMessage) -> Self {
        let (reply_sender, reply_receiver) = oneshot::channel();
        (Message::Save { msg, reply_sender }, reply_receiver)
    }
}
