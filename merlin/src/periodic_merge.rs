use actman::Handle;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{
    actors::reconcile::{self, Reconciled, SheetSync, message::Message},
};

/// Runs one feed merge, exactly as the merge endpoint does.
pub async fn handle_merge_tick<ReconcileActor>(
    reconcile_handle: &Handle<ReconcileActor>,
) -> Result<Reconciled, reconcile::Error>
where
    ReconcileActor: actman::Actor<Message = Message>,
{
    let (reply_sender, reply_receiver) = oneshot::channel();
    reconcile_handle
        .send(Message::MergeFeeds { reply_sender })
        .await;
    let reconciled = reply_receiver.await.expect("reconcile actor must exist")?;
    match &reconciled.sheet {
        SheetSync::Synced => info!("Periodic merge created {}", reconciled.record.mawb),
        SheetSync::Degraded { reason } => warn!(
            "Periodic merge created {} but the sheet is out of step: {reason}",
            reconciled.record.mawb
        ),
    }
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use actman::{Control, Runner, State};
    use tokio::sync::mpsc;

    use super::*;
    use crate::record::FlightRecord;

    #[test_log::test(tokio::test)]
    async fn merge_tick_requests_feed_merge() {
        let (actor, mut merge_requests) = DummyReconcileActor::new(false);
        let mut runner = Runner::new();
        let handle = runner.run(actor);

        let reconciled = handle_merge_tick(&handle).await.unwrap();
        assert_eq!(reconciled.record.mawb, "MAWB1234");
        assert_eq!(merge_requests.recv().await, Some(()));
        assert!(merge_requests.is_empty());

        runner.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn merge_tick_reports_failure() {
        let (actor, _merge_requests) = DummyReconcileActor::new(true);
        let mut runner = Runner::new();
        let handle = runner.run(actor);

        let err = handle_merge_tick(&handle).await.unwrap_err();
        assert!(matches!(err, reconcile::Error::Validation(_)));

        runner.shutdown().await;
    }

    struct DummyReconcileActor {
        fail: bool,
        merge_request_forwarder: mpsc::Sender<()>,
    }

    impl DummyReconcileActor {
        fn new(fail: bool) -> (Self, mpsc::Receiver<()>) {
            let (merge_request_forwarder, merge_request_receiver) = mpsc::channel(10);
            (
                Self {
                    fail,
                    merge_request_forwarder,
                },
                merge_request_receiver,
            )
        }
    }

    #[async_trait::async_trait]
    impl actman::Actor for DummyReconcileActor {
        type Message = Message;

        async fn run(mut self, mut state: State<Self>) {
            loop {
                tokio::select! {
                    Some(message) = state.message_receiver.recv() => {
                        self.handle_message(message).await;
                    }
                    Some(ctrl) = state.control_receiver.recv() => {
                        match ctrl {
                            Control::Shutdown => {
                                break;
                            },
                        }
                    }
                }
            }
        }
    }

    impl DummyReconcileActor {
        async fn handle_message(&self, message: Message) {
            match message {
                Message::MergeFeeds { reply_sender } => {
                    let result = if self.fail {
                        Err(reconcile::Error::Validation(
                            "flight record with this mawb already exists.".to_string(),
                        ))
                    } else {
                        Ok(Reconciled {
                            record: FlightRecord::new("MAWB1234".into()),
                            sheet: SheetSync::Synced,
                        })
                    };
                    let _ = reply_sender.send(result);
                    let _ = self.merge_request_forwarder.send(()).await;
                }
                _ => {
                    panic!("unexpected message type")
                }
            }
        }
    }
}
