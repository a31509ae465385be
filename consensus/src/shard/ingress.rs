use super::{state::Status, types::Tip};
use crate::types::{Epoch, Round};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use tracing::error;

/// Point-in-time view of an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub status: Status,
    pub round: Round,
    pub epoch: Epoch,
    pub tip: Tip,
}

pub enum Message {
    Status(oneshot::Sender<Snapshot>),
}

/// Handle to a running engine.
///
/// The engine stops once every mailbox is dropped.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Returns the current status of the engine, or `None` if it has stopped.
    pub async fn status(&mut self) -> Option<Snapshot> {
        let (sender, receiver) = oneshot::channel();
        if let Err(err) = self.sender.send(Message::Status(sender)).await {
            error!(?err, "failed to send message to engine");
            return None;
        }
        receiver.await.ok()
    }
}
