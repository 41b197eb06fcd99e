//! Input source fed through an `mpsc` channel.

use async_trait::async_trait;
use srvnc_core::EventKind;
use tokio::sync::mpsc;

use crate::application::forward_input::InputSource;

pub struct ChannelInput {
    rx: mpsc::Receiver<EventKind>,
}

impl ChannelInput {
    /// Returns the source and the handle used to feed it.
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<EventKind>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx }, tx)
    }
}

#[async_trait]
impl InputSource for ChannelInput {
    async fn poll(&mut self) -> Option<EventKind> {
        self.rx.recv().await
    }
}
