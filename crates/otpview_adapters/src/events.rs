use async_trait::async_trait;
use otpview_core::entities::ScanEvent;
use otpview_core::ports::EventBus;
use otpview_core::Error;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

const CHANNEL_CAPACITY: usize = 16;

/// In-process event bus connecting the scanner window and its requester.
///
/// Emitting with no subscribers is not an error; the event is dropped.
#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<ScanEvent>,
}

impl BroadcastEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    #[instrument(skip(self), fields(event = event.name()))]
    async fn emit(&self, event: ScanEvent) -> Result<(), Error> {
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "event emitted"),
            Err(_) => debug!("event emitted with no subscribers"),
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }
}
