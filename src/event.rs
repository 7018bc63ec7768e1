use futures_intrusive::channel::shared::OneshotReceiver;

/// Completion of a submitted sort.
pub struct SortEvent<T: 'static> {
    receiver: OneshotReceiver<anyhow::Result<T>>,
}

impl<T: 'static> SortEvent<T> {
    pub(crate) fn new(receiver: OneshotReceiver<anyhow::Result<T>>) -> Self {
        Self { receiver }
    }

    pub async fn completed(self) -> anyhow::Result<T> {
        match self.receiver.receive().await {
            Some(result) => result,
            None => Err(anyhow::anyhow!("sort was dropped before it completed")),
        }
    }

    /// blocks the calling thread until the sort finished
    pub fn wait(self) -> anyhow::Result<T> {
        pollster::block_on(self.completed())
    }
}
