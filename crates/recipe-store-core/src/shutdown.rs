use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::RecordStore;

/// Cancellation handle shared between the service lifecycle and its
/// background tasks. Cloning shares the same underlying signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`ShutdownSignal::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only errors if it is gone.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Park a task on `signal`; once it fires, dump `store` to `path` and exit.
///
/// Await the returned handle before the process exits or the final writes
/// are lost. A failed dump is logged and not retried.
pub fn spawn_dump_on_shutdown(
    store: Arc<RecordStore>,
    path: PathBuf,
    signal: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        signal.cancelled().await;
        let dump_path = path.clone();
        let result = tokio::task::spawn_blocking(move || store.dump_to(&dump_path)).await;
        match result {
            Ok(Ok(written)) => {
                tracing::info!("dumped {written} records to {}", path.display());
            }
            Ok(Err(err)) => tracing::error!("failed to dump records: {err}"),
            Err(err) => tracing::error!("dump task panicked: {err}"),
        }
    })
}
