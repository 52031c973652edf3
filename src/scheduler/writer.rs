//! Single writer that feeds probe entries into the archive.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::archive::ArchiveService;
use crate::status::ProbeEntry;

const PERSIST_INTERVAL: Duration = Duration::from_secs(2);
const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug)]
pub enum ArchiveCommand {
    Record(ProbeEntry),
    /// Persist now and acknowledge.
    Flush(oneshot::Sender<()>),
}

pub fn spawn_archive_writer(
    archive: Arc<ArchiveService>,
) -> (mpsc::Sender<ArchiveCommand>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let join = tokio::spawn(run_archive_writer(rx, archive));
    (tx, join)
}

/// Apply entries as they arrive and persist on a timer, on flush and when
/// every sender is gone.
async fn run_archive_writer(mut rx: mpsc::Receiver<ArchiveCommand>, archive: Arc<ArchiveService>) {
    let mut interval = tokio::time::interval(PERSIST_INTERVAL);

    loop {
        tokio::select! {
            command = rx.recv() => {
                match command {
                    Some(ArchiveCommand::Record(entry)) => archive.apply(entry),
                    Some(ArchiveCommand::Flush(done)) => {
                        archive.persist();
                        let _ = done.send(());
                    }
                    None => {
                        // Channel closed, persist remaining and exit
                        archive.persist();
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                archive.persist();
            }
        }
    }

    tracing::info!("ArchiveWriter: Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchivePolicy;
    use crate::db::{MemoryStore, Persistence, KEY_DAILY_ARCHIVE};
    use crate::status::Status;
    use chrono::Utc;

    #[tokio::test]
    async fn test_flush_persists_recorded_entries() {
        let store: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
        let archive = Arc::new(ArchiveService::load(store.clone(), ArchivePolicy::default()));
        let (tx, _join) = spawn_archive_writer(archive.clone());

        tx.send(ArchiveCommand::Record(ProbeEntry::new(Utc::now(), "eu1", Status::Up)))
            .await
            .unwrap();
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(ArchiveCommand::Flush(done_tx)).await.unwrap();
        done_rx.await.unwrap();

        assert_eq!(archive.recent().len(), 1);
        assert!(store.load(KEY_DAILY_ARCHIVE).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_closing_channel_persists_and_stops() {
        let store: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
        let archive = Arc::new(ArchiveService::load(store.clone(), ArchivePolicy::default()));
        let (tx, join) = spawn_archive_writer(archive);

        tx.send(ArchiveCommand::Record(ProbeEntry::new(Utc::now(), "eu1", Status::Down)))
            .await
            .unwrap();
        drop(tx);
        join.await.unwrap();

        let reloaded = ArchiveService::load(store, ArchivePolicy::default());
        assert_eq!(reloaded.recent().len(), 1);
    }
}
