//! # File Transport
//!
//! Directory-backed queues: each queue is a folder under the module root, each
//! envelope one file. Writers land files atomically (temp write, then rename);
//! the reader polls the folder in name order, so names embed a timestamp and
//! sequence to keep arrival order stable. A file is deleted only when the dispatch
//! loop acknowledges it after the dispatch attempt — a crash in between leaves the
//! file on disk for redelivery, and the duplication manager absorbs the replay.
//!
//! Useful for cheap durable hand-off between processes on one machine, and as the
//! reference shape for heavier storage-backed transports.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::dispatch::{DispatcherProcess, QueueReader};
use crate::error::{EngineError, TransportError};
use crate::outbox::{QueueWriter, QueueWriterFactory};
use crate::process::EngineProcess;
use crate::registry::{ComponentRegistry, EngineModule};

const ENVELOPE_EXTENSION: &str = "env";
const DEFAULT_POLL: Duration = Duration::from_millis(50);

/// Outbound channel writing envelope files into one queue folder.
pub struct FileQueueWriter {
    queue: String,
    dir: PathBuf,
    sequence: AtomicU64,
}

#[async_trait]
impl QueueWriter for FileQueueWriter {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!("{ms:016}-{seq:06}-{}.{ENVELOPE_EXTENSION}", Uuid::new_v4());
        let tmp = self.dir.join(format!("{name}.tmp"));
        let target = self.dir.join(name);
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &target)?;
        debug!(queue = %self.queue, file = %target.display(), "envelope written");
        Ok(())
    }
}

/// Inbound side: polls one queue folder and yields files in name order.
///
/// The file backing the last received envelope stays on disk until `ack`.
pub struct FileQueueReader {
    queue: String,
    dir: PathBuf,
    poll: Duration,
    in_flight: Option<PathBuf>,
}

impl FileQueueReader {
    fn next_file(&self) -> Result<Option<PathBuf>, TransportError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == ENVELOPE_EXTENSION))
            .collect();
        files.sort();
        Ok(files.into_iter().next())
    }
}

#[async_trait]
impl QueueReader for FileQueueReader {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            if let Some(path) = self.next_file()? {
                let bytes = std::fs::read(&path)?;
                self.in_flight = Some(path);
                return Ok(Some(bytes));
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    async fn ack(&mut self) -> Result<(), TransportError> {
        if let Some(path) = self.in_flight.take() {
            std::fs::remove_file(&path)?;
            debug!(queue = %self.queue, file = %path.display(), "envelope acknowledged");
        }
        Ok(())
    }
}

/// Writer factory for the `"file"` endpoint.
pub struct FileQueueWriterFactory {
    root: PathBuf,
}

impl FileQueueWriterFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl QueueWriterFactory for FileQueueWriterFactory {
    fn endpoint(&self) -> &str {
        "file"
    }

    fn create_writer(&self, queue: &str) -> Result<Arc<dyn QueueWriter>, TransportError> {
        let dir = self.root.join(queue);
        std::fs::create_dir_all(&dir)?;
        Ok(Arc::new(FileQueueWriter {
            queue: queue.to_string(),
            dir,
            sequence: AtomicU64::new(0),
        }))
    }
}

/// Configuration module for the file transport: the storage folder plus one
/// dispatch process per registered queue.
#[derive(Default)]
pub struct FileModule {
    root: Option<PathBuf>,
    queues: Vec<String>,
}

impl FileModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root folder holding one subfolder per queue.
    pub fn folder(&mut self, root: impl AsRef<Path>) -> &mut Self {
        self.root = Some(root.as_ref().to_path_buf());
        self
    }

    /// Adds a dispatch process draining the named file queue.
    pub fn add_file_process(&mut self, queue: impl Into<String>) -> &mut Self {
        self.queues.push(queue.into());
        self
    }
}

impl EngineModule for FileModule {
    fn configure(self: Box<Self>, registry: &mut ComponentRegistry) -> Result<(), EngineError> {
        let root = self.root.ok_or_else(|| {
            EngineError::Configuration(
                "file module requires a folder; call FileModule::folder".to_string(),
            )
        })?;

        let factory_root = root.clone();
        registry.register_queue_writer_factory(Box::new(move |_scope| {
            Ok(Arc::new(FileQueueWriterFactory::new(factory_root))
                as Arc<dyn QueueWriterFactory>)
        }));

        for queue in self.queues {
            let dir = root.join(&queue);
            registry.register_process(Box::new(move |scope| {
                std::fs::create_dir_all(&dir).map_err(TransportError::Io)?;
                let reader = FileQueueReader {
                    queue,
                    dir,
                    poll: DEFAULT_POLL,
                    in_flight: None,
                };
                let process = DispatcherProcess::from_scope(Box::new(reader), scope)?;
                Ok(Box::new(process) as Box<dyn EngineProcess>)
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_round_trip_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileQueueWriterFactory::new(dir.path());
        let writer = factory.create_writer("orders").unwrap();

        writer.put(b"first".to_vec()).await.unwrap();
        writer.put(b"second".to_vec()).await.unwrap();

        let mut reader = FileQueueReader {
            queue: "orders".to_string(),
            dir: dir.path().join("orders"),
            poll: Duration::from_millis(5),
            in_flight: None,
        };
        assert_eq!(reader.receive().await.unwrap(), Some(b"first".to_vec()));
        reader.ack().await.unwrap();
        assert_eq!(reader.receive().await.unwrap(), Some(b"second".to_vec()));
        reader.ack().await.unwrap();
    }

    #[tokio::test]
    async fn file_survives_until_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileQueueWriterFactory::new(dir.path());
        let writer = factory.create_writer("orders").unwrap();
        writer.put(b"durable".to_vec()).await.unwrap();

        let queue_dir = dir.path().join("orders");
        let envelope_files = |dir: &Path| {
            std::fs::read_dir(dir)
                .unwrap()
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == ENVELOPE_EXTENSION))
                .count()
        };

        let mut reader = FileQueueReader {
            queue: "orders".to_string(),
            dir: queue_dir.clone(),
            poll: Duration::from_millis(5),
            in_flight: None,
        };
        assert_eq!(reader.receive().await.unwrap(), Some(b"durable".to_vec()));
        // Still on disk: a crash here leads to redelivery, not loss.
        assert_eq!(envelope_files(&queue_dir), 1);

        // Without an ack, the same file is offered again.
        reader.in_flight = None;
        assert_eq!(reader.receive().await.unwrap(), Some(b"durable".to_vec()));

        reader.ack().await.unwrap();
        assert_eq!(envelope_files(&queue_dir), 0);
    }

    #[test]
    fn module_without_folder_is_a_configuration_error() {
        let mut registry = ComponentRegistry::new();
        let module = Box::new(FileModule::new());
        let err = module.configure(&mut registry).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
