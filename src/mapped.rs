use crate::channel::MappedDataChannel;
use crate::config::TransportConfig;
use crate::dispatch::{dispatch_concurrent, spawn, Task};
use crate::error::{Result, TransferError};
use crate::part::{is_ordered, total_size, Session};
use crate::progress::Progress;
use crate::proxy::TransportProxy;
use crate::transport::{
    download_part, first_failure, upload_part, within, ObjectTransport, PartOutcome, Shared,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct MemoryMappedTransport<P> {
    shared: Arc<Shared<P>>,
}

impl<P> MemoryMappedTransport<P>
where
    P: TransportProxy + 'static,
{
    pub fn new(
        proxy: Arc<P>,
        progress: Arc<dyn Progress>,
        session: Session,
        config: TransportConfig,
    ) -> Self {
        let shared = Shared::new(proxy, progress, session, config);
        tracing::debug!(config = ?shared.config, "transport settings");
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn memory_remaining(&self) -> i64 {
        self.shared.budget.remaining()
    }

    fn is_throttled(&self) -> bool {
        let budget = &self.shared.budget;
        tracing::debug!(
            remaining = budget.remaining(),
            in_flight = budget.in_flight(),
            "memory budget"
        );
        budget.is_exhausted() || budget.in_flight() > self.shared.config.queue_size
    }

    async fn send_parts(&self, file: &Path) -> Result<()> {
        let shared = &self.shared;
        let target = Arc::new(shared.target(file));
        let source = File::open(file)?;

        let tasks = futures::stream::iter(shared.session.parts.clone()).map(
            |part| -> Result<Task<PartOutcome>> {
                let mut channel =
                    MappedDataChannel::map_read(&source, part.offset, part.size, part.offset)?;
                shared.progress.increment_byte_read(part.size);
                let lease = shared.budget.lease(part.size);

                let shared = shared.clone();
                let target = target.clone();
                Ok(spawn(async move {
                    let result = shared
                        .transfer_part(&target, &mut channel, &part, upload_part::<P>)
                        .await;
                    drop(channel);
                    shared.progress.increment_byte_written(part.size);
                    drop(lease);
                    result
                }))
            },
        );

        let workers = shared.config.workers;
        let outputs = dispatch_concurrent(tasks, |in_flight| {
            in_flight < workers && !self.is_throttled()
        })
        .await;
        shared.progress.stop();
        first_failure(outputs?)?;

        tracing::info!(object_id = %target.object_id, "finalizing upload");
        shared
            .proxy
            .finalize_upload(&target.object_id, &target.upload_id)
            .await
    }

    async fn receive_parts(&self, output_dir: &Path) -> Result<()> {
        let shared = &self.shared;
        let target = Arc::new(shared.target(output_dir));
        let path = Arc::new(output_dir.join(&target.object_id));

        let mut parts = shared.session.parts.clone();
        let size = total_size(&parts);
        tracing::info!(path = %path.display(), size, "downloading object");
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_path())?
            .set_len(size)?;

        // Write positions accumulate part sizes in part-number order.
        if !is_ordered(&parts) {
            parts.sort();
        }

        let total = parts.len();
        let workers = Arc::new(Semaphore::new(shared.config.workers));
        let mut outstanding = VecDeque::new();
        let mut failures = Vec::new();
        let mut throttled = false;
        let mut position = 0;

        for part in parts {
            let start = position;
            position += part.size;
            if part.offset != start {
                tracing::warn!(
                    part_number = part.part_number,
                    offset = part.offset,
                    position = start,
                    "part offset differs from its position in the object"
                );
            }

            let lease = shared.budget.lease(part.size);
            let shared = shared.clone();
            let target = target.clone();
            let path = path.clone();
            let workers = workers.clone();
            outstanding.push_back(spawn(async move {
                let _permit = workers
                    .acquire_owned()
                    .await
                    .map_err(TransferError::not_resumable)?;
                let result = async {
                    let file = OpenOptions::new().read(true).write(true).open(path.as_path())?;
                    let mut channel =
                        MappedDataChannel::map_write(&file, start, part.size, part.offset)?;
                    let outcome = shared
                        .transfer_part(&target, &mut channel, &part, download_part::<P>)
                        .await?;
                    channel.close()?;
                    Ok::<_, TransferError>(outcome)
                }
                .await;
                shared.progress.increment_byte_read(part.size);
                shared.progress.increment_byte_written(part.size);
                drop(lease);
                result
            }));

            if throttled || self.is_throttled() {
                throttled = true;
                // Reclaim the oldest mapping before mapping another one.
                if let Some(oldest) = outstanding.pop_front() {
                    if let Err(e) = oldest.await {
                        record(e, &mut failures)?;
                    }
                }
            }
        }

        while let Some(task) = outstanding.pop_front() {
            if let Err(e) = task.await {
                record(e, &mut failures)?;
            }
        }
        shared.progress.stop();

        let failed = failures.len();
        if let Some(first) = failures.into_iter().next() {
            return Err(TransferError::DownloadFailed {
                failed,
                total,
                source: Box::new(first),
            });
        }

        tracing::info!(object_id = %target.object_id, "finalizing download");
        shared
            .proxy
            .finalize_download(&target.path, &target.object_id)
            .await
    }
}

fn record(e: TransferError, failures: &mut Vec<TransferError>) -> Result<()> {
    tracing::error!(error = %e, "download part failed");
    if e.is_not_resumable() {
        return Err(e);
    }
    failures.push(e);
    Ok(())
}

#[async_trait]
impl<P> ObjectTransport for MemoryMappedTransport<P>
where
    P: TransportProxy + 'static,
{
    async fn send(&self, file: &Path) -> Result<()> {
        let shared = &self.shared;
        tracing::debug!(file = %file.display(), "send file");
        shared.progress.start();
        let result = within(shared.config.max_duration, self.send_parts(file)).await;
        shared.finish(result)
    }

    async fn receive(&self, output_dir: &Path) -> Result<()> {
        let shared = &self.shared;
        shared.progress.start();
        let result = within(shared.config.max_duration, self.receive_parts(output_dir)).await;
        shared.finish(result)
    }
}
