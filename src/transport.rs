use crate::budget::MemoryBudget;
use crate::channel::{DataChannel, FileDataChannel};
use crate::config::{Mode, TransportConfig};
use crate::dispatch::{dispatch_concurrent, spawn, Task};
use crate::error::{Result, TransferError};
use crate::part::{Part, Session};
use crate::progress::Progress;
use crate::proxy::TransportProxy;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ObjectTransport: Send + Sync {
    async fn send(&self, file: &Path) -> Result<()>;

    async fn receive(&self, output_dir: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    SkippedVerified,
    Transferred,
    Retransferred,
}

pub(crate) struct Target {
    pub object_id: String,
    pub upload_id: String,
    /// The source file when sending, the output directory when receiving.
    pub path: PathBuf,
}

pub(crate) type TransferFn<P> = for<'a> fn(
    &'a P,
    &'a mut dyn DataChannel,
    &'a Part,
    &'a Target,
) -> BoxFuture<'a, Result<()>>;

pub(crate) type EraseFn<P> = for<'a> fn(&'a P, &'a Part, &'a Target) -> BoxFuture<'a, Result<()>>;

pub(crate) fn upload_part<'a, P: TransportProxy>(
    proxy: &'a P,
    channel: &'a mut dyn DataChannel,
    part: &'a Part,
    target: &'a Target,
) -> BoxFuture<'a, Result<()>> {
    proxy.upload_part(channel, part, &target.object_id, &target.upload_id)
}

pub(crate) fn download_part<'a, P: TransportProxy>(
    proxy: &'a P,
    channel: &'a mut dyn DataChannel,
    part: &'a Part,
    target: &'a Target,
) -> BoxFuture<'a, Result<()>> {
    proxy.download_part(channel, part, &target.object_id, &target.path)
}

fn erase_uploaded<'a, P: TransportProxy>(
    proxy: &'a P,
    part: &'a Part,
    target: &'a Target,
) -> BoxFuture<'a, Result<()>> {
    proxy.delete_upload_part(&target.object_id, &target.upload_id, part)
}

fn erase_downloaded<'a, P: TransportProxy>(
    proxy: &'a P,
    part: &'a Part,
    target: &'a Target,
) -> BoxFuture<'a, Result<()>> {
    proxy.delete_download_part(&target.path, &target.object_id, part)
}

fn eraser<P: TransportProxy>(mode: Mode) -> EraseFn<P> {
    match mode {
        Mode::Upload => erase_uploaded::<P> as EraseFn<P>,
        Mode::Download => erase_downloaded::<P> as EraseFn<P>,
    }
}

pub(crate) struct Shared<P> {
    pub proxy: Arc<P>,
    pub progress: Arc<dyn Progress>,
    pub budget: Arc<MemoryBudget>,
    pub session: Session,
    pub config: TransportConfig,
    erase: EraseFn<P>,
}

impl<P: TransportProxy> Shared<P> {
    pub fn new(
        proxy: Arc<P>,
        progress: Arc<dyn Progress>,
        session: Session,
        config: TransportConfig,
    ) -> Self {
        let config = config.normalized();
        Self {
            proxy,
            progress,
            budget: Arc::new(MemoryBudget::new(config.memory_budget)),
            session,
            erase: eraser(config.mode),
            config,
        }
    }

    pub fn target(&self, path: &Path) -> Target {
        Target {
            object_id: self.session.object_id.clone(),
            upload_id: self.session.upload_id.clone(),
            path: path.to_owned(),
        }
    }

    pub async fn transfer_part(
        &self,
        target: &Target,
        channel: &mut dyn DataChannel,
        part: &Part,
        transfer: TransferFn<P>,
    ) -> Result<PartOutcome> {
        let proxy = &*self.proxy;

        if !part.completed {
            transfer(proxy, channel, part, target).await?;
            self.progress.update_progress(1);
            return Ok(PartOutcome::Transferred);
        }

        let outcome = if !self.config.verify_checksums || is_intact(channel, part)? {
            tracing::debug!(part_number = part.part_number, "checksum verified, skipping part");
            PartOutcome::SkippedVerified
        } else {
            tracing::debug!(part_number = part.part_number, "checksum mismatch, transferring part again");
            (self.erase)(proxy, part, target).await?;
            channel.reset()?;
            transfer(proxy, channel, part, target).await?;
            PartOutcome::Retransferred
        };
        self.progress.update_checksum(1);
        Ok(outcome)
    }

    pub fn finish(&self, result: Result<()>) -> Result<()> {
        self.progress.end(result.is_err());
        result
    }
}

fn is_intact(channel: &mut dyn DataChannel, part: &Part) -> Result<bool> {
    match &part.checksum {
        Some(expected) => Ok(channel.is_valid_md5(expected)?),
        None => Ok(false),
    }
}

pub(crate) fn first_failure<T>(outputs: Vec<Result<T>>) -> Result<()> {
    let mut failures = outputs.into_iter().filter_map(|output| output.err());
    match failures.next() {
        Some(e) => {
            tracing::error!(error = %e, "part failed");
            for e in failures {
                tracing::error!(error = %e, "part failed");
            }
            Err(e)
        }
        None => Ok(()),
    }
}

// Dropping `future` on expiry aborts its part tasks.
pub(crate) async fn within<F, T>(limit: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransferError::TimedOut(limit))?,
        None => future.await,
    }
}

/// Uploads parts concurrently, streaming each one from the file.
pub struct ParallelPartTransport<P> {
    shared: Arc<Shared<P>>,
}

impl<P> ParallelPartTransport<P>
where
    P: TransportProxy + 'static,
{
    pub fn new(
        proxy: Arc<P>,
        progress: Arc<dyn Progress>,
        session: Session,
        config: TransportConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(proxy, progress, session, config)),
        }
    }

    pub fn memory_remaining(&self) -> i64 {
        self.shared.budget.remaining()
    }

    async fn send_parts(&self, file: &Path) -> Result<()> {
        let shared = &self.shared;
        let target = Arc::new(shared.target(file));
        let workers = shared.config.workers;

        let tasks = futures::stream::iter(shared.session.parts.clone()).map(
            |part| -> Result<Task<PartOutcome>> {
                let lease = shared.budget.lease(part.size);
                let shared = shared.clone();
                let target = target.clone();
                Ok(spawn(async move {
                    let result = async {
                        let mut channel =
                            FileDataChannel::open(&target.path, part.offset, part.size)?;
                        shared
                            .transfer_part(&target, &mut channel, &part, upload_part::<P>)
                            .await
                    }
                    .await;
                    shared.progress.increment_byte_written(part.size);
                    drop(lease);
                    result
                }))
            },
        );

        let outputs = dispatch_concurrent(tasks, |in_flight| in_flight < workers).await?;
        first_failure(outputs)?;

        tracing::info!(object_id = %target.object_id, "finalizing upload");
        shared
            .proxy
            .finalize_upload(&target.object_id, &target.upload_id)
            .await
    }
}

#[async_trait]
impl<P> ObjectTransport for ParallelPartTransport<P>
where
    P: TransportProxy + 'static,
{
    async fn send(&self, file: &Path) -> Result<()> {
        let shared = &self.shared;
        tracing::info!(
            object_id = %shared.session.object_id,
            upload_id = %shared.session.upload_id,
            parts = shared.session.parts.len(),
            "sending object"
        );
        shared.progress.start();
        let result = within(shared.config.max_duration, self.send_parts(file)).await;
        shared.finish(result)
    }

    async fn receive(&self, _: &Path) -> Result<()> {
        Err(TransferError::Unsupported("receive"))
    }
}
