use crate::channel::FileDataChannel;
use crate::config::{Mode, TransportConfig};
use crate::error::{Result, TransferError};
use crate::mapped::MemoryMappedTransport;
use crate::part::{Session, UploadProgress};
use crate::progress::{Progress, ProgressCounters};
use crate::proxy::TransportProxy;
use crate::transport::{ObjectTransport, ParallelPartTransport};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStrategy {
    Sequential,
    Parallel(TransportConfig),
    MemoryMapped(TransportConfig),
}

impl Default for UploadStrategy {
    fn default() -> Self {
        UploadStrategy::Sequential
    }
}

#[derive(TypedBuilder)]
pub struct ObjectUpload<P> {
    proxy: Arc<P>,
    #[builder(default = Arc::new(ProgressCounters::default()) as Arc<dyn Progress>)]
    progress: Arc<dyn Progress>,
    /// Attempts before giving up; zero or less retries forever.
    #[builder(default)]
    retry_number: i32,
    #[builder(default)]
    strategy: UploadStrategy,
}

impl<P> ObjectUpload<P>
where
    P: TransportProxy + 'static,
{
    /// Uploads `file` as `object_id`, resuming the session in progress unless
    /// `redo` is set. After a not-retryable failure the next attempt starts
    /// over when the server cannot recover the data uploaded so far.
    pub async fn upload(&self, file: &Path, object_id: &str, mut redo: bool) -> Result<()> {
        let limit = usize::try_from(self.retry_number)
            .ok()
            .filter(|limit| *limit > 0);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = if redo {
                self.start_upload(file, object_id).await
            } else {
                self.resume_if_possible(file, object_id).await
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_retryable() => {
                    if limit.map_or(false, |limit| attempts >= limit) {
                        return Err(TransferError::RetriesExhausted {
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    redo = !self.proxy.is_upload_data_recoverable(object_id).await?;
                    tracing::warn!(object_id, attempts, redo, error = %e, "upload attempt failed");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn start_upload(&self, file: &Path, object_id: &str) -> Result<()> {
        let size = std::fs::metadata(file)?.len();
        let session = self.proxy.initiate_upload(object_id, size).await?;
        tracing::info!(object_id, upload_id = %session.upload_id, size, "starting new upload");
        self.upload_parts(file, session).await
    }

    async fn resume_if_possible(&self, file: &Path, object_id: &str) -> Result<()> {
        let progress = match self.proxy.get_progress(object_id).await {
            Ok(progress) => progress,
            Err(e) if e.is_no_such_upload() || e.is_not_retryable() => {
                tracing::info!(object_id, "no upload to resume");
                return self.start_upload(file, object_id).await;
            }
            Err(e) => return Err(e),
        };
        self.resume(file, progress).await
    }

    async fn resume(&self, file: &Path, progress: UploadProgress) -> Result<()> {
        let completed = progress
            .completed_parts
            .iter()
            .map(|part| part.part_number)
            .collect::<HashSet<_>>();

        let mut parts = progress.parts;
        parts.retain(|part| !completed.contains(&part.part_number));
        tracing::info!(
            object_id = %progress.object_id,
            upload_id = %progress.upload_id,
            completed = completed.len(),
            remaining = parts.len(),
            "resuming upload"
        );

        self.upload_parts(
            file,
            Session {
                object_id: progress.object_id,
                upload_id: progress.upload_id,
                parts,
            },
        )
        .await
    }

    async fn upload_parts(&self, file: &Path, session: Session) -> Result<()> {
        let transport: Box<dyn ObjectTransport> = match &self.strategy {
            UploadStrategy::Sequential => {
                for part in &session.parts {
                    let mut channel = FileDataChannel::open(file, part.offset, part.size)?;
                    self.proxy
                        .upload_part(&mut channel, part, &session.object_id, &session.upload_id)
                        .await?;
                    self.progress.update_progress(1);
                    self.progress.increment_byte_written(part.size);
                }
                return self
                    .proxy
                    .finalize_upload(&session.object_id, &session.upload_id)
                    .await;
            }
            UploadStrategy::Parallel(config) => Box::new(ParallelPartTransport::new(
                self.proxy.clone(),
                self.progress.clone(),
                session,
                for_upload(config),
            )),
            UploadStrategy::MemoryMapped(config) => Box::new(MemoryMappedTransport::new(
                self.proxy.clone(),
                self.progress.clone(),
                session,
                for_upload(config),
            )),
        };
        transport.send(file).await
    }
}

fn for_upload(config: &TransportConfig) -> TransportConfig {
    TransportConfig {
        mode: Mode::Upload,
        ..config.clone()
    }
}
