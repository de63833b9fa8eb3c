use crate::channel::DataChannel;
use crate::error::Result;
use crate::part::{Part, Session, UploadProgress};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait TransportProxy: Send + Sync {
    async fn upload_part(
        &self,
        channel: &mut dyn DataChannel,
        part: &Part,
        object_id: &str,
        upload_id: &str,
    ) -> Result<()>;

    async fn download_part(
        &self,
        channel: &mut dyn DataChannel,
        part: &Part,
        object_id: &str,
        dest: &Path,
    ) -> Result<()>;

    async fn delete_upload_part(&self, object_id: &str, upload_id: &str, part: &Part)
        -> Result<()>;

    async fn delete_download_part(&self, dest: &Path, object_id: &str, part: &Part) -> Result<()>;

    async fn finalize_upload(&self, object_id: &str, upload_id: &str) -> Result<()>;

    async fn finalize_download(&self, dest: &Path, object_id: &str) -> Result<()>;

    /// Starts a new session whose parts cover `file_size` bytes.
    async fn initiate_upload(&self, object_id: &str, file_size: u64) -> Result<Session>;

    // Fails with `NoSuchUpload` when the object has no upload in progress.
    async fn get_progress(&self, object_id: &str) -> Result<UploadProgress>;

    async fn is_upload_data_recoverable(&self, object_id: &str) -> Result<bool>;
}
