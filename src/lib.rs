mod budget;
mod channel;
mod config;
mod dispatch;
mod error;
mod mapped;
mod part;
mod progress;
mod proxy;
mod transport;
mod upload;


pub use budget::{Lease, MemoryBudget};
pub use channel::{content_md5, DataChannel, FileDataChannel, MappedDataChannel};
pub use config::{Mode, TransportConfig, DEFAULT_QUEUE_SIZE, MIN_MEMORY_BUDGET, MIN_WORKERS};
pub use dispatch::dispatch_concurrent;
pub use error::{BoxError, Result, TransferError};
pub use mapped::MemoryMappedTransport;
pub use part::{is_ordered, split, total_size, CompletedPart, Part, Session, UploadProgress};
pub use progress::{Progress, ProgressCounters, RunState, Snapshot};
pub use proxy::TransportProxy;
pub use transport::{ObjectTransport, ParallelPartTransport, PartOutcome};
pub use upload::{ObjectUpload, UploadStrategy};
