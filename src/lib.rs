//! Dataprivacy: Data Subject Request Processing
//!
//! Takes approved export and delete requests for a user's personal data, fans them
//! out to every registered data-holding component, packages exports into a single
//! archive and tells the requester the outcome. Work runs on a durable, at-least-once
//! task queue.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod privacy;
pub mod queue;
pub mod request;
pub mod types;
pub mod users;

pub use config::{ConfigLoader, DataPrivacyConfig};
pub use context::{Context, ContextDirectory, ContextLevel, ContextTree};
pub use error::{PrivacyError, StorageError};
pub use pipeline::{Pipeline, PipelineBuilder, Stores};
pub use queue::{JobHandler, JobKind, JobQueue, JobRecord, JobState, QueueConfig, QueueRunner};
pub use request::{DataRequest, DataRequestService, RequestProcessor, RequestStatus, RequestType};
pub use types::{ContextId, JobId, RequestId, UserId};
pub use users::{AccountDeactivator, Authority, MemoryDirectory, UserDirectory, UserRecord};
