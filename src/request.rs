//! Data requests: model, persistence, lifecycle service, processing and notification.

pub mod jobs;
pub mod model;
pub mod notifier;
pub mod processor;
pub mod service;
pub mod store;

pub use jobs::DataRequestJobs;
pub use model::{ContextStatus, DataRequest, NewDataRequest, RequestContext, RequestStatus, RequestType};
pub use notifier::{Message, MessageSink, NotificationSettings, Notifier, NotifyReport, TracingSink};
pub use processor::{ProcessOutcome, RequestProcessor};
pub use service::DataRequestService;
pub use store::RequestStore;
