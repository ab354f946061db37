//! Provider-facing side of the pipeline: capability traits, the provider registry,
//! context lists, the export writer and archive storage.

pub mod archive;
pub mod contextlist;
pub mod manager;
pub mod metadata;
pub mod provider;
pub mod registry;
pub mod userlist;
pub mod writer;

pub use archive::{
    ArchiveKey, ArchiveStore, DownloadLink, DownloadLinkSigner, FileArchiveStore, StoredArchive,
};
pub use contextlist::{ApprovedCollection, ApprovedContextList, ContextList, ContextListCollection};
pub use manager::{LoggingObserver, ManagerObserver, PrivacyManager};
pub use metadata::{Capabilities, MetadataCollection, MetadataItem, ProviderDescriptor};
pub use provider::{ContextDiscovery, DataProvider, UserDataEraser, UserDataExporter, UserListProvider};
pub use registry::{Capability, ProviderRegistry};
pub use userlist::{ApprovedUserList, UserList};
pub use writer::{ArchiveEntry, ArchiveIndex, ComponentWriter, ExportArchive, ExportWriter};
