//! Inbound operations the transport layer calls.

pub mod commit;
pub mod query;

pub use commit::{CommitError, CommitHandler, CommitResult};
pub use query::{LatestMarkers, Listing, ObjectTree, QueryError, ReferencePath, StorageQueryHandler, TreeEntry};
