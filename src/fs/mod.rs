pub mod local;
pub mod memory;
pub mod s3;
pub mod store;

pub use local::{apply_exclusions, index_records, list_local, LocalFileRecord, LocalIndex};
pub use memory::MemoryStore;
pub use s3::S3Store;
pub use store::{list_remote, Acl, ObjectStore, PutRequest, RemoteIndex, RemoteObject};
