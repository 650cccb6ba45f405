pub mod cache;
pub mod delete;
pub mod download;
pub mod init;
pub mod keys;
pub mod upload;
pub mod version;

pub use cache::Cache;
pub use delete::Delete;
pub use download::Download;
pub use init::Init;
pub use keys::Keys;
pub use upload::Upload;
pub use version::Version;
