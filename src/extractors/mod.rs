pub mod catalog_api;
pub mod file;
pub mod protocol;

pub use catalog_api::CatalogApiExtractor;
pub use file::FileExtractor;
pub use protocol::ProtocolExtractor;
