pub mod discovery;

pub use discovery::{discover_document_files, load_raw_documents, metadata_path, DiscoveryError};
