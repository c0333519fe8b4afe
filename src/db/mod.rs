pub mod metadata_store;
pub mod models;

pub use metadata_store::MetadataStore;
