// Native implementations

pub mod json_store;

pub use json_store::{JsonFileStore, RecordDocument, StoreStats};
