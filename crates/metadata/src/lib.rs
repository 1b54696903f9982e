//! eta-metadata: Consumer configuration loaded from YAML

pub mod consumer;
pub mod error;

pub use consumer::{
    ConnectionConfig, ConsumerConfig, DictionaryConfig, DirectoryConfig, ItemConfig, LoginConfig,
};
pub use error::MetadataError;
