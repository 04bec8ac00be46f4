pub mod config;
pub mod deleter;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod receiver;
pub mod stats;
pub mod test_utils;
pub mod transform;
