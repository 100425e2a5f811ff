pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod extractor;
pub mod image;
pub mod matcher;
mod metrics;
pub mod pipeline;
mod server;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use error::{ClassifyError, Result};
pub use pipeline::{Budget, Classifier, TrainSummary};
pub use store::DescriptorStore;
