pub mod core_processor;
pub mod extractor;
pub mod news_strategy;
pub mod pipeline;
pub mod quality;
pub mod sales_strategy;
pub mod transformer;
pub mod warehouse_loader;

pub use pipeline::{Pipeline, RunSummary};
