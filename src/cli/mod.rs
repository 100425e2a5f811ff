mod delete;
mod export;
mod infer;
mod list;
pub mod server;
mod train;

use std::sync::Arc;

use anyhow::Result;
use clap::ValueEnum;
use tokio::task::block_in_place;

pub use delete::*;
pub use export::*;
pub use infer::*;
pub use list::*;
pub use server::*;
pub use train::*;

use crate::config::{ExtractorOptions, Opts};
use crate::extractor::OnnxExtractor;
use crate::pipeline::Classifier;
use crate::store::DescriptorStore;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

/// 打开特征库目录
pub fn open_store(opts: &Opts) -> Result<DescriptorStore> {
    Ok(DescriptorStore::open(opts.conf_dir.stores())?)
}

/// 加载特征提取模型并创建分类器
pub fn open_classifier(opts: &Opts, extractor: &ExtractorOptions) -> Result<Classifier> {
    let model = extractor.model.clone().unwrap_or_else(|| opts.conf_dir.model());
    let onnx = block_in_place(|| OnnxExtractor::open(extractor, model))?;
    Ok(Classifier::new(Arc::new(onnx), open_store(opts)?, extractor.batch_size))
}
