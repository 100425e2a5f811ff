use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::descriptor::{Descriptor, DescriptorMap};
use crate::error::{ClassifyError, Result};
use crate::extractor::FeatureExtractor;
use crate::image::{self, NormalizedTensor};
use crate::matcher::{self, MatchResult};
use crate::metrics;
use crate::store::{self, DEFAULT_STORE_ID, DescriptorStore, StoreContents, StoreInfo};

/// 一次调用的执行预算：截止时间 + 取消标记
///
/// 在每个批次开始前以及写入特征库前检查，超时或取消时不会写入任何内容
#[derive(Debug, Clone, Default)]
pub struct Budget {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Some(Instant::now() + timeout), ..Default::default() }
    }

    /// 标记为已取消，所有克隆共享同一标记
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ClassifyError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ClassifyError::Timeout),
            _ => Ok(()),
        }
    }
}

/// 训练结果摘要
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrainSummary {
    pub store_id: String,
    /// 特征库中的标签数量（重复标签只计一次）
    pub num_samples: usize,
    /// 按特征库顺序排列的标签
    pub labels: Vec<String>,
}

/// 训练与识别流程
#[derive(Clone)]
pub struct Classifier {
    extractor: Arc<dyn FeatureExtractor>,
    store: DescriptorStore,
    batch_size: usize,
}

impl Classifier {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, store: DescriptorStore, batch_size: usize) -> Self {
        Self { extractor, store, batch_size: batch_size.max(1) }
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn extractor(&self) -> &dyn FeatureExtractor {
        self.extractor.as_ref()
    }

    /// 使用一批 (图片, 标签) 生成新的特征库，覆盖同名特征库
    ///
    /// 任意一张图片失败都会中止训练，已有的特征库保持不变
    pub fn train<B>(&self, batch: &[(B, String)], store_id: Option<&str>, budget: &Budget) -> Result<TrainSummary>
    where
        B: AsRef<[u8]> + Sync,
    {
        let start = Instant::now();
        let store_id = store_id.unwrap_or(DEFAULT_STORE_ID);
        let result = self.train_inner(batch, store_id, budget).map_err(ClassifyError::training);
        metrics::observe_train(&result, start.elapsed());
        result
    }

    fn train_inner<B>(&self, batch: &[(B, String)], store_id: &str, budget: &Budget) -> Result<TrainSummary>
    where
        B: AsRef<[u8]> + Sync,
    {
        store::validate_id(store_id)?;
        if batch.is_empty() {
            return Err(ClassifyError::EmptyBatch);
        }
        info!("开始训练 {}，共 {} 张图片", store_id, batch.len());

        let mut entries = DescriptorMap::with_capacity(batch.len());
        for chunk in batch.chunks(self.batch_size) {
            budget.check()?;
            let descriptors = self.extract_chunk(chunk)?;
            for ((_, label), descriptor) in chunk.iter().zip(descriptors) {
                if entries.insert(label.clone(), descriptor).is_some() {
                    debug!("标签 {label} 重复，使用后出现的图片");
                }
            }
            debug!("已提取 {} / {} 张图片", entries.len(), batch.len());
        }

        budget.check()?;
        let contents = StoreContents {
            extractor: self.extractor.id().to_string(),
            dim: self.extractor.dim(),
            entries,
        };
        self.store.save(store_id, &contents)?;

        Ok(TrainSummary {
            store_id: store_id.to_string(),
            num_samples: contents.entries.len(),
            labels: contents.entries.into_keys().collect(),
        })
    }

    /// 并行解码一个批次，再整体送入网络
    fn extract_chunk<B>(&self, chunk: &[(B, String)]) -> Result<Vec<Descriptor>>
    where
        B: AsRef<[u8]> + Sync,
    {
        let spec = self.extractor.input();
        let tensors = chunk
            .par_iter()
            .map(|(bytes, label)| {
                image::decode_and_normalize(bytes.as_ref(), spec).map_err(|e| match e {
                    ClassifyError::Decode(msg) => {
                        warn!("图片解码失败: {label}");
                        ClassifyError::Decode(format!("{label}: {msg}"))
                    }
                    other => other,
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            // 按输入顺序返回第一个错误
            .collect::<Result<Vec<_>>>()?;

        let descriptors = self.extractor.extract_batch(&image::stack(&tensors)?)?;
        if descriptors.len() != chunk.len() {
            return Err(ClassifyError::Shape(format!(
                "批次大小为 {}，网络返回 {} 个描述符",
                chunk.len(),
                descriptors.len()
            )));
        }
        self.check_dims(&descriptors)?;
        Ok(descriptors)
    }

    fn check_dims(&self, descriptors: &[Descriptor]) -> Result<()> {
        let dim = self.extractor.dim();
        match descriptors.iter().find(|d| d.dim() != dim) {
            Some(d) => Err(ClassifyError::Shape(format!("描述符维度为 {}，期望 {dim}", d.dim()))),
            None => Ok(()),
        }
    }

    /// 识别一张图片，返回最相似的标签
    pub fn infer(&self, bytes: &[u8], store_id: Option<&str>, budget: &Budget) -> Result<MatchResult> {
        let start = Instant::now();
        let result = self
            .query(bytes, store_id, budget)
            .and_then(|(query, contents)| matcher::best_match(&query, &contents.entries))
            .map_err(ClassifyError::inference);
        metrics::observe_infer(&result, start.elapsed());
        result
    }

    /// 返回所有标签的相似度，从高到低排序
    pub fn rank(&self, bytes: &[u8], store_id: Option<&str>, budget: &Budget) -> Result<Vec<MatchResult>> {
        self.query(bytes, store_id, budget)
            .and_then(|(query, contents)| matcher::rank(&query, &contents.entries))
            .map_err(ClassifyError::inference)
    }

    fn query(&self, bytes: &[u8], store_id: Option<&str>, budget: &Budget) -> Result<(Descriptor, StoreContents)> {
        budget.check()?;
        let contents = self.load_compatible(store_id.unwrap_or(DEFAULT_STORE_ID))?;

        let tensor = image::decode_and_normalize(bytes, self.extractor.input())?;
        let query = self.extract_one(&tensor)?;
        budget.check()?;

        Ok((query, contents))
    }

    fn extract_one(&self, tensor: &NormalizedTensor) -> Result<Descriptor> {
        let descriptor = self.extractor.extract(tensor)?;
        self.check_dims(std::slice::from_ref(&descriptor))?;
        Ok(descriptor)
    }

    /// 读取特征库并确认由当前特征提取器生成
    fn load_compatible(&self, store_id: &str) -> Result<StoreContents> {
        let contents = self.store.load(store_id)?;
        if contents.extractor != self.extractor.id() {
            return Err(ClassifyError::IncompatibleStore {
                expected: self.extractor.id().to_string(),
                found: contents.extractor,
            });
        }
        if contents.dim != self.extractor.dim() {
            return Err(ClassifyError::Shape(format!(
                "特征库维度为 {}，特征提取器为 {}",
                contents.dim,
                self.extractor.dim()
            )));
        }
        Ok(contents)
    }

    pub fn delete_store(&self, store_id: Option<&str>) -> Result<()> {
        self.store.delete(store_id.unwrap_or(DEFAULT_STORE_ID))
    }

    pub fn list_trained_artifacts(&self) -> Result<Vec<StoreInfo>> {
        self.store.list()
    }

    /// 特征库文件本身，内容与磁盘上完全一致
    pub fn download_raw(&self, store_id: &str) -> Result<Vec<u8>> {
        self.store.read_raw(store_id)
    }

    /// 将特征库打包为 zip
    pub fn download_store(&self, store_id: Option<&str>) -> Result<Vec<u8>> {
        self.store.export_zip(store_id.unwrap_or(DEFAULT_STORE_ID))
    }
}
