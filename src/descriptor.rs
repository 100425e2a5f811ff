use std::ops::Deref;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 单张图片的特征向量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

/// 标签 -> 描述符，保持插入顺序
///
/// 重复插入同一标签时覆盖旧值，但位置保持为第一次插入的位置
pub type DescriptorMap = IndexMap<String, Descriptor>;

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn norm(&self) -> f64 {
        self.0.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl Deref for Descriptor {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// 计算余弦相似度，任一向量模长为 0 或含有 NaN / 无穷值时返回 None
///
/// 使用 f64 累加，结果截断到 [-1, 1]。调用方需保证维度一致。
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if !is_usable_norm(norm_a) || !is_usable_norm(norm_b) {
        return None;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Some(similarity.clamp(-1.0, 1.0) as f32)
}

/// 模长可以作为除数：非零且有限
pub fn is_usable_norm(norm: f64) -> bool {
    norm != 0.0 && norm.is_finite()
}
