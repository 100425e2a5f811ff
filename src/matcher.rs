use serde::Serialize;
use utoipa::ToSchema;

use crate::descriptor::{Descriptor, DescriptorMap, cosine_similarity, is_usable_norm};
use crate::error::{ClassifyError, Result};

/// 一次识别的结果
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MatchResult {
    pub label: String,
    /// 余弦相似度，范围 [-1, 1]
    pub similarity: f32,
}

/// 线性扫描所有描述符，返回相似度最高的标签
///
/// 相似度相同时返回特征库中靠前的标签
pub fn best_match(query: &Descriptor, map: &DescriptorMap) -> Result<MatchResult> {
    let mut best: Option<(&str, f32)> = None;
    for (label, similarity) in scan(query, map)? {
        let similarity = similarity?;
        if best.is_none_or(|(_, s)| similarity > s) {
            best = Some((label, similarity));
        }
    }
    let (label, similarity) = best.ok_or(ClassifyError::EmptyStore)?;
    Ok(MatchResult { label: label.to_string(), similarity })
}

/// 返回所有标签的相似度，从高到低排序
pub fn rank(query: &Descriptor, map: &DescriptorMap) -> Result<Vec<MatchResult>> {
    let mut results = Vec::with_capacity(map.len());
    for (label, similarity) in scan(query, map)? {
        results.push(MatchResult { label: label.to_string(), similarity: similarity? });
    }
    // sort_by 是稳定排序，相同分数保持原有顺序
    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(results)
}

fn scan<'a>(
    query: &'a Descriptor,
    map: &'a DescriptorMap,
) -> Result<impl Iterator<Item = (&'a str, Result<f32>)> + 'a> {
    if map.is_empty() {
        return Err(ClassifyError::EmptyStore);
    }
    if !is_usable_norm(query.norm()) {
        return Err(ClassifyError::DegenerateVector(None));
    }
    Ok(map.iter().map(move |(label, stored)| {
        if stored.dim() != query.dim() {
            return (
                label.as_str(),
                Err(ClassifyError::Shape(format!(
                    "标签 {label} 的描述符维度为 {}，查询描述符为 {}",
                    stored.dim(),
                    query.dim()
                ))),
            );
        }
        let similarity = cosine_similarity(query, stored)
            .ok_or_else(|| ClassifyError::DegenerateVector(Some(label.clone())));
        (label.as_str(), similarity)
    }))
}
