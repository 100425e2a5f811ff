use std::path::Path;

use anyhow::Result;
use indicatif::ProgressStyle;
use regex::Regex;

/// 去掉文件名的最后一个扩展名作为标签
///
/// `cat.jpg` → `cat`，`a.b.png` → `a.b`，`noext` → `noext`
pub fn label_from_filename(name: &str) -> &str {
    // 只取文件名部分，忽略目录
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// 构建匹配文件后缀的正则，多个后缀用逗号分隔，不区分大小写
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let re = format!("(?i)^({})$", suffix.replace(',', "|"));
    Ok(Regex::new(&re)?)
}

pub fn has_suffix(path: &Path, re: &Regex) -> bool {
    path.extension().is_some_and(|ext| re.is_match(&ext.to_string_lossy()))
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}
