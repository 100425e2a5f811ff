//! 特征库的持久化
//!
//! 每个特征库对应数据目录下的一个文件。写入时先写临时文件再原子重命名，
//! 读取方不加锁，总是能看到完整的旧版本或新版本；同一特征库的写入方互斥。

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use bincode::Options;
use chrono::{DateTime, Local};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::descriptor::DescriptorMap;
use crate::error::{ClassifyError, Result};

/// 调用方未指定特征库时使用的名称
pub const DEFAULT_STORE_ID: &str = "saved_features.pkl";

const MAGIC: [u8; 4] = *b"IMCL";
const FORMAT_VERSION: u32 = 1;
const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
}

/// 特征库内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreContents {
    /// 生成该特征库的特征提取器标识
    pub extractor: String,
    /// 描述符维度
    pub dim: usize,
    pub entries: DescriptorMap,
}

/// 特征库文件信息
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoreInfo {
    /// 特征库标识，可直接用于下载等接口
    pub id: String,
    pub name: String,
    /// RFC 3339 格式的创建时间
    pub created_at: String,
    /// 文件大小，单位为字节
    pub size: u64,
    /// 便于阅读的文件大小，如 `1.25 MB`
    pub size_human: String,
}

#[derive(Clone)]
pub struct DescriptorStore {
    base_dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DescriptorStore {
    /// 打开特征库目录，不存在时自动创建
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, locks: Arc::default() })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 保存特征库，完整覆盖已有内容
    pub fn save(&self, id: &str, contents: &StoreContents) -> Result<()> {
        let path = self.path(id)?;
        if let Some((label, d)) = contents.entries.iter().find(|(_, d)| d.dim() != contents.dim) {
            return Err(ClassifyError::Shape(format!(
                "标签 {label} 的描述符维度为 {}，期望 {}",
                d.dim(),
                contents.dim
            )));
        }

        self.with_writer_lock(id, || {
            let mut tmp = tempfile::Builder::new().prefix(TMP_PREFIX).tempfile_in(&self.base_dir)?;
            {
                let mut writer = BufWriter::new(tmp.as_file_mut());
                let header = Header { magic: MAGIC, version: FORMAT_VERSION };
                bincode::serialize_into(&mut writer, &(header, contents)).map_err(io::Error::other)?;
                writer.flush()?;
            }
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })?;

        info!("特征库已保存: {} ({} 个标签)", path.display(), contents.entries.len());
        Ok(())
    }

    /// 读取特征库
    pub fn load(&self, id: &str) -> Result<StoreContents> {
        let path = self.path(id)?;
        let bytes = fs::read(&path).map_err(|e| not_found_or(e, id))?;
        debug!("读取特征库 {}，{} 字节", path.display(), bytes.len());

        let corrupt = |reason: String| ClassifyError::StoreCorrupt { id: id.to_string(), reason };

        let (header, contents): (Header, StoreContents) = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(bytes.len() as u64)
            .deserialize(&bytes)
            .map_err(|e| corrupt(e.to_string()))?;

        if header.magic != MAGIC {
            return Err(corrupt("文件头不匹配".to_string()));
        }
        if header.version != FORMAT_VERSION {
            return Err(corrupt(format!("不支持的格式版本 {}", header.version)));
        }
        if let Some((label, _)) = contents.entries.iter().find(|(_, d)| d.dim() != contents.dim) {
            return Err(corrupt(format!("标签 {label} 的描述符维度与文件头不符")));
        }

        Ok(contents)
    }

    /// 删除特征库
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path(id)?;
        self.with_writer_lock(id, || fs::remove_file(&path).map_err(|e| not_found_or(e, id)))?;
        info!("特征库已删除: {}", path.display());
        Ok(())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.path(id).map(|path| path.is_file()).unwrap_or(false)
    }

    /// 列出目录下的所有特征库，按名称排序
    pub fn list(&self) -> Result<Vec<StoreInfo>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut infos = vec![];
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata()?;
            if !metadata.is_file() || name.starts_with(TMP_PREFIX) {
                continue;
            }
            let created = metadata.created().or_else(|_| metadata.modified())?;
            infos.push(StoreInfo {
                id: name.clone(),
                name,
                created_at: format_time(created),
                size: metadata.len(),
                size_human: format_size(metadata.len()),
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// 读取特征库文件的原始字节
    pub fn read_raw(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path(id)?;
        fs::read(&path).map_err(|e| not_found_or(e, id))
    }

    /// 将特征库文件打包为 zip，压缩包内的文件名与特征库名称相同
    pub fn export_zip(&self, id: &str) -> Result<Vec<u8>> {
        let data = self.read_raw(id)?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(id, options).map_err(io::Error::other)?;
        zip.write_all(&data)?;
        let cursor = zip.finish().map_err(io::Error::other)?;
        Ok(cursor.into_inner())
    }

    fn path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.base_dir.join(id))
    }

    /// 持有该特征库的写锁执行 f，结束后没有其他写入方时移除锁
    fn with_writer_lock<R>(&self, id: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.to_string()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 只剩表中和这里的两个引用
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }
}

/// 特征库名称只能是数据目录下的普通文件名
pub fn validate_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.starts_with(TMP_PREFIX);
    if invalid {
        return Err(ClassifyError::InvalidStoreId(id.to_string()));
    }
    Ok(())
}

fn not_found_or(err: io::Error, id: &str) -> ClassifyError {
    match err.kind() {
        ErrorKind::NotFound => ClassifyError::StoreNotFound(id.to_string()),
        _ => err.into(),
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339()
}

fn format_size(size: u64) -> String {
    format!("{:.2} MB", size as f64 / 1024. / 1024.)
}
