use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::info;
use regex::Regex;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::task::block_in_place;
use tokio_tar::Archive;
use walkdir::WalkDir;

use crate::cli::{SubCommandExtend, open_classifier};
use crate::config::{ExtractorOptions, Opts, StoreOptions};
use crate::pipeline::Budget;
use crate::utils::{has_suffix, label_from_filename, pb_style, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub store: StoreOptions,
    /// 图片所在目录，也支持 tar 归档文件
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "jpg,png")]
    pub suffix: String,
}

impl SubCommandExtend for TrainCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = suffix_regex(&self.suffix)?;
        let classifier = open_classifier(opts, &self.extractor)?;

        let batch = if self.path.is_file() {
            read_tar_file(&self.path, &re_suf).await?
        } else {
            read_directory(&self.path, &re_suf).await?
        };
        info!("共读取 {} 张图片", batch.len());

        let pb = ProgressBar::new_spinner().with_message("正在提取特征");
        pb.enable_steady_tick(Duration::from_millis(100));
        let summary = block_in_place(|| {
            classifier.train(&batch, Some(self.store.store_id.as_str()), &Budget::unlimited())
        })?;
        pb.finish_and_clear();

        println!("训练完成：{} 个标签已写入 {}", summary.num_samples, summary.store_id);
        for label in &summary.labels {
            println!("{label}");
        }
        Ok(())
    }
}

async fn read_directory(path: &Path, re_suf: &Regex) -> Result<Vec<(Vec<u8>, String)>> {
    info!("开始扫描目录: {}", path.display());
    let entries = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && has_suffix(entry.path(), re_suf))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    info!("扫描完成，共 {} 张图片", entries.len());

    let pb = ProgressBar::new(entries.len() as u64).with_style(pb_style());
    let mut batch = Vec::with_capacity(entries.len());
    for entry in entries {
        let data = tokio::fs::read(&entry).await?;
        let label = label_from_filename(&entry.to_string_lossy()).to_string();
        pb.set_message(label.clone());
        pb.inc(1);
        batch.push((data, label));
    }
    pb.finish_with_message("读取完成");
    Ok(batch)
}

async fn read_tar_file(path: &Path, re_suf: &Regex) -> Result<Vec<(Vec<u8>, String)>> {
    info!("开始读取归档: {}", path.display());
    let file = File::open(path).await?;
    let mut archive = Archive::new(file);
    let mut entries = archive.entries()?;

    let pb = ProgressBar::no_length().with_style(pb_style());
    let mut batch = vec![];
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        // entry.path() 不会截断超过 100 字节的路径
        let path = entry.path()?.into_owned();
        if !entry.header().entry_type().is_file() || !has_suffix(&path, re_suf) {
            continue;
        }

        let mut data = Vec::with_capacity(entry.header().size()? as usize);
        entry.read_to_end(&mut data).await?;

        let label = label_from_filename(&path.to_string_lossy()).to_string();
        pb.set_message(label.clone());
        pb.inc(1);
        batch.push((data, label));
    }
    pb.finish_with_message("读取完成");
    Ok(batch)
}
