use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_store};
use crate::config::{Opts, StoreOptions};

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    /// 输出文件，默认为 <特征库名>.zip
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl ExportCommand {
    fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let stem = Path::new(&self.store.store_id)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.store.store_id.clone());
            PathBuf::from(format!("{stem}.zip"))
        })
    }
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = open_store(opts)?;
        let data = block_in_place(|| store.export_zip(&self.store.store_id))?;
        let output = self.output_path();
        tokio::fs::write(&output, data).await?;
        info!("导出成功: {}", output.display());
        println!("{}", output.display());
        Ok(())
    }
}
