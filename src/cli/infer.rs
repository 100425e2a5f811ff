use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend, open_classifier};
use crate::config::{ExtractorOptions, Opts, StoreOptions};
use crate::matcher::MatchResult;
use crate::pipeline::Budget;

#[derive(Parser, Debug, Clone)]
pub struct InferCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub store: StoreOptions,
    /// 需要识别的图片路径
    pub image: PathBuf,
    /// 输出所有标签的相似度，而不只是最相似的一个
    #[arg(short, long)]
    pub all: bool,
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for InferCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let classifier = open_classifier(opts, &self.extractor)?;
        let data = tokio::fs::read(&self.image).await?;
        let store_id = Some(self.store.store_id.as_str());
        let budget = Budget::unlimited();

        if self.all {
            let result = block_in_place(|| classifier.rank(&data, store_id, &budget))?;
            print_result(&result, self.output_format)
        } else {
            let result = block_in_place(|| classifier.infer(&data, store_id, &budget))?;
            match self.output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                }
                OutputFormat::Table => print_result(&[result], OutputFormat::Table),
            }
        }
    }
}

fn print_result(result: &[MatchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for m in result {
                println!("{:.4}\t{}", m.similarity, m.label);
            }
        }
    }
    Ok(())
}
