use anyhow::Result;
use clap::Parser;

use crate::cli::{OutputFormat, SubCommandExtend, open_store};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 输出格式
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let infos = open_store(opts)?.list()?;
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&infos)?),
            OutputFormat::Table => {
                for info in infos {
                    println!("{}\t{}\t{}", info.name, info.created_at, info.size_human);
                }
            }
        }
        Ok(())
    }
}
