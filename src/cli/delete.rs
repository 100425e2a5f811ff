use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{SubCommandExtend, open_store};
use crate::config::{Opts, StoreOptions};

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    #[command(flatten)]
    pub store: StoreOptions,
}

impl SubCommandExtend for DeleteCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = open_store(opts)?;
        store.delete(&self.store.store_id)?;
        info!("已删除特征库: {}", self.store.store_id);
        println!("{}", self.store.store_id);
        Ok(())
    }
}
