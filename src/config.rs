use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::image::Normalization;
use crate::store::DEFAULT_STORE_ID;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "", "imclassify").expect("failed to get project dir");
    ConfDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().expect("project dir is not valid UTF-8")
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// ONNX 模型路径，默认为配置目录下的 mobilenet_v2.onnx
    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,
    /// 模型输出的描述符维度
    #[arg(long, value_name = "D", default_value_t = 1280)]
    pub dim: usize,
    /// 模型输入边长
    #[arg(long, value_name = "SIZE", default_value_t = 224)]
    pub input_size: usize,
    /// 像素归一化方式，需和模型训练时一致
    #[arg(long, value_enum, default_value_t = Normalization::Mobilenet)]
    pub normalization: Normalization,
    /// 每次送入网络的图片数量
    #[arg(short, long, value_name = "N", default_value_t = 32)]
    pub batch_size: usize,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            model: None,
            dim: 1280,
            input_size: 224,
            normalization: Normalization::Mobilenet,
            batch_size: 32,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// 特征库名称
    #[arg(short, long = "store", value_name = "ID", default_value = DEFAULT_STORE_ID)]
    pub store_id: String,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imclassify", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imclassify 数据目录，存放模型和特征库
    #[arg(short, long, global = true, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 使用一组图片训练特征库，文件名（去掉扩展名）作为标签
    Train(TrainCommand),
    /// 识别一张图片
    Infer(InferCommand),
    /// 删除特征库
    Delete(DeleteCommand),
    /// 列出所有特征库
    List(ListCommand),
    /// 将特征库打包为 zip
    Export(ExportCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回特征库目录
    pub fn stores(&self) -> PathBuf {
        self.path.join("stores")
    }

    /// 返回默认模型文件的路径
    pub fn model(&self) -> PathBuf {
        self.path.join("mobilenet_v2.onnx")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_train_with_defaults() {
        let opts = Opts::try_parse_from(["imclassify", "-c", "/tmp/x", "train", "images"]).unwrap();
        assert_eq!(opts.conf_dir.stores(), Path::new("/tmp/x/stores"));
        match opts.subcmd {
            SubCommand::Train(cmd) => {
                assert_eq!(cmd.store.store_id, DEFAULT_STORE_ID);
                assert_eq!(cmd.extractor.dim, 1280);
                assert_eq!(cmd.extractor.batch_size, 32);
                assert_eq!(cmd.path, Path::new("images"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_infer_options() {
        let opts = Opts::try_parse_from([
            "imclassify",
            "infer",
            "q.jpg",
            "--store",
            "faces.pkl",
            "--normalization",
            "imagenet",
        ])
        .unwrap();
        match opts.subcmd {
            SubCommand::Infer(cmd) => {
                assert_eq!(cmd.store.store_id, "faces.pkl");
                assert_eq!(cmd.extractor.normalization, Normalization::Imagenet);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
