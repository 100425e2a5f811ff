use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::Array4;
use opencv::core::{CV_32F, Mat, Scalar};
use opencv::dnn::{self, Net};
use opencv::prelude::*;

use crate::config::ExtractorOptions;
use crate::descriptor::Descriptor;
use crate::error::{ClassifyError, Result};
use crate::image::{InputSpec, NormalizedTensor};

thread_local! {
    // dnn::Net 不能跨线程共享，每个线程各自加载一份
    static NETS: RefCell<HashMap<PathBuf, Net>> = RefCell::new(HashMap::new());
}

/// 冻结的预训练特征提取网络
pub trait FeatureExtractor: Send + Sync {
    /// 特征提取器标识，会写入特征库用于兼容性检查
    fn id(&self) -> &str;

    /// 描述符维度
    fn dim(&self) -> usize;

    /// 网络的输入约定
    fn input(&self) -> &InputSpec;

    /// 对一个批次提取描述符，返回值与批次中的图片一一对应
    fn extract_batch(&self, tensor: &NormalizedTensor) -> Result<Vec<Descriptor>>;

    fn extract(&self, tensor: &NormalizedTensor) -> Result<Descriptor> {
        if tensor.batch_size() != 1 {
            return Err(ClassifyError::Shape(format!(
                "期望单张图片，实际批次大小为 {}",
                tensor.batch_size()
            )));
        }
        self.extract_batch(tensor)?
            .pop()
            .ok_or_else(|| ClassifyError::Shape("网络没有输出".to_string()))
    }
}

/// 将网络输出按行切分为描述符
pub fn split_output(data: &[f32], batch: usize, dim: usize) -> Result<Vec<Descriptor>> {
    if data.len() != batch * dim {
        return Err(ClassifyError::Shape(format!(
            "网络输出 {} 个值，期望 {batch} x {dim}",
            data.len()
        )));
    }
    Ok(data.chunks_exact(dim).map(|row| Descriptor::new(row.to_vec())).collect())
}

/// 通过 OpenCV DNN 运行的 ONNX 模型
///
/// 模型需要接受 NCHW 输入，并以全局池化输出 (batch, dim) 的特征
pub struct OnnxExtractor {
    model: PathBuf,
    id: String,
    dim: usize,
    input: InputSpec,
}

impl OnnxExtractor {
    /// 加载模型并试运行一次，确保配置正确
    pub fn open(opts: &ExtractorOptions, model: impl AsRef<Path>) -> Result<Self> {
        let model = model.as_ref().to_path_buf();
        let bytes = std::fs::read(&model).map_err(|e| {
            ClassifyError::Model(format!("无法读取模型 {}: {e}", model.display()))
        })?;
        let id = model_id(&model, &bytes);
        info!("加载特征提取模型: {} ({})", model.display(), id);

        let extractor = Self {
            model,
            id,
            dim: opts.dim,
            input: InputSpec { size: opts.input_size, normalization: opts.normalization },
        };

        let size = extractor.input.size;
        let blank = NormalizedTensor::from_array(Array4::zeros((1, 3, size, size)));
        extractor.extract(&blank)?;
        debug!("模型试运行成功，描述符维度 {}", extractor.dim);

        Ok(extractor)
    }

    fn with_net<R>(&self, f: impl FnOnce(&mut Net) -> Result<R>) -> Result<R> {
        NETS.with(|nets| {
            let mut nets = nets.borrow_mut();
            let net = match nets.entry(self.model.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    debug!("线程 {:?} 加载模型", std::thread::current().id());
                    entry.insert(dnn::read_net_from_onnx(&self.model.to_string_lossy())?)
                }
            };
            f(net)
        })
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn input(&self) -> &InputSpec {
        &self.input
    }

    fn extract_batch(&self, tensor: &NormalizedTensor) -> Result<Vec<Descriptor>> {
        tensor.check(&self.input)?;
        let data = tensor
            .as_slice()
            .ok_or_else(|| ClassifyError::Shape("张量内存不连续".to_string()))?;

        let sizes = tensor.shape().iter().map(|&n| n as i32).collect::<Vec<_>>();
        let mut blob = Mat::new_nd_with_default(&sizes, CV_32F, Scalar::all(0.))?;
        blob.data_typed_mut::<f32>()?.copy_from_slice(data);

        self.with_net(|net| {
            net.set_input_def(&blob)?;
            let output = net.forward_single_def()?;
            split_output(output.data_typed::<f32>()?, tensor.batch_size(), self.dim)
        })
    }
}

/// 模型标识：文件名 + 内容哈希前 16 位
fn model_id(path: &Path, bytes: &[u8]) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let hash = blake3::hash(bytes).to_hex();
    format!("{}@{}", stem, &hash[..16])
}

#[cfg(test)]
pub(crate) mod tests {
    use ndarray::s;

    use super::*;
    use crate::image::Normalization;

    /// 按通道计算四个象限的均值，得到 12 维描述符
    pub(crate) struct QuadrantExtractor {
        pub id: String,
        pub input: InputSpec,
    }

    impl Default for QuadrantExtractor {
        fn default() -> Self {
            Self { id: "quadrant@v1".to_string(), input: InputSpec { size: 32, ..Default::default() } }
        }
    }

    impl FeatureExtractor for QuadrantExtractor {
        fn id(&self) -> &str {
            &self.id
        }

        fn dim(&self) -> usize {
            12
        }

        fn input(&self) -> &InputSpec {
            &self.input
        }

        fn extract_batch(&self, tensor: &NormalizedTensor) -> Result<Vec<Descriptor>> {
            tensor.check(&self.input)?;
            let view = tensor.view();
            let half = self.input.size / 2;
            let mut out = vec![];
            for n in 0..tensor.batch_size() {
                let mut values = Vec::with_capacity(12);
                for c in 0..3 {
                    for (ys, xs) in [(0, 0), (0, half), (half, 0), (half, half)] {
                        let q = view.slice(s![n, c, ys..ys + half, xs..xs + half]);
                        values.push(q.mean().unwrap_or_default());
                    }
                }
                out.push(Descriptor::new(values));
            }
            Ok(out)
        }
    }

    #[test]
    fn split_output_by_rows() {
        let rows = split_output(&[1., 2., 3., 4., 5., 6.], 2, 3).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].to_vec(), vec![4., 5., 6.]);
    }

    #[test]
    fn split_output_rejects_wrong_size() {
        let err = split_output(&[1., 2., 3.], 2, 3).unwrap_err();
        assert!(matches!(err, ClassifyError::Shape(_)));
    }

    #[test]
    fn model_id_depends_on_content() {
        let a = model_id(Path::new("/tmp/mobilenet_v2.onnx"), b"weights-a");
        let b = model_id(Path::new("/tmp/mobilenet_v2.onnx"), b"weights-b");
        assert!(a.starts_with("mobilenet_v2@"));
        assert_ne!(a, b);
        assert_eq!(a, model_id(Path::new("/other/mobilenet_v2.onnx"), b"weights-a"));
    }

    #[test]
    fn missing_model_is_model_error() {
        let opts = ExtractorOptions::default();
        let err = OnnxExtractor::open(&opts, "/nonexistent/model.onnx").err().unwrap();
        assert!(matches!(err, ClassifyError::Model(_)));
    }

    /// 只有一个 GlobalAveragePool 节点，输出每个通道的均值
    const GAP_MODEL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/gap.onnx");

    fn gap_extractor() -> OnnxExtractor {
        let opts = ExtractorOptions { dim: 3, input_size: 8, ..Default::default() };
        OnnxExtractor::open(&opts, GAP_MODEL).unwrap()
    }

    fn channels(values: &[[f32; 3]]) -> NormalizedTensor {
        let mut array = Array4::zeros((values.len(), 3, 8, 8));
        for (n, rgb) in values.iter().enumerate() {
            for (c, v) in rgb.iter().enumerate() {
                array.slice_mut(s![n, c, .., ..]).fill(*v);
            }
        }
        NormalizedTensor::from_array(array)
    }

    #[test]
    fn onnx_batch_splits_into_channel_means() {
        let extractor = gap_extractor();
        assert!(extractor.id().starts_with("gap@"));

        let out = extractor.extract_batch(&channels(&[[0.25, -0.5, 1.0], [-1.0, 0.75, 0.]])).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to_vec(), vec![0.25, -0.5, 1.0]);
        assert_eq!(out[1].to_vec(), vec![-1.0, 0.75, 0.]);
    }

    #[test]
    fn onnx_extract_is_deterministic() {
        let extractor = gap_extractor();
        let tensor = channels(&[[0.5, 0.25, -0.25]]);
        let a = extractor.extract(&tensor).unwrap();
        let b = extractor.extract(&tensor).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.dim(), 3);

        // 换一个线程会重新加载网络
        let c = std::thread::scope(|scope| scope.spawn(|| extractor.extract(&tensor).unwrap()).join().unwrap());
        assert_eq!(a, c);
    }

    #[test]
    fn onnx_rejects_wrong_input_size() {
        let extractor = gap_extractor();
        let wrong = NormalizedTensor::from_array(Array4::zeros((1, 3, 4, 4)));
        assert!(matches!(extractor.extract(&wrong), Err(ClassifyError::Shape(_))));
        let batch = channels(&[[0.; 3], [1.; 3]]);
        assert!(matches!(extractor.extract(&batch), Err(ClassifyError::Shape(_))));
    }

    #[test]
    fn onnx_dim_mismatch_fails_on_open() {
        let opts = ExtractorOptions { dim: 1280, input_size: 8, ..Default::default() };
        let err = OnnxExtractor::open(&opts, GAP_MODEL).err().unwrap();
        assert!(matches!(err, ClassifyError::Shape(_)));
    }

    /// 需要真实模型，通过 IMCLASSIFY_TEST_MODEL 指定路径
    #[test]
    #[ignore]
    fn pretrained_model_is_deterministic() {
        let model = std::env::var_os("IMCLASSIFY_TEST_MODEL").expect("IMCLASSIFY_TEST_MODEL 未设置");
        let opts = ExtractorOptions { normalization: Normalization::Mobilenet, ..Default::default() };
        let extractor = OnnxExtractor::open(&opts, model).unwrap();

        let tensor = NormalizedTensor::from_array(Array4::from_elem((2, 3, 224, 224), 0.25));
        let a = extractor.extract_batch(&tensor).unwrap();
        let b = extractor.extract_batch(&tensor).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].dim(), opts.dim);

        let wrong = NormalizedTensor::from_array(Array4::zeros((1, 3, 100, 100)));
        assert!(matches!(extractor.extract(&wrong), Err(ClassifyError::Shape(_))));
    }
}
