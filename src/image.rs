//! 图片解码与归一化
//!
//! 输出的张量布局为 NCHW，通道顺序为 RGB。

use clap::ValueEnum;
use ndarray::{Array4, ArrayView4, Axis, concatenate};
use opencv::core::{Mat, Size, Vector};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifyError, Result};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 像素值归一化方式，需要和预训练网络保持一致
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// `x / 127.5 - 1`，MobileNet 系列使用
    Mobilenet,
    /// `(x / 255 - mean) / std`，使用 ImageNet 均值和方差
    Imagenet,
}

impl Normalization {
    #[inline(always)]
    fn apply(self, channel: usize, value: u8) -> f32 {
        let value = value as f32;
        match self {
            Self::Mobilenet => value / 127.5 - 1.0,
            Self::Imagenet => (value / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
        }
    }
}

/// 网络输入约定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    /// 输入边长，图片会被缩放为 size x size
    pub size: usize,
    pub normalization: Normalization,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self { size: 224, normalization: Normalization::Mobilenet }
    }
}

/// 归一化后的图片张量，形状为 (batch, 3, size, size)
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    pub fn from_array(array: Array4<f32>) -> Self {
        Self(array)
    }

    pub fn batch_size(&self) -> usize {
        self.0.len_of(Axis(0))
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    /// 检查张量是否符合网络输入约定
    pub fn check(&self, spec: &InputSpec) -> Result<()> {
        match self.shape() {
            &[n, 3, h, w] if n > 0 && h == spec.size && w == spec.size => Ok(()),
            shape => Err(ClassifyError::Shape(format!(
                "期望 (n, 3, {0}, {0})，实际为 {shape:?}",
                spec.size
            ))),
        }
    }

    /// 按行优先顺序返回底层数据
    pub fn as_slice(&self) -> Option<&[f32]> {
        self.0.as_slice()
    }
}

/// 解码图片并转换为网络输入
pub fn decode_and_normalize(bytes: &[u8], spec: &InputSpec) -> Result<NormalizedTensor> {
    let image = imdecode_rgb(bytes)?;
    let image = resize(&image, spec.size)?;
    to_tensor(&image, spec)
}

/// 将多个单图张量拼接为一个批次
pub fn stack(tensors: &[NormalizedTensor]) -> Result<NormalizedTensor> {
    if tensors.is_empty() {
        return Err(ClassifyError::Shape("无法拼接空批次".to_string()));
    }
    let views = tensors.iter().map(|t| t.view()).collect::<Vec<_>>();
    let array = concatenate(Axis(0), &views).map_err(|e| ClassifyError::Shape(e.to_string()))?;
    Ok(NormalizedTensor(array))
}

fn decode_error(err: opencv::Error) -> ClassifyError {
    ClassifyError::Decode(err.message)
}

/// 解码为 3 通道 RGB 图片
fn imdecode_rgb(bytes: &[u8]) -> Result<Mat> {
    if bytes.is_empty() {
        return Err(ClassifyError::Decode("空文件".to_string()));
    }
    let buf = Vector::<u8>::from_slice(bytes);
    let bgr = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR).map_err(decode_error)?;
    if bgr.empty() {
        return Err(ClassifyError::Decode("不支持的图片格式".to_string()));
    }
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB).map_err(decode_error)?;
    Ok(rgb)
}

fn resize(image: &Mat, size: usize) -> Result<Mat> {
    let mut output = Mat::default();
    let size = size as i32;
    imgproc::resize(
        image,
        &mut output,
        Size::new(size, size),
        0.,
        0.,
        imgproc::INTER_LINEAR,
    )
    .map_err(decode_error)?;
    Ok(output)
}

fn to_tensor(image: &Mat, spec: &InputSpec) -> Result<NormalizedTensor> {
    let size = spec.size;
    let mut tensor = Array4::zeros((1, 3, size, size));
    // resize 的输出总是连续的 HWC u8 数据
    let data = image.data_bytes().map_err(decode_error)?;
    if data.len() != size * size * 3 {
        return Err(ClassifyError::Decode(format!("像素数据长度异常: {}", data.len())));
    }
    for (i, px) in data.chunks_exact(3).enumerate() {
        let (y, x) = (i / size, i % size);
        for c in 0..3 {
            tensor[[0, c, y, x]] = spec.normalization.apply(c, px[c]);
        }
    }
    Ok(NormalizedTensor(tensor))
}
