use std::sync::LazyLock;
use std::time::Duration;

use prometheus::*;

use crate::error::ClassifyError;
use crate::matcher::MatchResult;
use crate::pipeline::TrainSummary;

static METRIC_TRAIN_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imclassify_train_count", "count of the training requests", &["result"])
        .unwrap()
});

static METRIC_TRAIN_IMAGES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("imclassify_train_labels", "count of the labels written to stores").unwrap()
});

static METRIC_TRAIN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imclassify_train_duration",
        "duration of the per-batch training in seconds",
        exponential_buckets(0.05, 2.0, 12).unwrap()
    )
    .unwrap()
});

static METRIC_INFER_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imclassify_infer_count", "count of the images to classify", &["result"])
        .unwrap()
});

static METRIC_INFER_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("imclassify_infer_duration", "duration of the per-image inference in seconds")
        .unwrap()
});

static METRIC_INFER_SIMILARITY: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imclassify_infer_similarity",
        "similarity of the best match",
        (-10..=10).map(|x| x as f64 / 10.0).collect()
    )
    .unwrap()
});

/// 成功为 ok，失败时为根错误的类型
fn result_label<T>(result: &Result<T, ClassifyError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.root().kind(),
    }
}

pub fn observe_train(result: &Result<TrainSummary, ClassifyError>, duration: Duration) {
    METRIC_TRAIN_COUNT.with_label_values(&[result_label(result)]).inc();
    METRIC_TRAIN_DURATION.observe(duration.as_secs_f64());
    if let Ok(summary) = result {
        METRIC_TRAIN_IMAGES.inc_by(summary.num_samples as u64);
    }
}

pub fn observe_infer(result: &Result<MatchResult, ClassifyError>, duration: Duration) {
    METRIC_INFER_COUNT.with_label_values(&[result_label(result)]).inc();
    METRIC_INFER_DURATION.observe(duration.as_secs_f64());
    if let Ok(m) = result {
        METRIC_INFER_SIMILARITY.observe(m.similarity as f64);
    }
}

/// 以 Prometheus 文本格式导出所有指标
pub fn gather_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&prometheus::gather())?)
}
