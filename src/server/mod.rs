mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    servers((url = "/api/v1")),
    paths(
        api::train_handler,
        api::test_handler,
        api::clear_model_handler,
        api::models_handler,
        api::download_model_handler,
        api::download_raw_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::TrainForm,
        types::TestForm,
        types::TrainResponse,
        types::TestResponse,
        types::MessageResponse,
        types::ErrorResponse,
        crate::store::StoreInfo,
        crate::pipeline::TrainSummary,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/train", post(api::train_handler))
        .route("/test", post(api::test_handler))
        .route("/clear-model", delete(api::clear_model_handler))
        .route("/models", get(api::models_handler))
        .route("/download-model", get(api::download_model_handler))
        .route("/models/{model_id}/download", get(api::download_raw_handler))
        .route("/metrics", get(api::metrics_handler));

    Router::new()
        .nest("/api/v1", api)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：50M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 50))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    use super::*;
    use crate::extractor::tests::QuadrantExtractor;
    use crate::image::tests::solid_image;
    use crate::pipeline::Classifier;
    use crate::store::DescriptorStore;

    const RED: [f64; 3] = [255., 0., 0.];
    const BLUE: [f64; 3] = [0., 0., 255.];

    fn classifier(dir: &TempDir) -> Classifier {
        let store = DescriptorStore::open(dir.path()).unwrap();
        Classifier::new(Arc::new(QuadrantExtractor::default()), store, 2)
    }

    async fn serve(classifier: Classifier, timeout: Duration) -> String {
        let app = create_app(Arc::new(AppState::new(classifier, timeout)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/api/v1")
    }

    fn image_part(name: &str, rgb: [f64; 3]) -> Part {
        Part::bytes(solid_image(".png", rgb, 40, 30)).file_name(name.to_string())
    }

    fn train_form() -> Form {
        Form::new().part("files", image_part("cat.png", RED)).part("files", image_part("dog.png", BLUE))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn train_test_list_download_delete() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(classifier(&dir), Duration::from_secs(30)).await;
        let client = reqwest::Client::new();

        let resp = client.post(format!("{base}/train")).multipart(train_form()).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["store_id"], "saved_features.pkl");
        assert_eq!(body["metadata"]["num_samples"], 2);
        assert_eq!(body["metadata"]["labels"], serde_json::json!(["cat", "dog"]));

        let form = Form::new().part("file", image_part("query.png", RED));
        let resp = client.post(format!("{base}/test")).multipart(form).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["predicted_class"], "cat");
        assert_eq!(body["similarity"], 1.0);

        let body: Value = client.get(format!("{base}/models")).send().await.unwrap().json().await.unwrap();
        assert_eq!(body[0]["id"], "saved_features.pkl");
        assert_eq!(body[0]["name"], "saved_features.pkl");

        let resp = client.get(format!("{base}/download-model")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "application/zip");
        assert!(resp.bytes().await.unwrap().starts_with(b"PK"));

        let resp = client.delete(format!("{base}/clear-model")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = client.delete(format!("{base}/clear-model")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "StoreNotFound");

        let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
        assert!(resp.text().await.unwrap().contains("imclassify_train_count"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn store_query_accepts_legacy_name() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(classifier(&dir), Duration::from_secs(30)).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/train?model_path=pets.pkl"))
            .multipart(train_form())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(dir.path().join("pets.pkl").exists());

        let resp = client.get(format!("{base}/download-model?store_id=pets.pkl")).send().await.unwrap();
        assert_eq!(resp.headers()["content-disposition"], "attachment; filename=\"pets.zip\"");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_store_file_by_listed_id() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(classifier(&dir), Duration::from_secs(30)).await;
        let client = reqwest::Client::new();

        let resp = client.post(format!("{base}/train?store_id=pets.pkl")).multipart(train_form()).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = client.get(format!("{base}/models")).send().await.unwrap().json().await.unwrap();
        let id = body[0]["id"].as_str().unwrap().to_string();
        assert_eq!(id, "pets.pkl");

        let resp = client.get(format!("{base}/models/{id}/download")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "application/octet-stream");
        assert_eq!(resp.headers()["content-disposition"], "attachment; filename=\"pets.pkl\"");
        let bytes = resp.bytes().await.unwrap();
        assert_eq!(bytes.as_ref(), std::fs::read(dir.path().join("pets.pkl")).unwrap());

        let resp = client.get(format!("{base}/models/missing.pkl/download")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = client.get(format!("{base}/models/..%2Fescape/download")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn request_errors_map_to_status() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(classifier(&dir), Duration::from_secs(30)).await;
        let client = reqwest::Client::new();

        let form = Form::new().part("file", image_part("q.png", RED));
        let resp = client.post(format!("{base}/test")).multipart(form).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let form = Form::new().part("files", Part::bytes(b"garbage".to_vec()).file_name("bad.jpg"));
        let resp = client.post(format!("{base}/train")).multipart(form).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "DecodeError");

        let resp = client
            .delete(format!("{base}/clear-model?store_id=../escape"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_keeps_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = classifier(&dir);
        let before = classifier
            .train(&[(solid_image(".png", RED, 8, 8), "old".to_string())], None, &Default::default())
            .unwrap();

        let base = serve(classifier.clone(), Duration::ZERO).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/train"))
            .multipart(train_form())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);

        let contents = classifier.store().load("saved_features.pkl").unwrap();
        let labels: Vec<_> = contents.entries.keys().cloned().collect();
        assert_eq!(labels, before.labels);
    }
}
