// 该文件是 Quchi （龋齿检测） 项目的一部分。
// tests/server.rs - HTTP 接口测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

#![cfg(feature = "server")]

mod common;

use std::sync::Arc;

use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use common::*;
use quchi::{
  output::DirectoryRecordOutput,
  server::{AppState, router},
};
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "quchi-test-boundary";

fn app(model: Option<StubModel>, recorder: Option<DirectoryRecordOutput>) -> Router {
  router(Arc::new(AppState::new(pipeline(model), recorder, 0.25)))
}

enum Part<'a> {
  File(&'a str, &'a str, &'a [u8]),
  Text(&'a str, &'a str),
}

fn multipart(parts: &[Part<'_>]) -> Request<Body> {
  let mut body = Vec::new();
  for part in parts {
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    match part {
      Part::File(name, filename, bytes) => {
        body.extend_from_slice(
          format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
            name, filename
          )
          .as_bytes(),
        );
        body.extend_from_slice(bytes);
      }
      Part::Text(name, value) => {
        body.extend_from_slice(
          format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
            name, value
          )
          .as_bytes(),
        );
      }
    }
    body.extend_from_slice(b"\r\n");
  }
  body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

  Request::builder()
    .method("POST")
    .uri("/api/predict")
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={}", BOUNDARY),
    )
    .body(Body::from(body))
    .unwrap()
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json(response: axum::response::Response) -> Value {
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn predict_without_image_is_bad_request() {
  let response = app(Some(single_cavity()), None)
    .oneshot(multipart(&[Part::Text("confidence", "0.5")]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(json(response).await["error"], "No image provided");
}

#[tokio::test]
async fn predict_with_empty_filename_is_bad_request() {
  let png = blank_png(10, 10);
  let response = app(Some(single_cavity()), None)
    .oneshot(multipart(&[Part::File("image", "", &png)]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(json(response).await["error"], "No image selected");
}

#[tokio::test]
async fn predict_with_garbage_image_is_bad_request() {
  let response = app(Some(single_cavity()), None)
    .oneshot(multipart(&[Part::File("image", "x.png", b"garbage")]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(json(response).await["kind"], "DecodeError");
}

#[tokio::test]
async fn predict_with_unparsable_confidence_is_bad_request() {
  let png = blank_png(10, 10);
  let response = app(Some(single_cavity()), None)
    .oneshot(multipart(&[
      Part::File("image", "x.png", &png),
      Part::Text("confidence", "high"),
    ]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn predict_without_model_is_unavailable_but_classes_work() {
  let app = app(None, None);
  let png = blank_png(10, 10);

  let response = app
    .clone()
    .oneshot(multipart(&[Part::File("image", "x.png", &png)]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(json(response).await["kind"], "ModelUnavailable");

  let response = app.oneshot(get("/api/classes")).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = json(response).await;
  assert_eq!(body["classes"], serde_json::json!(["cavity", "normal"]));
  assert_eq!(body["num_classes"], 2);
}

#[tokio::test]
async fn predict_returns_detections_and_annotated_image() {
  let png = blank_png(100, 100);
  let response = app(Some(single_cavity()), None)
    .oneshot(multipart(&[
      Part::File("image", "tooth.png", &png),
      Part::Text("confidence", "0.5"),
    ]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let body = json(response).await;
  assert_eq!(body["num_detections"], 1);
  assert_eq!(body["confidence_threshold"].as_f64(), Some(0.5));
  assert!(body["inference_time_ms"].as_f64().unwrap() >= 0.0);
  assert!(body.get("saved_image_path").is_none());

  let det = &body["detections"][0];
  assert_eq!(det["object_id"], 1);
  assert_eq!(det["class_name"], "cavity");
  assert_eq!(det["bbox"], serde_json::json!([10, 10, 50, 50]));
  assert_eq!(det["probabilities"].as_array().unwrap().len(), 2);

  let jpeg = STANDARD
    .decode(body["annotated_image"].as_str().unwrap())
    .unwrap();
  let decoded = image::load_from_memory(&jpeg).unwrap();
  assert_eq!((decoded.width(), decoded.height()), (100, 100));
}

#[tokio::test]
async fn out_of_range_confidence_is_clamped() {
  let png = blank_png(100, 100);
  let response = app(Some(single_cavity()), None)
    .oneshot(multipart(&[
      Part::File("image", "tooth.png", &png),
      Part::Text("confidence", "7"),
    ]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let body = json(response).await;
  assert_eq!(body["confidence_threshold"].as_f64(), Some(1.0));
  assert_eq!(body["num_detections"], 0);
}

#[tokio::test]
async fn recorded_image_can_be_downloaded() {
  let dir = tempfile::tempdir().unwrap();
  let app = app(
    Some(single_cavity()),
    Some(DirectoryRecordOutput::new(dir.path())),
  );
  let png = blank_png(100, 100);

  let response = app
    .clone()
    .oneshot(multipart(&[Part::File("image", "tooth.png", &png)]))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = json(response).await;
  let image_path = body["saved_image_path"].as_str().unwrap().to_string();
  let annotation_path = body["saved_annotation_path"].as_str().unwrap().to_string();

  let response = app
    .clone()
    .oneshot(get(&format!("/download/image/{}", image_path)))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

  let response = app
    .clone()
    .oneshot(get(&format!("/download/image/{}", annotation_path)))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  assert_eq!(
    &text[..],
    b"0 0.300000 0.300000 0.400000 0.400000 0.870000\n"
  );

  let response = app
    .oneshot(get("/download/image/2000/01/01/missing.jpg"))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_without_recorder_is_not_found() {
  let response = app(Some(single_cavity()), None)
    .oneshot(get("/download/image/a.jpg"))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_model_state() {
  let body = json(app(None, None).oneshot(get("/health")).await.unwrap()).await;
  assert_eq!(body["status"], "ok");
  assert_eq!(body["model_loaded"], false);
}
