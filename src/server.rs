// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::{fmt::Display, sync::Arc};

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, Path, State},
  http::{StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
  detection::Detection,
  model::Model,
  output::{DirectoryRecordOutput, RecordedPaths},
  pipeline::{Pipeline, PipelineError},
};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub struct AppState<M> {
  pub pipeline: Pipeline<M>,
  pub recorder: Option<DirectoryRecordOutput>,
  pub default_confidence: f32,
}

impl<M> AppState<M> {
  pub fn new(
    pipeline: Pipeline<M>,
    recorder: Option<DirectoryRecordOutput>,
    default_confidence: f32,
  ) -> Self {
    Self {
      pipeline,
      recorder,
      default_confidence,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
  pub detections: Vec<Detection>,
  pub inference_time_ms: f64,
  pub num_detections: usize,
  pub confidence_threshold: f32,
  /// Base64 编码的 JPEG 标注图像
  pub annotated_image: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub saved_image_path: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub saved_annotation_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassesResponse {
  pub classes: Vec<String>,
  pub num_classes: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
  error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  kind: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
  status: StatusCode,
  body: ErrorBody,
}

impl ApiError {
  fn new(status: StatusCode, message: impl Into<String>) -> Self {
    Self {
      status,
      body: ErrorBody {
        error: message.into(),
        kind: None,
      },
    }
  }

  fn bad_request(message: impl Into<String>) -> Self {
    Self::new(StatusCode::BAD_REQUEST, message)
  }

  fn not_found(message: impl Into<String>) -> Self {
    Self::new(StatusCode::NOT_FOUND, message)
  }
}

impl From<PipelineError> for ApiError {
  fn from(err: PipelineError) -> Self {
    let status = match err {
      PipelineError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
      PipelineError::DecodeError(_) | PipelineError::InvalidThreshold(_) => StatusCode::BAD_REQUEST,
      PipelineError::RenderFailure(_) | PipelineError::Inference(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };
    Self {
      status,
      body: ErrorBody {
        error: err.to_string(),
        kind: Some(err.kind()),
      },
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    if self.status.is_server_error() {
      error!("请求失败: {}", self.body.error);
    } else {
      warn!("请求被拒绝: {}", self.body.error);
    }
    (self.status, Json(self.body)).into_response()
  }
}

/// 表单中的置信度，限制在 [0, 1]
fn form_confidence(text: &str) -> Result<f32, ApiError> {
  let value: f32 = text
    .trim()
    .parse()
    .map_err(|_| ApiError::bad_request(format!("Invalid confidence: {}", text)))?;
  if value.is_nan() {
    return Err(PipelineError::InvalidThreshold(value).into());
  }
  Ok(value.clamp(0.0, 1.0))
}

impl<M> AppState<M>
where
  M: Model,
  M::Error: Display,
{
  fn predict_blocking(
    &self,
    filename: &str,
    bytes: &[u8],
    confidence: f32,
  ) -> Result<PredictResponse, ApiError> {
    let output = self.pipeline.run(bytes, confidence)?;
    let annotated_image = STANDARD.encode(output.encode_annotated()?);

    let saved: Option<RecordedPaths> =
      self
        .recorder
        .as_ref()
        .and_then(|recorder| match recorder.record(filename, &output) {
          Ok(paths) => Some(paths),
          Err(e) => {
            warn!("保存记录失败: {}", e);
            None
          }
        });

    let result = output.result;
    Ok(PredictResponse {
      num_detections: result.num_detections(),
      inference_time_ms: (result.inference_time_ms * 100.0).round() / 100.0,
      confidence_threshold: result.confidence_threshold,
      detections: result.detections,
      annotated_image,
      saved_image_path: saved.as_ref().map(|p| p.image.clone()),
      saved_annotation_path: saved.map(|p| p.annotation),
    })
  }
}

async fn predict<M>(
  State(state): State<Arc<AppState<M>>>,
  mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError>
where
  M: Model + Send + Sync + 'static,
  M::Error: Display,
{
  info!("收到推理请求");
  let mut upload = None;
  let mut confidence = state.default_confidence;

  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|e| ApiError::bad_request(e.to_string()))?
  {
    let name = field.name().map(str::to_owned);
    match name.as_deref() {
      Some("image") => {
        let filename = field.file_name().unwrap_or_default().to_owned();
        let bytes = field
          .bytes()
          .await
          .map_err(|e| ApiError::bad_request(e.to_string()))?;
        upload = Some((filename, bytes));
      }
      Some("confidence") => {
        let text = field
          .text()
          .await
          .map_err(|e| ApiError::bad_request(e.to_string()))?;
        confidence = form_confidence(&text)?;
      }
      _ => {}
    }
  }

  let (filename, bytes) = upload.ok_or_else(|| ApiError::bad_request("No image provided"))?;
  if filename.is_empty() {
    return Err(ApiError::bad_request("No image selected"));
  }
  info!("处理图像: {}, 置信度阈值: {}", filename, confidence);

  let worker = Arc::clone(&state);
  let response =
    tokio::task::spawn_blocking(move || worker.predict_blocking(&filename, &bytes, confidence))
      .await
      .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

  info!("推理完成: {} 个检测结果", response.num_detections);
  Ok(Json(response))
}

async fn classes<M>(State(state): State<Arc<AppState<M>>>) -> Json<ClassesResponse>
where
  M: Send + Sync + 'static,
{
  let (classes, num_classes) = state.pipeline.list_classes();
  Json(ClassesResponse {
    classes,
    num_classes,
  })
}

async fn download<M>(
  State(state): State<Arc<AppState<M>>>,
  Path(path): Path<String>,
) -> Result<Response, ApiError>
where
  M: Send + Sync + 'static,
{
  let recorder = state
    .recorder
    .as_ref()
    .ok_or_else(|| ApiError::not_found("Recording is disabled"))?;
  let file = recorder
    .resolve(&path)
    .ok_or_else(|| ApiError::bad_request("Invalid path"))?;
  let bytes = tokio::fs::read(&file)
    .await
    .map_err(|_| ApiError::not_found("File not found"))?;

  let content_type = match file.extension().and_then(|ext| ext.to_str()) {
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("png") => "image/png",
    Some("txt") => "text/plain; charset=utf-8",
    _ => "application/octet-stream",
  };
  Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn health<M>(State(state): State<Arc<AppState<M>>>) -> Json<serde_json::Value>
where
  M: Send + Sync + 'static,
{
  Json(serde_json::json!({
    "status": "ok",
    "model_loaded": state.pipeline.is_model_available(),
  }))
}

pub fn router<M>(state: Arc<AppState<M>>) -> Router
where
  M: Model + Send + Sync + 'static,
  M::Error: Display,
{
  Router::new()
    .route("/api/predict", post(predict::<M>))
    .route("/api/classes", get(classes::<M>))
    .route("/download/image/*path", get(download::<M>))
    .route("/health", get(health::<M>))
    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

pub async fn serve<M>(listener: TcpListener, state: Arc<AppState<M>>) -> std::io::Result<()>
where
  M: Model + Send + Sync + 'static,
  M::Error: Display,
{
  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("无法监听中断信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到中断信号，准备退出...");
}
