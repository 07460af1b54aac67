use std::path::PathBuf;

use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::pages;
use super::session::RecordedTrial;
use super::SharedState;
use crate::trial::context::unique_path;
use crate::trial::{ProjectSelector, TrialRequestError};

pub const SESSION_COOKIE: &str = "autocheck_session";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl From<TrialRequestError> for ApiError {
    fn from(e: TrialRequestError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(format!("Upload too large: {}", e))
        } else {
            ApiError::BadRequest(format!("Malformed upload: {}", e))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Html(pages::error(&self.to_string()))).into_response()
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn index() -> Html<String> {
    Html(pages::index())
}

/// Fields of the upload form
struct Upload {
    file_name: String,
    content: Vec<u8>,
    selector: ProjectSelector,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file = None;
    let mut project = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name().unwrap_or_default() {
            "cfgfile" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content = field.bytes().await?;
                file = Some((file_name, content.to_vec()));
            }
            "project" => project = Some(field.text().await?),
            _ => {}
        }
    }

    let (file_name, content) =
        file.ok_or_else(|| ApiError::BadRequest("No credentials file uploaded".into()))?;
    if file_name.is_empty() {
        return Err(ApiError::BadRequest("No file selected".into()));
    }
    if !file_name.to_ascii_lowercase().ends_with(".ini") {
        return Err(ApiError::BadRequest(format!(
            "Credentials file must be a .ini file, got '{}'",
            file_name
        )));
    }
    let selector = project
        .ok_or_else(|| ApiError::BadRequest("No project selected".into()))?
        .parse()?;

    Ok(Upload {
        file_name,
        content,
        selector,
    })
}

async fn save_upload(folder: &std::path::Path, content: &[u8]) -> Result<PathBuf, ApiError> {
    let internal = |e: std::io::Error| ApiError::Internal(format!("Could not save upload: {}", e));

    tokio::fs::create_dir_all(folder).await.map_err(internal)?;
    let path = unique_path(folder, "credentials");
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(internal)?;
    file.write_all(content).await.map_err(internal)?;
    file.flush().await.map_err(internal)?;
    Ok(path)
}

pub async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_upload(multipart).await?;
    let saved = save_upload(&state.upload_folder, &upload.content).await?;
    info!(
        "Saved {} as {} for {}",
        upload.file_name,
        saved.display(),
        upload.selector
    );

    let project = upload.selector.project.clone();
    let report = state.trials.run(&saved, upload.selector).await;

    let session = state.sessions.record(
        session_id(&headers).as_deref(),
        RecordedTrial {
            clone_path: report.context.clone_path.clone(),
            project,
        },
    );

    let cookie = format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, session);
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|e| ApiError::Internal(format!("Invalid session cookie: {}", e)))?;

    let mut response = Html(pages::trial_results(&report)).into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

pub async fn kill(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Html<String>, ApiError> {
    let trial = session_id(&headers)
        .and_then(|id| state.sessions.take(&id))
        .ok_or_else(|| {
            warn!("Shutdown requested without a recorded trial");
            ApiError::BadRequest("No trial has been run in this session, nothing to shut down".into())
        })?;

    let report = state.trials.shutdown(&trial.clone_path, &trial.project).await;
    Ok(Html(pages::shutdown_results(&report)))
}

/// Session id from the request's Cookie header
fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
