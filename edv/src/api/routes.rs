use crate::vault::VaultCollection;
use crate::{Error, ErrorKind};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use edv_storage::{DataVaultConfiguration, EncryptedDocument, Query};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;

pub const VAULTS_PATH: &str = "/encrypted-data-vaults";

/// Error response: the domain error's message with a status chosen by kind.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unsupported => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }

        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Base URL for Location headers, taken from the request's Host header.
fn base_url(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| format!("http://{}", host))
        .unwrap_or_default()
}

fn vault_url(base: &str, vault_id: &str) -> String {
    format!("{}{}/{}", base, VAULTS_PATH, vault_id)
}

fn document_url(base: &str, vault_id: &str, doc_id: &str) -> String {
    format!("{}/documents/{}", vault_url(base, vault_id), doc_id)
}

pub async fn create_data_vault(
    State(collection): State<Arc<VaultCollection>>,
    headers: HeaderMap,
    payload: Result<Json<DataVaultConfiguration>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(config) = payload?;
    let vault_id = collection.create_data_vault(&config).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, vault_url(&base_url(&headers), &vault_id))],
    ))
}

pub async fn get_data_vault_configuration(
    Path(vault_id): Path<String>,
    State(collection): State<Arc<VaultCollection>>,
) -> ApiResult<Json<DataVaultConfiguration>> {
    let config = collection.data_vault_configuration(&vault_id).await?;
    Ok(Json(config))
}

pub async fn create_document(
    Path(vault_id): Path<String>,
    State(collection): State<Arc<VaultCollection>>,
    headers: HeaderMap,
    payload: Result<Json<EncryptedDocument>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(document) = payload?;
    collection.create_document(&vault_id, &document).await?;

    let location = document_url(&base_url(&headers), &vault_id, &document.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)]))
}

pub async fn read_document(
    Path((vault_id, doc_id)): Path<(String, String)>,
    State(collection): State<Arc<VaultCollection>>,
) -> ApiResult<impl IntoResponse> {
    let bytes = collection.read_document(&vault_id, &doc_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], bytes))
}

pub async fn update_document(
    Path((vault_id, doc_id)): Path<(String, String)>,
    State(collection): State<Arc<VaultCollection>>,
    payload: Result<Json<EncryptedDocument>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(document) = payload?;
    collection
        .update_document(&vault_id, &doc_id, &document)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_document(
    Path((vault_id, doc_id)): Path<(String, String)>,
    State(collection): State<Arc<VaultCollection>>,
) -> ApiResult<StatusCode> {
    collection.delete_document(&vault_id, &doc_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn batch(
    Path(vault_id): Path<String>,
    State(collection): State<Arc<VaultCollection>>,
    payload: Result<Json<Option<Vec<EncryptedDocument>>>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(documents) = payload?;
    let documents = documents
        .ok_or_else(|| Error::Validation("batch must be an array of documents".to_string()))?;

    tracing::info!(
        "Upserting {} documents into vault '{}'",
        documents.len(),
        vault_id
    );
    collection.upsert_documents(&vault_id, &documents).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Matching documents as full locators, never ids alone.
pub async fn query_vault(
    Path(vault_id): Path<String>,
    State(collection): State<Arc<VaultCollection>>,
    headers: HeaderMap,
    payload: Result<Json<Query>, JsonRejection>,
) -> ApiResult<Json<Vec<String>>> {
    let Json(query) = payload?;
    let ids = collection.query_vault(&vault_id, &query).await?;

    let base = base_url(&headers);
    let locators = ids
        .iter()
        .map(|id| document_url(&base, &vault_id, id))
        .collect();
    Ok(Json(locators))
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub backend: &'static str,
}

pub async fn health(State(collection): State<Arc<VaultCollection>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        backend: collection.backend_name(),
    })
}

pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

