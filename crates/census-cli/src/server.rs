//! `census serve`: the HTTP front of [`CitizenService`].
//!
//! Routes:
//! - `GET  /healthz`
//! - `POST /imports`
//! - `PATCH /imports/{import_id}/citizens/{citizen_id}`
//! - `GET  /imports/{import_id}/citizens`
//! - `GET  /imports/{import_id}/citizens/birthdays`
//! - `GET  /imports/{import_id}/towns/stat/percentile/age`
//!
//! Successful calls answer `201 {"data": ...}`; failures answer
//! `{"error": {"kind", "message"}}` with a status chosen by error class.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;

use census_model::{CitizenId, ImportId};
use census_storage::{CitizenService, ErrorClass, ServiceError};

use crate::config::ServiceConfig;

type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Healthz,
    CreateImport,
    PatchCitizen(ImportId, CitizenId),
    ListCitizens(ImportId),
    Birthdays(ImportId),
    AgePercentiles(ImportId),
}

fn route(method: &Method, path: &str) -> Option<Route> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let route = match (method, segments.as_slice()) {
        (&Method::GET, ["healthz"]) => Route::Healthz,
        (&Method::POST, ["imports"]) => Route::CreateImport,
        (&Method::PATCH, ["imports", import_id, "citizens", citizen_id]) => {
            Route::PatchCitizen(import_id.parse().ok()?, citizen_id.parse().ok()?)
        }
        (&Method::GET, ["imports", import_id, "citizens"]) => {
            Route::ListCitizens(import_id.parse().ok()?)
        }
        (&Method::GET, ["imports", import_id, "citizens", "birthdays"]) => {
            Route::Birthdays(import_id.parse().ok()?)
        }
        (&Method::GET, ["imports", import_id, "towns", "stat", "percentile", "age"]) => {
            Route::AgePercentiles(import_id.parse().ok()?)
        }
        _ => return None,
    };
    Some(route)
}

pub async fn serve(config: ServiceConfig, ready_file: Option<PathBuf>) -> Result<()> {
    let service = Arc::new(
        config
            .storage
            .open_service()
            .map_err(|e| anyhow!("failed to open import store: {e}"))?,
    );

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow!("failed to bind {}: {e}", config.listen))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("failed to read bound addr: {e}"))?;

    let max_body_bytes = config.max_body_bytes;
    tracing::info!(
        addr = %bound,
        data_path = ?config.storage.data_path,
        max_body_bytes,
        "census listening"
    );
    if let Some(path) = ready_file.as_deref() {
        write_ready_file(path, bound)?;
    }

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let service = service.clone();

        tokio::spawn(async move {
            let handler =
                service_fn(move |req| handle_request(req, service.clone(), max_body_bytes));
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                tracing::debug!(%peer, error = %e, "connection error");
            }
        });
    }
}

fn write_ready_file(path: &Path, bound: SocketAddr) -> Result<()> {
    let payload = serde_json::json!({
        "addr": bound.to_string(),
        "pid": std::process::id(),
    });
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&payload)?)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|e| anyhow!("failed to write ready file {}: {e}", path.display()))
}

async fn handle_request(
    req: Request<Incoming>,
    service: Arc<CitizenService>,
    max_body_bytes: usize,
) -> Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(route) = route(&method, &path) else {
        tracing::debug!(%method, %path, "no such route");
        return Ok(json_error(StatusCode::NOT_FOUND, "NotFoundError", "no such route"));
    };

    let resp = match route {
        Route::Healthz => response(
            StatusCode::OK,
            "text/plain; charset=utf-8",
            Bytes::from_static(b"ok\n"),
        ),
        Route::CreateImport => match read_json(req, max_body_bytes).await {
            Ok(payload) => respond(
                service
                    .create_import(&payload)
                    .await
                    .map(|import_id| serde_json::json!({ "import_id": import_id })),
            ),
            Err(resp) => resp,
        },
        Route::PatchCitizen(import_id, citizen_id) => match read_json(req, max_body_bytes).await {
            Ok(payload) => respond(
                service
                    .patch_citizen(import_id, citizen_id, &payload)
                    .await,
            ),
            Err(resp) => resp,
        },
        Route::ListCitizens(import_id) => respond(service.list_citizens(import_id).await),
        Route::Birthdays(import_id) => match service.birthdays(import_id).await {
            Ok(report) => created(report.as_ref()),
            Err(err) => service_error(&err),
        },
        Route::AgePercentiles(import_id) => {
            let today = chrono::Utc::now().date_naive();
            match service.age_percentiles(import_id, today).await {
                Ok(stats) => created(stats.as_slice()),
                Err(err) => service_error(&err),
            }
        }
    };

    tracing::debug!(%method, %path, status = resp.status().as_u16(), "request handled");
    Ok(resp)
}

/// Body of a mutating request as JSON, or the 4xx response to send instead.
async fn read_json<B>(req: Request<B>, limit: usize) -> Result<Value, HttpResponse>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let is_json = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "BadRequest",
            "expected Content-Type: application/json",
        ));
    }

    let body = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "PayloadTooLarge",
                &format!("request body exceeds {limit} bytes"),
            ));
        }
        Err(e) => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "BadRequest",
                &format!("failed to read request body: {e}"),
            ));
        }
    };
    serde_json::from_slice(&body).map_err(|e| {
        json_error(
            StatusCode::BAD_REQUEST,
            "BadRequest",
            &format!("request body is not valid JSON: {e}"),
        )
    })
}

#[derive(Serialize)]
struct Envelope<'a, T: ?Sized> {
    data: &'a T,
}

fn created<T: Serialize + ?Sized>(value: &T) -> HttpResponse {
    json_response(StatusCode::CREATED, &Envelope { data: value })
}

fn respond<T: Serialize>(result: Result<T, ServiceError>) -> HttpResponse {
    match result {
        Ok(value) => created(&value),
        Err(err) => service_error(&err),
    }
}

fn service_error(err: &ServiceError) -> HttpResponse {
    let status = match err.class() {
        ErrorClass::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Store => StatusCode::BAD_GATEWAY,
        ErrorClass::Inconsistent => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(kind = err.kind(), error = %err, "request failed");
    } else {
        tracing::debug!(kind = err.kind(), error = %err, "request rejected");
    }
    json_error(status, err.kind(), &err.to_string())
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, "application/json", Bytes::from(body)),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                Bytes::from_static(br#"{"error":{"kind":"InternalError","message":"response encoding failed"}}"#),
            )
        }
    }
}

fn json_error(status: StatusCode, kind: &str, message: &str) -> HttpResponse {
    let v = serde_json::json!({ "error": { "kind": kind, "message": message } });
    json_response(status, &v)
}
