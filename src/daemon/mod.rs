//! # Docker volume plugin daemon
//!
//! Serves the Docker volume plugin protocol (JSON over HTTP on a Unix socket)
//! in front of a [`VolumeManager`]. Each endpoint is a thin adapter: decode
//! the request, call the manager, encode the result with errors flattened to
//! the `Err` string Docker expects.
//!
//! ```text
//! docker ──► /run/docker/plugins/cephfs.sock ──► PluginDaemon ──► VolumeManager
//! ```

use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tracing::Instrument;
use uuid::Uuid;

use crate::volume::{VolumeInfo, VolumeManager, VolumeScope};

/// Content type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Body of a volume request. Docker omits fields it does not need.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeRequest {
    pub name: String,
    pub opts: Option<HashMap<String, String>>,
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PluginVolume {
    pub name: String,
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub status: HashMap<String, String>,
}

impl From<VolumeInfo> for PluginVolume {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            mountpoint: info.mountpoint.display().to_string(),
            status: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PluginCapability {
    pub scope: String,
}

/// Union of every response shape; empty fields are omitted.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PluginResponse {
    #[serde(default)]
    pub err: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<PluginVolume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<PluginVolume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<PluginCapability>,
}

impl PluginResponse {
    fn error(err: impl ToString) -> Self {
        Self {
            err: err.to_string(),
            ..Self::default()
        }
    }

    fn mountpoint(path: &Path) -> Self {
        Self {
            mountpoint: Some(path.display().to_string()),
            ..Self::default()
        }
    }
}

impl IntoResponse for PluginResponse {
    fn into_response(self) -> Response {
        let status = if self.err.is_empty() {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = serde_json::to_vec(&self).unwrap_or_default();
        (status, [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], body).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

type AppState = Arc<VolumeManager>;

/// Build the plugin router.
pub fn router(manager: Arc<VolumeManager>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(manager)
}

/// Decode a request body, treating an empty body as all defaults.
fn decode(body: &Bytes) -> Result<VolumeRequest, PluginResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(VolumeRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| PluginResponse::error(format!("invalid request body: {e}")))
}

/// Run `handler` inside a span tagged with a fresh request id.
async fn traced<F, Fut>(op: &'static str, body: Bytes, handler: F) -> PluginResponse
where
    F: FnOnce(VolumeRequest) -> Fut,
    Fut: Future<Output = PluginResponse>,
{
    let req = match decode(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    let span = tracing::info_span!("request", id = %Uuid::new_v4(), op, name = %req.name);
    async move {
        tracing::info!(volume_id = ?req.id, opts = ?req.opts, "{op}");
        let resp = handler(req).await;
        if !resp.err.is_empty() {
            tracing::error!("{op} failed: {}", resp.err);
        }
        resp
    }
    .instrument(span)
    .await
}

async fn activate() -> impl IntoResponse {
    let body = ActivateResponse {
        implements: vec!["VolumeDriver".to_string()],
    };
    (
        [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
        serde_json::to_vec(&body).unwrap_or_default(),
    )
}

async fn create(State(m): State<AppState>, body: Bytes) -> PluginResponse {
    traced("create", body, |req| async move {
        match m.create(&req.name).await {
            Ok(()) => PluginResponse::default(),
            Err(e) => PluginResponse::error(e),
        }
    })
    .await
}

async fn remove(State(m): State<AppState>, body: Bytes) -> PluginResponse {
    traced("remove", body, |req| async move {
        match m.remove(&req.name).await {
            Ok(()) => PluginResponse::default(),
            Err(e) => PluginResponse::error(e),
        }
    })
    .await
}

async fn mount(State(m): State<AppState>, body: Bytes) -> PluginResponse {
    traced("mount", body, |req| async move {
        match m.mount(&req.name).await {
            Ok(mountpoint) => PluginResponse::mountpoint(&mountpoint),
            Err(e) => PluginResponse::error(e),
        }
    })
    .await
}

async fn unmount(State(m): State<AppState>, body: Bytes) -> PluginResponse {
    traced("unmount", body, |req| async move {
        match m.unmount(&req.name).await {
            Ok(()) => PluginResponse::default(),
            Err(e) => PluginResponse::error(e),
        }
    })
    .await
}

async fn path(State(m): State<AppState>, body: Bytes) -> PluginResponse {
    traced("path", body, |req| async move {
        match m.path(&req.name) {
            Ok(mountpoint) => PluginResponse::mountpoint(&mountpoint),
            Err(e) => PluginResponse::error(e),
        }
    })
    .await
}

async fn get(State(m): State<AppState>, body: Bytes) -> PluginResponse {
    traced("get", body, |req| async move {
        match m.get(&req.name).await {
            Ok(info) => PluginResponse {
                volume: Some(info.into()),
                ..PluginResponse::default()
            },
            Err(e) => PluginResponse::error(e),
        }
    })
    .await
}

async fn list(State(m): State<AppState>) -> PluginResponse {
    let volumes: Vec<PluginVolume> = m.list().into_iter().map(Into::into).collect();
    tracing::info!("list request => {} volumes", volumes.len());
    PluginResponse {
        volumes: Some(volumes),
        ..PluginResponse::default()
    }
}

async fn capabilities(State(m): State<AppState>) -> PluginResponse {
    let scope = match m.capabilities().scope {
        VolumeScope::Global => "global",
        VolumeScope::Local => "local",
    };
    PluginResponse {
        capabilities: Some(PluginCapability {
            scope: scope.to_string(),
        }),
        ..PluginResponse::default()
    }
}

/// HTTP daemon exposing a [`VolumeManager`] on a Unix socket.
pub struct PluginDaemon {
    manager: Arc<VolumeManager>,
}

impl PluginDaemon {
    pub fn new(manager: Arc<VolumeManager>) -> Self {
        Self { manager }
    }

    pub fn router(&self) -> Router {
        router(self.manager.clone())
    }

    /// Bind `socket` (replacing a stale file) and serve until the process exits.
    pub async fn serve(self, socket: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = socket.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&socket).await? {
            tokio::fs::remove_file(&socket).await?;
        }

        let listener = UnixListener::bind(&socket)?;
        tracing::info!("plugin socket listening on {}", socket.display());
        axum::serve(listener, self.router()).await
    }
}
