//! Headless viewer engine backed by the derivative service's manifest.
//!
//! Used where no GPU surface exists (the CLI, CI). "Loading a document"
//! means fetching `{derivative_api}/{urn}/manifest` with the viewer token and
//! parsing its derivative tree; "loading a node" records which viewable a
//! real renderer would display.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, RenderError};
use crate::pipeline::viewer::{
    Document, DocumentNode, EngineInit, RendererSession, SurfaceId, ViewerEngine,
    DOCUMENT_ID_PREFIX,
};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    derivatives: Vec<DocumentNode>,
}

/// [`ViewerEngine`] that reads manifests over HTTP.
#[derive(Debug, Clone)]
pub struct ManifestEngine {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl ManifestEngine {
    pub fn new(derivative_api_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let base = Url::parse(derivative_api_url).map_err(|e| {
            PipelineError::InvalidConfig(format!("'{derivative_api_url}': {e}"))
        })?;
        let client = Client::builder()
            .user_agent(concat!("bimview/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::new(&config.derivative_api_url, config.request_timeout())
    }
}

#[async_trait]
impl ViewerEngine for ManifestEngine {
    async fn create_session(
        &self,
        init: &EngineInit,
        surface: &SurfaceId,
    ) -> Result<Box<dyn RendererSession>, RenderError> {
        if init.access_token.trim().is_empty() {
            return Err(RenderError::StartFailed {
                surface: surface.to_string(),
                reason: "empty access token".into(),
            });
        }
        debug!("Manifest session on '{}' ({}/{})", surface, init.env, init.api);
        Ok(Box::new(ManifestSession {
            engine: self.clone(),
            surface: surface.clone(),
            token: init.access_token.clone(),
            started: false,
            current: None,
            disposed: false,
        }))
    }
}

/// One headless "renderer".
pub struct ManifestSession {
    engine: ManifestEngine,
    surface: SurfaceId,
    token: String,
    started: bool,
    current: Option<String>,
    disposed: bool,
}

impl ManifestSession {
    fn manifest_url(&self, urn: &str) -> Result<Url, String> {
        let mut url = self.engine.base.clone();
        url.path_segments_mut()
            .map_err(|_| format!("'{}' cannot be a base", self.engine.base))?
            .pop_if_empty()
            .extend([urn, "manifest"]);
        Ok(url)
    }
}

#[async_trait]
impl RendererSession for ManifestSession {
    async fn start(&mut self) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::StartFailed {
                surface: self.surface.to_string(),
                reason: "session was disposed".into(),
            });
        }
        self.started = true;
        Ok(())
    }

    async fn load_document(&mut self, document_id: &str) -> Result<Document, RenderError> {
        let load_failed = |reason: String| RenderError::DocumentLoadFailed {
            document: document_id.to_string(),
            reason,
        };
        if !self.started || self.disposed {
            return Err(load_failed("viewer is not running".into()));
        }

        let urn = document_id
            .strip_prefix(DOCUMENT_ID_PREFIX)
            .unwrap_or(document_id);
        let url = self.manifest_url(urn).map_err(load_failed)?;
        debug!("Fetching manifest {url}");

        let response = self
            .engine
            .client
            .get(url)
            .bearer_auth(&self.token)
            .timeout(self.engine.timeout)
            .send()
            .await
            .map_err(|e| load_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(load_failed(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        let manifest: Manifest = response
            .json()
            .await
            .map_err(|e| load_failed(format!("bad manifest: {e}")))?;
        if manifest.status.as_deref() == Some("failed") {
            return Err(load_failed("manifest reports a failed translation".into()));
        }

        info!(
            "Manifest for {} lists {} derivative(s)",
            document_id,
            manifest.derivatives.len()
        );
        Ok(Document {
            id: document_id.to_string(),
            root: DocumentNode {
                guid: urn.to_string(),
                name: document_id.to_string(),
                node_type: "folder".into(),
                children: manifest.derivatives,
                ..DocumentNode::default()
            },
        })
    }

    async fn load_node(
        &mut self,
        document: &Document,
        node: &DocumentNode,
    ) -> Result<(), RenderError> {
        if self.disposed || document.root.find(&node.guid).is_none() {
            return Err(RenderError::ViewableLoadFailed {
                viewable: node.guid.clone(),
                reason: format!("not part of {}", document.id),
            });
        }
        self.current = Some(node.guid.clone());
        Ok(())
    }

    fn dispose(&mut self) {
        if let Some(guid) = self.current.as_deref() {
            debug!("Releasing viewable {} on '{}'", guid, self.surface);
        }
        self.disposed = true;
        self.started = false;
        self.current = None;
    }
}
