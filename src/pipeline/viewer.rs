//! Viewer host: bind a rendering engine to a surface and show a document.
//!
//! The vendor SDK is never touched directly. It sits behind two traits:
//!
//! * [`ViewerEngine`] initialises the runtime context with a credential and
//!   creates one [`RendererSession`] bound to a display surface.
//! * [`RendererSession`] is a single live renderer: `start`, `load_document`,
//!   `load_node`, `dispose`.
//!
//! [`EngineHandle`] owns exactly one session and guarantees it is disposed,
//! either explicitly or when the handle is dropped.

use crate::error::RenderError;
use crate::pipeline::transfer::AccessToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix the engine expects in front of a remote id.
pub const DOCUMENT_ID_PREFIX: &str = "urn:";

/// Node type of renderable entities.
pub const GEOMETRY_NODE_TYPE: &str = "geometry";

/// Engine-side document id for a backend remote id.
pub fn document_id(remote_id: &str) -> String {
    if remote_id.starts_with(DOCUMENT_ID_PREFIX) {
        remote_id.to_string()
    } else {
        format!("{DOCUMENT_ID_PREFIX}{remote_id}")
    }
}

/// Identifier of the display surface a renderer binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime context handed to the engine before a renderer is created.
#[derive(Clone)]
pub struct EngineInit {
    pub access_token: String,
    pub env: String,
    pub api: String,
}

impl fmt::Debug for EngineInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineInit")
            .field("access_token", &"<redacted>")
            .field("env", &self.env)
            .field("api", &self.api)
            .finish()
    }
}

// ── Document tree ────────────────────────────────────────────────────────

/// One node of a translated document's derivative tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentNode {
    pub guid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub role: Option<String>,
    pub use_as_default: bool,
    pub is_master_view: bool,
    pub children: Vec<DocumentNode>,
}

impl DocumentNode {
    pub fn is_geometry(&self) -> bool {
        self.node_type == GEOMETRY_NODE_TYPE
    }

    /// All nodes of `node_type`, depth-first, this node included.
    pub fn search(&self, node_type: &str) -> Vec<&DocumentNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.node_type == node_type {
                out.push(node);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn find(&self, guid: &str) -> Option<&DocumentNode> {
        if self.guid == guid {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(guid))
    }

    /// The geometry marked as default view, else the master view.
    pub fn default_geometry(&self) -> Option<&DocumentNode> {
        let geometry = self.search(GEOMETRY_NODE_TYPE);
        geometry
            .iter()
            .find(|n| n.use_as_default)
            .or_else(|| geometry.iter().find(|n| n.is_master_view))
            .copied()
    }
}

/// A document loaded by a renderer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub root: DocumentNode,
}

impl Document {
    /// Default geometry, falling back to the first geometry node.
    pub fn resolve_viewable(&self) -> Result<&DocumentNode, RenderError> {
        self.root
            .default_geometry()
            .or_else(|| self.root.search(GEOMETRY_NODE_TYPE).into_iter().next())
            .ok_or_else(|| RenderError::NoViewable {
                document: self.id.clone(),
            })
    }
}

// ── Engine seam ──────────────────────────────────────────────────────────

/// Factory for renderer sessions; one per vendor SDK (or test double).
#[async_trait]
pub trait ViewerEngine: Send + Sync {
    /// Initialise the runtime context and bind one renderer to `surface`.
    async fn create_session(
        &self,
        init: &EngineInit,
        surface: &SurfaceId,
    ) -> Result<Box<dyn RendererSession>, RenderError>;
}

/// A single live renderer instance.
#[async_trait]
pub trait RendererSession: Send {
    async fn start(&mut self) -> Result<(), RenderError>;

    async fn load_document(&mut self, document_id: &str) -> Result<Document, RenderError>;

    async fn load_node(
        &mut self,
        document: &Document,
        node: &DocumentNode,
    ) -> Result<(), RenderError>;

    /// Release every resource held by the renderer. Called exactly once.
    fn dispose(&mut self);
}

// ── Engine handle ────────────────────────────────────────────────────────

/// Exclusive ownership of one renderer session.
pub struct EngineHandle {
    surface: SurfaceId,
    session: Option<Box<dyn RendererSession>>,
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("surface", &self.surface)
            .field("live", &self.is_live())
            .finish()
    }
}

impl EngineHandle {
    pub fn new(surface: SurfaceId, session: Box<dyn RendererSession>) -> Self {
        Self {
            surface,
            session: Some(session),
        }
    }

    pub fn surface(&self) -> &SurfaceId {
        &self.surface
    }

    /// `false` once disposed.
    pub fn is_live(&self) -> bool {
        self.session.is_some()
    }

    /// Load the document for `remote_id` and show its viewable.
    ///
    /// Returns the node that was loaded.
    pub async fn show_document(&mut self, remote_id: &str) -> Result<DocumentNode, RenderError> {
        let document_id = document_id(remote_id);
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| RenderError::DocumentLoadFailed {
                document: document_id.clone(),
                reason: "viewer has been disposed".into(),
            })?;

        let document = session.load_document(&document_id).await?;
        let viewable = document.resolve_viewable()?.clone();
        debug!(
            "Loading viewable '{}' ({}) of {}",
            viewable.name, viewable.guid, document.id
        );
        session.load_node(&document, &viewable).await?;
        Ok(viewable)
    }

    /// Dispose the session. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.dispose();
            debug!("Viewer on surface '{}' disposed", self.surface);
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Host adapter ─────────────────────────────────────────────────────────

/// Outcome of [`ViewerHost::render_document`] once a renderer was started.
///
/// The handle is returned even when the document failed to load, so the
/// owner decides when to dispose it.
#[derive(Debug)]
pub struct Rendering {
    pub handle: EngineHandle,
    pub result: Result<DocumentNode, RenderError>,
}

/// Drives a [`ViewerEngine`] through start → load document → load viewable.
#[derive(Clone)]
pub struct ViewerHost {
    engine: Arc<dyn ViewerEngine>,
    env: String,
    api: String,
}

impl fmt::Debug for ViewerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerHost")
            .field("engine", &"<dyn ViewerEngine>")
            .field("env", &self.env)
            .field("api", &self.api)
            .finish()
    }
}

impl ViewerHost {
    pub fn new(engine: Arc<dyn ViewerEngine>, env: impl Into<String>, api: impl Into<String>) -> Self {
        Self {
            engine,
            env: env.into(),
            api: api.into(),
        }
    }

    /// Create and start one renderer on `surface`.
    pub async fn start(
        &self,
        surface: &SurfaceId,
        token: &AccessToken,
    ) -> Result<EngineHandle, RenderError> {
        let init = EngineInit {
            access_token: token.access_token.clone(),
            env: self.env.clone(),
            api: self.api.clone(),
        };
        let session = self.engine.create_session(&init, surface).await?;
        let mut handle = EngineHandle::new(surface.clone(), session);

        if let Some(session) = handle.session.as_mut() {
            if let Err(e) = session.start().await {
                warn!("Viewer failed to start on '{}': {}", surface, e);
                handle.dispose();
                return Err(e);
            }
        }
        info!("Viewer started on surface '{}'", surface);
        Ok(handle)
    }

    /// Start a renderer and show the document for `remote_id`.
    ///
    /// `Err` only when no renderer could be started.
    pub async fn render_document(
        &self,
        surface: &SurfaceId,
        remote_id: &str,
        token: &AccessToken,
    ) -> Result<Rendering, RenderError> {
        let mut handle = self.start(surface, token).await?;
        let result = handle.show_document(remote_id).await;
        Ok(Rendering { handle, result })
    }
}
