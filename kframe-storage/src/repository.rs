//! Frame repository.
//!
//! The composition root for one process: owns the nodes, the i-frame index
//! builder, the p-frame delta cache and the administrative operations. It is
//! constructed once and shared by handle; there is no global cache state.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use kframe_core::{merge_into_frame, FrameResult, FrameTiming, FrameVersion, MergedFrame};

use crate::cache::{
    FrameCacheCounters, FrameCacheStats, FrameDeltaCache, FrameIndexBuilder, FrameRead, IFrame,
    PFrame,
};
use crate::source::FrameNode;

/// Reply body for a rejected administrative call.
pub const INVALID_ACCESS_TOKEN: &str = "Invalid Access Token";

/// Repository options.
#[derive(Debug, Clone, Default)]
pub struct FrameOptions {
    pub timing: FrameTiming,
    /// Shared secret for administrative calls. `None` allows every call.
    pub access_token: Option<String>,
}

impl FrameOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timing(mut self, timing: FrameTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Administrative operations delegated to every node's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Clear,
    Install,
    Uninstall,
    Reinstall,
}

impl AdminAction {
    pub const ALL: [AdminAction; 4] = [
        AdminAction::Clear,
        AdminAction::Install,
        AdminAction::Uninstall,
        AdminAction::Reinstall,
    ];
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdminAction::Clear => "clear",
            AdminAction::Install => "install",
            AdminAction::Uninstall => "uninstall",
            AdminAction::Reinstall => "reinstall",
        };
        f.write_str(name)
    }
}

/// Plain-text outcome of an administrative call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminReply {
    pub body: String,
    pub access_denied: bool,
}

impl AdminReply {
    fn ok(body: String) -> Self {
        Self {
            body,
            access_denied: false,
        }
    }

    fn denied() -> Self {
        Self {
            body: INVALID_ACCESS_TOKEN.to_string(),
            access_denied: true,
        }
    }
}

struct RepositoryInner {
    nodes: Arc<[FrameNode]>,
    options: FrameOptions,
    index: Arc<FrameIndexBuilder>,
    delta: FrameDeltaCache,
    counters: Arc<FrameCacheCounters>,
}

#[derive(Clone)]
pub struct FrameRepository {
    inner: Arc<RepositoryInner>,
}

impl FrameRepository {
    /// Build a repository over `nodes`. Rejects invalid timing.
    pub fn new(nodes: Vec<FrameNode>, options: FrameOptions) -> FrameResult<Self> {
        options.timing.validate()?;

        let nodes: Arc<[FrameNode]> = Arc::from(nodes);
        let counters = Arc::new(FrameCacheCounters::default());
        let index = Arc::new(FrameIndexBuilder::new(
            Arc::clone(&nodes),
            options.timing.iframe_expiration,
            Arc::clone(&counters),
        ));
        let delta = FrameDeltaCache::new(
            Arc::clone(&nodes),
            Arc::clone(&index),
            options.timing.clone(),
            Arc::clone(&counters),
        );

        Ok(Self {
            inner: Arc::new(RepositoryInner {
                nodes,
                options,
                index,
                delta,
                counters,
            }),
        })
    }

    pub fn options(&self) -> &FrameOptions {
        &self.inner.options
    }

    pub fn timing(&self) -> &FrameTiming {
        &self.inner.options.timing
    }

    pub fn nodes(&self) -> &[FrameNode] {
        &self.inner.nodes
    }

    pub fn stats(&self) -> FrameCacheStats {
        self.inner.counters.snapshot()
    }

    /// The i-frame, one entry per node.
    pub async fn get_iframe(&self) -> FrameResult<FrameRead<IFrame>> {
        self.inner.index.get_iframe().await
    }

    /// The p-frame for `version` with its composite etag.
    pub async fn get_pframe(&self, version: FrameVersion) -> FrameResult<FrameRead<PFrame>> {
        self.inner.delta.get_pframe(version).await
    }

    /// True when a cached p-frame carries exactly `etag`.
    pub fn has_pframe(&self, etag: &str) -> bool {
        self.inner.delta.has_pframe(etag)
    }

    /// Record a conditional request answered without a build.
    pub fn record_not_modified(&self) {
        self.inner.counters.record_not_modified();
    }

    pub fn delta_cache(&self) -> &FrameDeltaCache {
        &self.inner.delta
    }

    /// Merge the current i-frame with its p-frame.
    pub async fn merged_frame(&self) -> FrameResult<MergedFrame> {
        let iframe = self.get_iframe().await?.into_value();
        let version = iframe
            .first()
            .map(|entry| entry.frame)
            .unwrap_or(FrameVersion::ZERO);
        let pframe = self.get_pframe(version).await?.into_value();
        merge_into_frame(&iframe, &pframe.entries, Utc::now())
    }

    fn valid_access_code(&self, access_code: &str) -> bool {
        match self.inner.options.access_token.as_deref() {
            Some(token) if !token.is_empty() => {
                access_code.strip_prefix('/') == Some(token)
            }
            _ => true,
        }
    }

    /// Run an administrative action. `access_code` is the request path
    /// remainder, e.g. `"/secret"`.
    pub async fn admin(&self, action: AdminAction, access_code: &str) -> FrameResult<AdminReply> {
        if !self.valid_access_code(access_code) {
            warn!(%action, "access denied");
            return Ok(AdminReply::denied());
        }

        let body = match action {
            AdminAction::Reinstall => {
                let mut body = self.run_on_nodes(AdminAction::Uninstall).await?;
                body.push_str(&self.run_on_nodes(AdminAction::Install).await?);
                body
            }
            other => self.run_on_nodes(other).await?,
        };
        if matches!(action, AdminAction::Clear) {
            self.inner.index.clear().await;
            self.inner.delta.clear();
        }
        info!(%action, "administrative call completed");
        Ok(AdminReply::ok(body))
    }

    pub async fn clear(&self, access_code: &str) -> FrameResult<AdminReply> {
        self.admin(AdminAction::Clear, access_code).await
    }

    pub async fn install(&self, access_code: &str) -> FrameResult<AdminReply> {
        self.admin(AdminAction::Install, access_code).await
    }

    pub async fn uninstall(&self, access_code: &str) -> FrameResult<AdminReply> {
        self.admin(AdminAction::Uninstall, access_code).await
    }

    pub async fn reinstall(&self, access_code: &str) -> FrameResult<AdminReply> {
        self.admin(AdminAction::Reinstall, access_code).await
    }

    async fn run_on_nodes(&self, action: AdminAction) -> FrameResult<String> {
        let mut body = String::new();
        for node in self.inner.nodes.iter() {
            let status = match action {
                AdminAction::Clear => node.source.clear(&node.chapters).await?,
                AdminAction::Install => node.source.install(&node.chapters).await?,
                AdminAction::Uninstall | AdminAction::Reinstall => {
                    node.source.uninstall(&node.chapters).await?
                }
            };
            body.push_str(&status);
        }
        Ok(body)
    }
}

impl fmt::Debug for FrameRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRepository")
            .field("nodes", &self.inner.nodes)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}
