//! Per-request frame trace.
//!
//! Every frame request fills one [`FrameTrace`] and logs it when the
//! response is ready.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use kframe_storage::AdminAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMethod {
    IFrame,
    PFrame,
    Clear,
    Install,
    Uninstall,
    Reinstall,
}

impl From<AdminAction> for TraceMethod {
    fn from(action: AdminAction) -> Self {
        match action {
            AdminAction::Clear => TraceMethod::Clear,
            AdminAction::Install => TraceMethod::Install,
            AdminAction::Uninstall => TraceMethod::Uninstall,
            AdminAction::Reinstall => TraceMethod::Reinstall,
        }
    }
}

impl fmt::Display for TraceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Work the repository did to answer the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceAction {
    #[default]
    None,
    BuildIFrame,
    BuildPFrame,
    /// Served a p-frame that outlived its first lifetime by revalidation.
    CheckPFrame,
}

impl fmt::Display for TraceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone)]
pub struct FrameTrace {
    pub request_id: Uuid,
    pub method: TraceMethod,
    pub action: TraceAction,
    pub access_denied: bool,
    /// `If-None-Match` value that short-circuited the request.
    pub from_etag: Option<String>,
    pub status: u16,
    pub etag: Option<String>,
    pub iframes: Vec<i64>,
    pub content_length: Option<u64>,
    pub max_age: Option<Duration>,
    pub expires: Option<DateTime<Utc>>,
}

impl FrameTrace {
    pub fn new(method: TraceMethod) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            method,
            action: TraceAction::None,
            access_denied: false,
            from_etag: None,
            status: 200,
            etag: None,
            iframes: Vec::new(),
            content_length: None,
            max_age: None,
            expires: None,
        }
    }

    /// Human-readable body size, or `None` when no body was written.
    pub fn content_size(&self) -> Option<String> {
        self.content_length.map(content_size)
    }

    pub fn log(&self) {
        if self.access_denied {
            warn!(request_id = %self.request_id, method = %self.method, "{} access denied", self.method);
            return;
        }

        match self.method {
            TraceMethod::IFrame | TraceMethod::PFrame if self.status != 200 => {
                info!(
                    request_id = %self.request_id,
                    method = %self.method,
                    status = self.status,
                    from_etag = self.from_etag.as_deref(),
                    "{} returned", self.method
                );
            }
            TraceMethod::IFrame | TraceMethod::PFrame => {
                info!(
                    request_id = %self.request_id,
                    method = %self.method,
                    iframes = ?self.iframes,
                    action = %self.action,
                    etag = self.etag.as_deref(),
                    max_age_secs = self.max_age.map(|age| age.as_secs()),
                    expires = self.expires.map(|at| at.to_rfc3339()),
                    size = self.content_size(),
                    "{} returned", self.method
                );
            }
            TraceMethod::Clear => info!(request_id = %self.request_id, "KFrame cleared"),
            TraceMethod::Install => info!(request_id = %self.request_id, "KFrame installed"),
            TraceMethod::Uninstall => info!(request_id = %self.request_id, "KFrame uninstalled"),
            TraceMethod::Reinstall => info!(request_id = %self.request_id, "KFrame reinstalled"),
        }
    }
}

/// Format a byte count the way the trace reports it: `"1 byte"`,
/// `"512 bytes"`, `"1.5 KB"`, `"2 MB"`.
///
/// The unit follows the decimal digit count, so `1000` is already `"0.98 KB"`.
pub fn content_size(length: u64) -> String {
    let digits = length.to_string().len();
    let radix = ((digits - 1) / 3).min(3);
    if radix > 0 {
        let scaled = length as f64 / (1u64 << (10 * radix)) as f64;
        let rounded = (scaled * 100.0).round() / 100.0;
        let unit = ["KB", "MB", "GB"][radix - 1];
        return format!("{} {}", rounded, unit);
    }
    if length == 1 {
        return "1 byte".to_string();
    }
    format!("{} bytes", length)
}
