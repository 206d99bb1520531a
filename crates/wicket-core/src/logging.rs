//! Operator channel for internal faults.
//!
//! Client errors never come through here. Only failures the client sees as a
//! generic 500 are reported, with every piece of diagnostic detail we have.
//!
//! The default [`TracingReporter`] emits a `tracing` event at `ERROR` level;
//! installing a subscriber is the application's job. Plug in another
//! [`FaultReporter`] to forward faults to an error tracker.
//!
//! # Event fields
//!
//! ```json
//! {
//!     "request_id": 17,
//!     "method": "GET",
//!     "path": "/users/42",
//!     "message": "loading user 42",
//!     "detail": "loading user 42\n\nCaused by:\n    connection refused"
//! }
//! ```

use serde::Serialize;
use std::fmt;

use crate::context::{RequestContext, RequestId};
use crate::error::InternalFault;
use crate::request::Method;

/// One internal fault, as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultReport {
    /// Request the fault happened in.
    pub request_id: u64,
    /// Request method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Outermost error message.
    pub message: String,
    /// Cause chain and backtrace.
    pub detail: String,
}

impl FaultReport {
    /// Build a report for `fault` raised while serving `ctx`.
    #[must_use]
    pub fn new(ctx: &RequestContext, fault: &InternalFault) -> Self {
        Self::from_parts(ctx.id(), ctx.method(), ctx.path(), fault)
    }

    pub(crate) fn from_parts(id: RequestId, method: Method, path: String, fault: &InternalFault) -> Self {
        Self {
            request_id: id.as_u64(),
            method: method.as_str().to_owned(),
            path,
            message: fault.message(),
            detail: fault.detail(),
        }
    }

    /// Serialize to a single JSON line.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.request_id, self.method, self.path, self.message
        )
    }
}

/// Receives internal faults.
pub trait FaultReporter: Send + Sync {
    /// Record one fault. A panic here is contained and logged, not propagated.
    fn report(&self, report: &FaultReport);
}

/// Reports faults as `tracing` error events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FaultReporter for TracingReporter {
    fn report(&self, report: &FaultReport) {
        tracing::error!(
            request_id = report.request_id,
            method = %report.method,
            path = %report.path,
            detail = %report.detail,
            "internal error, please report: {}",
            report.message
        );
    }
}
