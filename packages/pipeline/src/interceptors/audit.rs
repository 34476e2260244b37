//! Audit trail: one record per dispatch attempt, emitted off the call path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use conduit_core::{Payload, RequestContext, Response};
use serde::Serialize;

use crate::chain::{order, Call, Interceptor, Next};

/// What happened on one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub correlation_id: Option<String>,
    pub operation: String,
    pub request_type: String,
    pub target: Option<String>,
    /// Completion time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub metadata: BTreeMap<String, String>,
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the record could not be persisted. The
    /// interceptor logs it; the call outcome is unaffected.
    async fn emit(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Writes audit records as JSON to the `conduit::audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, record: AuditRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(&record)?;
        tracing::info!(target: "conduit::audit", record = %json, "audit");
        Ok(())
    }
}

/// Emits an [`AuditRecord`] every time the inner chain completes.
///
/// The stage sits closest to the terminal, inside the retry loop, so a
/// retried call produces one record per attempt. Records from a retried call
/// carry the attempt number in the `retry_attempt` metadata entry; the
/// `retry_attempts` total is written after the last attempt and is not part
/// of any record. Emission runs on a spawned task, so a slow or failing sink
/// never delays or alters the response.
#[derive(Clone)]
pub struct AuditInterceptor {
    sink: Arc<dyn AuditSink>,
}

impl AuditInterceptor {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

impl Default for AuditInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl std::fmt::Debug for AuditInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditInterceptor").finish_non_exhaustive()
    }
}

fn record_for(ctx: &RequestContext, call: &Call, response: &Response<Payload>) -> AuditRecord {
    #[allow(clippy::cast_possible_truncation)]
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64);
    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = ctx.elapsed().as_millis() as u64;

    AuditRecord {
        correlation_id: ctx.correlation_id().map(str::to_string),
        operation: ctx.operation().to_string(),
        request_type: ctx.request_type().name().to_string(),
        target: call.resolution.service_name().map(str::to_string),
        timestamp_ms,
        success: response.is_success(),
        error_kind: response.error().map(|err| err.kind().as_str().to_string()),
        error_message: response.error().map(ToString::to_string),
        duration_ms,
        metadata: ctx.metadata().clone(),
    }
}

#[async_trait]
impl Interceptor for AuditInterceptor {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn order(&self) -> i32 {
        order::AUDIT
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        let response = next.run(ctx, call).await;

        let record = record_for(ctx, call, &response);
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let operation = record.operation.clone();
            if let Err(err) = sink.emit(record).await {
                tracing::warn!(operation = %operation, error = %err, "audit emission failed");
            }
        });

        response
    }
}
