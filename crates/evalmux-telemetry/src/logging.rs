use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A warn+ event captured by [`RecentLogLayer`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    /// Monotonic sequence number, unique per buffer.
    pub seq: u64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Remaining structured fields as a JSON object string.
    pub fields: Option<String>,
    pub request_id: Option<String>,
}

/// Filters for [`RecentLogs::query`]. Results are newest first.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Exact level name, e.g. `"WARN"`.
    pub level: Option<String>,
    /// Substring of the event target.
    pub target: Option<String>,
    pub request_id: Option<String>,
    pub limit: Option<usize>,
}

const DEFAULT_QUERY_LIMIT: usize = 100;

/// Bounded in-memory buffer of recent warn+ records. The oldest record is
/// evicted once `capacity` is reached.
pub struct RecentLogs {
    capacity: usize,
    inner: Mutex<RecentInner>,
}

#[derive(Default)]
struct RecentInner {
    next_seq: u64,
    records: VecDeque<LogRecord>,
}

impl RecentLogs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RecentInner::default()),
        }
    }

    fn insert(&self, mut record: LogRecord) {
        let mut inner = self.inner.lock();
        record.seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.records.len() == self.capacity {
            let _ = inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    pub fn query(&self, q: &LogQuery) -> Vec<LogRecord> {
        let inner = self.inner.lock();
        inner
            .records
            .iter()
            .rev()
            .filter(|r| q.level.as_ref().is_none_or(|l| r.level == *l))
            .filter(|r| q.target.as_ref().is_none_or(|t| r.target.contains(t.as_str())))
            .filter(|r| {
                q.request_id
                    .as_ref()
                    .is_none_or(|id| r.request_id.as_ref() == Some(id))
            })
            .take(q.limit.unwrap_or(DEFAULT_QUERY_LIMIT))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// tracing Layer that copies warn+ events into a [`RecentLogs`] buffer.
pub struct RecentLogLayer {
    sink: Arc<RecentLogs>,
}

impl RecentLogLayer {
    pub fn new(sink: Arc<RecentLogs>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    request_id: Option<String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(val),
            "request_id" => self.request_id = Some(val.trim_matches('"').to_string()),
            name => {
                let _ = self
                    .fields
                    .insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "request_id" => self.request_id = Some(value.to_string()),
            name => {
                let _ = self
                    .fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let _ = self
            .fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Stored on spans so child events inherit the span's `request_id`.
struct SpanRequest(String);

impl<S> Layer<S> for RecentLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if visitor.request_id.is_none() {
            visitor.request_id = ctx.event_scope(event).and_then(|mut scope| {
                scope.find_map(|span| {
                    let extensions = span.extensions();
                    extensions.get::<SpanRequest>().map(|r| r.0.clone())
                })
            });
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(LogRecord {
            seq: 0,
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            request_id: visitor.request_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if let (Some(request_id), Some(span)) = (visitor.request_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanRequest(request_id));
        }
    }
}
