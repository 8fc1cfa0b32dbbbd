//! Custom tracing layer for JSONL output.
//!
//! Produces one JSON object per event on stderr, keeping stdout clean for
//! command payloads. String fields pass through [`scrub_for_log`] before
//! they are written.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;
use super::scrub_for_log;

/// Correlation fields recorded on a span.
#[derive(Debug, Clone, Default)]
struct SpanContext {
    run_id: Option<String>,
    pass: Option<String>,
    stage: Option<String>,
}

/// Correlation keys lifted to the top level of the JSON object.
const CONTEXT_KEYS: &[&str] = &["run_id", "pass", "stage"];

struct JsonFieldVisitor {
    fields: serde_json::Map<String, serde_json::Value>,
    message: Option<String>,
}

impl JsonFieldVisitor {
    fn new() -> Self {
        JsonFieldVisitor {
            fields: serde_json::Map::new(),
            message: None,
        }
    }

    fn record_text(&mut self, name: &str, text: &str) {
        let scrubbed = scrub_for_log(text);
        if name == "message" {
            self.message = Some(scrubbed);
        } else {
            self.fields
                .insert(name.to_string(), serde_json::Value::String(scrubbed));
        }
    }
}

impl tracing::field::Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record_text(field.name(), value);
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let text = format!("{:?}", value);
        // Option<String> context fields arrive as Debug; unwrap the common shapes.
        let text = match text.strip_prefix("Some(\"").and_then(|t| t.strip_suffix("\")")) {
            Some(inner) => inner.to_string(),
            None if text == "None" => return,
            None => text,
        };
        self.record_text(field.name(), &text);
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

struct SpanContextVisitor {
    context: SpanContext,
}

impl tracing::field::Visit for SpanContextVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "run_id" => self.context.run_id = Some(value.to_string()),
            "pass" => self.context.pass = Some(value.to_string()),
            "stage" => self.context.stage = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{:?}", value));
    }
}

/// JSONL tracing layer that outputs to stderr.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    /// Create a JSONL layer with a custom writer.
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = SpanContextVisitor {
            context: SpanContext::default(),
        };
        attrs.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let ts = Utc::now();

        let mut inherited = SpanContext::default();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_ctx) = span.extensions().get::<SpanContext>() {
                    if inherited.run_id.is_none() {
                        inherited.run_id.clone_from(&span_ctx.run_id);
                    }
                    if inherited.pass.is_none() {
                        inherited.pass.clone_from(&span_ctx.pass);
                    }
                    if inherited.stage.is_none() {
                        inherited.stage.clone_from(&span_ctx.stage);
                    }
                }
            }
        }

        let mut visitor = JsonFieldVisitor::new();
        event.record(&mut visitor);

        let level: Level = (*event.metadata().level()).into();
        let mut obj = serde_json::Map::new();
        obj.insert("ts".to_string(), serde_json::json!(ts.to_rfc3339()));
        obj.insert("level".to_string(), serde_json::json!(level));
        obj.insert(
            "event".to_string(),
            serde_json::json!(event.metadata().target()),
        );

        // Event fields take precedence over span context.
        for key in CONTEXT_KEYS {
            let own = visitor.fields.remove(*key);
            let from_span = match *key {
                "run_id" => inherited.run_id.take(),
                "pass" => inherited.pass.take(),
                _ => inherited.stage.take(),
            };
            if let Some(value) = own.or_else(|| from_span.map(serde_json::Value::String)) {
                obj.insert(key.to_string(), value);
            }
        }

        if let Some(msg) = visitor.message {
            obj.insert("message".to_string(), serde_json::json!(msg));
        }
        if !visitor.fields.is_empty() {
            obj.insert(
                "fields".to_string(),
                serde_json::Value::Object(visitor.fields),
            );
        }

        let json = serde_json::to_string(&serde_json::Value::Object(obj)).unwrap_or_default();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", json);
        }
    }
}
