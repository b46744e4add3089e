//! Tracing capability for the orchestration engine.
//!
//! The engine and orchestrators record spans through the [`Tracer`] trait so
//! that applications can bridge to whatever telemetry backend they run
//! (OpenTelemetry, a test recorder, nothing at all). Two implementations
//! ship with the crate:
//!
//! - [`NoopTracer`] — discards everything; the engine accepts it without any
//!   behavioral change.
//! - [`LogTracer`] — mirrors span lifecycles onto the `log` facade at debug
//!   level, which is enough visibility for development runs.
//!
//! Spans nest pattern → round → agent; the engine opens the root
//! `workflow.execute` span and orchestrators open children per round and per
//! agent call.

use std::error::Error;

/// An open span. Attributes may be set at any point before [`Span::end`].
pub trait Span: Send + Sync {
    /// Attach a key/value attribute to the span.
    fn set_attribute(&self, key: &str, value: &str);

    /// Record an error against the span.
    fn record_error(&self, err: &dyn Error);

    /// Close the span. Implementations should tolerate `end` never being
    /// called (a dropped span simply goes unreported).
    fn end(&self);
}

/// Capability for starting spans.
pub trait Tracer: Send + Sync {
    /// Start a span with the given name.
    fn start_span(&self, name: &str) -> Box<dyn Span>;
}

/// Tracer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&self, _key: &str, _value: &str) {}
    fn record_error(&self, _err: &dyn Error) {}
    fn end(&self) {}
}

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// Tracer that mirrors span lifecycles onto the `log` facade.
///
/// # Examples
///
/// ```
/// use quorum::quorum::trace::{LogTracer, Tracer};
///
/// let tracer = LogTracer;
/// let span = tracer.start_span("workflow.execute");
/// span.set_attribute("pattern.type", "debate");
/// span.end();
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

struct LogSpan {
    name: String,
}

impl Span for LogSpan {
    fn set_attribute(&self, key: &str, value: &str) {
        log::debug!("span '{}': {}={}", self.name, key, value);
    }

    fn record_error(&self, err: &dyn Error) {
        log::debug!("span '{}': error: {}", self.name, err);
    }

    fn end(&self) {
        log::debug!("span '{}' ended", self.name);
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, name: &str) -> Box<dyn Span> {
        log::debug!("span '{}' started", name);
        Box::new(LogSpan {
            name: name.to_string(),
        })
    }
}
