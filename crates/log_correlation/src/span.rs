//! The bridge between the record pipeline and the ambient trace span.
//!
//! Every operation here is a no-op when the span is not recording —
//! non-recording spans represent "no tracing configured" and must never
//! panic or allocate beyond the check itself. Span mutation relies on the
//! OpenTelemetry implementation being safe for concurrent use; this module
//! adds no locking of its own.

use std::borrow::Cow;

use opentelemetry::{
    trace::{Span, SpanRef, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};

use crate::{
    caller,
    value::{self, Attribute, AttributeValue},
};

/// The identifier pair linking a log record to the span active when it was
/// emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationIds {
    /// Hex-encoded trace id, 32 characters.
    pub trace_id: String,

    /// Hex-encoded span id, 16 characters.
    pub span_id: String,
}

/// Returns the ambient span, or a non-recording placeholder if the context
/// carries none. Never absent.
pub fn current_span(cx: &Context) -> SpanRef<'_> {
    cx.span()
}

/// Extracts correlation identifiers from the ambient span.
///
/// Returns `Some` iff the span is recording and its context carries valid
/// trace and span ids.
pub fn extract_correlation(cx: &Context) -> Option<CorrelationIds> {
    let span = cx.span();
    if !span.is_recording() {
        return None;
    }
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return None;
    }
    Some(CorrelationIds {
        trace_id: span_context.trace_id().to_string(),
        span_id: span_context.span_id().to_string(),
    })
}

/// Marks the ambient span errored: sets its status to [`Status::Error`] with
/// the error's message and records the error event. No-op if the span is not
/// recording.
pub fn mark_errored(cx: &Context, error: &dyn std::error::Error) {
    let span = cx.span();
    if !span.is_recording() {
        return;
    }
    span.set_status(Status::error(error.to_string()));
    span.record_error(error);
}

/// Mirrors `value` onto the ambient span as a JSON-serialized string
/// attribute under `key`.
///
/// No-op if the span is not recording; a value that fails to serialize is
/// omitted rather than surfaced.
pub fn attach_attribute(cx: &Context, key: &str, value: &AttributeValue) {
    let span = cx.span();
    if !span.is_recording() {
        return;
    }
    if let Ok(serialized) = value::serialize(value) {
        span.set_attribute(KeyValue::new(key.to_string(), serialized));
    }
}

/// Starts a child span of the ambient context carrying call-site attributes
/// and `metadata`, and returns a context with the new span installed.
///
/// The caller is resolved at a fixed depth above this function; see
/// [`crate::caller`] for the drift guard.
#[inline(never)]
pub fn start_span<T>(
    tracer: &T,
    cx: &Context,
    name: impl Into<Cow<'static, str>>,
    metadata: &[Attribute],
) -> Context
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    let resolved = caller::resolve(caller::SPAN_START_SKIP_FRAMES);
    let mut span = tracer.start_with_context(name, cx);
    if span.is_recording() {
        span.set_attribute(KeyValue::new(crate::keys::CODE_FILEPATH, resolved.file_path));
        span.set_attribute(KeyValue::new(
            crate::keys::CODE_LINENO,
            i64::from(resolved.line_number),
        ));
        span.set_attribute(KeyValue::new(crate::keys::CODE_FUNCTION, resolved.function_name));
        span.set_attribute(KeyValue::new(crate::keys::CODE_NAMESPACE, resolved.namespace));
        for attribute in metadata {
            if let Ok(serialized) = value::serialize(&attribute.value) {
                span.set_attribute(KeyValue::new(attribute.key.clone(), serialized));
            }
        }
    }
    cx.with_span(span)
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use pretty_assertions::assert_eq;

    use super::*;

    fn test_tracer() -> (InMemorySpanExporter, SdkTracerProvider) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (exporter, provider)
    }

    #[test]
    fn contexts_without_spans_yield_a_non_recording_placeholder() {
        let cx = Context::new();
        assert!(!current_span(&cx).is_recording());
        assert_eq!(extract_correlation(&cx), None);
    }

    #[test]
    fn span_mutation_is_a_no_op_without_a_recording_span() {
        let cx = Context::new();
        // Must neither panic nor fail.
        mark_errored(&cx, &std::io::Error::other("boom"));
        attach_attribute(&cx, "metadata", &AttributeValue::Group(Vec::new()));
    }

    #[test]
    fn correlation_ids_match_the_recording_span() {
        let (_exporter, provider) = test_tracer();
        let tracer = provider.tracer("test");
        let span = tracer.start_with_context("op", &Context::new());
        let cx = Context::new().with_span(span);

        let ids = extract_correlation(&cx).expect("recording span should correlate");
        let span_context = cx.span().span_context().clone();
        assert_eq!(ids.trace_id, span_context.trace_id().to_string());
        assert_eq!(ids.span_id, span_context.span_id().to_string());
        assert_eq!(ids.trace_id.len(), 32);
        assert_eq!(ids.span_id.len(), 16);
    }

    #[test]
    fn mark_errored_sets_status_and_records_the_event() {
        let (exporter, provider) = test_tracer();
        let tracer = provider.tracer("test");
        let span = tracer.start_with_context("op", &Context::new());
        let cx = Context::new().with_span(span);

        mark_errored(&cx, &std::io::Error::other("x"));
        cx.span().end();

        let spans = exporter.get_finished_spans().expect("finished spans");
        let span = spans.first().expect("one span");
        match &span.status {
            Status::Error { description } => assert_eq!(description.as_ref(), "x"),
            other => panic!("expected error status, got {other:?}"),
        }
        assert!(
            span.events.events.iter().any(|event| event.name == "exception"),
            "expected an exception event"
        );
    }

    #[test]
    fn attach_attribute_serializes_to_a_string_span_attribute() {
        let (exporter, provider) = test_tracer();
        let tracer = provider.tracer("test");
        let span = tracer.start_with_context("op", &Context::new());
        let cx = Context::new().with_span(span);

        let group = AttributeValue::Group(vec![Attribute::new("key1", "value1")]);
        attach_attribute(&cx, "metadata", &group);
        // A value that cannot serialize is omitted, not surfaced.
        attach_attribute(&cx, "bad", &AttributeValue::F64(f64::NAN));
        cx.span().end();

        let spans = exporter.get_finished_spans().expect("finished spans");
        let span = spans.first().expect("one span");
        let metadata = span
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == "metadata")
            .expect("metadata attribute");
        assert_eq!(metadata.value.as_str(), r#"{"key1":"value1"}"#);
        assert!(!span.attributes.iter().any(|kv| kv.key.as_str() == "bad"));
    }

    #[inline(never)]
    fn start_probe_span<T>(tracer: &T) -> Context
    where
        T: Tracer,
        T::Span: Send + Sync + 'static,
    {
        start_span(tracer, &Context::new(), "probe-op", &[Attribute::new("kind", "probe")])
    }

    #[test]
    fn started_spans_carry_call_site_and_metadata_attributes() {
        let (exporter, provider) = test_tracer();
        let tracer = provider.tracer("test");

        let cx = start_probe_span(&tracer);
        cx.span().end();

        let spans = exporter.get_finished_spans().expect("finished spans");
        let span = spans.first().expect("one span");
        let attribute = |key: &str| {
            span.attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .unwrap_or_else(|| panic!("missing attribute {key}"))
                .value
                .clone()
        };
        assert_eq!(attribute("code.function").as_str(), "start_probe_span");
        assert_eq!(attribute("kind").as_str(), "\"probe\"");
        assert!(attribute("code.filepath").as_str().ends_with("span.rs"));
    }
}
