//! Assembly of the attribute sequence for one emission.

use opentelemetry::Context;

use crate::{
    caller, keys, span,
    value::{Attribute, AttributeValue},
};

/// Builds the ordered attribute sequence for one emission: four call-site
/// attributes, the `metadata` group (always present, even when empty), and
/// the `error` attribute iff an error was supplied.
///
/// Side effects, in order: when `inject_span_metadata` is set the metadata
/// group is mirrored onto the ambient span *before* the error attribute is
/// computed, and a supplied error always marks the span errored, whether or
/// not injection is enabled.
#[inline(never)]
pub(crate) fn build_attributes(
    cx: &Context,
    skip_frames: usize,
    metadata: &[Attribute],
    error: Option<&dyn std::error::Error>,
    inject_span_metadata: bool,
) -> Vec<Attribute> {
    let resolved = caller::resolve(skip_frames);

    let mut attributes = Vec::with_capacity(6);
    attributes.push(Attribute::new(keys::CODE_FILEPATH, resolved.file_path));
    attributes.push(Attribute::new(
        keys::CODE_LINENO,
        i64::from(resolved.line_number),
    ));
    attributes.push(Attribute::new(keys::CODE_FUNCTION, resolved.function_name));
    attributes.push(Attribute::new(keys::CODE_NAMESPACE, resolved.namespace));

    let metadata_group = AttributeValue::Group(metadata.to_vec());
    if inject_span_metadata {
        span::attach_attribute(cx, keys::METADATA, &metadata_group);
    }
    attributes.push(Attribute::new(keys::METADATA, metadata_group));

    if let Some(error) = error {
        span::mark_errored(cx, error);
        attributes.push(Attribute::new(keys::ERROR, error.to_string()));
    }

    attributes
}

#[cfg(test)]
mod tests {
    use opentelemetry::{
        trace::{Status, TraceContextExt, Tracer, TracerProvider as _},
        Context,
    };
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn yields_five_attributes_without_an_error() {
        let attributes = build_attributes(&Context::new(), 1, &[], None, true);
        assert_eq!(attributes.len(), 5);
        let keys: Vec<&str> = attributes.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "code.filepath",
                "code.lineno",
                "code.function",
                "code.namespace",
                "metadata"
            ]
        );
    }

    #[test]
    fn a_supplied_error_appends_exactly_one_attribute() {
        let error = std::io::Error::other("x");
        let attributes = build_attributes(&Context::new(), 1, &[], Some(&error), true);
        assert_eq!(attributes.len(), 6);
        let last = attributes.last().expect("error attribute");
        assert_eq!(last.key, "error");
        assert!(matches!(&last.value, AttributeValue::String(message) if message == "x"));
    }

    #[test]
    fn the_metadata_group_is_emitted_even_when_empty() {
        let attributes = build_attributes(&Context::new(), 1, &[], None, false);
        let metadata = attributes.iter().find(|a| a.key == "metadata").expect("metadata");
        assert!(matches!(&metadata.value, AttributeValue::Group(members) if members.is_empty()));
    }

    #[test]
    fn no_error_leaves_the_span_status_unset() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer("test");
        let span = tracer.start_with_context("op", &Context::new());
        let cx = Context::new().with_span(span);

        build_attributes(&cx, 1, &[], None, true);
        cx.span().end();

        let spans = exporter.get_finished_spans().expect("finished spans");
        assert_eq!(spans.first().expect("one span").status, Status::Unset);
    }

    #[test]
    fn metadata_mirrors_onto_the_span_only_when_injection_is_enabled() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer("test");

        for (inject, expected) in [(true, true), (false, false)] {
            let span = tracer.start_with_context("op", &Context::new());
            let cx = Context::new().with_span(span);
            build_attributes(&cx, 1, &[Attribute::new("k", "v")], None, inject);
            cx.span().end();

            let spans = exporter.get_finished_spans().expect("finished spans");
            let mirrored = spans
                .last()
                .expect("one span")
                .attributes
                .iter()
                .any(|kv| kv.key.as_str() == "metadata");
            assert_eq!(mirrored, expected, "inject = {inject}");
        }
    }

    #[test]
    fn an_error_marks_the_span_even_with_injection_disabled() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer("test");
        let span = tracer.start_with_context("op", &Context::new());
        let cx = Context::new().with_span(span);

        let error = std::io::Error::other("boom");
        build_attributes(&cx, 1, &[], Some(&error), false);
        cx.span().end();

        let spans = exporter.get_finished_spans().expect("finished spans");
        assert!(matches!(
            spans.first().expect("one span").status,
            Status::Error { .. }
        ));
    }
}
