//! Wires the instrumentation crates together the way a service would:
//! identity from the environment, correlated JSON logs on stdout, a
//! local-only tracer for span context, and identity-labeled metrics.
//!
//! Try: `SERVICE_NAME=orders SERVICE_ENVIRONMENT=dev LOG_LEVEL=debug cargo run`

use log_correlation::{span, Attribute, AttributeValue, Logger, LoggerConfig};
use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry::Context;
use opentelemetry_sdk::trace::SdkTracerProvider;

fn main() {
    // The pipeline reports its own misbehavior (e.g. reserved-key
    // collisions) through `tracing`; give those diagnostics an output.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = LoggerConfig::from_env();
    let identity = config.identity.clone();
    let logger = Logger::new(config);
    let metrics = metrics_utils::MetricsHandle::new(&identity);

    // No exporter configured: spans stay local but still provide the
    // recording context log correlation needs.
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer("service_integration");

    let requests = metrics
        .int_counter_vec("requests_total", "Handled requests", &["route"])
        .expect("instrument registration");

    let cx = span::start_span(
        &tracer,
        &Context::new(),
        "handle-request",
        &[Attribute::new("route", "/orders")],
    );

    logger.debug(&cx, "parsed request", &[Attribute::new("bytes", 412_i64)]);
    logger.info(
        &cx,
        "order accepted",
        &[
            Attribute::new("order_id", "ord-1042"),
            Attribute::new(
                "queue_depth",
                AttributeValue::lazy(|| AttributeValue::I64(3)),
            ),
        ],
    );
    logger.error(
        &cx,
        "payment lookup failed",
        &std::io::Error::other("connection reset"),
        &[Attribute::new("order_id", "ord-1042")],
    );

    requests.with_label_values(&["/orders"]).inc();
    cx.span().end();

    let rendered = metrics.render_text().expect("metrics exposition");
    println!("{rendered}");
}
