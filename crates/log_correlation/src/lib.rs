//! `log_correlation` provides structured JSON logging bound to distributed
//! trace context.
//!
//! It offers:
//! - A [`Logger`] facade with `debug`/`info`/`warn`/`error` entry points that
//!   resolve the originating call site and emit one JSON line per call.
//! - A decorator pipeline ([`ResourceAttributeInjector`] →
//!   [`TracingDecorator`] → [`JsonLineSink`]) that stamps process identity
//!   onto every record and correlation identifiers onto records of Info
//!   severity and above.
//! - A [`span`] bridge that mirrors log metadata onto the active span and
//!   flags it on errors, so logs and traces stay linked.
//!
//! No entry point can panic or return an error: a malformed attribute,
//! absent span, or serialization failure degrades to an omitted attribute or
//! field, never to a failed log call. The pipeline holds no mutable state
//! beyond the sink's writer, so a [`Logger`] is safe to share across
//! threads.
//!
//! # Example
//!
//! ```
//! use log_correlation::{Attribute, Logger, LoggerConfig};
//! use opentelemetry::Context;
//!
//! let logger = Logger::new(LoggerConfig::default());
//! let cx = Context::new();
//!
//! logger.info(&cx, "user created", &[Attribute::new("user_id", 42_i64)]);
//! logger.error(
//!     &cx,
//!     "lookup failed",
//!     &std::io::Error::other("connection reset"),
//!     &[],
//! );
//! ```

mod attrs;
mod caller;
mod pipeline;
mod record;
pub mod span;
mod value;

use std::{io::Write, sync::Arc};

use opentelemetry::Context;
pub use tracing::Level;

pub use self::{
    pipeline::{JsonLineSink, ResourceAttributeInjector, TracingDecorator},
    record::{LogRecord, RecordHandler, DEFAULT_MESSAGE_KEY},
    value::{serialize, Attribute, AttributeValue, SerializeError, MAX_LAZY_DEPTH},
};

pub(crate) mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashSet;

    pub(crate) const TIME: &str = "time";
    pub(crate) const LEVEL: &str = "level";
    pub(crate) const SERVICE_NAME: &str = "service.name";
    pub(crate) const ENVIRONMENT: &str = "deployment.environment";
    pub(crate) const VERSION: &str = "service.version";
    pub(crate) const TENANT: &str = "service.tenant";
    pub(crate) const HOSTNAME: &str = "host.name";
    pub(crate) const PID: &str = "process.pid";
    pub(crate) const CODE_FILEPATH: &str = "code.filepath";
    pub(crate) const CODE_LINENO: &str = "code.lineno";
    pub(crate) const CODE_FUNCTION: &str = "code.function";
    pub(crate) const CODE_NAMESPACE: &str = "code.namespace";
    pub(crate) const METADATA: &str = "metadata";
    pub(crate) const TRACE_ID: &str = "dd.trace_id";
    pub(crate) const SPAN_ID: &str = "dd.span_id";
    pub(crate) const ERROR: &str = "error";

    pub(crate) static RESERVED_KEYS: LazyLock<FxHashSet<&'static str>> =
        LazyLock::new(|| [TIME, LEVEL].iter().copied().collect());
}

/// Environment variable names read by [`LoggerConfig::from_env`].
mod env {
    pub(crate) const LOG_LEVEL: &str = "LOG_LEVEL";
    pub(crate) const SERVICE_NAME: &str = "SERVICE_NAME";
    pub(crate) const SERVICE_ENVIRONMENT: &str = "SERVICE_ENVIRONMENT";
    pub(crate) const SERVICE_VERSION: &str = "SERVICE_VERSION";
    pub(crate) const SERVICE_TENANT: &str = "SERVICE_TENANT";
}

/// Static process identity attached to every emitted record.
///
/// Empty fields are not an error; they inject as empty strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Logical service name.
    pub service: String,

    /// Deployment environment (e.g. `production`, `staging`).
    pub environment: String,

    /// Service version.
    pub version: String,

    /// Tenant the process serves.
    pub tenant: String,
}

/// Configuration for constructing a [`Logger`].
#[derive(Clone, Debug)]
pub struct LoggerConfig {
    /// Identity fields injected into every record.
    pub identity: ServiceIdentity,

    /// Minimum severity; records below it are dropped before attribute
    /// building.
    pub level: Level,

    /// Field name the record's message renders under.
    pub message_field: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            identity: ServiceIdentity::default(),
            level: Level::INFO,
            message_field: DEFAULT_MESSAGE_KEY.to_string(),
        }
    }
}

impl LoggerConfig {
    /// Reads configuration from the environment, once, at construction time.
    ///
    /// Recognized variables: `LOG_LEVEL` (`debug`/`info`/`warn`/`error`,
    /// case-insensitive; invalid or missing values fall back to `info`),
    /// `SERVICE_NAME`, `SERVICE_ENVIRONMENT`, `SERVICE_VERSION` and
    /// `SERVICE_TENANT` (missing values default to the empty string).
    pub fn from_env() -> Self {
        let level = std::env::var(env::LOG_LEVEL)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Level::INFO);
        let identity = ServiceIdentity {
            service: var_or_empty(env::SERVICE_NAME),
            environment: var_or_empty(env::SERVICE_ENVIRONMENT),
            version: var_or_empty(env::SERVICE_VERSION),
            tenant: var_or_empty(env::SERVICE_TENANT),
        };
        Self {
            identity,
            level,
            message_field: DEFAULT_MESSAGE_KEY.to_string(),
        }
    }
}

fn var_or_empty(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

/// The logging facade.
///
/// Each entry point assembles call-site and metadata attributes, mutates the
/// ambient span where applicable, and dispatches the record through the
/// composed pipeline. Construct once at startup and pass by reference; all
/// state is immutable after construction.
#[allow(missing_debug_implementations)] // The pipeline is a `dyn Trait` chain
pub struct Logger {
    handler: Arc<dyn RecordHandler>,
    min_level: Level,
}

impl Logger {
    /// Creates a logger writing JSON lines to standard output.
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_writer(config, Box::new(std::io::stdout()))
    }

    /// Creates a logger writing JSON lines to `writer`.
    pub fn with_writer(config: LoggerConfig, writer: Box<dyn Write + Send>) -> Self {
        let sink: Arc<dyn RecordHandler> = Arc::new(JsonLineSink::new(writer));
        let correlated: Arc<dyn RecordHandler> = Arc::new(TracingDecorator::new(sink));
        let handler: Arc<dyn RecordHandler> = Arc::new(ResourceAttributeInjector::new(
            &config.identity,
            config.message_field,
            correlated,
        ));
        Self {
            handler,
            min_level: config.level,
        }
    }

    /// Whether records of `level` would be emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.min_level
    }

    /// Emits a Debug record. Debug records neither mirror metadata onto the
    /// span nor carry correlation identifiers.
    #[inline(never)]
    pub fn debug(&self, cx: &Context, message: &str, metadata: &[Attribute]) {
        self.emit(cx, Level::DEBUG, message, metadata, None, false);
    }

    /// Emits an Info record.
    #[inline(never)]
    pub fn info(&self, cx: &Context, message: &str, metadata: &[Attribute]) {
        self.emit(cx, Level::INFO, message, metadata, None, true);
    }

    /// Emits a Warn record.
    #[inline(never)]
    pub fn warn(&self, cx: &Context, message: &str, metadata: &[Attribute]) {
        self.emit(cx, Level::WARN, message, metadata, None, true);
    }

    /// Emits an Error record carrying `error`, and marks the ambient span
    /// errored if it is recording.
    #[inline(never)]
    pub fn error(
        &self,
        cx: &Context,
        message: &str,
        error: &dyn std::error::Error,
        metadata: &[Attribute],
    ) {
        self.emit(cx, Level::ERROR, message, metadata, Some(error), true);
    }

    // Caller resolution counts frames through this function; inserting a new
    // hop between the public methods and `build_attributes` requires bumping
    // `caller::LOG_CALL_SKIP_FRAMES`.
    #[inline(never)]
    fn emit(
        &self,
        cx: &Context,
        level: Level,
        message: &str,
        metadata: &[Attribute],
        error: Option<&dyn std::error::Error>,
        inject_span_metadata: bool,
    ) {
        if !self.enabled(level) {
            return;
        }
        let attributes = attrs::build_attributes(
            cx,
            caller::LOG_CALL_SKIP_FRAMES,
            metadata,
            error,
            inject_span_metadata,
        );
        self.handler.handle(cx, LogRecord::new(level, message, attributes));
    }
}
