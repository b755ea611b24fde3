//! The in-flight log record and the stage contract the pipeline is composed
//! from.

use std::sync::Arc;

use opentelemetry::Context;
use time::OffsetDateTime;
use tracing::Level;

use crate::value::Attribute;

/// Key under which a record's message renders unless a stage renames it.
pub const DEFAULT_MESSAGE_KEY: &str = "message";

/// One leveled log emission flowing through the pipeline.
///
/// Created by the facade, mutated in place by each stage, terminal once the
/// sink has rendered it.
#[derive(Clone, Debug)]
pub struct LogRecord {
    /// Emission time; re-stamped by the resource stage.
    pub time: OffsetDateTime,

    /// Record severity.
    pub level: Level,

    /// The log message.
    pub message: String,

    /// Key under which the message renders; stages may rename it.
    pub message_key: String,

    /// Ordered attribute sequence. Order is part of the record's contract
    /// and survives into the rendered output.
    pub attributes: Vec<Attribute>,
}

impl LogRecord {
    /// Creates a record stamped with the current UTC time.
    pub fn new(level: Level, message: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            time: OffsetDateTime::now_utc(),
            level,
            message: message.into(),
            message_key: DEFAULT_MESSAGE_KEY.to_string(),
            attributes,
        }
    }
}

/// A stage in the record-processing chain.
///
/// Stages receive a record, may mutate or enrich it, and forward it to the
/// next stage; the terminal stage renders it. Handlers are immutable after
/// construction and safe to share across threads; the wrapping operations
/// return new instances instead of mutating.
pub trait RecordHandler: Send + Sync {
    /// Processes one record. `cx` carries the ambient span, if any.
    fn handle(&self, cx: &Context, record: LogRecord);

    /// Returns a handler that attaches `attrs` to every record passing
    /// through it.
    fn with_attrs(self: Arc<Self>, attrs: Vec<Attribute>) -> Arc<dyn RecordHandler>;

    /// Returns a handler that nests subsequently attached attributes under
    /// the group `name`.
    fn with_group(self: Arc<Self>, name: &str) -> Arc<dyn RecordHandler>;

    /// The handler wrapped by a correlation stage, if this handler is one.
    ///
    /// Wrapping an already-correlation-decorated handler in another
    /// correlation stage must collapse to a single stage; exposing the inner
    /// handler here lets the constructor flatten instead of nesting.
    fn correlation_inner(&self) -> Option<Arc<dyn RecordHandler>> {
        None
    }
}
