//! The record-processing stages: resource injection, correlation injection,
//! and the terminal JSON sink.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use opentelemetry::Context;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::Level;

use crate::{
    keys,
    record::{LogRecord, RecordHandler},
    span,
    value::{self, Attribute, AttributeValue},
    ServiceIdentity,
};

/// Whether records of `level` receive correlation identifiers.
///
/// `tracing::Level` orders `ERROR` lowest, so "Info or more severe" is a
/// less-or-equal comparison.
fn correlates(level: Level) -> bool {
    level <= Level::INFO
}

/// The stage that rewrites a record's reserved fields and injects static
/// process identity.
///
/// Applied to every record regardless of level: re-stamps the time with the
/// current UTC instant, renames the message key to the configured field
/// name, and prepends the identity attributes captured at construction.
pub struct ResourceAttributeInjector {
    next: Arc<dyn RecordHandler>,
    message_field: String,
    resource: Vec<Attribute>,
}

impl std::fmt::Debug for ResourceAttributeInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAttributeInjector")
            .field("message_field", &self.message_field)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl ResourceAttributeInjector {
    /// Creates the stage, capturing identity, hostname and pid once.
    pub fn new(
        identity: &ServiceIdentity,
        message_field: impl Into<String>,
        next: Arc<dyn RecordHandler>,
    ) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let resource = vec![
            Attribute::new(keys::SERVICE_NAME, identity.service.clone()),
            Attribute::new(keys::ENVIRONMENT, identity.environment.clone()),
            Attribute::new(keys::VERSION, identity.version.clone()),
            Attribute::new(keys::TENANT, identity.tenant.clone()),
            Attribute::new(keys::HOSTNAME, hostname),
            Attribute::new(keys::PID, u64::from(std::process::id())),
        ];
        Self {
            next,
            message_field: message_field.into(),
            resource,
        }
    }
}

impl RecordHandler for ResourceAttributeInjector {
    fn handle(&self, cx: &Context, mut record: LogRecord) {
        record.time = OffsetDateTime::now_utc();
        record.message_key.clone_from(&self.message_field);
        record.attributes.splice(0..0, self.resource.iter().cloned());
        self.next.handle(cx, record);
    }

    fn with_attrs(self: Arc<Self>, attrs: Vec<Attribute>) -> Arc<dyn RecordHandler> {
        Arc::new(Self {
            next: self.next.clone().with_attrs(attrs),
            message_field: self.message_field.clone(),
            resource: self.resource.clone(),
        })
    }

    fn with_group(self: Arc<Self>, name: &str) -> Arc<dyn RecordHandler> {
        Arc::new(Self {
            next: self.next.clone().with_group(name),
            message_field: self.message_field.clone(),
            resource: self.resource.clone(),
        })
    }
}

/// The stage that appends trace/span correlation identifiers to records of
/// Info severity and above.
///
/// Stateless across records: each record either passes through unchanged
/// (severity below Info, or no recording span) or gains exactly the trace id
/// and span id fields.
pub struct TracingDecorator {
    next: Arc<dyn RecordHandler>,
}

impl std::fmt::Debug for TracingDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingDecorator").finish_non_exhaustive()
    }
}

impl TracingDecorator {
    /// Wraps `next` in a correlation stage.
    ///
    /// If `next` is itself a correlation stage the wrapping collapses onto
    /// its inner handler, so accidental double wrapping never injects the
    /// identifiers twice.
    pub fn new(next: Arc<dyn RecordHandler>) -> Self {
        let next = next.correlation_inner().unwrap_or(next);
        Self { next }
    }
}

impl RecordHandler for TracingDecorator {
    fn handle(&self, cx: &Context, mut record: LogRecord) {
        if correlates(record.level) {
            if let Some(ids) = span::extract_correlation(cx) {
                record
                    .attributes
                    .push(Attribute::new(keys::TRACE_ID, ids.trace_id));
                record
                    .attributes
                    .push(Attribute::new(keys::SPAN_ID, ids.span_id));
            }
        }
        self.next.handle(cx, record);
    }

    fn with_attrs(self: Arc<Self>, attrs: Vec<Attribute>) -> Arc<dyn RecordHandler> {
        Arc::new(Self::new(self.next.clone().with_attrs(attrs)))
    }

    fn with_group(self: Arc<Self>, name: &str) -> Arc<dyn RecordHandler> {
        Arc::new(Self::new(self.next.clone().with_group(name)))
    }

    fn correlation_inner(&self) -> Option<Arc<dyn RecordHandler>> {
        Some(self.next.clone())
    }
}

/// The terminal stage: renders each record as one compact JSON line and
/// writes it with a single `write_all` call, so concurrent emissions never
/// interleave within a line.
#[allow(missing_debug_implementations)] // The writer is a `dyn Trait` object
pub struct JsonLineSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    preset: Vec<Attribute>,
    groups: Vec<String>,
}

impl JsonLineSink {
    /// Creates a sink rendering into `writer`.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            preset: Vec::new(),
            groups: Vec::new(),
        }
    }

    fn render(&self, record: &LogRecord) -> Option<Vec<u8>> {
        let mut object = serde_json::Map::new();
        if let Ok(time) = record.time.format(&Rfc3339) {
            object.insert(keys::TIME.to_string(), serde_json::Value::from(time));
        }
        object.insert(
            keys::LEVEL.to_string(),
            serde_json::Value::from(record.level.to_string()),
        );
        object.insert(
            record.message_key.clone(),
            serde_json::Value::from(record.message.as_str()),
        );

        // Preset attributes were qualified with their groups when attached.
        for attribute in &self.preset {
            self.insert_attribute(&mut object, record, attribute, &[]);
        }
        for attribute in &record.attributes {
            self.insert_attribute(&mut object, record, attribute, &self.groups);
        }

        serde_json::to_vec(&serde_json::Value::Object(object)).ok()
    }

    fn insert_attribute(
        &self,
        object: &mut serde_json::Map<String, serde_json::Value>,
        record: &LogRecord,
        attribute: &Attribute,
        groups: &[String],
    ) {
        if groups.is_empty() && self.is_reserved(record, &attribute.key) {
            tracing::warn!(
                "Attempting to log a reserved key `{}` (value: `{:?}`). Skipping.",
                attribute.key,
                attribute.value
            );
            return;
        }
        // A value that cannot serialize is omitted, never surfaced.
        let Ok(json) = value::to_json(&attribute.value, 0) else {
            return;
        };
        let Some((outermost, rest)) = groups.split_first() else {
            insert_merged(object, &attribute.key, json);
            return;
        };
        let mut nested = serde_json::Value::Object(serde_json::Map::from_iter([(
            attribute.key.clone(),
            json,
        )]));
        for group in rest.iter().rev() {
            nested = serde_json::Value::Object(serde_json::Map::from_iter([(
                group.clone(),
                nested,
            )]));
        }
        insert_merged(object, outermost, nested);
    }

    fn is_reserved(&self, record: &LogRecord, key: &str) -> bool {
        keys::RESERVED_KEYS.contains(key) || key == record.message_key
    }
}

impl RecordHandler for JsonLineSink {
    fn handle(&self, _cx: &Context, record: LogRecord) {
        let Some(mut line) = self.render(&record) else {
            return;
        };
        line.push(b'\n');
        // Lock poisoning and I/O failures are swallowed: the sink must never
        // fail the emitting caller.
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.write_all(&line);
        }
    }

    fn with_attrs(self: Arc<Self>, attrs: Vec<Attribute>) -> Arc<dyn RecordHandler> {
        let mut preset = self.preset.clone();
        preset.extend(qualify(&self.groups, attrs));
        Arc::new(Self {
            writer: self.writer.clone(),
            preset,
            groups: self.groups.clone(),
        })
    }

    fn with_group(self: Arc<Self>, name: &str) -> Arc<dyn RecordHandler> {
        if name.is_empty() {
            return self;
        }
        let mut groups = self.groups.clone();
        groups.push(name.to_string());
        Arc::new(Self {
            writer: self.writer.clone(),
            preset: self.preset.clone(),
            groups,
        })
    }
}

/// Wraps `attrs` into the nested group chain described by `groups`.
fn qualify(groups: &[String], attrs: Vec<Attribute>) -> Vec<Attribute> {
    let mut wrapped = attrs;
    for group in groups.iter().rev() {
        wrapped = vec![Attribute::new(
            group.clone(),
            AttributeValue::Group(wrapped),
        )];
    }
    wrapped
}

/// Inserts `value` under `key`, deep-merging JSON objects so grouped
/// attributes attached through separate stages land in one object.
fn insert_merged(
    object: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    value: serde_json::Value,
) {
    match (object.get_mut(key), value) {
        (Some(serde_json::Value::Object(existing)), serde_json::Value::Object(incoming)) => {
            for (nested_key, nested_value) in incoming {
                insert_merged(existing, &nested_key, nested_value);
            }
        }
        (_, value) => {
            object.insert(key.to_string(), value);
        }
    }
}
