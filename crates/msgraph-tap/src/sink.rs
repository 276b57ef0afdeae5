//! Output of schemas, records and state.
//!
//! [`JsonLinesSink`] writes Singer messages, one JSON object per line.
//! [`MemorySink`] keeps them in memory for tests and embedding.

use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GraphResult, TapState};

/// One output message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        bookmark_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_extracted: Option<String>,
    },
    State {
        value: Value,
    },
}

/// Destination for everything a sync produces.
pub trait Sink: Send {
    fn emit_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[&str],
        bookmark_properties: &[&str],
    ) -> GraphResult<()>;

    fn emit_record(
        &mut self,
        stream: &str,
        record: &Value,
        time_extracted: DateTime<Utc>,
    ) -> GraphResult<()>;

    fn emit_state(&mut self, state: &TapState) -> GraphResult<()>;
}

fn schema_message(
    stream: &str,
    schema: &Value,
    key_properties: &[&str],
    bookmark_properties: &[&str],
) -> Message {
    Message::Schema {
        stream: stream.to_string(),
        schema: schema.clone(),
        key_properties: key_properties.iter().map(|k| (*k).to_string()).collect(),
        bookmark_properties: bookmark_properties.iter().map(|k| (*k).to_string()).collect(),
    }
}

fn record_message(stream: &str, record: &Value, time_extracted: DateTime<Utc>) -> Message {
    Message::Record {
        stream: stream.to_string(),
        record: record.clone(),
        time_extracted: Some(time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true)),
    }
}

/// Writes newline-delimited JSON messages.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl JsonLinesSink<io::Stdout> {
    /// Sink writing to the process's stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, message: &Message) -> GraphResult<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn emit_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[&str],
        bookmark_properties: &[&str],
    ) -> GraphResult<()> {
        self.write(&schema_message(
            stream,
            schema,
            key_properties,
            bookmark_properties,
        ))
    }

    fn emit_record(
        &mut self,
        stream: &str,
        record: &Value,
        time_extracted: DateTime<Utc>,
    ) -> GraphResult<()> {
        self.write(&record_message(stream, record, time_extracted))
    }

    fn emit_state(&mut self, state: &TapState) -> GraphResult<()> {
        self.write(&Message::State {
            value: state.to_value()?,
        })
    }
}

/// Collects messages in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub messages: Vec<Message>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records emitted for `stream`, in order.
    #[must_use]
    pub fn records(&self, stream: &str) -> Vec<&Value> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Record {
                    stream: s, record, ..
                } if s == stream => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Every emitted state value, in order.
    #[must_use]
    pub fn states(&self) -> Vec<&Value> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::State { value } => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Streams a schema was emitted for, in order.
    #[must_use]
    pub fn schema_streams(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Schema { stream, .. } => Some(stream.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Sink for MemorySink {
    fn emit_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[&str],
        bookmark_properties: &[&str],
    ) -> GraphResult<()> {
        self.messages.push(schema_message(
            stream,
            schema,
            key_properties,
            bookmark_properties,
        ));
        Ok(())
    }

    fn emit_record(
        &mut self,
        stream: &str,
        record: &Value,
        time_extracted: DateTime<Utc>,
    ) -> GraphResult<()> {
        self.messages
            .push(record_message(stream, record, time_extracted));
        Ok(())
    }

    fn emit_state(&mut self, state: &TapState) -> GraphResult<()> {
        self.messages.push(Message::State {
            value: state.to_value()?,
        });
        Ok(())
    }
}
