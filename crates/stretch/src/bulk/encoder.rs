//! 📡 Bulk encoder: formatting documents for the bulk API's peculiar tastes.
//!
//! The bulk API has rules:
//! Rule 1: Two lines per document. Action metadata, then document source. Always.
//! Rule 2: Newline-delimited. Not comma-separated. Not XML. NEWLINES.
//! Rule 3: Every line ends in `\n`, including the last one. It MATTERS.
//!
//! 🧠 Knowledge graph:
//! - `BulkDocument` + `Payload` in, `Vec<u8>` (one encoded action) out.
//! - Action line: `{"index":{"_index":..,"_type":..,"_id":..[,"_timestamp":"<ms>"]}}`
//! - Payload line: raw bytes / text verbatim, JSON through serde_json.
//! - `decode_actions` walks a finished bulk body back into pairs with memchr. 🦆

use std::time::{SystemTime, UNIX_EPOCH};

use memchr::memchr;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StretchError};

/// 📦 What a document carries as its body. Closed set, exhaustively matched.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Bytes copied verbatim. Assumed to already be one valid JSON line.
    Raw(Vec<u8>),
    /// Pre-formed text, copied verbatim.
    Text(String),
    /// A JSON value, written by serde_json.
    Json(serde_json::Value),
}

impl Payload {
    /// 🔄 Serialize anything serde can handle into a `Payload::Json`.
    ///
    /// 💀 Fails with [`StretchError::Encoding`] when serde_json says no
    /// (non-string map keys, a `Serialize` impl that errors, ...).
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(StretchError::Encoding)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(bytes)
    }
}

/// 🎯 One document headed for the bulk endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub timestamp: Option<SystemTime>,
    pub payload: Payload,
}

impl BulkDocument {
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            id: id.into(),
            timestamp: None,
            payload: payload.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

// 🔧 Field order here IS the wire order. serde_json keeps declaration order.
#[derive(Serialize)]
struct ActionLine<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type")]
    doc_type: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
    #[serde(rename = "_timestamp", skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// ⏱️ Milliseconds since the epoch. Pre-1970 instants come out negative, as they should.
pub(crate) fn epoch_millis(timestamp: SystemTime) -> i64 {
    match timestamp.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// 🔄 Encode one document as an `index` bulk action: metadata line + payload line.
///
/// The output always ends in exactly two `\n` of our own making, one per line.
pub fn encode_action(doc: &BulkDocument) -> Result<Vec<u8>> {
    let action = ActionLine {
        index: ActionMeta {
            index: &doc.index,
            doc_type: &doc.doc_type,
            id: &doc.id,
            timestamp: doc.timestamp.map(|ts| epoch_millis(ts).to_string()),
        },
    };

    let mut encoded = Vec::with_capacity(128);
    serde_json::to_writer(&mut encoded, &action).map_err(StretchError::Encoding)?;
    encoded.push(b'\n');

    match &doc.payload {
        Payload::Raw(bytes) => encoded.extend_from_slice(bytes),
        Payload::Text(text) => encoded.extend_from_slice(text.as_bytes()),
        Payload::Json(value) => {
            serde_json::to_writer(&mut encoded, value).map_err(StretchError::Encoding)?
        }
    }
    encoded.push(b'\n');

    Ok(encoded)
}

/// 📦 One (metadata, payload) pair pulled back out of a bulk body.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAction {
    pub action: String,
    pub index: Option<String>,
    pub doc_type: Option<String>,
    pub id: Option<String>,
    pub timestamp_millis: Option<i64>,
    pub payload: Vec<u8>,
}

impl DecodedAction {
    /// 🔍 Parse the payload line as JSON.
    pub fn payload_json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.payload).map_err(|err| StretchError::Decode(err.to_string()))
    }
}

#[derive(Deserialize)]
struct DecodedMeta {
    #[serde(rename = "_index")]
    index: Option<String>,
    #[serde(rename = "_type")]
    doc_type: Option<String>,
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(rename = "_timestamp")]
    timestamp: Option<String>,
}

/// 🔍 Walk a bulk body back into its actions, two lines at a time.
///
/// Blank lines between pairs are skipped. A metadata line with no payload line
/// after it is a [`StretchError::Decode`].
pub fn decode_actions(body: &[u8]) -> Result<Vec<DecodedAction>> {
    let mut lines = NdjsonLines { rest: body };
    let mut actions = Vec::new();

    while let Some(meta_line) = lines.next_non_empty() {
        let payload = lines.next().ok_or_else(|| {
            StretchError::Decode(format!(
                "bulk body ends after a metadata line with no payload: {}",
                String::from_utf8_lossy(meta_line)
            ))
        })?;

        let parsed: std::collections::BTreeMap<String, DecodedMeta> =
            serde_json::from_slice(meta_line).map_err(|err| StretchError::Decode(err.to_string()))?;
        let (action, meta) = parsed.into_iter().next().ok_or_else(|| {
            StretchError::Decode("bulk metadata line names no action".to_string())
        })?;

        let timestamp_millis = match meta.timestamp {
            Some(raw) => Some(raw.parse::<i64>().map_err(|err| {
                StretchError::Decode(format!("bad _timestamp '{raw}': {err}"))
            })?),
            None => None,
        };

        actions.push(DecodedAction {
            action,
            index: meta.index,
            doc_type: meta.doc_type,
            id: meta.id,
            timestamp_millis,
            payload: payload.to_vec(),
        });
    }

    Ok(actions)
}

// 🔍 memchr-powered line splitter. A trailing line without '\n' still counts.
struct NdjsonLines<'a> {
    rest: &'a [u8],
}

impl<'a> NdjsonLines<'a> {
    fn next_non_empty(&mut self) -> Option<&'a [u8]> {
        loop {
            let line = self.next()?;
            if !line.iter().all(u8::is_ascii_whitespace) {
                return Some(line);
            }
        }
    }
}

impl<'a> Iterator for NdjsonLines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let line = match memchr(b'\n', self.rest) {
            Some(newline) => {
                let line = &self.rest[..newline];
                self.rest = &self.rest[newline + 1..];
                line
            }
            None => std::mem::take(&mut self.rest),
        };
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn the_one_where_the_action_line_has_the_exact_wire_shape() -> Result<()> {
        let doc = BulkDocument::new("test", "type1", "1", json!({"user": "kimchy"}));
        let encoded = encode_action(&doc)?;
        assert_eq!(
            String::from_utf8(encoded).expect("utf8"),
            "{\"index\":{\"_index\":\"test\",\"_type\":\"type1\",\"_id\":\"1\"}}\n{\"user\":\"kimchy\"}\n"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_timestamps_become_epoch_millis_strings() -> Result<()> {
        let when = UNIX_EPOCH + Duration::from_millis(1_357_000_000_123);
        let doc = BulkDocument::new("logs", "event", "a", "{}").with_timestamp(when);
        let encoded = String::from_utf8(encode_action(&doc)?).expect("utf8");
        assert!(
            encoded.starts_with(
                "{\"index\":{\"_index\":\"logs\",\"_type\":\"event\",\"_id\":\"a\",\"_timestamp\":\"1357000000123\"}}\n"
            ),
            "got {encoded}"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_raw_and_text_payloads_are_copied_verbatim() -> Result<()> {
        // 🧪 not valid JSON, on purpose. Verbatim means verbatim.
        let raw = BulkDocument::new("i", "t", "1", b"{\"already\": \"json\" }".to_vec());
        let text = BulkDocument::new("i", "t", "2", "just a line");
        let raw_encoded = encode_action(&raw)?;
        let text_encoded = encode_action(&text)?;
        assert!(raw_encoded.ends_with(b"\n{\"already\": \"json\" }\n"));
        assert!(text_encoded.ends_with(b"\njust a line\n"));
        Ok(())
    }

    #[test]
    fn the_one_where_every_action_ends_in_two_line_breaks() -> Result<()> {
        let encoded = encode_action(&BulkDocument::new("i", "t", "1", json!(42)))?;
        assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 2);
        assert_eq!(encoded.last(), Some(&b'\n'));
        Ok(())
    }

    #[test]
    fn the_one_where_quotes_in_ids_do_not_break_the_json() -> Result<()> {
        let encoded = encode_action(&BulkDocument::new("i", "t", "say \"cheese\"", json!({})))?;
        let decoded = decode_actions(&encoded)?;
        assert_eq!(decoded[0].id.as_deref(), Some("say \"cheese\""));
        Ok(())
    }

    #[test]
    fn the_one_where_non_string_map_keys_are_an_encoding_error() {
        let mut naughty: HashMap<(u8, u8), u8> = HashMap::new();
        naughty.insert((1, 2), 3);
        let err = Payload::json(&naughty).expect_err("💀 tuple keys are not JSON");
        assert!(matches!(err, StretchError::Encoding(_)));
    }

    #[test]
    fn the_one_where_encoding_round_trips_through_decode() -> Result<()> {
        let original = json!({"actor": "a*", "forks": 101, "tags": ["x", "y"]});
        let when = UNIX_EPOCH + Duration::from_millis(42);
        let mut body = encode_action(
            &BulkDocument::new("github", "PushEvent", "7", original.clone()).with_timestamp(when),
        )?;
        body.extend(encode_action(&BulkDocument::new("github", "PushEvent", "8", "{}"))?);

        let decoded = decode_actions(&body)?;
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].action, "index");
        assert_eq!(decoded[0].index.as_deref(), Some("github"));
        assert_eq!(decoded[0].doc_type.as_deref(), Some("PushEvent"));
        assert_eq!(decoded[0].id.as_deref(), Some("7"));
        assert_eq!(decoded[0].timestamp_millis, Some(42));
        assert_eq!(decoded[0].payload_json()?, original);
        assert_eq!(decoded[1].id.as_deref(), Some("8"));
        assert_eq!(decoded[1].timestamp_millis, None);
        Ok(())
    }

    #[test]
    fn the_one_where_a_dangling_metadata_line_is_rejected() {
        let err = decode_actions(b"{\"index\":{\"_id\":\"1\"}}\n").expect_err("💀 no payload line");
        assert!(matches!(err, StretchError::Decode(_)));
    }

    #[test]
    fn the_one_where_pre_epoch_instants_go_negative() {
        let before = UNIX_EPOCH - Duration::from_millis(1500);
        assert_eq!(epoch_millis(before), -1500);
    }
}
