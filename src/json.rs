//! JSON tree with typed accessors, and a builder for outbound payloads.
//!
//! ACME resources carry loosely structured JSON documents. [`Json`] wraps a
//! parsed document and hands out [`Value`]s that coerce into the types the
//! protocol uses (strings, URLs, instants, statuses, problems). A coercion
//! failure reports the JSON path of the offending value, so server bugs show
//! up as readable protocol errors instead of panics.

use std::fmt;

use base64::prelude::*;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    error::{AcmeError, Result},
    identifier::Identifier,
    problem::Problem,
    status::Status,
};

/// An immutable JSON object, as returned by the ACME server.
#[derive(Debug, Clone, Default)]
pub struct Json {
    root: serde_json::Map<String, serde_json::Value>,
}

impl Json {
    /// Parses a JSON document. The document root must be an object.
    pub fn parse(input: &str) -> Result<Json> {
        let value: serde_json::Value = serde_json::from_str(input)?;
        match value {
            serde_json::Value::Object(root) => Ok(Json { root }),
            other => Err(AcmeError::Protocol(format!(
                "expected JSON object, found {}",
                type_name(&other)
            ))),
        }
    }

    /// Parses a JSON document from raw bytes.
    pub fn parse_bytes(input: &[u8]) -> Result<Json> {
        let input = std::str::from_utf8(input)
            .map_err(|_| AcmeError::Protocol("response body is not valid UTF-8".to_owned()))?;
        Json::parse(input)
    }

    pub(crate) fn from_map(root: serde_json::Map<String, serde_json::Value>) -> Json {
        Json { root }
    }

    /// Returns the [`Value`] of the given key. A missing key yields an empty
    /// value, which only fails once a typed accessor requires it.
    pub fn get(&self, key: &str) -> Value<'_> {
        Value {
            path: key.to_owned(),
            node: self.root.get(key).filter(|v| !v.is_null()),
        }
    }

    /// Checks if the given key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.root.contains_key(key)
    }

    /// All keys of this object, in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = serde_json::Value::Object(self.root.clone());
        f.write_str(&value.to_string())
    }
}

/// Two documents are equal if they contain the same keys and values,
/// regardless of key order.
impl PartialEq for Json {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for Json {}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A single position inside a [`Json`] document.
///
/// Carries the path from the document root for error reporting.
#[derive(Debug, Clone)]
pub struct Value<'a> {
    path: String,
    node: Option<&'a serde_json::Value>,
}

impl<'a> Value<'a> {
    /// Checks if this value is present and not `null`.
    pub fn is_present(&self) -> bool {
        self.node.is_some()
    }

    /// Returns `None` if the value is absent, `Some(self)` otherwise.
    pub fn optional(self) -> Option<Value<'a>> {
        if self.is_present() {
            Some(self)
        } else {
            None
        }
    }

    /// Applies `f` if the value is present.
    pub fn map<T>(self, f: impl FnOnce(Value<'a>) -> Result<T>) -> Result<Option<T>> {
        self.optional().map(f).transpose()
    }

    fn require(&self) -> Result<&'a serde_json::Value> {
        self.node
            .ok_or_else(|| AcmeError::value(&self.path, "required, but not set"))
    }

    pub fn as_string(&self) -> Result<String> {
        let node = self.require()?;
        node.as_str()
            .map(str::to_owned)
            .ok_or_else(|| AcmeError::value(&self.path, format!("not a string: {}", type_name(node))))
    }

    pub fn as_int(&self) -> Result<i64> {
        let node = self.require()?;
        node.as_i64()
            .ok_or_else(|| AcmeError::value(&self.path, format!("not an integer: {node}")))
    }

    pub fn as_bool(&self) -> Result<bool> {
        let node = self.require()?;
        node.as_bool()
            .ok_or_else(|| AcmeError::value(&self.path, format!("not a boolean: {}", type_name(node))))
    }

    /// The value as a URL. Validated, but returned in its original form.
    pub fn as_url(&self) -> Result<String> {
        let raw = self.as_string()?;
        url::Url::parse(&raw)
            .map_err(|err| AcmeError::value(&self.path, format!("invalid URL {raw:?}: {err}")))?;
        Ok(raw)
    }

    /// The value as an [RFC 3339] instant.
    ///
    /// [RFC 3339]: https://datatracker.ietf.org/doc/html/rfc3339
    pub fn as_instant(&self) -> Result<OffsetDateTime> {
        let raw = self.as_string()?;
        OffsetDateTime::parse(&raw, &Rfc3339)
            .map_err(|err| AcmeError::value(&self.path, format!("invalid timestamp {raw:?}: {err}")))
    }

    /// The value as a resource [`Status`]. Unknown statuses parse as
    /// [`Status::Unknown`].
    pub fn as_status(&self) -> Result<Status> {
        Ok(Status::parse(&self.as_string()?))
    }

    /// The value as a [`Problem`] document. Relative URLs inside the problem
    /// are resolved against `base_url`.
    pub fn as_problem(&self, base_url: &str) -> Result<Problem> {
        Ok(Problem::new(self.as_object()?, base_url))
    }

    /// The value as an [`Identifier`] object.
    pub fn as_identifier(&self) -> Result<Identifier> {
        let object = self.as_object()?;
        Ok(Identifier::new(
            object.get("type").as_string().map_err(|_| {
                AcmeError::value(&self.path, "identifier without type")
            })?,
            object.get("value").as_string().map_err(|_| {
                AcmeError::value(&self.path, "identifier without value")
            })?,
        ))
    }

    /// The value as an array of values. An absent value yields an empty
    /// array.
    pub fn as_array(&self) -> Result<Vec<Value<'a>>> {
        let node = match self.node {
            Some(node) => node,
            None => return Ok(Vec::new()),
        };
        let items = node.as_array().ok_or_else(|| {
            AcmeError::value(&self.path, format!("not an array: {}", type_name(node)))
        })?;
        Ok(items
            .iter()
            .enumerate()
            .map(|(ix, item)| Value {
                path: format!("{}[{ix}]", self.path),
                node: Some(item),
            })
            .collect())
    }

    /// The value as a nested JSON object.
    pub fn as_object(&self) -> Result<Json> {
        let node = self.require()?;
        node.as_object()
            .map(|map| Json::from_map(map.clone()))
            .ok_or_else(|| AcmeError::value(&self.path, format!("not an object: {}", type_name(node))))
    }
}

/// Builder for outbound JSON payloads.
///
/// Keys are emitted in insertion order, the output carries no extra
/// whitespace. This keeps request payloads stable, which matters for signed
/// content.
#[derive(Debug, Clone, Default)]
pub struct JsonBuilder {
    map: serde_json::Map<String, serde_json::Value>,
}

impl JsonBuilder {
    pub fn new() -> JsonBuilder {
        JsonBuilder::default()
    }

    /// Puts a simple value (string, number, boolean, array of such).
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> &mut Self {
        self.map.insert(key.into(), value.into());
        self
    }

    /// Puts an instant, in RFC 3339 format with seconds granularity.
    pub fn put_instant(&mut self, key: impl Into<String>, instant: OffsetDateTime) -> &mut Self {
        let truncated = instant.replace_nanosecond(0).unwrap_or(instant);
        let formatted = truncated
            .format(&Rfc3339)
            .expect("RFC 3339 formatting of a valid instant");
        self.put(key, formatted)
    }

    /// Puts binary data, in unpadded base64url encoding.
    pub fn put_base64(&mut self, key: impl Into<String>, data: impl AsRef<[u8]>) -> &mut Self {
        self.put(key, BASE64_URL_SAFE_NO_PAD.encode(data))
    }

    /// Puts an already built JSON object.
    pub fn put_json(&mut self, key: impl Into<String>, json: &Json) -> &mut Self {
        self.map
            .insert(key.into(), serde_json::Value::Object(json.root.clone()));
        self
    }

    /// Puts an identifier in its wire form.
    pub fn put_identifier(&mut self, key: impl Into<String>, identifier: &Identifier) -> Result<&mut Self> {
        let wire = identifier.to_wire()?;
        self.map.insert(key.into(), serde_json::to_value(wire)?);
        Ok(self)
    }

    /// Builds a nested object under `key`.
    pub fn object(&mut self, key: impl Into<String>, f: impl FnOnce(&mut JsonBuilder)) -> &mut Self {
        let mut nested = JsonBuilder::new();
        f(&mut nested);
        self.map
            .insert(key.into(), serde_json::Value::Object(nested.map));
        self
    }

    /// Checks if nothing was put into this builder yet.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Finishes the builder into an immutable [`Json`].
    pub fn to_json(&self) -> Json {
        Json {
            root: self.map.clone(),
        }
    }
}

impl fmt::Display for JsonBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = serde_json::Value::Object(self.map.clone());
        f.write_str(&value.to_string())
    }
}
