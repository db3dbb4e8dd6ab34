//! Validation applied to `input` before a handler runs.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// One validation failure, reported back to the caller in `details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Location of the offending value; empty for the input itself.
    pub path: Vec<String>,
    pub message: String,
}

impl Issue {
    pub fn new(path: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

/// Validates, and may normalize, an event's input.
pub trait Schema: Send + Sync {
    /// The value handed to the handler, or every issue found.
    fn parse(&self, input: &Value) -> Result<Value, Vec<Issue>>;
}

// ── Typed schemas ─────────────────────────────────────────────────────────────

/// Accepts exactly what deserializes into `T`. The handler receives the
/// re-serialized `T`, so unknown fields are dropped and defaults filled in.
pub struct TypedSchema<T> {
    _type: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self { _type: PhantomData }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    fn parse(&self, input: &Value) -> Result<Value, Vec<Issue>> {
        let typed: T = serde_json::from_value(input.clone())
            .map_err(|e| vec![Issue::new(Vec::new(), e.to_string())])?;
        serde_json::to_value(typed).map_err(|e| vec![Issue::new(Vec::new(), e.to_string())])
    }
}

// ── Field schemas ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Number,
    Bool,
    Array,
    Object,
    Any,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Number => value.is_number(),
            Kind::Bool => value.is_boolean(),
            Kind::Array => value.is_array(),
            Kind::Object => value.is_object(),
            Kind::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Number => "number",
            Kind::Bool => "boolean",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Any => "any",
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// An object with named fields of known JSON kinds. Reports every
/// failing field, not just the first.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: Vec<(String, Kind, bool)>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: Kind) -> Self {
        self.fields.push((name.into(), kind, true));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: Kind) -> Self {
        self.fields.push((name.into(), kind, false));
        self
    }
}

impl Schema for ObjectSchema {
    fn parse(&self, input: &Value) -> Result<Value, Vec<Issue>> {
        let Some(object) = input.as_object() else {
            return Err(vec![Issue::new(
                Vec::new(),
                format!("expected object, received {}", kind_of(input)),
            )]);
        };

        let issues: Vec<Issue> = self
            .fields
            .iter()
            .filter_map(|(name, kind, required)| match object.get(name) {
                None | Some(Value::Null) if *required => {
                    Some(Issue::new(vec![name.clone()], "required"))
                }
                None | Some(Value::Null) => None,
                Some(value) if !kind.matches(value) => Some(Issue::new(
                    vec![name.clone()],
                    format!("expected {}, received {}", kind.name(), kind_of(value)),
                )),
                Some(_) => None,
            })
            .collect();

        if issues.is_empty() {
            Ok(input.clone())
        } else {
            Err(issues)
        }
    }
}
