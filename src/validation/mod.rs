//! Request validation middleware.
//!
//! A [`Schema`] declares rules for headers, path parameters, query values and
//! the JSON body. [`validate`] compiles it against a [`ValidationConfig`] (the
//! named formats available) into an ordinary middleware. At request time every
//! rule is checked, all failures are collected, and the chain fails with
//! `422 Unprocessable Content` carrying them as the payload:
//!
//! ```json
//! [{ "path": "params.userId", "message": "must match format \"uuid\"" }]
//! ```
//!
//! Body properties that the schema does not list are removed before the
//! handler sees the body.
//!
//! ```
//! use treeroute::validation::{BodySchema, Property, Rule, Schema, ValidationConfig, validate};
//!
//! let config = ValidationConfig::new();
//! let schema = Schema::new()
//!     .param("userId", Rule::format("uuid"))
//!     .body(
//!         BodySchema::new()
//!             .property("firstName", Property::string())
//!             .property("dob", Property::string().rule(Rule::format("date")))
//!             .require("firstName"),
//!     );
//! let middleware = validate(&config, schema).unwrap();
//! ```

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::context::Context;
use crate::error::HttpError;
use crate::middleware::{Flow, MiddlewareHandler, from_sync};

const BUILTIN_FORMATS: [(&str, &str); 6] = [
    (
        "uuid",
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    ),
    ("date", r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])$"),
    ("email", r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"),
    // US-style contact fields
    ("phone", r"^\d{10}$"),
    ("postalCode", r"^\d{5}$"),
    (
        "state",
        r"^(A[ELKSZR]|C[AOT]|D[EC]|F[ML]|G[AU]|HI|I[DLNA]|K[SY]|LA|M[EHDAINSOTP]|N[EVHJMYCD]|O[HKR]|P[WAR]|RI|S[CD]|T[NX]|UT|V[TIA]|W[AVIY])$",
    ),
];

/// Errors in a schema, reported when the middleware is built.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown format {0:?}")]
    UnknownFormat(String),

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Named string formats usable in [`Rule::format`].
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    formats: HashMap<String, Regex>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let formats = BUILTIN_FORMATS
            .iter()
            .filter_map(|(name, source)| Some(((*name).to_owned(), Regex::new(source).ok()?)))
            .collect();
        Self { formats }
    }
}

impl ValidationConfig {
    /// A config with the built-in `uuid`, `date`, `email`, `phone`,
    /// `postalCode` and `state` formats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a named format.
    #[must_use]
    pub fn with_format(mut self, name: impl Into<String>, regex: Regex) -> Self {
        self.formats.insert(name.into(), regex);
        self
    }

    pub fn format(&self, name: &str) -> Option<&Regex> {
        self.formats.get(name)
    }
}

/// A constraint on a single string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Must match the named format from the [`ValidationConfig`].
    Format(String),
    /// Must match this regular expression.
    Pattern(String),
}

impl Rule {
    pub fn format(name: impl Into<String>) -> Self {
        Self::Format(name.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern(pattern.into())
    }

    fn compile(&self, config: &ValidationConfig) -> Result<Matcher, SchemaError> {
        match self {
            Rule::Format(name) => {
                let regex = config
                    .format(name)
                    .cloned()
                    .ok_or_else(|| SchemaError::UnknownFormat(name.clone()))?;
                Ok(Matcher {
                    regex,
                    message: format!("must match format \"{name}\""),
                })
            }
            Rule::Pattern(pattern) => {
                let regex = Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                Ok(Matcher {
                    regex,
                    message: format!("must match pattern \"{pattern}\""),
                })
            }
        }
    }
}

/// JSON value types a body property can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl JsonType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|n| n.fract() == 0.0)
            }
            JsonType::Boolean => value.is_boolean(),
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Object => "object",
            JsonType::Array => "array",
        })
    }
}

/// One property of a JSON object.
#[derive(Debug, Clone, Default)]
pub struct Property {
    kind: Option<JsonType>,
    rule: Option<Rule>,
    nullable: bool,
    object: Option<BodySchema>,
}

impl Property {
    /// Any value is accepted.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of(kind: JsonType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::of(JsonType::String)
    }

    /// A nested object, validated and stripped like the body itself.
    pub fn object(schema: BodySchema) -> Self {
        Self {
            kind: Some(JsonType::Object),
            object: Some(schema),
            ..Self::default()
        }
    }

    /// String values must also satisfy `rule`.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    /// `null` is accepted in place of a value.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// The expected shape of a JSON object: its allowed properties and which of
/// them are required.
#[derive(Debug, Clone, Default)]
pub struct BodySchema {
    properties: Vec<(String, Property)>,
    required: Vec<String>,
}

impl BodySchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, property: Property) -> Self {
        self.properties.push((name.into(), property));
        self
    }

    #[must_use]
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }
}

/// Validation rules for one route.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    headers: Vec<(String, Rule)>,
    params: Vec<(String, Rule)>,
    query: Vec<(String, Rule)>,
    body: Option<BodySchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A rule for a header. The name is matched case-insensitively.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.headers.push((name.into(), rule));
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.params.push((name.into(), rule));
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.query.push((name.into(), rule));
        self
    }

    #[must_use]
    pub fn body(mut self, body: BodySchema) -> Self {
        self.body = Some(body);
        self
    }
}

struct Matcher {
    regex: Regex,
    message: String,
}

struct FieldCheck {
    field: String,
    matcher: Matcher,
}

struct CompiledObject {
    properties: Vec<(String, CompiledProperty)>,
    required: Vec<String>,
}

struct CompiledProperty {
    kind: Option<JsonType>,
    matcher: Option<Matcher>,
    nullable: bool,
    object: Option<CompiledObject>,
}

struct Validator {
    headers: Vec<FieldCheck>,
    params: Vec<FieldCheck>,
    query: Vec<FieldCheck>,
    body: Option<CompiledObject>,
}

fn compile_fields(
    fields: &[(String, Rule)],
    config: &ValidationConfig,
) -> Result<Vec<FieldCheck>, SchemaError> {
    fields
        .iter()
        .map(|(field, rule)| {
            Ok(FieldCheck {
                field: field.clone(),
                matcher: rule.compile(config)?,
            })
        })
        .collect()
}

fn compile_object(
    schema: &BodySchema,
    config: &ValidationConfig,
) -> Result<CompiledObject, SchemaError> {
    let properties = schema
        .properties
        .iter()
        .map(|(name, property)| {
            let compiled = CompiledProperty {
                kind: property.kind,
                matcher: property.rule.as_ref().map(|r| r.compile(config)).transpose()?,
                nullable: property.nullable,
                object: property
                    .object
                    .as_ref()
                    .map(|o| compile_object(o, config))
                    .transpose()?,
            };
            Ok((name.clone(), compiled))
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;
    Ok(CompiledObject {
        properties,
        required: schema.required.clone(),
    })
}

/// Builds a middleware enforcing `schema`.
///
/// # Errors
///
/// [`SchemaError`] for a format name missing from `config` or an invalid
/// regular expression.
pub fn validate(config: &ValidationConfig, schema: Schema) -> Result<MiddlewareHandler, SchemaError> {
    let validator = Validator {
        headers: compile_fields(&schema.headers, config)?,
        params: compile_fields(&schema.params, config)?,
        query: compile_fields(&schema.query, config)?,
        body: schema
            .body
            .as_ref()
            .map(|body| compile_object(body, config))
            .transpose()?,
    };

    Ok(from_sync(move |ctx| {
        let issues = validator.check(ctx);
        if issues.is_empty() {
            Ok(Flow::Continue)
        } else {
            let payload = issues.into_iter().map(Issue::into_value).collect();
            Err(HttpError::unprocessable_content(Value::Array(payload)))
        }
    }))
}

struct Issue {
    path: String,
    message: String,
}

impl Issue {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_owned(),
            message: message.into(),
        }
    }

    fn into_value(self) -> Value {
        json!({ "path": self.path, "message": self.message })
    }
}

impl Validator {
    fn check(&self, ctx: &mut Context) -> Vec<Issue> {
        let mut issues = Vec::new();

        check_fields("headers", &self.headers, &mut issues, |f| ctx.headers().get(f));
        check_fields("params", &self.params, &mut issues, |f| ctx.params().get(f));
        check_fields("query", &self.query, &mut issues, |f| ctx.query_param(f));

        if let Some(schema) = &self.body {
            match ctx.parsed_body_mut() {
                Some(body) => check_object(schema, body, "body", &mut issues),
                None => issues.push(Issue::new("body", "must be object")),
            }
        }
        issues
    }
}

fn check_fields<'c>(
    prefix: &str,
    checks: &[FieldCheck],
    issues: &mut Vec<Issue>,
    lookup: impl Fn(&str) -> Option<&'c str>,
) {
    for check in checks {
        if let Some(value) = lookup(&check.field) {
            if !check.matcher.regex.is_match(value) {
                let path = format!("{prefix}.{}", check.field);
                issues.push(Issue::new(&path, check.matcher.message.clone()));
            }
        }
    }
}

fn check_object(schema: &CompiledObject, value: &mut Value, path: &str, issues: &mut Vec<Issue>) {
    let Value::Object(map) = value else {
        issues.push(Issue::new(path, "must be object"));
        return;
    };
    strip_unlisted(schema, map);

    for name in &schema.required {
        if !map.contains_key(name) {
            issues.push(Issue::new(path, format!("must have required property '{name}'")));
        }
    }
    for (name, property) in &schema.properties {
        if let Some(value) = map.get_mut(name) {
            check_property(property, value, &format!("{path}.{name}"), issues);
        }
    }
}

fn strip_unlisted(schema: &CompiledObject, map: &mut Map<String, Value>) {
    map.retain(|key, _| schema.properties.iter().any(|(name, _)| name == key));
}

fn check_property(property: &CompiledProperty, value: &mut Value, path: &str, issues: &mut Vec<Issue>) {
    if value.is_null() && property.nullable {
        return;
    }
    if let Some(kind) = property.kind {
        if !kind.accepts(value) {
            issues.push(Issue::new(path, format!("must be {kind}")));
            return;
        }
    }
    if let (Some(matcher), Value::String(text)) = (&property.matcher, &*value) {
        if !matcher.regex.is_match(text) {
            issues.push(Issue::new(path, matcher.message.clone()));
        }
    }
    if let Some(object) = &property.object {
        check_object(object, value, path, issues);
    }
}
