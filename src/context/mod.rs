//! Per-request context: everything a middleware chain sees about one request.
//!
//! A [`Context`] is created fresh by the dispatcher for every request and dropped
//! once the response is produced. It carries the method, raw URL, headers, path
//! parameters bound by the matched pattern, the parsed query string, the raw and
//! JSON-parsed body, and a typed [`Extensions`] map that earlier middleware use to
//! hand state to later ones.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use bytes::Bytes;
use serde_json::Value;

use crate::error::HttpError;
use crate::http::{Headers, Method};

/// Type-erased request extensions map: used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value`, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// A flat name → value string map, used for path parameters and the query string.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: HashMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value. An existing value for `key` is replaced, so repeated
    /// query keys resolve to the last occurrence.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Parameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// Per-request state handed to every middleware in the matched chain.
#[derive(Debug)]
pub struct Context {
    method: Method,
    url: String,
    headers: Headers,
    params: Parameters,
    query: Option<Parameters>,
    body: Bytes,
    parsed_body: Option<Value>,
    extensions: Extensions,
}

impl Context {
    pub(crate) fn new(
        method: Method,
        url: String,
        headers: Headers,
        params: Parameters,
        query: Option<Parameters>,
        body: Bytes,
        parsed_body: Option<Value>,
    ) -> Self {
        Self {
            method,
            url,
            headers,
            params,
            query,
            body,
            parsed_body,
            extensions: Extensions::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The raw request target (path plus query string).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The path portion of the URL.
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(path, _)| path)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Path parameters bound by the matched pattern, e.g. `userId` for `/users/:userId`.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// The parsed query string, or `None` when the URL has no `?`.
    pub fn query(&self) -> Option<&Parameters> {
        self.query.as_ref()
    }

    pub fn query_mut(&mut self) -> Option<&mut Parameters> {
        self.query.as_mut()
    }

    /// Shortcut for a single query value.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.as_ref()?.get(key)
    }

    /// The raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body parsed as JSON, or `None` when the request had no body.
    pub fn parsed_body(&self) -> Option<&Value> {
        self.parsed_body.as_ref()
    }

    pub fn parsed_body_mut(&mut self) -> Option<&mut Value> {
        self.parsed_body.as_mut()
    }

    pub fn set_parsed_body(&mut self, body: Option<Value>) {
        self.parsed_body = body;
    }

    /// Deserializes the parsed body into `T`.
    ///
    /// A missing body is treated as JSON `null`; a shape mismatch is a 400.
    pub fn json<T>(&self) -> Result<T, HttpError>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self.parsed_body.clone().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|err| HttpError::bad_request(err.to_string()).with_source(err))
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
