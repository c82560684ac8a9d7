//! HTTP cache policy.
//!
//! A view registered with an http-cache policy gets `Cache-Control` (and,
//! when a max-age is present, `Expires`) stamped onto successful responses —
//! unless the response itself opts out (`prevent_auto_cache`) or the
//! process-wide `prevent_http_cache` setting is on.

use crate::config::ConfigError;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Cache-header policy for one view registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    max_age: Option<i64>,
    options: Vec<String>,
}

impl CachePolicy {
    /// `Cache-Control: max-age=N` plus a matching `Expires`.
    pub fn seconds(seconds: i64) -> Self {
        CachePolicy {
            max_age: Some(seconds),
            options: Vec::new(),
        }
    }

    /// Same, from a duration.
    pub fn duration(duration: Duration) -> Self {
        CachePolicy::seconds(duration.num_seconds())
    }

    /// Explicit max-age (or none) with extra Cache-Control directives.
    pub fn with_options<I, S>(max_age: Option<i64>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CachePolicy {
            max_age,
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a dynamically-supplied http_cache value.
    ///
    /// Accepted shapes: an integer number of seconds, or a two-element array
    /// `[seconds|null, {directive: true|value}]`. Anything else — including
    /// the wrong arity — is rejected here, before any view is wrapped.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Number(number) => match number.as_i64() {
                Some(seconds) => Ok(CachePolicy::seconds(seconds)),
                None => Err(ConfigError::MalformedHttpCache(format!(
                    "seconds must be an integer, got {number}"
                ))),
            },
            Value::Array(items) => {
                if items.len() != 2 {
                    return Err(ConfigError::MalformedHttpCache(format!(
                        "expected [seconds, options], got {} element(s)",
                        items.len()
                    )));
                }
                let max_age = match &items[0] {
                    Value::Null => None,
                    Value::Number(number) => Some(number.as_i64().ok_or_else(|| {
                        ConfigError::MalformedHttpCache(format!(
                            "seconds must be an integer, got {number}"
                        ))
                    })?),
                    other => {
                        return Err(ConfigError::MalformedHttpCache(format!(
                            "seconds must be an integer or null, got {other}"
                        )))
                    }
                };
                let object = items[1].as_object().ok_or_else(|| {
                    ConfigError::MalformedHttpCache(format!(
                        "options must be a mapping, got {}",
                        items[1]
                    ))
                })?;
                let mut options = Vec::new();
                for (key, value) in object {
                    match value {
                        Value::Bool(true) => options.push(key.clone()),
                        Value::Bool(false) => {}
                        other => options.push(format!("{key}={other}")),
                    }
                }
                Ok(CachePolicy { max_age, options })
            }
            other => Err(ConfigError::MalformedHttpCache(format!(
                "expected seconds or [seconds, options], got {other}"
            ))),
        }
    }

    /// The configured max-age, if any.
    pub fn max_age(&self) -> Option<i64> {
        self.max_age
    }

    /// The composed `Cache-Control` header value.
    pub fn cache_control(&self) -> String {
        let mut parts = Vec::new();
        if let Some(seconds) = self.max_age {
            parts.push(format!("max-age={seconds}"));
        }
        parts.extend(self.options.iter().cloned());
        parts.join(", ")
    }

    /// Stamps the policy's headers onto a response. `Expires` is emitted only
    /// when a max-age is configured.
    pub fn apply(&self, response: &mut crate::Response, now: DateTime<Utc>) {
        let cache_control = self.cache_control();
        if !cache_control.is_empty() {
            response.set_header("Cache-Control", &cache_control);
        }
        if let Some(seconds) = self.max_age {
            let expires = now + Duration::seconds(seconds);
            response.set_header("Expires", &httpdate(expires));
        }
    }
}

/// Formats a timestamp as an HTTP date (RFC 7231 fixed format).
pub fn httpdate(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
