//! Route templates and their compiled, ready-to-send form.

pub mod endpoints;

use crate::error::{RestError, Result};

/// Placeholders that take part in rate-limit bucket keys unless a route says otherwise.
pub const DEFAULT_BUCKET_PARAMS: &[&str] = &["guild_id", "channel_id", "webhook_id"];

/// Credential placeholders. Their values only ever appear in the request path,
/// never in bucket keys, `Display` or `Debug` output.
pub const SECRET_PARAMS: &[&str] = &["webhook_token"];

/// HTTP verb of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str),
}

/// An immutable endpoint descriptor with `{name}` placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    method: Method,
    path: &'static str,
    bucket_params: &'static [&'static str],
}

impl Route {
    pub const fn new(method: Method, path: &'static str) -> Self {
        Self {
            method,
            path,
            bucket_params: DEFAULT_BUCKET_PARAMS,
        }
    }

    /// Override which placeholders are part of the bucket key.
    pub const fn with_bucket_params(self, bucket_params: &'static [&'static str]) -> Self {
        Self {
            method: self.method,
            path: self.path,
            bucket_params,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    /// Placeholder names in declared order.
    pub fn placeholders(&self) -> Result<Vec<&'static str>> {
        Ok(parse_segments(self.path)?
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Param(name) => Some(name),
                Segment::Literal(_) => None,
            })
            .collect())
    }

    /// Substitute one value per placeholder, in declared order.
    pub fn compile(&self, values: &[&str]) -> Result<CompiledRoute> {
        let segments = parse_segments(self.path)?;
        let expected = segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count();

        if values.len() != expected {
            return Err(RestError::Config(format!(
                "route {} {} expects {} values, got {}",
                self.method,
                self.path,
                expected,
                values.len()
            )));
        }

        let mut path = String::with_capacity(self.path.len());
        let mut display_path = String::with_capacity(self.path.len());
        let mut bucket_path = String::with_capacity(self.path.len());
        let mut values = values.iter();

        for segment in segments {
            match segment {
                Segment::Literal(text) => {
                    path.push_str(text);
                    display_path.push_str(text);
                    bucket_path.push_str(text);
                }
                Segment::Param(name) => {
                    // Count was checked above.
                    let value = values.next().copied().unwrap_or_default();
                    let placeholder = format!("{{{}}}", name);
                    let secret = SECRET_PARAMS.contains(&name);
                    path.push_str(value);
                    display_path.push_str(if secret { placeholder.as_str() } else { value });
                    if self.bucket_params.contains(&name) && !secret {
                        bucket_path.push_str(value);
                    } else {
                        bucket_path.push_str(&placeholder);
                    }
                }
            }
        }

        Ok(CompiledRoute {
            method: self.method,
            path,
            display_path,
            bucket_key: format!("{} {}", self.method, bucket_path),
            query: Vec::new(),
        })
    }
}

fn parse_segments(pattern: &'static str) -> Result<Vec<Segment<'static>>> {
    let mut segments = Vec::new();
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            RestError::Config(format!("unclosed placeholder in route pattern {}", pattern))
        })?;
        let name = &after[..close];
        if name.is_empty() || name.contains('{') {
            return Err(RestError::Config(format!(
                "malformed placeholder in route pattern {}",
                pattern
            )));
        }
        segments.push(Segment::Param(name));
        rest = &after[close + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }

    Ok(segments)
}

/// A route with every placeholder resolved.
///
/// Routes whose bucket keys are equal share one rate-limit bucket.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CompiledRoute {
    method: Method,
    path: String,
    display_path: String,
    bucket_key: String,
    query: Vec<(String, String)>,
}

impl CompiledRoute {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bucket_key(&self) -> &str {
        &self.bucket_key
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Append a query parameter. Query parameters never affect the bucket key.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

impl std::fmt::Display for CompiledRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.display_path)
    }
}

impl std::fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("method", &self.method)
            .field("path", &self.display_path)
            .field("bucket_key", &self.bucket_key)
            .field("query", &self.query)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: Route = Route::new(Method::Patch, "channels/{channel_id}/messages/{message_id}");

    #[test]
    fn test_compile_substitutes_values_in_order() {
        let route = MESSAGE.compile(&["10", "20"]).unwrap();

        assert_eq!(route.method(), Method::Patch);
        assert_eq!(route.path(), "channels/10/messages/20");
        assert_eq!(route.to_string(), "PATCH channels/10/messages/20");
    }

    #[test]
    fn test_bucket_key_keeps_non_bucket_placeholders() {
        let first = MESSAGE.compile(&["10", "20"]).unwrap();
        let second = MESSAGE.compile(&["10", "21"]).unwrap();
        let other_channel = MESSAGE.compile(&["11", "20"]).unwrap();

        assert_eq!(first.bucket_key(), "PATCH channels/10/messages/{message_id}");
        assert_eq!(first.bucket_key(), second.bucket_key());
        assert_ne!(first.bucket_key(), other_channel.bucket_key());
    }

    #[test]
    fn test_bucket_key_includes_method() {
        let get = Route::new(Method::Get, "webhooks/{webhook_id}").compile(&["1"]).unwrap();
        let delete = Route::new(Method::Delete, "webhooks/{webhook_id}").compile(&["1"]).unwrap();

        assert_ne!(get.bucket_key(), delete.bucket_key());
    }

    #[test]
    fn test_compile_rejects_value_count_mismatch() {
        assert!(matches!(MESSAGE.compile(&["10"]), Err(RestError::Config(_))));
        assert!(matches!(MESSAGE.compile(&["10", "20", "30"]), Err(RestError::Config(_))));
    }

    #[test]
    fn test_compile_rejects_malformed_pattern() {
        let route = Route::new(Method::Get, "channels/{channel_id");
        assert!(matches!(route.compile(&["1"]), Err(RestError::Config(_))));

        let empty = Route::new(Method::Get, "channels/{}");
        assert!(matches!(empty.compile(&["1"]), Err(RestError::Config(_))));
    }

    #[test]
    fn test_custom_bucket_params() {
        let route = Route::new(Method::Get, "guilds/{guild_id}/members/{user_id}")
            .with_bucket_params(&["guild_id", "user_id"]);
        let compiled = route.compile(&["1", "2"]).unwrap();

        assert_eq!(compiled.bucket_key(), "GET guilds/1/members/2");
    }

    #[test]
    fn test_query_does_not_change_bucket_key() {
        let route = Route::new(Method::Post, "webhooks/{webhook_id}/{webhook_token}");
        let plain = route.compile(&["1", "abc"]).unwrap();
        let waited = plain.clone().with_query("wait", "true");

        assert_eq!(plain.bucket_key(), waited.bucket_key());
        assert_eq!(waited.query(), &[("wait".to_string(), "true".to_string())]);
    }

    #[test]
    fn test_token_stays_out_of_logs_and_bucket_key() {
        let route = Route::new(Method::Post, "webhooks/{webhook_id}/{webhook_token}")
            .with_bucket_params(&["webhook_id", "webhook_token"]);
        let compiled = route.compile(&["1", "s3cret"]).unwrap();

        assert_eq!(compiled.path(), "webhooks/1/s3cret");
        assert_eq!(compiled.bucket_key(), "POST webhooks/1/{webhook_token}");
        assert_eq!(compiled.to_string(), "POST webhooks/1/{webhook_token}");
        assert!(!format!("{:?}", compiled).contains("s3cret"));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(MESSAGE.placeholders().unwrap(), vec!["channel_id", "message_id"]);
    }
}
