//! The small slice of the platform's object model the REST core needs.

mod embed;
mod webhook;

pub use embed::{Embed, EmbedAuthor, EmbedField, EmbedFooter};
pub use webhook::Webhook;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

/// Platform object identifier. Serialized as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(pub u64);

impl std::fmt::Display for Snowflake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Snowflake)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Snowflake(id)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl<'de> de::Visitor<'de> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a snowflake as a decimal string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Snowflake, E> {
                Ok(Snowflake(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Snowflake, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

/// A platform account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// Turns successful response bodies into entities.
///
/// A malformed body is a [`crate::RestError::Deserialization`], never a
/// server error.
pub trait EntityBuilder: Send + Sync {
    fn create_webhook(&self, data: &serde_json::Value) -> Result<Webhook>;
}

/// [`EntityBuilder`] backed directly by serde.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEntityBuilder;

impl EntityBuilder for JsonEntityBuilder {
    fn create_webhook(&self, data: &serde_json::Value) -> Result<Webhook> {
        Ok(Webhook::deserialize(data)?)
    }
}
