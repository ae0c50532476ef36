use serde::{Deserialize, Serialize};

use super::{Embed, Snowflake, User};
use crate::client::{RestAction, RestClient};
use crate::error::{RestError, Result};
use crate::permission::{Permission, Scope};
use crate::route::endpoints::webhooks;

/// A channel webhook.
///
/// Management calls (`edit`, `delete`) need [`Permission::ManageWebhooks`] and
/// are checked locally when the owning guild is known. Executing only needs
/// the webhook token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    id: Snowflake,
    #[serde(default)]
    guild_id: Option<Snowflake>,
    #[serde(default)]
    channel_id: Option<Snowflake>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "user")]
    author: Option<User>,
}

#[derive(Serialize)]
struct ExecutePayload<'a> {
    tts: bool,
    embeds: &'a [Embed],
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
}

#[derive(Serialize)]
struct ModifyPayload<'a> {
    name: Option<&'a str>,
    avatar: Option<&'a str>,
}

impl Webhook {
    pub fn new(id: Snowflake, guild_id: Option<Snowflake>, channel_id: Option<Snowflake>) -> Self {
        Self {
            id,
            guild_id,
            channel_id,
            name: None,
            avatar: None,
            token: None,
            author: None,
        }
    }

    pub fn id(&self) -> Snowflake {
        self.id
    }

    pub fn guild_id(&self) -> Option<Snowflake> {
        self.guild_id
    }

    pub fn channel_id(&self) -> Option<Snowflake> {
        self.channel_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// The user that created the webhook.
    pub fn author(&self) -> Option<&User> {
        self.author.as_ref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        self.name = Some(non_blank("name", name.into())?);
        Ok(self)
    }

    pub fn set_token(&mut self, token: impl Into<String>) -> Result<&mut Self> {
        self.token = Some(non_blank("token", token.into())?);
        Ok(self)
    }

    pub fn set_avatar(&mut self, avatar: Option<String>) -> &mut Self {
        self.avatar = avatar;
        self
    }

    /// Set the author. The author of a webhook never changes once known.
    pub fn set_author(&mut self, author: User) -> Result<&mut Self> {
        if self.author.is_some() {
            return Err(RestError::Config(format!(
                "author of webhook {} is already set",
                self.id
            )));
        }
        self.author = Some(author);
        Ok(self)
    }

    /// Where `ManageWebhooks` is evaluated, when the owning guild is known.
    pub fn scope(&self) -> Option<Scope> {
        match (self.guild_id, self.channel_id) {
            (Some(guild), Some(channel)) => Some(Scope::Channel { guild, channel }),
            (Some(guild), None) => Some(Scope::Guild(guild)),
            (None, _) => None,
        }
    }

    /// Post a message made of `embeds` through the webhook.
    ///
    /// `username` and `avatar_url` override the webhook's own identity for
    /// this message only.
    pub fn execute(
        &self,
        client: &RestClient,
        embeds: &[Embed],
        username: Option<&str>,
        avatar_url: Option<&str>,
    ) -> RestAction<()> {
        let Some(token) = self.token.as_deref() else {
            return client.failed(RestError::Config(format!(
                "webhook {} has no token to execute with",
                self.id
            )));
        };
        let id = self.id.to_string();
        let route = match webhooks::EXECUTE_WEBHOOK.compile(&[&id, token]) {
            Ok(route) => route,
            Err(error) => return client.failed(error),
        };
        let payload = serde_json::to_value(ExecutePayload {
            tts: false,
            embeds,
            username,
            avatar_url,
        });

        match payload {
            Ok(payload) => client.request_empty(route, Some(payload)),
            Err(error) => client.failed(error.into()),
        }
    }

    /// Change name and avatar to those of `update`.
    ///
    /// Resolves to the webhook as the server now describes it.
    pub fn edit(&self, client: &RestClient, update: &Webhook) -> RestAction<Webhook> {
        let id = self.id.to_string();
        let route = match webhooks::MODIFY_WEBHOOK.compile(&[&id]) {
            Ok(route) => route,
            Err(error) => return client.failed(error),
        };
        let payload = serde_json::to_value(ModifyPayload {
            name: update.name(),
            avatar: update.avatar(),
        });
        let payload = match payload {
            Ok(payload) => payload,
            Err(error) => return client.failed(error.into()),
        };

        let entities = client.entity_builder();
        client
            .request_with(route, Some(payload), move |response| {
                let data: serde_json::Value = response.json()?;
                entities.create_webhook(&data)
            })
            .require(Permission::ManageWebhooks, self.scope())
    }

    pub fn delete(&self, client: &RestClient) -> RestAction<()> {
        let id = self.id.to_string();
        match webhooks::DELETE_WEBHOOK.compile(&[&id]) {
            Ok(route) => client
                .request_empty(route, None)
                .require(Permission::ManageWebhooks, self.scope()),
            Err(error) => client.failed(error),
        }
    }

    /// Independent snapshot of every field, token and author included.
    pub fn copy(&self) -> Webhook {
        self.clone()
    }
}

impl std::fmt::Debug for Webhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webhook")
            .field("id", &self.id)
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("name", &self.name)
            .field("avatar", &self.avatar)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("author", &self.author)
            .finish()
    }
}

fn non_blank(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(RestError::Config(format!("webhook {} may not be blank", field)));
    }
    Ok(value)
}
