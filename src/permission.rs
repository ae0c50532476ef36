//! Capability checks consulted before submitting gated requests.
//!
//! The oracle only answers "is this capability locally known to be present".
//! A positive answer does not guarantee the server agrees, so server-side
//! permission rejections are still classified and surfaced by the dispatcher.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::entity::Snowflake;

/// Capabilities that gate REST operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Administrator,
    ManageChannels,
    ManageGuild,
    ManageMessages,
    ManageWebhooks,
    ReadMessages,
    SendMessages,
}

impl Permission {
    pub fn name(&self) -> &'static str {
        match self {
            Permission::Administrator => "ADMINISTRATOR",
            Permission::ManageChannels => "MANAGE_CHANNELS",
            Permission::ManageGuild => "MANAGE_GUILD",
            Permission::ManageMessages => "MANAGE_MESSAGES",
            Permission::ManageWebhooks => "MANAGE_WEBHOOKS",
            Permission::ReadMessages => "READ_MESSAGES",
            Permission::SendMessages => "SEND_MESSAGES",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a capability is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Guild(Snowflake),
    Channel { guild: Snowflake, channel: Snowflake },
}

impl Scope {
    pub fn guild(&self) -> Snowflake {
        match self {
            Scope::Guild(guild) => *guild,
            Scope::Channel { guild, .. } => *guild,
        }
    }
}

/// Answers capability questions from locally known state.
pub trait PermissionOracle: Send + Sync {
    fn has_capability(&self, actor: Snowflake, capability: Permission, scope: &Scope) -> bool;
}

/// Oracle that never blocks a request locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionOracle for AllowAll {
    fn has_capability(&self, _actor: Snowflake, _capability: Permission, _scope: &Scope) -> bool {
        true
    }
}

/// In-memory grant table keyed by actor and guild.
///
/// Grants apply to the whole guild, including every channel scope inside it.
/// `Administrator` implies every other capability.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    grants: RwLock<HashMap<(Snowflake, Snowflake), HashSet<Permission>>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor: Snowflake, guild: Snowflake, permission: Permission) {
        self.grants
            .write()
            .entry((actor, guild))
            .or_default()
            .insert(permission);
    }

    pub fn revoke(&self, actor: Snowflake, guild: Snowflake, permission: Permission) {
        if let Some(set) = self.grants.write().get_mut(&(actor, guild)) {
            set.remove(&permission);
        }
    }
}

impl PermissionOracle for StaticPermissions {
    fn has_capability(&self, actor: Snowflake, capability: Permission, scope: &Scope) -> bool {
        let grants = self.grants.read();
        grants
            .get(&(actor, scope.guild()))
            .map(|set| set.contains(&Permission::Administrator) || set.contains(&capability))
            .unwrap_or(false)
    }
}
