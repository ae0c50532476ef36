//! Route constants for the endpoints this crate talks to.

use super::{Method, Route};

pub mod webhooks {
    use super::*;

    pub const GET_WEBHOOK: Route = Route::new(Method::Get, "webhooks/{webhook_id}");
    pub const GET_TOKEN_WEBHOOK: Route = Route::new(Method::Get, "webhooks/{webhook_id}/{webhook_token}");
    pub const MODIFY_WEBHOOK: Route = Route::new(Method::Patch, "webhooks/{webhook_id}");
    pub const MODIFY_TOKEN_WEBHOOK: Route =
        Route::new(Method::Patch, "webhooks/{webhook_id}/{webhook_token}");
    pub const DELETE_WEBHOOK: Route = Route::new(Method::Delete, "webhooks/{webhook_id}");
    pub const DELETE_TOKEN_WEBHOOK: Route =
        Route::new(Method::Delete, "webhooks/{webhook_id}/{webhook_token}");
    pub const EXECUTE_WEBHOOK: Route = Route::new(Method::Post, "webhooks/{webhook_id}/{webhook_token}");
    pub const EXECUTE_WEBHOOK_SLACK: Route =
        Route::new(Method::Post, "webhooks/{webhook_id}/{webhook_token}/slack");
    pub const EXECUTE_WEBHOOK_GITHUB: Route =
        Route::new(Method::Post, "webhooks/{webhook_id}/{webhook_token}/github");
}

pub mod channels {
    use super::*;

    pub const GET_WEBHOOKS: Route = Route::new(Method::Get, "channels/{channel_id}/webhooks");
    pub const CREATE_WEBHOOK: Route = Route::new(Method::Post, "channels/{channel_id}/webhooks");
}

pub mod messages {
    use super::*;

    pub const SEND_MESSAGE: Route = Route::new(Method::Post, "channels/{channel_id}/messages");
    pub const GET_MESSAGE: Route = Route::new(Method::Get, "channels/{channel_id}/messages/{message_id}");
    pub const EDIT_MESSAGE: Route =
        Route::new(Method::Patch, "channels/{channel_id}/messages/{message_id}");
    pub const DELETE_MESSAGE: Route =
        Route::new(Method::Delete, "channels/{channel_id}/messages/{message_id}");
}

pub mod guilds {
    use super::*;

    pub const GET_WEBHOOKS: Route = Route::new(Method::Get, "guilds/{guild_id}/webhooks");
}
