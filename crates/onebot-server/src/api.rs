//! Typed OneBot v11 actions.
//!
//! Each method is a thin translation into [`Bot::call`]; params and result
//! shapes follow the OneBot v11 public API. Unknown result fields are ignored.

use onebot_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bot::Bot;

/// Recipient of [`Bot::send_msg`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageTarget {
    Private(i64),
    Group(i64),
}

impl MessageTarget {
    fn params(self, message: Value, auto_escape: bool) -> Value {
        match self {
            Self::Private(user_id) => json!({
                "message_type": "private",
                "user_id": user_id,
                "message": message,
                "auto_escape": auto_escape,
            }),
            Self::Group(group_id) => json!({
                "message_type": "group",
                "group_id": group_id,
                "message": message,
                "auto_escape": auto_escape,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId {
    pub message_id: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageSender {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub card: Option<String>,
}

/// Result of `get_msg`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub time: i64,
    pub message_type: String,
    pub message_id: i64,
    #[serde(default)]
    pub real_id: i64,
    #[serde(default)]
    pub sender: MessageSender,
    pub message: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    pub nickname: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrangerInfo {
    pub user_id: i64,
    pub nickname: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub age: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: i64,
    pub nickname: String,
    #[serde(default)]
    pub remark: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    pub group_name: String,
    #[serde(default)]
    pub member_count: i32,
    #[serde(default)]
    pub max_member_count: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupMemberInfo {
    pub group_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub join_time: i64,
    #[serde(default)]
    pub last_sent_time: i64,
    #[serde(default)]
    pub level: String,
    /// `owner`, `admin` or `member`.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub unfriendly: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_expire_time: i64,
    #[serde(default)]
    pub card_changeable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    /// `null` when the implementation cannot tell.
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub good: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionInfo {
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub protocol_version: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct Capability {
    yes: bool,
}

impl Bot {
    // ── Messages ────────────────────────────────────────────────────

    pub async fn send_private_msg(
        &self,
        user_id: i64,
        message: impl Into<Value>,
        auto_escape: bool,
    ) -> Result<MessageId> {
        self.call_as(
            "send_private_msg",
            json!({"user_id": user_id, "message": message.into(), "auto_escape": auto_escape}),
        )
        .await
    }

    pub async fn send_group_msg(
        &self,
        group_id: i64,
        message: impl Into<Value>,
        auto_escape: bool,
    ) -> Result<MessageId> {
        self.call_as(
            "send_group_msg",
            json!({"group_id": group_id, "message": message.into(), "auto_escape": auto_escape}),
        )
        .await
    }

    pub async fn send_msg(
        &self,
        target: MessageTarget,
        message: impl Into<Value>,
        auto_escape: bool,
    ) -> Result<MessageId> {
        self.call_as("send_msg", target.params(message.into(), auto_escape))
            .await
    }

    pub async fn delete_msg(&self, message_id: i64) -> Result<()> {
        self.call("delete_msg", json!({"message_id": message_id}))
            .await
            .map(drop)
    }

    pub async fn get_msg(&self, message_id: i64) -> Result<MessageRecord> {
        self.call_as("get_msg", json!({"message_id": message_id}))
            .await
    }

    pub async fn send_like(&self, user_id: i64, times: u8) -> Result<()> {
        self.call("send_like", json!({"user_id": user_id, "times": times}))
            .await
            .map(drop)
    }

    // ── Group administration ────────────────────────────────────────

    pub async fn set_group_kick(
        &self,
        group_id: i64,
        user_id: i64,
        reject_add_request: bool,
    ) -> Result<()> {
        self.call(
            "set_group_kick",
            json!({
                "group_id": group_id,
                "user_id": user_id,
                "reject_add_request": reject_add_request,
            }),
        )
        .await
        .map(drop)
    }

    /// Mute `user_id` for `duration_secs`; `0` lifts the mute.
    pub async fn set_group_ban(&self, group_id: i64, user_id: i64, duration_secs: u64) -> Result<()> {
        self.call(
            "set_group_ban",
            json!({"group_id": group_id, "user_id": user_id, "duration": duration_secs}),
        )
        .await
        .map(drop)
    }

    pub async fn set_group_whole_ban(&self, group_id: i64, enable: bool) -> Result<()> {
        self.call(
            "set_group_whole_ban",
            json!({"group_id": group_id, "enable": enable}),
        )
        .await
        .map(drop)
    }

    pub async fn set_group_admin(&self, group_id: i64, user_id: i64, enable: bool) -> Result<()> {
        self.call(
            "set_group_admin",
            json!({"group_id": group_id, "user_id": user_id, "enable": enable}),
        )
        .await
        .map(drop)
    }

    /// An empty `card` clears the member's group card.
    pub async fn set_group_card(&self, group_id: i64, user_id: i64, card: &str) -> Result<()> {
        self.call(
            "set_group_card",
            json!({"group_id": group_id, "user_id": user_id, "card": card}),
        )
        .await
        .map(drop)
    }

    pub async fn set_group_name(&self, group_id: i64, group_name: &str) -> Result<()> {
        self.call(
            "set_group_name",
            json!({"group_id": group_id, "group_name": group_name}),
        )
        .await
        .map(drop)
    }

    pub async fn set_group_leave(&self, group_id: i64, is_dismiss: bool) -> Result<()> {
        self.call(
            "set_group_leave",
            json!({"group_id": group_id, "is_dismiss": is_dismiss}),
        )
        .await
        .map(drop)
    }

    pub async fn set_group_special_title(
        &self,
        group_id: i64,
        user_id: i64,
        special_title: &str,
        duration_secs: i64,
    ) -> Result<()> {
        self.call(
            "set_group_special_title",
            json!({
                "group_id": group_id,
                "user_id": user_id,
                "special_title": special_title,
                "duration": duration_secs,
            }),
        )
        .await
        .map(drop)
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Answer a friend request; `flag` comes from the `request.friend` event.
    pub async fn set_friend_add_request(&self, flag: &str, approve: bool, remark: &str) -> Result<()> {
        self.call(
            "set_friend_add_request",
            json!({"flag": flag, "approve": approve, "remark": remark}),
        )
        .await
        .map(drop)
    }

    /// Answer a group join (`add`) or invitation (`invite`) request.
    pub async fn set_group_add_request(
        &self,
        flag: &str,
        sub_type: &str,
        approve: bool,
        reason: &str,
    ) -> Result<()> {
        self.call(
            "set_group_add_request",
            json!({"flag": flag, "sub_type": sub_type, "approve": approve, "reason": reason}),
        )
        .await
        .map(drop)
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get_login_info(&self) -> Result<LoginInfo> {
        self.call_as("get_login_info", json!({})).await
    }

    pub async fn get_stranger_info(&self, user_id: i64, no_cache: bool) -> Result<StrangerInfo> {
        self.call_as(
            "get_stranger_info",
            json!({"user_id": user_id, "no_cache": no_cache}),
        )
        .await
    }

    pub async fn get_friend_list(&self) -> Result<Vec<FriendInfo>> {
        self.call_as("get_friend_list", json!({})).await
    }

    pub async fn get_group_info(&self, group_id: i64, no_cache: bool) -> Result<GroupInfo> {
        self.call_as(
            "get_group_info",
            json!({"group_id": group_id, "no_cache": no_cache}),
        )
        .await
    }

    pub async fn get_group_list(&self) -> Result<Vec<GroupInfo>> {
        self.call_as("get_group_list", json!({})).await
    }

    pub async fn get_group_member_info(
        &self,
        group_id: i64,
        user_id: i64,
        no_cache: bool,
    ) -> Result<GroupMemberInfo> {
        self.call_as(
            "get_group_member_info",
            json!({"group_id": group_id, "user_id": user_id, "no_cache": no_cache}),
        )
        .await
    }

    pub async fn get_group_member_list(&self, group_id: i64) -> Result<Vec<GroupMemberInfo>> {
        self.call_as("get_group_member_list", json!({"group_id": group_id}))
            .await
    }

    pub async fn get_status(&self) -> Result<Status> {
        self.call_as("get_status", json!({})).await
    }

    pub async fn get_version_info(&self) -> Result<VersionInfo> {
        self.call_as("get_version_info", json!({})).await
    }

    pub async fn can_send_image(&self) -> Result<bool> {
        let capability: Capability = self.call_as("can_send_image", json!({})).await?;
        Ok(capability.yes)
    }

    pub async fn can_send_record(&self) -> Result<bool> {
        let capability: Capability = self.call_as("can_send_record", json!({})).await?;
        Ok(capability.yes)
    }

    pub async fn clean_cache(&self) -> Result<()> {
        self.call("clean_cache", json!({})).await.map(drop)
    }
}
