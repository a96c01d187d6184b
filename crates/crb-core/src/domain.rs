use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Conversation turns are scoped per (user, chat),
/// so the same user talking to the bot in two chats keeps two histories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatScope(pub i64);

/// Who produced a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role string. Unknown strings are rejected rather than
    /// silently passed through to the model call.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One role-tagged message in a conversation history.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// A registered bot user.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_authorized: bool,
    pub is_admin: bool,
    pub created_at: String,
}

impl UserRecord {
    /// Best-available display name for admin listings.
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
    }
}

/// Aggregated usage, either store-wide or scoped to one user.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UsageTotals {
    pub total_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
}
