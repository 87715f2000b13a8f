/// Database row types — these map directly to SQLite rows.
/// Distinct from nathia-types models to keep the DB layer independent.

pub struct ChatMessageRow {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub response: String,
    pub risk_level: i64,
    /// JSON array of flag names.
    pub risk_flags: String,
    pub requires_intervention: bool,
    pub moderation: String,
    pub reply_source: String,
    pub created_at: i64,
}

pub struct ProfileRow {
    pub user_id: String,
    pub display_name: Option<String>,
    pub mother_type: Option<String>,
    pub pregnancy_week: Option<i64>,
    pub baby_name: Option<String>,
    pub subscription_tier: String,
    pub risk_level: i64,
    pub updated_at: i64,
}

pub struct RiskAlertRow {
    pub id: String,
    pub message_id: String,
    pub risk_level: i64,
    pub risk_flags: String,
    pub created_at: i64,
}

pub struct ModerationQueueRow {
    pub id: String,
    pub message: String,
    pub category: String,
    pub severity: i64,
    pub created_at: i64,
}
