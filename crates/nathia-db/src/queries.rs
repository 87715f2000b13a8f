use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use uuid::Uuid;

use nathia_types::models::{ChatMessage, MotherType, SubscriptionTier, UserProfile};
use nathia_types::risk::RiskFlag;

use crate::models::{ChatMessageRow, ModerationQueueRow, ProfileRow, RiskAlertRow};
use crate::{Database, UserScope};

/// Result of one atomic count-then-maybe-insert on the rate-limit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Events inside the window before this request.
    pub in_window: u32,
    /// Timestamp (ms) of the oldest event still inside the window.
    pub oldest_ms: Option<i64>,
    pub admitted: bool,
}

impl UserScope {
    // -- Rate limit events --

    /// Count this user's events for `endpoint` in `(now - window, now]` and,
    /// if the count is below `max`, append one event. Both steps run in a
    /// single IMMEDIATE transaction so concurrent requests cannot over-admit.
    pub fn record_event_within_limit(
        &self,
        endpoint: &str,
        now_ms: i64,
        window_ms: i64,
        max: u32,
    ) -> Result<WindowCount> {
        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let (count, oldest_ms): (i64, Option<i64>) = tx.query_row(
                "SELECT COUNT(*), MIN(created_at) FROM rate_limit_events
                 WHERE user_id = ?1 AND endpoint = ?2 AND created_at > ?3",
                params![self.user_id, endpoint, now_ms - window_ms],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let in_window = u32::try_from(count).unwrap_or(u32::MAX);
            let admitted = in_window < max;
            if admitted {
                tx.execute(
                    "INSERT INTO rate_limit_events (user_id, endpoint, created_at) VALUES (?1, ?2, ?3)",
                    params![self.user_id, endpoint, now_ms],
                )?;
            }
            tx.commit()?;

            Ok(WindowCount {
                in_window,
                oldest_ms: oldest_ms.or(admitted.then_some(now_ms)),
                admitted,
            })
        })
    }

    // -- Chat messages --

    /// Store one turn. Rows that would fail the read-back invariant check
    /// are refused here, so a bad row can never poison later history reads.
    pub fn insert_message(&self, msg: &ChatMessage) -> Result<()> {
        if msg.user_id.to_string() != self.user_id {
            return Err(anyhow!("message {} does not belong to the scoped user", msg.id));
        }
        msg.check_invariants()?;
        let row = ChatMessageRow::from_message(msg)?;
        self.db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_messages
                    (id, user_id, message, response, risk_level, risk_flags,
                     requires_intervention, moderation, reply_source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.id,
                    row.user_id,
                    row.message,
                    row.response,
                    row.risk_level,
                    row.risk_flags,
                    row.requires_intervention,
                    row.moderation,
                    row.reply_source,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Most recent `limit` turns, oldest first.
    pub fn recent_messages(&self, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows = self.db.with_conn(|conn| query_recent_messages(conn, &self.user_id, limit))?;
        let mut messages = rows
            .into_iter()
            .map(ChatMessageRow::into_message)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub fn count_messages_since(&self, since_ms: i64) -> Result<u32> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1 AND created_at >= ?2",
                params![self.user_id, since_ms],
                |row| row.get(0),
            )?;
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
    }

    // -- Profile --

    pub fn profile(&self) -> Result<Option<UserProfile>> {
        self.db
            .with_conn(|conn| query_profile(conn, &self.user_id))?
            .map(ProfileRow::into_profile)
            .transpose()
    }

    /// Insert or update the user-editable profile fields. Tier and risk
    /// level are left untouched on update.
    pub fn upsert_profile_details(&self, profile: &UserProfile) -> Result<UserProfile> {
        let row = ProfileRow::from_profile(profile);
        self.db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO user_profiles
                    (user_id, display_name, mother_type, pregnancy_week, baby_name,
                     subscription_tier, risk_level, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'free', 0, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    mother_type = excluded.mother_type,
                    pregnancy_week = excluded.pregnancy_week,
                    baby_name = excluded.baby_name,
                    updated_at = excluded.updated_at",
                params![
                    self.user_id,
                    row.display_name,
                    row.mother_type,
                    row.pregnancy_week,
                    row.baby_name,
                    row.updated_at,
                ],
            )?;
            query_profile(conn, &self.user_id)?.ok_or_else(|| anyhow!("profile vanished after upsert"))
        })?
        .into_profile()
    }

    /// Fold one turn's risk level into the rolling profile indicator and
    /// return the new value. Creates the profile row if needed.
    pub fn apply_turn_risk(&self, level: u8, now: DateTime<Utc>) -> Result<u8> {
        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let previous: i64 = tx
                .query_row(
                    "SELECT risk_level FROM user_profiles WHERE user_id = ?1",
                    [&self.user_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            let rolled = UserProfile::rolled_risk(previous.clamp(0, 10) as u8, level);
            tx.execute(
                "INSERT INTO user_profiles (user_id, risk_level, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    risk_level = excluded.risk_level,
                    updated_at = excluded.updated_at",
                params![self.user_id, rolled, now.timestamp_millis()],
            )?;
            tx.commit()?;
            Ok(rolled)
        })
    }

    // -- Alerts & review queue --

    pub fn insert_risk_alert(
        &self,
        message_id: Uuid,
        level: u8,
        flags: &BTreeSet<RiskFlag>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let row = RiskAlertRow {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            risk_level: level as i64,
            risk_flags: encode_flags(flags)?,
            created_at: now.timestamp_millis(),
        };
        self.db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO risk_alerts (id, user_id, message_id, risk_level, risk_flags, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.id, self.user_id, row.message_id, row.risk_level, row.risk_flags, row.created_at],
            )?;
            Ok(())
        })
    }

    pub fn enqueue_for_review(&self, message: &str, category: &str, severity: u8, now: DateTime<Utc>) -> Result<()> {
        let row = ModerationQueueRow {
            id: Uuid::new_v4().to_string(),
            message: message.to_string(),
            category: category.to_string(),
            severity: severity as i64,
            created_at: now.timestamp_millis(),
        };
        self.db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO moderation_queue (id, user_id, message, category, severity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.id, self.user_id, row.message, row.category, row.severity, row.created_at],
            )?;
            Ok(())
        })
    }
}

impl Database {
    // -- Maintenance (service level, not user scoped) --

    /// Delete rate-limit events older than `cutoff_ms`. Returns rows removed.
    pub fn prune_rate_events(&self, cutoff_ms: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute("DELETE FROM rate_limit_events WHERE created_at <= ?1", [cutoff_ms])?;
            Ok(removed)
        })
    }

    /// Billing collaborators set the tier; users cannot change it themselves.
    pub fn set_subscription_tier(&self, user_id: Uuid, tier: SubscriptionTier, now: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO user_profiles (user_id, subscription_tier, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    subscription_tier = excluded.subscription_tier,
                    updated_at = excluded.updated_at",
                params![user_id.to_string(), tier.as_str(), now.timestamp_millis()],
            )?;
            Ok(())
        })
    }
}

fn query_recent_messages(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<ChatMessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, message, response, risk_level, risk_flags,
                requires_intervention, moderation, reply_source, created_at
         FROM chat_messages
         WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(params![user_id, limit], |row| {
            Ok(ChatMessageRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                message: row.get(2)?,
                response: row.get(3)?,
                risk_level: row.get(4)?,
                risk_flags: row.get(5)?,
                requires_intervention: row.get(6)?,
                moderation: row.get(7)?,
                reply_source: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_profile(conn: &Connection, user_id: &str) -> Result<Option<ProfileRow>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, display_name, mother_type, pregnancy_week, baby_name,
                subscription_tier, risk_level, updated_at
         FROM user_profiles WHERE user_id = ?1",
    )?;

    let row = stmt
        .query_row([user_id], |row| {
            Ok(ProfileRow {
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                mother_type: row.get(2)?,
                pregnancy_week: row.get(3)?,
                baby_name: row.get(4)?,
                subscription_tier: row.get(5)?,
                risk_level: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

// -- Row conversions --

fn encode_flags(flags: &BTreeSet<RiskFlag>) -> Result<String> {
    Ok(serde_json::to_string(flags)?)
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

impl ChatMessageRow {
    fn from_message(msg: &ChatMessage) -> Result<Self> {
        Ok(Self {
            id: msg.id.to_string(),
            user_id: msg.user_id.to_string(),
            message: msg.message.clone(),
            response: msg.response.clone(),
            risk_level: msg.risk_level as i64,
            risk_flags: encode_flags(&msg.risk_flags)?,
            requires_intervention: msg.requires_intervention,
            moderation: msg.moderation.as_str().to_string(),
            reply_source: msg.reply_source.as_str().to_string(),
            created_at: msg.created_at.timestamp_millis(),
        })
    }

    fn into_message(self) -> Result<ChatMessage> {
        let flags: BTreeSet<RiskFlag> = serde_json::from_str(&self.risk_flags)
            .with_context(|| format!("corrupt risk_flags on message {}", self.id))?;

        let msg = ChatMessage {
            id: self.id.parse()?,
            user_id: self.user_id.parse()?,
            message: self.message,
            response: self.response,
            risk_level: self.risk_level.clamp(0, u8::MAX as i64) as u8,
            risk_flags: flags,
            requires_intervention: self.requires_intervention,
            moderation: self.moderation.parse()?,
            reply_source: self.reply_source.parse()?,
            created_at: millis_to_utc(self.created_at)?,
        };
        msg.check_invariants()?;
        Ok(msg)
    }
}

impl ProfileRow {
    fn from_profile(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.user_id.to_string(),
            display_name: profile.display_name.clone(),
            mother_type: profile.mother_type.map(|m| m.as_str().to_string()),
            pregnancy_week: profile.pregnancy_week.map(i64::from),
            baby_name: profile.baby_name.clone(),
            subscription_tier: profile.subscription_tier.as_str().to_string(),
            risk_level: profile.risk_level as i64,
            updated_at: profile.updated_at.timestamp_millis(),
        }
    }

    fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            user_id: self.user_id.parse()?,
            display_name: self.display_name,
            mother_type: self.mother_type.as_deref().map(str::parse::<MotherType>).transpose()?,
            pregnancy_week: self.pregnancy_week.map(|w| w.clamp(0, 45) as u8),
            baby_name: self.baby_name,
            subscription_tier: self.subscription_tier.parse()?,
            risk_level: self.risk_level.clamp(0, 10) as u8,
            updated_at: millis_to_utc(self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use nathia_types::models::ReplySource;
    use nathia_types::risk::{ModerationAction, Resource, RiskAnalysis};

    use super::*;

    fn db() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    fn turn(user: Uuid, analysis: &RiskAnalysis, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage::record(user, "oi", "olá", analysis, ModerationAction::Pass, ReplySource::Generated, at)
    }

    #[test]
    fn window_admits_up_to_max_then_denies() {
        let db = db();
        let scope = db.scoped(Uuid::new_v4());
        let now = 1_700_000_000_000;

        for i in 0..3 {
            let wc = scope.record_event_within_limit("chat", now + i, 60_000, 3).unwrap();
            assert!(wc.admitted);
            assert_eq!(wc.in_window, i as u32);
        }
        let denied = scope.record_event_within_limit("chat", now + 3, 60_000, 3).unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.in_window, 3);
        assert_eq!(denied.oldest_ms, Some(now));

        // Once the first event slides out, one slot frees up.
        let later = scope.record_event_within_limit("chat", now + 60_000, 60_000, 3).unwrap();
        assert!(later.admitted);
        assert_eq!(later.in_window, 2);
    }

    #[test]
    fn window_counts_are_per_user_and_endpoint() {
        let db = db();
        let alice = db.scoped(Uuid::new_v4());
        let bob = db.scoped(Uuid::new_v4());
        let now = 1_700_000_000_000;

        assert!(alice.record_event_within_limit("chat", now, 60_000, 1).unwrap().admitted);
        assert!(!alice.record_event_within_limit("chat", now, 60_000, 1).unwrap().admitted);
        assert!(alice.record_event_within_limit("daily-plan", now, 60_000, 1).unwrap().admitted);
        assert!(bob.record_event_within_limit("chat", now, 60_000, 1).unwrap().admitted);
    }

    #[test]
    fn messages_round_trip_and_keep_intervention() {
        let db = db();
        let user = Uuid::new_v4();
        let scope = db.scoped(user);
        let base = Utc::now();

        let calm = RiskAnalysis::new(1, [RiskFlag::NormalStress], [], false, "");
        let crisis = RiskAnalysis::new(10, [RiskFlag::SuicidalIdeation], [Resource::Cvv], false, "");
        scope.insert_message(&turn(user, &calm, base)).unwrap();
        scope.insert_message(&turn(user, &crisis, base + Duration::seconds(1))).unwrap();

        let messages = scope.recent_messages(20).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].risk_level, 1);
        assert!(messages[1].risk_flags.contains(&RiskFlag::SuicidalIdeation));
        assert!(messages[1].requires_intervention);
    }

    #[test]
    fn read_back_rejects_rows_with_suppressed_intervention() {
        let db = db();
        let user = Uuid::new_v4();
        let scope = db.scoped(user);
        let calm = RiskAnalysis::new(1, [], [], false, "");
        scope.insert_message(&turn(user, &calm, Utc::now())).unwrap();

        db.with_conn_mut(|conn| {
            conn.execute("UPDATE chat_messages SET risk_flags = '[\"suicidal_ideation\"]'", [])?;
            Ok(())
        })
        .unwrap();

        assert!(scope.recent_messages(10).is_err());
    }

    #[test]
    fn insert_refuses_rows_with_suppressed_intervention() {
        let db = db();
        let user = Uuid::new_v4();
        let scope = db.scoped(user);
        let calm = RiskAnalysis::new(1, [], [], false, "");

        let mut msg = turn(user, &calm, Utc::now());
        msg.risk_flags.insert(RiskFlag::SuicidalIdeation);
        assert!(scope.insert_message(&msg).is_err());

        let mut msg = turn(user, &calm, Utc::now());
        msg.risk_level = 9;
        assert!(scope.insert_message(&msg).is_err());

        // Nothing was written, so history stays readable.
        assert!(scope.recent_messages(10).unwrap().is_empty());
        scope.insert_message(&turn(user, &calm, Utc::now())).unwrap();
        assert_eq!(scope.recent_messages(10).unwrap().len(), 1);
    }

    #[test]
    fn risk_alert_must_point_at_a_stored_message() {
        let db = db();
        let user = Uuid::new_v4();
        let scope = db.scoped(user);
        let now = Utc::now();
        let crisis = RiskAnalysis::new(10, [RiskFlag::SuicidalIdeation], [Resource::Cvv], true, "");
        let flags = crisis.flags().clone();

        assert!(scope.insert_risk_alert(Uuid::new_v4(), 10, &flags, now).is_err());

        let msg = turn(user, &crisis, now);
        scope.insert_message(&msg).unwrap();
        scope.insert_risk_alert(msg.id, 10, &flags, now).unwrap();
    }

    #[test]
    fn scope_cannot_see_other_users_rows() {
        let db = db();
        let alice_id = Uuid::new_v4();
        let alice = db.scoped(alice_id);
        let bob = db.scoped(Uuid::new_v4());
        let calm = RiskAnalysis::new(1, [], [], false, "");

        alice.insert_message(&turn(alice_id, &calm, Utc::now())).unwrap();
        assert!(bob.recent_messages(10).unwrap().is_empty());
        assert_eq!(bob.count_messages_since(0).unwrap(), 0);

        // Writing someone else's message through a scope is refused.
        assert!(bob.insert_message(&turn(alice_id, &calm, Utc::now())).is_err());
    }

    #[test]
    fn profile_upsert_preserves_tier_and_risk() {
        let db = db();
        let user = Uuid::new_v4();
        let scope = db.scoped(user);
        let now = Utc::now();

        db.set_subscription_tier(user, SubscriptionTier::Premium, now).unwrap();
        assert_eq!(scope.apply_turn_risk(9, now).unwrap(), 9);

        let mut profile = UserProfile::new(user);
        profile.display_name = Some("Ana".into());
        profile.mother_type = Some(MotherType::Gestante);
        profile.pregnancy_week = Some(20);
        let stored = scope.upsert_profile_details(&profile).unwrap();

        assert_eq!(stored.display_name.as_deref(), Some("Ana"));
        assert_eq!(stored.subscription_tier, SubscriptionTier::Premium);
        assert_eq!(stored.risk_level, 9);
    }

    #[test]
    fn prune_drops_only_old_events() {
        let db = db();
        let scope = db.scoped(Uuid::new_v4());
        scope.record_event_within_limit("chat", 1_000, 60_000, 10).unwrap();
        scope.record_event_within_limit("chat", 5_000, 60_000, 10).unwrap();

        assert_eq!(db.prune_rate_events(2_000).unwrap(), 1);
        assert_eq!(db.prune_rate_events(2_000).unwrap(), 0);
    }

    #[test]
    fn file_backed_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nathia.db");
        let user = Uuid::new_v4();

        {
            let db = Arc::new(Database::open(&path).unwrap());
            db.scoped(user).apply_turn_risk(4, Utc::now()).unwrap();
        }

        let db = Arc::new(Database::open(&path).unwrap());
        let profile = db.scoped(user).profile().unwrap().unwrap();
        assert_eq!(profile.risk_level, UserProfile::rolled_risk(0, 4));
    }
}
