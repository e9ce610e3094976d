//! Admission-time policy evaluation.
//!
//! Evaluation order, first definitive answer wins:
//!
//! 1. user exists;
//! 2. do-not-disturb (bypassed by critical priority);
//! 3. channel enablement: category override, then the user's tri-state flag,
//!    then the application default, then the system default (enabled);
//! 4. quiet hours in the user's timezone (bypassed by critical);
//! 5. daily quota through the distributed counter (bypassed by critical).
//!
//! Critical priority bypasses DND, quiet hours, and the daily quota, but
//! never channel enablement. Rejections happen before persistence.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::{NotifyError, PolicyRejection};
use crate::models::{Application, Channel, Priority, QuietHours, User};

/// Distributed daily counter. Implementations must be atomic across
/// concurrent callers; the redis-backed one lives in the delivery crate.
#[async_trait]
pub trait QuotaCounter: Send + Sync {
    /// Atomically increment the counter behind `key` and return true when
    /// the resulting value is within `limit`. The counter resets at the
    /// local-day boundary.
    async fn increment_and_check(&self, key: &str, limit: u32) -> Result<bool, NotifyError>;
}

/// What the policy evaluator needs to know about an admission attempt.
#[derive(Debug, Clone)]
pub struct AdmissionRequest<'a> {
    pub channel: Channel,
    pub priority: Priority,
    pub category: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Run the full admission policy for one user. `Ok(())` admits the
    /// notification; `Err` carries the rejection reason.
    pub async fn evaluate(
        &self,
        app: &Application,
        user: &User,
        request: &AdmissionRequest<'_>,
        quota: &dyn QuotaCounter,
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let critical = request.priority == Priority::Critical;

        if user.preferences.dnd && !critical {
            debug!(user_id = %user.user_id, "admission rejected: dnd");
            return Err(PolicyRejection::DndEnabled.into());
        }

        self.check_channel_enabled(app, user, request)?;

        if !critical {
            if let Some(quiet) = &user.preferences.quiet_hours {
                if in_quiet_hours(quiet, user.timezone.as_deref(), now) {
                    debug!(user_id = %user.user_id, "admission rejected: quiet hours");
                    return Err(PolicyRejection::QuietHours.into());
                }
            }
        }

        let daily_limit = user.preferences.daily_limit;
        if daily_limit > 0 && !critical {
            let key = format!("user:{}", user.user_id);
            let allowed = quota.increment_and_check(&key, daily_limit).await?;
            if !allowed {
                debug!(user_id = %user.user_id, daily_limit, "admission rejected: daily quota");
                return Err(PolicyRejection::RateLimitExceeded.into());
            }
        }

        Ok(())
    }

    /// The worker's pre-send re-check: channel enablement and quiet hours.
    /// Preferences may have changed between admission and dispatch; a
    /// notification the user no longer wants is cancelled, not sent. The
    /// daily quota is not consulted again; admission already counted it.
    pub fn recheck_before_send(
        &self,
        app: &Application,
        user: &User,
        request: &AdmissionRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.check_channel_enabled(app, user, request)?;
        if request.priority != Priority::Critical {
            if let Some(quiet) = &user.preferences.quiet_hours {
                if in_quiet_hours(quiet, user.timezone.as_deref(), now) {
                    return Err(PolicyRejection::QuietHours.into());
                }
            }
        }
        Ok(())
    }

    /// Layered channel enablement. Category overrides are consulted first;
    /// a category that is disabled, or that restricts channels to a list not
    /// containing the requested one, rejects outright.
    fn check_channel_enabled(
        &self,
        app: &Application,
        user: &User,
        request: &AdmissionRequest<'_>,
    ) -> Result<(), NotifyError> {
        let rejected = PolicyRejection::ChannelDisabled {
            channel: request.channel,
        };

        if let Some(category) = request.category {
            if let Some(pref) = user.preferences.categories.get(category) {
                if !pref.enabled {
                    return Err(rejected.into());
                }
                if !pref.enabled_channels.is_empty()
                    && !pref.enabled_channels.contains(&request.channel)
                {
                    return Err(rejected.into());
                }
            }
        }

        if let Some(flag) = user.preferences.channel_flag(request.channel) {
            return if flag { Ok(()) } else { Err(rejected.into()) };
        }

        if let Some(flag) = app.settings.channel_defaults.flag(request.channel) {
            return if flag { Ok(()) } else { Err(rejected.into()) };
        }

        // System default: enabled.
        Ok(())
    }
}

/// Whether `now` falls inside the quiet-hours window, evaluated in the
/// user's timezone (UTC when absent or unparseable). The window is half-open
/// `[start, end)`; when `start >= end` it wraps past midnight. `start ==
/// end` is never in window.
pub fn in_quiet_hours(quiet: &QuietHours, timezone: Option<&str>, now: DateTime<Utc>) -> bool {
    if !quiet.is_configured() {
        return false;
    }
    let (start, end) = match (parse_hhmm(&quiet.start), parse_hhmm(&quiet.end)) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            warn!(start = %quiet.start, end = %quiet.end, "unparseable quiet hours, ignoring");
            return false;
        }
    };
    if start == end {
        return false;
    }

    let tz: Tz = timezone
        .and_then(|name| name.parse().ok())
        .unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);
    let current = local.hour() * 60 + local.minute();

    if start < end {
        current >= start && current < end
    } else {
        current >= start || current < end
    }
}

/// Parse `"HH:MM"` into minutes since midnight.
fn parse_hhmm(value: &str) -> Option<u32> {
    let (hh, mm) = value.split_once(':')?;
    let hours: u32 = hh.parse().ok()?;
    let minutes: u32 = mm.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryPreference, NotificationStatus, Preferences};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeQuota {
        counter: AtomicU32,
    }

    impl FakeQuota {
        fn new() -> Self {
            Self {
                counter: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl QuotaCounter for FakeQuota {
        async fn increment_and_check(&self, _key: &str, limit: u32) -> Result<bool, NotifyError> {
            let value = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(value <= limit)
        }
    }

    fn test_user(preferences: Preferences) -> User {
        let now = Utc::now();
        User {
            user_id: "u1".into(),
            app_id: "a1".into(),
            external_user_id: None,
            email: Some("u1@example.com".into()),
            phone: None,
            timezone: Some("America/New_York".into()),
            language: None,
            webhook_url: None,
            devices: Vec::new(),
            preferences,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_app() -> Application {
        Application::new("acme", "key-1")
    }

    fn request(channel: Channel, priority: Priority) -> AdmissionRequest<'static> {
        AdmissionRequest {
            channel,
            priority,
            category: None,
        }
    }

    fn assert_rejection(result: Result<(), NotifyError>, expected: PolicyRejection) {
        match result {
            Err(NotifyError::Policy(rejection)) => assert_eq!(rejection, expected),
            other => panic!("expected policy rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn dnd_blocks_normal_but_not_critical() {
        let evaluator = PolicyEvaluator::new();
        let user = test_user(Preferences {
            dnd: true,
            ..Default::default()
        });
        let app = test_app();
        let quota = FakeQuota::new();

        assert_rejection(
            evaluator
                .evaluate(&app, &user, &request(Channel::Push, Priority::Normal), &quota, Utc::now())
                .await,
            PolicyRejection::DndEnabled,
        );
        evaluator
            .evaluate(&app, &user, &request(Channel::Push, Priority::Critical), &quota, Utc::now())
            .await
            .expect("critical bypasses dnd");
    }

    #[tokio::test]
    async fn critical_never_bypasses_channel_enablement() {
        let evaluator = PolicyEvaluator::new();
        let user = test_user(Preferences {
            push_enabled: Some(false),
            ..Default::default()
        });
        let app = test_app();
        let quota = FakeQuota::new();

        assert_rejection(
            evaluator
                .evaluate(&app, &user, &request(Channel::Push, Priority::Critical), &quota, Utc::now())
                .await,
            PolicyRejection::ChannelDisabled {
                channel: Channel::Push,
            },
        );
    }

    #[tokio::test]
    async fn unset_user_flag_falls_through_to_app_default() {
        let evaluator = PolicyEvaluator::new();
        let user = test_user(Preferences::default());
        let mut app = test_app();
        app.settings.channel_defaults.sms = Some(false);
        let quota = FakeQuota::new();

        assert_rejection(
            evaluator
                .evaluate(&app, &user, &request(Channel::Sms, Priority::Normal), &quota, Utc::now())
                .await,
            PolicyRejection::ChannelDisabled {
                channel: Channel::Sms,
            },
        );
        // Email has no user or app setting: the system default admits it.
        evaluator
            .evaluate(&app, &user, &request(Channel::Email, Priority::Normal), &quota, Utc::now())
            .await
            .expect("system default enables");
    }

    #[tokio::test]
    async fn explicit_user_flag_overrides_app_default() {
        let evaluator = PolicyEvaluator::new();
        let user = test_user(Preferences {
            sms_enabled: Some(true),
            ..Default::default()
        });
        let mut app = test_app();
        app.settings.channel_defaults.sms = Some(false);
        let quota = FakeQuota::new();

        evaluator
            .evaluate(&app, &user, &request(Channel::Sms, Priority::Normal), &quota, Utc::now())
            .await
            .expect("user opt-in wins over app default");
    }

    #[tokio::test]
    async fn category_override_restricts_channels() {
        let evaluator = PolicyEvaluator::new();
        let mut categories = HashMap::new();
        categories.insert(
            "marketing".to_string(),
            CategoryPreference {
                enabled: true,
                enabled_channels: vec![Channel::Email],
            },
        );
        categories.insert(
            "noise".to_string(),
            CategoryPreference {
                enabled: false,
                enabled_channels: Vec::new(),
            },
        );
        let user = test_user(Preferences {
            categories,
            ..Default::default()
        });
        let app = test_app();
        let quota = FakeQuota::new();

        let mut req = request(Channel::Push, Priority::Normal);
        req.category = Some("marketing");
        assert_rejection(
            evaluator.evaluate(&app, &user, &req, &quota, Utc::now()).await,
            PolicyRejection::ChannelDisabled {
                channel: Channel::Push,
            },
        );

        let mut req = request(Channel::Email, Priority::Normal);
        req.category = Some("marketing");
        evaluator
            .evaluate(&app, &user, &req, &quota, Utc::now())
            .await
            .expect("listed channel admitted");

        let mut req = request(Channel::Email, Priority::Normal);
        req.category = Some("noise");
        assert_rejection(
            evaluator.evaluate(&app, &user, &req, &quota, Utc::now()).await,
            PolicyRejection::ChannelDisabled {
                channel: Channel::Email,
            },
        );
    }

    #[tokio::test]
    async fn daily_limit_enforced_and_zero_means_unlimited() {
        let evaluator = PolicyEvaluator::new();
        let user = test_user(Preferences {
            daily_limit: 2,
            ..Default::default()
        });
        let app = test_app();
        let quota = FakeQuota::new();

        for _ in 0..2 {
            evaluator
                .evaluate(&app, &user, &request(Channel::Push, Priority::Normal), &quota, Utc::now())
                .await
                .expect("within quota");
        }
        assert_rejection(
            evaluator
                .evaluate(&app, &user, &request(Channel::Push, Priority::Normal), &quota, Utc::now())
                .await,
            PolicyRejection::RateLimitExceeded,
        );

        // Zero limit: the counter is never consulted.
        let unlimited = test_user(Preferences::default());
        for _ in 0..50 {
            evaluator
                .evaluate(&app, &unlimited, &request(Channel::Push, Priority::Normal), &quota, Utc::now())
                .await
                .expect("no quota enforced");
        }
    }

    #[test]
    fn quiet_hours_window_boundaries() {
        let quiet = QuietHours {
            start: "22:00".into(),
            end: "06:00".into(),
        };
        // 05:59 UTC is in window, 06:00 is out.
        let at = |h, m| Utc.with_ymd_and_hms(2025, 6, 10, h, m, 0).unwrap();
        assert!(in_quiet_hours(&quiet, None, at(5, 59)));
        assert!(!in_quiet_hours(&quiet, None, at(6, 0)));
        assert!(in_quiet_hours(&quiet, None, at(23, 30)));
        assert!(!in_quiet_hours(&quiet, None, at(12, 0)));
    }

    #[test]
    fn quiet_hours_equal_bounds_never_match() {
        let quiet = QuietHours {
            start: "09:00".into(),
            end: "09:00".into(),
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap();
        assert!(!in_quiet_hours(&quiet, None, now));
    }

    #[test]
    fn quiet_hours_respect_timezone() {
        // 03:00 UTC on 2025-06-10 is 23:00 on 2025-06-09 in New York (EDT).
        let quiet = QuietHours {
            start: "22:00".into(),
            end: "08:00".into(),
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 3, 0, 0).unwrap();
        assert!(in_quiet_hours(&quiet, Some("America/New_York"), now));
        // The same instant is 05:00 in Paris, also inside 22:00-08:00.
        assert!(in_quiet_hours(&quiet, Some("Europe/Paris"), now));
        // 12:00 UTC is 08:00 in New York: window already closed (half-open).
        let midday = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        assert!(!in_quiet_hours(&quiet, Some("America/New_York"), midday));
    }

    #[test]
    fn unparseable_timezone_falls_back_to_utc() {
        let quiet = QuietHours {
            start: "10:00".into(),
            end: "11:00".into(),
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 10, 30, 0).unwrap();
        assert!(in_quiet_hours(&quiet, Some("Not/AZone"), now));
    }

    #[test]
    fn state_machine_guard_used_by_policy_tests() {
        // Sanity: policy never resurrects a final notification.
        assert!(!NotificationStatus::Cancelled.can_transition_to(NotificationStatus::Queued));
    }
}
