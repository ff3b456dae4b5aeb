//! Policy evaluation: surface allowlist, app/process boundary, rate limit,
//! then time guard. The first rule that denies decides.

mod shell;
mod trackers;
mod types;

pub use shell::{ShellClass, classify as classify_shell, path_escape};
pub use trackers::{ActionWindow, RateLimiter};
pub use types::{
    CommandDraft, Evaluation, PolicyContext, PolicyDecision, PolicyRule, RateKey, Reservation,
    Verdict,
};

use std::sync::Arc;

use crate::canon::Canon;
use crate::command::CommandType;
use crate::command::canonical::{self, HashDomain};
use crate::config::PolicyConfig;

const MS_PER_HOUR: i64 = 3_600_000;

/// Stateless apart from the rate windows, which advance only through
/// Allow decisions and their reservations.
#[derive(Debug)]
pub struct PolicyEvaluator {
    canon: Arc<Canon>,
    config: PolicyConfig,
    ruleset: String,
    limiter: RateLimiter,
}

impl PolicyEvaluator {
    pub fn new(canon: Arc<Canon>, config: PolicyConfig) -> Self {
        let ruleset = canonical::hash_value(
            HashDomain::Canon,
            &serde_json::json!({
                "canon": canon.fingerprint(),
                "policy": config,
            }),
        );
        Self {
            canon,
            config,
            ruleset: canonical::short(&ruleset, 16).to_string(),
            limiter: RateLimiter::new(),
        }
    }

    /// Fingerprint of the canon and policy config every decision is stamped with.
    pub fn ruleset(&self) -> &str {
        &self.ruleset
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn evaluate(&self, draft: &CommandDraft, ctx: &PolicyContext) -> Evaluation {
        let deny = |rule: PolicyRule, reason: String| {
            tracing::info!(
                %rule,
                %reason,
                principal = %ctx.principal,
                command_type = %draft.command_type,
                "policy denied"
            );
            Evaluation {
                decision: PolicyDecision::deny(rule, reason, &ctx.principal, &self.ruleset),
                reservation: None,
            }
        };

        if let Some(reason) = self.check_surface(draft, ctx) {
            return deny(PolicyRule::SurfaceAllowlist, reason);
        }
        if let Some(reason) = self.check_boundary(draft) {
            return deny(PolicyRule::AppBoundary, reason);
        }

        let key = RateKey {
            principal: ctx.principal.clone(),
            command_type: draft.command_type,
        };
        let window = self.limiter.window(&key);
        let mut window = window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let window_secs = self.config.rate_window_secs;
        let window_ms = i64::try_from(window_secs.saturating_mul(1_000)).unwrap_or(i64::MAX);
        window.prune(ctx.evaluated_at_ms, window_ms);

        let max = self.config.rate_limits.max_for(draft.command_type);
        if window.count() >= usize::try_from(max).unwrap_or(usize::MAX) {
            return deny(
                PolicyRule::RateLimit,
                format!("rate_limit:{}:{max}/{window_secs}s", draft.command_type),
            );
        }
        if let Some(reason) = self.check_time(&window, ctx.evaluated_at_ms) {
            return deny(PolicyRule::TimeGuard, reason);
        }

        window.record(ctx.evaluated_at_ms);
        tracing::debug!(
            principal = %ctx.principal,
            command_type = %draft.command_type,
            held = window.count(),
            "policy allowed"
        );
        Evaluation {
            decision: PolicyDecision::allow(&ctx.principal, &self.ruleset),
            reservation: Some(Reservation {
                key,
                at_ms: ctx.evaluated_at_ms,
            }),
        }
    }

    /// Undo the slot an Allow took when its decision could not be recorded.
    pub fn release(&self, reservation: &Reservation) {
        self.limiter.release(reservation);
    }

    /// Feed a previously recorded Allow into the windows without evaluating.
    pub fn prime(&self, reservation: &Reservation) {
        let window = self.limiter.window(&reservation.key);
        let mut window = window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        window.record(reservation.at_ms);
    }

    fn check_surface(&self, draft: &CommandDraft, ctx: &PolicyContext) -> Option<String> {
        if draft.command_type == CommandType::Cli {
            if !self.config.shell_enabled {
                return Some("shell_disabled".into());
            }
            return match shell::classify(draft.param("command").unwrap_or_default()) {
                ShellClass::ReadOnly => None,
                ShellClass::NeedsConfirm if ctx.confirmed => None,
                ShellClass::NeedsConfirm => Some(shell::CONFIRM_REQUIRED.into()),
                ShellClass::Denied(reason) => Some(reason),
            };
        }

        if self.canon.is_blocked_role(&draft.role) {
            Some(format!("text_edit_blocked:{}", draft.role))
        } else if !self.canon.is_interactive_role(&draft.role) {
            Some(format!("role_not_interactive:{}", draft.role))
        } else {
            None
        }
    }

    fn check_boundary(&self, draft: &CommandDraft) -> Option<String> {
        if draft.command_type == CommandType::Cli {
            return shell::path_escape(draft.param("command").unwrap_or_default())
                .map(|arg| format!("path_outside_workspace:{arg}"));
        }

        if !self.canon.is_allowed_app(&draft.app) {
            return Some(format!("app_forbidden:{}", draft.app));
        }
        match draft.param("app") {
            Some(target) if target != draft.app => Some(format!("app_switch:{target}")),
            _ => None,
        }
    }

    fn check_time(&self, window: &ActionWindow, at_ms: i64) -> Option<String> {
        let hour = at_ms.div_euclid(MS_PER_HOUR).rem_euclid(24);
        if !within_active_hours(self.config.active_hours_utc, hour) {
            return Some("time_guard:outside_active_hours".into());
        }

        let min_interval = i64::try_from(self.config.min_interval_ms).unwrap_or(i64::MAX);
        if min_interval > 0
            && let Some(last) = window.last_at()
            && at_ms.saturating_sub(last) < min_interval
        {
            return Some("time_guard:min_interval".into());
        }
        None
    }
}

/// `[start, end)`; `start > end` wraps past midnight.
fn within_active_hours([start, end]: [u8; 2], hour: i64) -> bool {
    let (start, end) = (i64::from(start), i64::from(end));
    if start < end {
        (start..end).contains(&hour)
    } else {
        hour >= start || hour < end
    }
}
