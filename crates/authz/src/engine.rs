//! Permission checks over the role hierarchy.
//!
//! [`PermissionEngine::check`] allows a request iff at least one grant held
//! by the principal's role (directly or through a lower-ranked role) covers
//! the resource and action and has no condition or a satisfied one. Anything
//! else is a [`Decision::Deny`].
//!
//! # Caching
//!
//! Decisions that do not depend on attributes are cached in the shared
//! store under `authz:decisions:{generation}:{window}:{subject}`, one hash
//! field per `role|resource|action`. The window is the wall clock divided
//! by the decision TTL, so a hash only takes writes for one TTL and expires
//! at most one TTL after that. Bumping the generation
//! (on [`invalidate_all`](PermissionEngine::invalidate_all) or when a reload
//! changes the grants) moves every subject to a new hash at once; the old
//! ones expire whole.
//!
//! # Degraded mode
//!
//! The grant set lives in memory, so a check never needs the store. When
//! the store cannot answer, the decision is recomputed and not cached. Only
//! a missing grant set (never loaded) makes a check fail.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use trustcore_storage::{ReadOutcome, ResilientStore, WriteOutcome};

use crate::{
    config::PermissionConfig,
    error::AuthzError,
    grant::{GrantSet, PermissionGrant},
    pattern::{FIELD_SEPARATOR, validate_value},
    principal::{Principal, Resource},
    repository::GrantRepository,
    role::Role,
};

/// Key prefix of the decision hashes.
pub const DECISION_KEY_PREFIX: &str = "authz:decisions:";

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// At least one applicable grant matched.
    Allow,
    /// No applicable grant matched.
    Deny,
}

impl Decision {
    /// `true` for [`Decision::Allow`].
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Decision::Allow),
            "deny" => Some(Decision::Deny),
            _ => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating grants without the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Evaluation {
    pub(crate) decision: Decision,
    /// `false` if a conditional grant took part, since the decision then
    /// depends on attributes that are not part of the cache key.
    pub(crate) cacheable: bool,
}

/// Evaluates `grants` for one request.
pub(crate) fn evaluate(
    grants: &GrantSet,
    principal: &Principal,
    resource: &Resource,
    action: &str,
) -> Evaluation {
    let mut allowed = false;
    let mut conditional = false;

    for grant in grants.effective(principal.role) {
        if !grant.covers(resource.id(), action) {
            continue;
        }
        match &grant.condition {
            None => return Evaluation { decision: Decision::Allow, cacheable: true },
            Some(condition) => {
                conditional = true;
                if !allowed && condition.evaluate(principal, resource) {
                    allowed = true;
                }
            },
        }
    }

    let decision = if allowed { Decision::Allow } else { Decision::Deny };
    Evaluation { decision, cacheable: !conditional }
}

/// Role-based permission checks with a shared decision cache.
pub struct PermissionEngine {
    store: ResilientStore,
    repository: Arc<dyn GrantRepository>,
    config: PermissionConfig,
    grants: ArcSwapOption<GrantSet>,
    generation: AtomicU64,
    cancel_token: CancellationToken,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[bon::bon]
impl PermissionEngine {
    /// Creates an engine with no grants loaded. Call
    /// [`refresh_grants`](Self::refresh_grants) before checking.
    #[builder]
    pub fn new(
        store: ResilientStore,
        repository: Arc<dyn GrantRepository>,
        #[builder(default)] config: PermissionConfig,
    ) -> Self {
        // Start from the wall clock so fields cached by a previous process
        // are not mistaken for current ones.
        let generation = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        Self {
            store,
            repository,
            config,
            grants: ArcSwapOption::empty(),
            generation: AtomicU64::new(generation),
            cancel_token: CancellationToken::new(),
            task_handle: Mutex::new(None),
        }
    }
}

impl PermissionEngine {
    /// Reloads grants from the repository and swaps them in. Returns the
    /// number of grants loaded.
    ///
    /// If the new set differs from the current one the generation is
    /// bumped, invalidating every cached decision.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::GrantSourceUnavailable`] if the repository fails
    /// - [`AuthzError::UnknownRole`] if a grant names no known role
    ///
    /// On error the previous grant set stays in place.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_grants(&self) -> Result<usize, AuthzError> {
        let loaded = self
            .repository
            .load()
            .await
            .map_err(|e| AuthzError::grant_source("load grants", Some(e)))?;
        let set = GrantSet::new(loaded)?;
        let count = set.len();

        let changed = self.grants.load_full().is_none_or(|current| !current.same_grants(&set));
        self.grants.store(Some(Arc::new(set)));

        if changed {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(grants = count, generation, "grant set loaded");
        } else {
            tracing::debug!(grants = count, "grant set unchanged");
        }
        Ok(count)
    }

    /// Decides whether `principal` may perform `action` on `resource`.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::InvalidPattern`] if the resource id or action is
    ///   malformed or contains a wildcard
    /// - [`AuthzError::GrantSourceUnavailable`] if no grant set has ever
    ///   been loaded
    #[tracing::instrument(
        skip_all,
        fields(
            subject = %principal.subject,
            role = %principal.role,
            resource = resource.id(),
            action = action
        )
    )]
    pub async fn check(
        &self,
        principal: &Principal,
        resource: &Resource,
        action: &str,
    ) -> Result<Decision, AuthzError> {
        validate_value(resource.id())?;
        validate_value(action)?;
        // Read the generation before the grants: a reload stores the new set
        // before bumping, so a decision is never cached under a generation
        // newer than the grants it was computed from.
        let generation = self.generation();
        let grants = self
            .grants
            .load_full()
            .ok_or_else(|| AuthzError::grant_source("grant set not loaded", None))?;

        let now_ms = Utc::now().timestamp_millis();
        let key = decision_key(generation, self.window(now_ms), &principal.subject);
        let field = decision_field(principal.role, resource.id(), action);

        let store_answered = match self.store.hget(&key, &field).await {
            ReadOutcome::Fresh(Some(raw)) => {
                if let Some(decision) = decode_cached(&raw, now_ms) {
                    tracing::debug!(decision = %decision, "decision cache hit");
                    return Ok(decision);
                }
                true
            },
            ReadOutcome::Fresh(None) => true,
            ReadOutcome::Cached(_) | ReadOutcome::Unknown => false,
        };

        let evaluation = evaluate(&grants, principal, resource, action);
        tracing::debug!(
            decision = %evaluation.decision,
            cacheable = evaluation.cacheable,
            degraded = !store_answered,
            "decision computed"
        );

        if evaluation.cacheable && store_answered {
            self.cache_decision(&key, &field, evaluation.decision, now_ms).await;
        }
        Ok(evaluation.decision)
    }

    /// Drops every cached decision for `subject`. Call when the subject's
    /// role changes.
    ///
    /// The outcome reports whether the store applied the delete; cached
    /// fields also age out after the decision TTL.
    pub async fn invalidate_principal(&self, subject: &str) -> WriteOutcome {
        let outcome = self.store.delete(&self.cache_key(subject)).await;
        if outcome.is_applied() {
            tracing::info!(subject, "cached decisions invalidated");
        } else {
            tracing::warn!(subject, outcome = ?outcome, "failed to invalidate cached decisions");
        }
        outcome
    }

    /// Invalidates every cached decision for every subject by bumping the
    /// generation.
    pub fn invalidate_all(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "all cached decisions invalidated");
    }

    /// The resolved grants of `role`: its own plus those of every
    /// lower-ranked role.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::GrantSourceUnavailable`] if no grant set has
    /// been loaded.
    pub fn effective_grants(&self, role: Role) -> Result<Vec<PermissionGrant>, AuthzError> {
        let grants = self
            .grants
            .load_full()
            .ok_or_else(|| AuthzError::grant_source("grant set not loaded", None))?;
        Ok(grants.effective(role).iter().map(|g| g.as_ref().clone()).collect())
    }

    /// The current grant set, if loaded.
    #[must_use]
    pub fn grants(&self) -> Option<Arc<GrantSet>> {
        self.grants.load_full()
    }

    /// Store key of the hash `check` currently reads `subject`'s cached
    /// decisions from.
    #[must_use]
    pub fn cache_key(&self, subject: &str) -> String {
        let now_ms = Utc::now().timestamp_millis();
        decision_key(self.generation(), self.window(now_ms), subject)
    }

    /// Current cache generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Engine settings.
    #[must_use]
    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    /// Starts the background task that reloads grants every
    /// `refresh_interval`. A failed reload keeps the last good set.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.refresh_interval());
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("grant refresh task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = engine.refresh_grants().await {
                            tracing::warn!(error = %err, "grant refresh failed, keeping last good set");
                        }
                    }
                }
            }
        });

        *self.task_handle.lock() = Some(handle);
    }

    /// Stops the background task and waits for it to finish.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.task_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "grant refresh task panicked");
        }
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.config.decision_ttl().as_millis()).unwrap_or(i64::MAX).max(1)
    }

    fn window(&self, now_ms: i64) -> i64 {
        now_ms.div_euclid(self.ttl_ms())
    }

    async fn cache_decision(&self, key: &str, field: &str, decision: Decision, now_ms: i64) {
        let ttl = self.config.decision_ttl();
        let expires_at = now_ms.saturating_add(self.ttl_ms());
        let value = format!("{}{FIELD_SEPARATOR}{expires_at}", decision.as_str());

        let written = self.store.hset(key, field, Bytes::from(value)).await;
        if !written.is_applied() {
            tracing::debug!(outcome = ?written, "decision not cached");
            return;
        }
        let expiry = self.store.expire(key, ttl).await;
        if !expiry.is_applied() {
            tracing::debug!(outcome = ?expiry, "decision hash ttl not set");
        }
    }
}

impl std::fmt::Debug for PermissionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEngine")
            .field("config", &self.config)
            .field("grants", &self.grants.load_full().map(|g| g.len()))
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

fn decision_key(generation: u64, window: i64, subject: &str) -> String {
    format!("{DECISION_KEY_PREFIX}{generation}:{window}:{subject}")
}

fn decision_field(role: Role, resource: &str, action: &str) -> String {
    let sep = FIELD_SEPARATOR;
    format!("{role}{sep}{resource}{sep}{action}")
}

/// Decodes `decision|expires_at_ms`. Expired or unreadable values are
/// misses.
fn decode_cached(raw: &[u8], now_ms: i64) -> Option<Decision> {
    let text = std::str::from_utf8(raw).ok()?;
    let (decision, expires_at) = text.split_once(FIELD_SEPARATOR)?;
    let expires_at: i64 = expires_at.parse().ok()?;
    if expires_at <= now_ms {
        return None;
    }
    Decision::parse(decision)
}
