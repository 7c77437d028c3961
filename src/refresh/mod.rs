//! Status refresh from remote trackers
//!
//! A refresh call takes the entities a caller is looking at, drops the ones
//! refreshed within the cooldown window, and asks each family's remote for
//! current status. GitHub entities go out as one aliased GraphQL query;
//! Bugzilla bugs are fetched one by one. Every fetch completes before the
//! write transaction for its results opens, so a failed or cancelled call
//! never leaves a half-applied entity behind.

mod batch;
mod cancel;
mod client;
mod credentials;
mod normalize;

pub use batch::{AliasKey, BatchQuery, DecodedBatch, ItemPayload};
pub use cancel::CancellationToken;
pub use client::{
    BugRecord, HttpClient, MockRemote, RefreshError, RefreshResult, RemoteClient,
    DEFAULT_GRAPHQL_URL,
};
pub use credentials::{
    ChainedCredentials, CredentialSource, EnvCredentials, GhCliCredentials, StaticCredentials,
};
pub use normalize::{bugzilla_update, github_update};

use crate::clock::{Clock, SystemClock};
use crate::entity::{Entity, EntityId, Family, RefreshShape, StatusUpdate, FAMILIES};
use crate::storage::EntityStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Default minimum time between two refreshes of the same entity
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 10;

/// A recorded state transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub entity_id: EntityId,
    pub key: String,
    /// `"old -> new"`
    pub detail: String,
}

/// What one refresh call did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    /// Entities past the cooldown filter that a fetch was attempted for
    pub attempted: usize,
    /// Entities whose new status was written
    pub updated: usize,
    pub transitions: Vec<Transition>,
    pub skipped_cooldown: usize,
    /// GitHub entities left alone because no token was available
    pub skipped_no_credentials: usize,
    /// Entities whose fetch, decode or write failed
    pub failed: usize,
}

/// Refreshes entity status against the remote trackers
pub struct Refresher {
    store: Arc<dyn EntityStore>,
    client: Arc<dyn RemoteClient>,
    credentials: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

impl Refresher {
    pub fn new(
        store: Arc<dyn EntityStore>,
        client: Arc<dyn RemoteClient>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            store,
            client,
            credentials,
            clock: Arc::new(SystemClock),
            cooldown: Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether `entity` should be fetched at `now`
    pub fn is_due(&self, entity: &Entity, now: DateTime<Utc>, force: bool) -> bool {
        match entity.last_refreshed_at {
            _ if force => true,
            None => true,
            Some(last) => now - last >= self.cooldown,
        }
    }

    pub async fn refresh(&self, entities: &[Entity], force: bool) -> RefreshResult<RefreshReport> {
        self.refresh_with_cancel(entities, force, &CancellationToken::new())
            .await
    }

    /// Refresh, aborting the in-flight fetch when `cancel` fires. Writes for
    /// entities applied before cancellation are kept.
    pub async fn refresh_with_cancel(
        &self,
        entities: &[Entity],
        force: bool,
        cancel: &CancellationToken,
    ) -> RefreshResult<RefreshReport> {
        let now = self.clock.now();
        let mut report = RefreshReport::default();

        for family in FAMILIES {
            let due: Vec<&Entity> = entities
                .iter()
                .filter(|e| e.family == family)
                .filter(|e| {
                    let due = self.is_due(e, now, force);
                    if !due {
                        tracing::debug!(entity = %e.entity_ref().key(), "within cooldown, skipping");
                        report.skipped_cooldown += 1;
                    }
                    due
                })
                .collect();
            if due.is_empty() {
                continue;
            }

            tracing::info!(family = %family, count = due.len(), force, "refreshing");
            match family.descriptor().refresh {
                RefreshShape::Batched => self.refresh_batched(&due, cancel, &mut report).await?,
                RefreshShape::PerItem => self.refresh_per_item(&due, cancel, &mut report).await?,
            }
        }

        tracing::info!(
            attempted = report.attempted,
            updated = report.updated,
            transitions = report.transitions.len(),
            failed = report.failed,
            "refresh complete"
        );
        Ok(report)
    }

    async fn refresh_batched(
        &self,
        due: &[&Entity],
        cancel: &CancellationToken,
        report: &mut RefreshReport,
    ) -> RefreshResult<()> {
        let Some(token) = self.credentials.token().await else {
            tracing::info!(count = due.len(), "no GitHub token available, skipping refresh");
            report.skipped_no_credentials += due.len();
            return Ok(());
        };

        let refs: Vec<_> = due.iter().map(|e| e.entity_ref()).collect();
        let query = BatchQuery::build(&refs);
        if query.is_empty() {
            return Ok(());
        }
        report.attempted += query.len();

        let response = cancellable(cancel, self.client.graphql(&token, query.text())).await?;
        let decoded = query.decode(&response);
        if let Some(first) = decoded.errors.first() {
            tracing::warn!(count = decoded.errors.len(), first = %first, "GraphQL errors in response");
        }
        if !decoded.missing.is_empty() {
            tracing::warn!(count = decoded.missing.len(), "no data returned for some GitHub entities");
        }
        for index in &decoded.missing {
            tracing::debug!(entity = %refs[*index].key(), "no data returned");
            report.failed += 1;
        }

        for (index, payload) in &decoded.items {
            self.apply(due[*index], &github_update(payload), report);
        }
        Ok(())
    }

    async fn refresh_per_item(
        &self,
        due: &[&Entity],
        cancel: &CancellationToken,
        report: &mut RefreshReport,
    ) -> RefreshResult<()> {
        for entity in due {
            report.attempted += 1;
            let fetched = cancellable(cancel, self.client.fetch_bug(&entity.scope, entity.local_id)).await;
            match fetched {
                Ok(bug) => self.apply(entity, &bugzilla_update(&bug), report),
                Err(RefreshError::Cancelled) => return Err(RefreshError::Cancelled),
                Err(e) => {
                    tracing::warn!(entity = %entity.entity_ref().key(), error = %e, "fetch failed");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    fn apply(&self, entity: &Entity, update: &StatusUpdate, report: &mut RefreshReport) {
        match self.store.apply_refresh(entity.id, update) {
            Ok(transition) => {
                report.updated += 1;
                if let Some(detail) = transition {
                    tracing::info!(entity = %entity.entity_ref().key(), %detail, "status changed");
                    report.transitions.push(Transition {
                        entity_id: entity.id,
                        key: entity.entity_ref().key(),
                        detail,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(entity = %entity.entity_ref().key(), error = %e, "failed to apply refresh");
                report.failed += 1;
            }
        }
    }
}

/// Race `fut` against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = RefreshResult<T>>,
) -> RefreshResult<T> {
    if cancel.is_cancelled() {
        return Err(RefreshError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RefreshError::Cancelled),
        result = fut => result,
    }
}

/// Families present in `entities`, in display order
pub fn families_of(entities: &[Entity]) -> Vec<Family> {
    FAMILIES
        .into_iter()
        .filter(|f| entities.iter().any(|e| e.family == *f))
        .collect()
}
