//! Sweep executor: processes one admitted plan, item by item.

use std::sync::Arc;

use updater_core::{is_well_formed_reference, SweepPlan};
use updater_logging::{walk_debug, walk_info};

use crate::artifact::{extract_identity, has_changed, migrate_preferences};
use crate::events::{EventSink, SweepReport, WalkEvent};
use crate::fetch::FetchSettings;
use crate::handler::{HandlerError, SiteHandler};
use crate::host::Host;
use crate::registry::HandlerRegistry;
use crate::session::{CookieMap, SessionStore};
use crate::settings::HandlerDescriptor;
use crate::types::ItemFailure;

/// Settings and tracking state the walker reads and writes during a sweep.
pub trait WalkContext: Send + Sync {
    fn site_settings(&self, site_id: &str) -> Option<HandlerDescriptor>;

    fn store_site_cookies(&self, site_id: &str, cookies: CookieMap);

    /// The host now holds `new_item_id` in place of `old_item_id`.
    fn item_replaced(&self, old_item_id: &str, new_item_id: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Skipped,
    UpToDate,
    Updated,
}

pub struct Walker {
    registry: Arc<HandlerRegistry>,
    sessions: SessionStore,
    host: Arc<dyn Host>,
    events: Arc<dyn EventSink>,
    fetch: FetchSettings,
}

impl Walker {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        sessions: SessionStore,
        host: Arc<dyn Host>,
        events: Arc<dyn EventSink>,
        fetch: FetchSettings,
    ) -> Self {
        Self {
            registry,
            sessions,
            host,
            events,
            fetch,
        }
    }

    /// Walks every item of `plan` in order. Item failures are reported and
    /// never stop the sweep.
    pub async fn run(&self, plan: &SweepPlan, context: &dyn WalkContext) -> SweepReport {
        let mut report = SweepReport {
            forced: plan.forced,
            ..SweepReport::default()
        };

        for item_id in &plan.items {
            match self.process_item(item_id, context, &mut report.productive).await {
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Ok(ItemOutcome::UpToDate) => report.up_to_date += 1,
                Ok(ItemOutcome::Updated) => report.updated += 1,
                Err(failure) => {
                    report.failed += 1;
                    walk_info!("Item {} failed: {}", item_id, failure);
                    self.events.emit(WalkEvent::ItemError {
                        item_id: item_id.clone(),
                        message: failure.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn process_item(
        &self,
        item_id: &str,
        context: &dyn WalkContext,
        productive: &mut bool,
    ) -> Result<ItemOutcome, ItemFailure> {
        let Some(status) = self.host.item_status(item_id) else {
            walk_info!("Item {} is no longer known to the host, skipped", item_id);
            return Ok(ItemOutcome::Skipped);
        };

        let reference = match status.source_reference.as_deref() {
            Some(reference) if is_well_formed_reference(reference) => reference,
            Some(reference) => {
                walk_info!(
                    "{}: {}",
                    status.name,
                    ItemFailure::ReferenceMalformed(reference.to_string())
                );
                return Ok(ItemOutcome::Skipped);
            }
            None => {
                walk_info!("{} doesn't have a source reference, skipped", status.name);
                return Ok(ItemOutcome::Skipped);
            }
        };

        walk_info!("Checking for updates for {}", status.name);
        let mut handler = self
            .registry
            .resolve(reference, &self.sessions, &self.fetch)
            .ok_or_else(|| ItemFailure::HandlerNotFound(reference.to_string()))?;
        *productive = true;
        let site_id = handler.site_id().to_string();

        if let Some(descriptor) = context.site_settings(&site_id) {
            handler.apply_settings(&descriptor);
        }

        let artifact_url = match handler.locate_artifact(reference).await {
            Some(url) => url,
            None => return Err(handler_failure(handler.as_ref())),
        };
        let artifact = match handler.download(&artifact_url).await {
            Some(bytes) => bytes,
            None => return Err(handler_failure(handler.as_ref())),
        };
        context.store_site_cookies(&site_id, handler.export_session());

        let identity = extract_identity(&artifact)?;
        walk_debug!(
            "{}: old identity {}, new identity {}",
            status.name,
            status.identity,
            identity.content_hash
        );
        if !has_changed(&status.identity, &identity.content_hash) {
            walk_info!("{} is up to date", status.name);
            return Ok(ItemOutcome::UpToDate);
        }

        walk_info!("Updating {}", status.name);
        let preferences = migrate_preferences(&status, &identity.files);
        let new_item_id = self.host.create_item(&artifact, &preferences)?;
        if new_item_id != item_id {
            self.host.remove_item(item_id, false);
            context.item_replaced(item_id, &new_item_id);
        }

        walk_info!("{} updated to {}", status.name, new_item_id);
        self.events.emit(WalkEvent::ItemUpdated {
            old_item_id: item_id.to_string(),
            new_item_id,
            identity: identity.content_hash,
        });
        Ok(ItemOutcome::Updated)
    }
}

fn handler_failure(handler: &dyn SiteHandler) -> ItemFailure {
    match handler.last_error() {
        Some(HandlerError::Auth(detail)) => ItemFailure::AuthFailure {
            site: handler.site_id().to_string(),
            detail: detail.clone(),
        },
        _ => ItemFailure::Transport(handler.error_text()),
    }
}
