use std::sync::Arc;

use updater_logging::walk_trace;

use crate::fetch::FetchSettings;
use crate::handler::{HandlerContext, SiteHandler, SiteSpec, StrategyHandler};
use crate::session::SessionStore;

pub type HandlerFactory = Arc<dyn Fn(HandlerContext) -> Box<dyn SiteHandler> + Send + Sync>;

struct Registration {
    site_id: String,
    requires_login: bool,
    factory: HandlerFactory,
}

/// Site handlers in registration order.
///
/// A reference resolves to the first registered site id it contains, so when
/// two ids are substrings of the same reference the earlier registration
/// wins. Registering an existing id again swaps its factory but keeps its
/// position.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in site.
    pub fn with_builtin_sites() -> Self {
        let mut registry = Self::new();
        crate::sites::register_builtin(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, site_id: impl Into<String>, requires_login: bool, factory: F)
    where
        F: Fn(HandlerContext) -> Box<dyn SiteHandler> + Send + Sync + 'static,
    {
        let site_id = site_id.into();
        let factory: HandlerFactory = Arc::new(factory);
        match self
            .registrations
            .iter_mut()
            .find(|registration| registration.site_id == site_id)
        {
            Some(existing) => {
                existing.requires_login = requires_login;
                existing.factory = factory;
            }
            None => self.registrations.push(Registration {
                site_id,
                requires_login,
                factory,
            }),
        }
    }

    pub fn register_spec(&mut self, spec: SiteSpec) {
        let site_id = spec.site_id.clone();
        let requires_login = spec.requires_login();
        let spec = Arc::new(spec);
        self.register(site_id, requires_login, move |context| {
            Box::new(StrategyHandler::new(Arc::clone(&spec), context))
        });
    }

    /// Site id whose handler would serve `source_reference`.
    pub fn site_for(&self, source_reference: &str) -> Option<&str> {
        self.registrations
            .iter()
            .find(|registration| source_reference.contains(&registration.site_id))
            .map(|registration| registration.site_id.as_str())
    }

    /// A fresh handler bound to the shared session of the matching site.
    pub fn resolve(
        &self,
        source_reference: &str,
        sessions: &SessionStore,
        fetch: &FetchSettings,
    ) -> Option<Box<dyn SiteHandler>> {
        let registration = self
            .registrations
            .iter()
            .find(|registration| source_reference.contains(&registration.site_id))?;
        walk_trace!(
            "Resolved {} to site {}",
            source_reference,
            registration.site_id
        );
        Some((registration.factory)(HandlerContext {
            site_id: registration.site_id.clone(),
            source_reference: source_reference.to_string(),
            session: sessions.get(&registration.site_id),
            fetch: fetch.clone(),
        }))
    }

    /// Fresh handler for `site_id` itself, used for login checks.
    pub fn handler_for_site(
        &self,
        site_id: &str,
        sessions: &SessionStore,
        fetch: &FetchSettings,
    ) -> Option<Box<dyn SiteHandler>> {
        let registration = self
            .registrations
            .iter()
            .find(|registration| registration.site_id == site_id)?;
        Some((registration.factory)(HandlerContext {
            site_id: registration.site_id.clone(),
            source_reference: String::new(),
            session: sessions.get(&registration.site_id),
            fetch: fetch.clone(),
        }))
    }

    pub fn list_sites(&self) -> Vec<(String, bool)> {
        self.registrations
            .iter()
            .map(|registration| (registration.site_id.clone(), registration.requires_login))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
