//! Built-in site definitions. Each module contributes one [`SiteSpec`].
//!
//! [`SiteSpec`]: crate::handler::SiteSpec

pub mod anidub;
pub mod rutor;
pub mod rutracker;

use crate::registry::HandlerRegistry;

/// Registers every built-in site, in resolution order.
pub fn register_builtin(registry: &mut HandlerRegistry) {
    rutracker::register(registry);
    rutor::register(registry);
    anidub::register(registry);
}
