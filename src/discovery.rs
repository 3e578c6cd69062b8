//! Discovery: match live containers against the Service Catalog

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::catalog::ServiceCatalog;
use crate::runtime::{ContainerInfo, ContainerRuntime, RuntimeError};
use crate::types::{short_id, ManagedService};

/// Build the image label for a container: its first tag, or a placeholder
/// carrying the short id when the container is untagged.
pub fn image_label(container: &ContainerInfo) -> String {
    container
        .image_tags
        .first()
        .cloned()
        .unwrap_or_else(|| format!("<untagged:{}>", short_id(&container.id)))
}

/// Match one container against the catalog.
pub fn match_container(catalog: &ServiceCatalog, container: &ContainerInfo) -> Option<ManagedService> {
    let key = catalog.match_container_name(&container.name)?;
    let config = catalog.get(key)?;
    Some(ManagedService::from_config(key, config).with_container(&container.id, &image_label(container)))
}

/// List every container (running and stopped) and build a `ManagedService`
/// for each catalog key that some container matches.
///
/// Only reads from the runtime. When several containers resolve to the same
/// key a running one is preferred over a stopped one; among equals the first
/// listed wins. Results come back in catalog-key order.
pub async fn discover_all(
    runtime: &dyn ContainerRuntime,
    catalog: &ServiceCatalog,
) -> Result<Vec<ManagedService>, RuntimeError> {
    let containers = runtime.list_containers(true).await?;
    let total = containers.len();

    let mut by_key: BTreeMap<String, (ManagedService, bool)> = BTreeMap::new();
    for container in &containers {
        let Some(svc) = match_container(catalog, container) else {
            debug!(container = %container.name, "Container matches no catalog entry");
            continue;
        };
        debug!(container = %container.name, service = %svc.name, "Matched container");

        let running = container.is_running();
        match by_key.get(&svc.name) {
            Some((_, kept_running)) if *kept_running || !running => {
                debug!(container = %container.name, service = %svc.name, "Duplicate match ignored");
            }
            _ => {
                by_key.insert(svc.name.clone(), (svc, running));
            }
        }
    }

    let services: Vec<ManagedService> = by_key.into_values().map(|(svc, _)| svc).collect();
    info!(containers = total, matched = services.len(), "Discovery complete");
    Ok(services)
}
