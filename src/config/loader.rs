use std::{collections::HashMap, path::Path, sync::Arc};

use config::{Config, File, FileFormat};
use eyre::{Result, WrapErr, bail};
use url::Url;

use crate::config::models::{ConfigFile, Service, ServiceEntry};

/// The prefix → service mapping one configuration file produces.
pub type RouteMap = HashMap<String, Arc<Service>>;

/// Load and validate a configuration file, producing the routing map.
///
/// The load is all-or-nothing: any invalid entry fails the whole file so a
/// reload never installs a partially valid snapshot.
pub fn load_route_map(config_path: &str) -> Result<RouteMap> {
    let path = Path::new(config_path);

    // Determine file format based on extension; the gateway ships YAML configs
    // but the loader accepts the other formats the config crate understands.
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(config_path, format))
        .build()
        .with_context(|| format!("failed to read config from {config_path}"))?;

    let raw: ConfigFile = settings
        .try_deserialize()
        .with_context(|| format!("failed to deserialize config from {config_path}"))?;

    build_route_map(raw.services)
}

/// Validate raw service entries and normalize their prefixes.
pub fn build_route_map(entries: Vec<ServiceEntry>) -> Result<RouteMap> {
    let mut routes = RouteMap::new();
    let mut seen_names = std::collections::HashSet::new();

    for entry in entries {
        let service = validate_entry(entry)?;

        if !seen_names.insert(service.name.clone()) {
            bail!("duplicate service name: {}", service.name);
        }
        if service.prefix.trim_start_matches('/').contains('/') {
            tracing::warn!(
                service = %service.name,
                prefix = %service.prefix,
                "prefix spans multiple segments and will never match first-segment routing"
            );
        }
        if let Some(existing) = routes.insert(service.prefix.clone(), Arc::new(service)) {
            bail!("duplicate service prefix: {}", existing.prefix);
        }
    }

    Ok(routes)
}

fn validate_entry(entry: ServiceEntry) -> Result<Service> {
    if entry.name.trim().is_empty() {
        bail!("service with host {} has an empty name", entry.host);
    }

    let upstream = Url::parse(&entry.host)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .ok_or_else(|| {
            eyre::eyre!(
                "invalid host for service {}: {} (expected absolute http/https URL)",
                entry.name,
                entry.host
            )
        })?;

    let raw_prefix = entry
        .prefix
        .unwrap_or_else(|| format!("/{}", entry.name.trim_start_matches('/')));
    let prefix = normalize_prefix(&raw_prefix);
    if prefix == "/" {
        bail!("service {} has an empty prefix after normalization", entry.name);
    }

    Ok(Service {
        name: entry.name,
        host: entry.host,
        prefix,
        strip_prefix: entry.strip_prefix,
        rate_limit: entry.rate_limit,
        upstream,
    })
}

/// Trim whitespace and surrounding slashes, then re-attach a single leading
/// slash. `"  /api/ "` and `"api"` both normalize to `"/api"`.
fn normalize_prefix(raw: &str) -> String {
    format!("/{}", raw.trim().trim_matches('/'))
}
