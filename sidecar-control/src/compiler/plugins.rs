use super::PolicyCompiler;
use crate::catalog::selector_matches;
use crate::config::MeshConfig;
use crate::document::ConfigDocument;
use crate::plugin::PluginSet;
use crate::proxy::Proxy;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Mounts the plugins selected for the proxy's pod and attaches their
/// per-service configuration. Returns the plugin set version once the pod
/// resolves, whether or not a chain selects it; empty otherwise.
///
/// The chain and policy sections are cleared first, so a proxy that no
/// longer matches any chain publishes without plugins.
pub(super) fn compile(
    compiler: &PolicyCompiler,
    proxy: &Proxy,
    mesh: &MeshConfig,
    document: &mut ConfigDocument,
) -> String {
    document.chains.clear();
    document.plugin_policies.clear();

    if !mesh.enable_plugin_policy {
        return String::new();
    }
    let chains = compiler.catalog.plugin_chains();
    if chains.is_empty() {
        return String::new();
    }

    let pod = match compiler.kube.pod_for_proxy(proxy) {
        Ok(pod) => pod,
        Err(e) => {
            warn!("Could not find pod for proxy {}: {}", proxy, e);
            return String::new();
        }
    };
    let namespace_labels = match compiler.kube.namespace(&pod.namespace) {
        Some(namespace) => namespace.labels,
        None => {
            warn!(
                "Could not find namespace {} for proxy {}",
                pod.namespace, proxy
            );
            BTreeMap::new()
        }
    };

    let set = compiler.plugins.refresh(&compiler.catalog.plugins());

    let mut mounts: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for chain in &chains {
        if !selector_matches(&chain.namespace_selector, &namespace_labels)
            || !selector_matches(&chain.pod_selector, &pod.labels)
        {
            continue;
        }
        for spec in &chain.chains {
            for plugin in spec.plugins.iter().filter(|p| set.contains(p)) {
                mounts
                    .entry(spec.mount_point.clone())
                    .or_default()
                    .insert(plugin.clone());
            }
        }
    }

    let mut plugin_mounts: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (mount_point, plugins) in &mounts {
        for plugin in plugins {
            plugin_mounts
                .entry(plugin.as_str())
                .or_default()
                .push(mount_point.as_str());
        }
    }

    let mut configs = compiler.catalog.plugin_configs();
    configs.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    for config in &configs {
        let Some(points) = plugin_mounts.get(config.plugin.as_str()) else {
            continue;
        };
        for service in &config.destination_refs {
            let per_plugin = document
                .plugin_policies
                .entry(service.to_string())
                .or_default()
                .entry(config.plugin.clone())
                .or_default();
            for point in points {
                per_plugin.insert((*point).to_string(), config.config.clone());
            }
        }
    }

    document.chains = mounts
        .into_iter()
        .map(|(mount_point, plugins)| (mount_point, ordered(&set, plugins)))
        .collect();
    set.version
}

/// Highest priority first, then by name.
fn ordered(set: &PluginSet, plugins: BTreeSet<String>) -> Vec<String> {
    let mut plugins: Vec<String> = plugins.into_iter().collect();
    plugins.sort_by_key(|name| (Reverse(set.priority(name).unwrap_or(0)), name.clone()));
    plugins
}
