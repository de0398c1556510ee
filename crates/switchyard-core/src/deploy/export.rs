//! Build policy packages from sub-policy files

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Error;
use crate::policy::{PackageMetadata, PolicyComponent, PolicyPackage, PolicySet, ValidationResult};
use crate::storage::content_hash;
use crate::Result;

/// Version label used when the caller does not pick one
pub fn default_version() -> String {
    format!("v{}", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Read, hash and validate each sub-policy file into a package.
///
/// Invalid or unreadable files are recorded in the metadata and left out of
/// the policy set; the package is still produced but marked invalid.
pub fn export_package(
    version: impl Into<String>,
    files: &BTreeMap<PolicyComponent, PathBuf>,
) -> Result<PolicyPackage> {
    let version = version.into();
    if version.trim().is_empty() {
        return Err(Error::InvalidInput("package version must not be empty".into()));
    }
    if files.is_empty() {
        return Err(Error::InvalidInput("no policy files given".into()));
    }

    let mut policies = PolicySet::default();
    let mut metadata = PackageMetadata::default();

    for (component, path) in files {
        if !PolicyComponent::PACKAGED.contains(component) {
            return Err(Error::InvalidInput(format!(
                "'{}' cannot be packaged; expected one of routing, tools, cache, adapter",
                component
            )));
        }
        let key = component.to_string();
        metadata
            .source_files
            .insert(key.clone(), path.display().to_string());

        let result = match std::fs::read(path) {
            Ok(bytes) => {
                metadata.file_hashes.insert(key.clone(), content_hash(&bytes));
                validate_file(&mut policies, *component, &bytes)
            }
            Err(e) => ValidationResult::invalid(format!("cannot read {}: {}", path.display(), e)),
        };
        if !result.valid {
            warn!(component = %key, errors = ?result.errors, "Sub-policy failed validation");
        }
        metadata.validation_results.insert(key, result);
    }

    metadata.package_valid = metadata.validation_results.values().all(|r| r.valid);
    info!(
        version = %version,
        components = files.len(),
        valid = metadata.package_valid,
        "Exported policy package"
    );

    Ok(PolicyPackage {
        version,
        created_at: Utc::now(),
        policies,
        metadata,
    })
}

fn validate_file(policies: &mut PolicySet, component: PolicyComponent, bytes: &[u8]) -> ValidationResult {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => policies.insert(component, &value),
        Err(e) => ValidationResult::invalid(format!("invalid JSON: {}", e)),
    }
}

/// Write a package file
pub fn write_package(package: &PolicyPackage, path: &Path) -> Result<()> {
    crate::storage::write_atomic(path, &package.to_bytes()?)
}

/// Read a package file
pub fn read_package(path: &Path) -> Result<PolicyPackage> {
    PolicyPackage::from_slice(&std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_valid_export() {
        let dir = TempDir::new().unwrap();
        let routing = write(&dir, "routing.json", r#"{"arms": ["fast", "deep"], "alpha": 0.5, "feature_dim": 28}"#);
        let tools = write(&dir, "tools.json", r#"{"intents": {"billing": ["invoice_lookup"]}}"#);
        let files = BTreeMap::from([(PolicyComponent::Routing, routing.clone()), (PolicyComponent::Tools, tools)]);

        let package = export_package("v1", &files).unwrap();
        assert!(package.is_valid());
        assert!(package.policies.routing.is_some());
        assert!(package.policies.cache.is_none());
        assert_eq!(
            package.metadata.file_hashes["routing"],
            content_hash(&std::fs::read(&routing).unwrap())
        );
        assert_eq!(package.metadata.validation_results.len(), 2);
    }

    #[test]
    fn test_partial_package_is_marked_invalid() {
        let dir = TempDir::new().unwrap();
        let routing = write(&dir, "routing.json", r#"{"arms": ["fast"], "alpha": 1.0, "feature_dim": 28}"#);
        let cache = write(&dir, "cache.json", r#"{"ttl_seconds": 60}"#);
        let adapter = write(&dir, "adapter.json", "not json");
        let files = BTreeMap::from([
            (PolicyComponent::Routing, routing),
            (PolicyComponent::Cache, cache),
            (PolicyComponent::Adapter, adapter),
            (PolicyComponent::Tools, dir.path().join("missing.json")),
        ]);

        let package = export_package("v2", &files).unwrap();
        assert!(!package.is_valid());
        assert!(package.policies.routing.is_some());
        assert!(package.policies.cache.is_none());

        let results = &package.metadata.validation_results;
        assert!(results["routing"].valid);
        assert!(results["cache"].errors[0].contains("max_entries"));
        assert!(results["adapter"].errors[0].contains("invalid JSON"));
        assert!(results["tools"].errors[0].contains("cannot read"));
        assert!(!package.metadata.file_hashes.contains_key("tools"));
    }

    #[test]
    fn test_rejects_empty_and_state_components() {
        assert!(export_package("v1", &BTreeMap::new()).is_err());

        let dir = TempDir::new().unwrap();
        let state = write(&dir, "routing_state.json", "{}");
        let files = BTreeMap::from([(PolicyComponent::RoutingState, state)]);
        assert!(matches!(export_package("v1", &files), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let cache = write(&dir, "cache.json", r#"{"ttl_seconds": 60, "max_entries": 100}"#);
        let package = export_package("v3", &BTreeMap::from([(PolicyComponent::Cache, cache)])).unwrap();

        let out = dir.path().join("out").join("package.json");
        write_package(&package, &out).unwrap();
        assert_eq!(read_package(&out).unwrap(), package);
        assert!(default_version().starts_with('v'));
    }
}
