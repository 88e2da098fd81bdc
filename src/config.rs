//! `ConfigClient` implementations: a TOML catalog file for real runs, and a
//! trivial empty client used as a safe default and in tests.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SupervisorError;
use crate::interfaces::ConfigClient;
use crate::service_info::{DeployInfo, ServiceInfo};

/// Reads a `[[service]]`-table TOML catalog, following the teacher's
/// parse-only `toml` usage (this crate never writes TOML, only reads it).
pub struct FileConfigClient {
    path: PathBuf,
}

impl FileConfigClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfigClient { path: path.into() }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "service")]
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    #[serde(flatten)]
    info: ServiceInfo,
    #[serde(default)]
    deploy: Option<DeployInfo>,
}

impl ConfigClient for FileConfigClient {
    fn fetch(&self) -> Result<Vec<(ServiceInfo, Option<DeployInfo>)>, SupervisorError> {
        parse_catalog(&self.path)
    }
}

fn parse_catalog(path: &Path) -> Result<Vec<(ServiceInfo, Option<DeployInfo>)>, SupervisorError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SupervisorError::Config(format!("cannot read catalog {}: {e}", path.display()))
    })?;
    let parsed: CatalogFile = toml::from_str(&raw)
        .map_err(|e| SupervisorError::Config(format!("invalid catalog {}: {e}", path.display())))?;
    Ok(parsed
        .services
        .into_iter()
        .map(|entry| (entry.info, entry.deploy))
        .collect())
}

/// Always returns an empty catalog. Used as `SupervisorDeps`'s default so a
/// `Supervisor` constructed without an explicit `ConfigClient` is inert
/// rather than panicking, and in tests that don't care about config
/// sourcing at all.
pub struct EmptyConfigClient;

impl ConfigClient for EmptyConfigClient {
    fn fetch(&self) -> Result<Vec<(ServiceInfo, Option<DeployInfo>)>, SupervisorError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_info::Mode;
    use tempfile::tempdir;

    #[test]
    fn parses_minimal_service_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            r#"
            [[service]]
            name = "web"
            file_name = "/srv/app/web.dll"
            arguments = "--port=80"
            "#,
        )
        .unwrap();

        let client = FileConfigClient::new(&path);
        let catalog = client.fetch().unwrap();
        assert_eq!(catalog.len(), 1);
        let (info, deploy) = &catalog[0];
        assert_eq!(info.name, "web");
        assert_eq!(info.file_name, "/srv/app/web.dll");
        assert_eq!(info.mode, Mode::Default);
        assert!(info.enable);
        assert!(deploy.is_none());
    }

    #[test]
    fn parses_deploy_overlay_and_multiple_services() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            r#"
            [[service]]
            name = "web"
            file_name = "ZipDeploy"
            mode = "ExtractAndRun"

            [service.deploy]
            overwrite = ["appsettings.json"]

            [[service]]
            name = "worker"
            file_name = "/usr/bin/worker"
            enable = false
            "#,
        )
        .unwrap();

        let client = FileConfigClient::new(&path);
        let catalog = client.fetch().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].0.mode, Mode::ExtractAndRun);
        assert_eq!(
            catalog[0].1.as_ref().unwrap().overwrite,
            vec!["appsettings.json".to_string()]
        );
        assert!(!catalog[1].0.enable);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let client = FileConfigClient::new("/definitely/does/not/exist.toml");
        assert!(matches!(client.fetch(), Err(SupervisorError::Config(_))));
    }

    #[test]
    fn empty_config_client_returns_empty_catalog() {
        assert!(EmptyConfigClient.fetch().unwrap().is_empty());
    }
}
