use crate::{log_debug, MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn default_worker_pool_size() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub host: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcenterConfig {
    pub host: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub datacenter: String,
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub resource_pool: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeAz {
    pub name: String,
    pub vcenter: VcenterConfig,
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub source: Vec<ComputeAz>,
    pub target: Vec<ComputeAz>,
}

impl ComputeConfig {
    pub fn source_by_az(&self, az_name: &str) -> Option<&ComputeAz> {
        self.source.iter().find(|az| az.name == az_name)
    }

    pub fn target_by_az(&self, az_name: &str) -> Option<&ComputeAz> {
        self.target.iter().find(|az| az.name == az_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default)]
    pub networks: HashMap<String, String>,
    #[serde(default)]
    pub datastores: HashMap<String, String>,
    pub compute: ComputeConfig,

    #[serde(default)]
    pub orchestrator: Option<OrchestratorConfig>,

    #[serde(default)]
    pub additional_vms: HashMap<String, Vec<String>>,
}

impl MigrationConfig {
    /// Reads, env-expands, parses and validates a config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        log_debug!("Reading config file: {}", path.as_ref().display());
        let raw = fs::read_to_string(path.as_ref())?;
        let expanded = expand_env(&raw);

        let config: MigrationConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size < 1 {
            return Err(MigrateError::ConfigError(
                "expected worker pool size >= 1".to_string(),
            ));
        }

        for az in &self.compute.source {
            if self.compute.target_by_az(&az.name).is_none() {
                return Err(MigrateError::ConfigError(format!(
                    "AZ {} is missing from the compute target section",
                    az.name
                )));
            }
        }
        for az in &self.compute.target {
            if self.compute.source_by_az(&az.name).is_none() {
                return Err(MigrateError::ConfigError(format!(
                    "AZ {} is missing from the compute source section",
                    az.name
                )));
            }
        }

        for (az, vms) in &self.additional_vms {
            if self.compute.target_by_az(az).is_none() {
                return Err(MigrateError::ConfigError(format!(
                    "found additional VMs {} in AZ {} without a corresponding compute AZ entry",
                    vms.join(", "),
                    az
                )));
            }
        }

        for az in &self.compute.source {
            if az.clusters.is_empty() {
                return Err(MigrateError::ConfigError(format!(
                    "source AZ {} cluster(s) must be >= 1",
                    az.name
                )));
            }
        }
        for az in &self.compute.target {
            if az.clusters.is_empty() {
                return Err(MigrateError::ConfigError(format!(
                    "target AZ {} cluster(s) must be >= 1",
                    az.name
                )));
            }
        }

        Ok(())
    }

    /// The transposed config used by the revert verb: source and target swap,
    /// and the name mappings invert pairwise.
    pub fn reversed(&self) -> MigrationConfig {
        MigrationConfig {
            dry_run: self.dry_run,
            worker_pool_size: self.worker_pool_size,
            networks: invert(&self.networks),
            datastores: invert(&self.datastores),
            compute: ComputeConfig {
                source: self.compute.target.clone(),
                target: self.compute.source.clone(),
            },
            orchestrator: self.orchestrator.clone(),
            additional_vms: self.additional_vms.clone(),
        }
    }

    /// TOML rendering for debug logging, with secrets masked unless `redact`
    /// is disabled.
    pub fn to_debug_string(&self, redact: bool) -> String {
        let mut c = self.clone();
        if redact {
            for az in c.compute.source.iter_mut().chain(c.compute.target.iter_mut()) {
                if !az.vcenter.password.is_empty() {
                    az.vcenter.password = "<redacted>".to_string();
                }
            }
            if let Some(orchestrator) = c.orchestrator.as_mut() {
                if !orchestrator.client_secret.is_empty() {
                    orchestrator.client_secret = "<redacted>".to_string();
                }
            }
        }
        toml::to_string_pretty(&c).unwrap_or_else(|e| e.to_string())
    }
}

fn invert(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (v.clone(), k.clone())).collect()
}

/// Substitutes `$VAR` and `${VAR}` references with environment values;
/// unset variables expand to the empty string.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }

        let mut name = String::new();
        while let Some((_, nc)) = chars.peek().copied() {
            let valid = nc.is_ascii_alphanumeric() || nc == '_';
            if !valid {
                break;
            }
            name.push(nc);
            chars.next();
        }

        if braced {
            if matches!(chars.peek(), Some((_, '}'))) {
                chars.next();
            }
        }

        if name.is_empty() {
            out.push('$');
            if braced {
                out.push('{');
            }
        } else {
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }

    out
}
