use crate::config::MigrationConfig;
use crate::{MigrateError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// A VM as reported by the deployment orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorVm {
    pub name: String,
    pub az: String,
}

/// Enumerates every VM and stemcell in the deployment catalog.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn vms_and_stemcells(&self) -> Result<Vec<OrchestratorVm>>;
}

/// Null object used when no orchestrator is configured.
pub struct NullOrchestratorClient;

#[async_trait]
impl OrchestratorClient for NullOrchestratorClient {
    async fn vms_and_stemcells(&self) -> Result<Vec<OrchestratorVm>> {
        Ok(Vec::new())
    }
}

/// A VM scheduled for migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVm {
    pub name: String,
    pub az: String,
    /// Clusters within the source AZ that may contain the VM.
    pub clusters: Vec<String>,
}

/// Joins orchestrator-reported VMs with admin-configured extras and yields
/// them interleaved by AZ.
pub struct VmSource {
    client: Box<dyn OrchestratorClient>,
    additional_vms: Vec<SourceVm>,
    src_azs_to_clusters: HashMap<String, Vec<String>>,
}

impl VmSource {
    pub fn from_config(config: &MigrationConfig, client: Box<dyn OrchestratorClient>) -> Self {
        let src_azs_to_clusters: HashMap<String, Vec<String>> = config
            .compute
            .source
            .iter()
            .map(|az| {
                (
                    az.name.clone(),
                    az.clusters.iter().map(|c| c.name.clone()).collect(),
                )
            })
            .collect();

        let mut additional_vms = Vec::new();
        for (az, vms) in &config.additional_vms {
            for name in vms {
                additional_vms.push(SourceVm {
                    name: name.clone(),
                    az: az.clone(),
                    clusters: src_azs_to_clusters.get(az).cloned().unwrap_or_default(),
                });
            }
        }

        VmSource {
            client,
            additional_vms,
            src_azs_to_clusters,
        }
    }

    /// The full list of orchestrator and additional VMs to migrate,
    /// interleaved by AZ.
    pub async fn vms_to_migrate(&self) -> Result<Vec<SourceVm>> {
        let orchestrator_vms = self.client.vms_and_stemcells().await?;

        let mut vms = Vec::with_capacity(orchestrator_vms.len() + self.additional_vms.len());
        for ovm in orchestrator_vms {
            let clusters = self
                .src_azs_to_clusters
                .get(&ovm.az)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    MigrateError::ConfigError(format!(
                        "found orchestrator VM '{}' with AZ '{}' but no source clusters \
                         in the config for that AZ",
                        ovm.name, ovm.az
                    ))
                })?;
            vms.push(SourceVm {
                name: ovm.name,
                az: ovm.az,
                clusters: clusters.clone(),
            });
        }
        vms.extend(self.additional_vms.iter().cloned());

        Ok(interleave_by_az(vms))
    }
}

/// Round-robins one VM per AZ in stable lexicographic AZ order until every
/// bucket drains. Spreads relocate load across destination hosts when one
/// AZ's target clusters share hosts, and keeps any single AZ from starving
/// behind another.
fn interleave_by_az(vms: Vec<SourceVm>) -> Vec<SourceVm> {
    let mut buckets: BTreeMap<String, Vec<SourceVm>> = BTreeMap::new();
    for vm in vms {
        buckets.entry(vm.az.clone()).or_default().push(vm);
    }

    let mut sorted = Vec::new();
    let mut i = 0;
    loop {
        let mut more = false;
        for bucket in buckets.values() {
            if let Some(vm) = bucket.get(i) {
                more = true;
                sorted.push(vm.clone());
            }
        }
        if !more {
            break;
        }
        i += 1;
    }
    sorted
}
