use crate::vcenter::{TargetSpec, Vm};
use crate::{MigrateError, Result};
use rand::Rng;
use std::collections::HashMap;

const DEFAULT_RESOURCE_POOL: &str = "Resources";

/// The compute mapper's lookup key: one AZ-cluster-pool placement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Az {
    pub name: String,
    pub datacenter: String,
    pub cluster: String,
    pub resource_pool: String,
}

impl Az {
    /// Case-insensitive equality on all four fields.
    pub fn equals_fold(&self, other: &Az) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.datacenter.eq_ignore_ascii_case(&other.datacenter)
            && self.cluster.eq_ignore_ascii_case(&other.cluster)
            && self.resource_pool.eq_ignore_ascii_case(&other.resource_pool)
    }
}

/// An ordered source-to-target placement pair. Many mappings may share one
/// AZ name to express one-to-many, many-to-one and many-to-many fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzMapping {
    pub source: Az,
    pub target: Az,
}

pub trait NetworkMapper: Send + Sync {
    fn target_networks(&self, source_vm: &Vm) -> Result<HashMap<String, String>>;
}

pub trait DatastoreMapper: Send + Sync {
    fn target_datastores(&self, source_vm: &Vm) -> Result<HashMap<String, String>>;
}

pub trait ComputeMapper: Send + Sync {
    fn target_compute(&self, source_vm: &Vm) -> Result<Az>;
}

/// Compute mapper backed by the AZ mapping table from config.
pub struct MappedCompute {
    az_mappings: Vec<AzMapping>,
}

impl MappedCompute {
    pub fn new(az_mappings: Vec<AzMapping>) -> Self {
        MappedCompute { az_mappings }
    }

    pub fn add(&mut self, source: Az, target: Az) -> &mut Self {
        self.az_mappings.push(AzMapping { source, target });
        self
    }

    /// One matching target chosen uniformly at random, spreading load when a
    /// source placement fans out to several targets.
    pub fn target_compute_from_source_az(&self, src: &Az) -> Result<Az> {
        let targets = self.target_computes_from_source_az(src)?;
        let pick = rand::thread_rng().gen_range(0..targets.len());
        Ok(targets[pick].clone())
    }

    /// Every matching target, for deterministic enumeration.
    pub fn target_computes_from_source_az(&self, src: &Az) -> Result<Vec<Az>> {
        if src.datacenter.is_empty() {
            return Err(MigrateError::Internal(
                "expected datacenter to be non-empty string".to_string(),
            ));
        }
        if src.cluster.is_empty() {
            return Err(MigrateError::Internal(
                "expected cluster to be non-empty string".to_string(),
            ));
        }
        if src.name.is_empty() {
            return Err(MigrateError::Internal(
                "expected AZ name to be non-empty string".to_string(),
            ));
        }

        let mut src = src.clone();
        if src.resource_pool.eq_ignore_ascii_case(DEFAULT_RESOURCE_POOL) {
            src.resource_pool = String::new();
        }

        let targets: Vec<Az> = self
            .az_mappings
            .iter()
            .filter(|m| m.source.equals_fold(&src))
            .map(|m| m.target.clone())
            .collect();

        if targets.is_empty() {
            return Err(MigrateError::MissingMapping(format!(
                "could not find target compute for VM in source AZ {}, datacenter {}, \
                 cluster {}, resource pool {}: ensure you add a corresponding compute \
                 mapping to the config file",
                src.name, src.datacenter, src.cluster, src.resource_pool
            )));
        }
        Ok(targets)
    }
}

impl ComputeMapper for MappedCompute {
    fn target_compute(&self, source_vm: &Vm) -> Result<Az> {
        let az = Az {
            name: source_vm.az.clone(),
            datacenter: source_vm.datacenter.clone(),
            cluster: source_vm.cluster.clone(),
            resource_pool: source_vm.resource_pool.clone(),
        };
        self.target_compute_from_source_az(&az)
    }
}

/// Compute mapper for the single-VM verb: cluster-to-cluster names with an
/// explicit target datacenter and resource pool, no AZ table.
pub struct ClusterCompute {
    cluster_map: HashMap<String, String>,
    datacenter: String,
    resource_pool: String,
}

impl ClusterCompute {
    pub fn new(cluster_map: HashMap<String, String>, datacenter: &str, resource_pool: &str) -> Self {
        ClusterCompute {
            cluster_map,
            datacenter: datacenter.to_string(),
            resource_pool: resource_pool.to_string(),
        }
    }
}

impl ComputeMapper for ClusterCompute {
    fn target_compute(&self, source_vm: &Vm) -> Result<Az> {
        let target_cluster = self.cluster_map.get(&source_vm.cluster).ok_or_else(|| {
            MigrateError::MissingMapping(format!(
                "could not find a target cluster for VM {} on source cluster {}: \
                 ensure you add a corresponding cluster mapping",
                source_vm.name, source_vm.cluster
            ))
        })?;
        Ok(Az {
            name: source_vm.az.clone(),
            datacenter: self.datacenter.clone(),
            cluster: target_cluster.clone(),
            resource_pool: self.resource_pool.clone(),
        })
    }
}

/// Datastore mapper backed by the global source-to-target name dictionary.
pub struct MappedDatastore {
    ds_map: HashMap<String, String>,
}

impl MappedDatastore {
    pub fn new(ds_map: HashMap<String, String>) -> Self {
        MappedDatastore { ds_map }
    }
}

impl DatastoreMapper for MappedDatastore {
    fn target_datastores(&self, source_vm: &Vm) -> Result<HashMap<String, String>> {
        let mut mapped = HashMap::new();
        for disk in &source_vm.disks {
            let target = self.ds_map.get(&disk.datastore).ok_or_else(|| {
                MigrateError::MissingMapping(format!(
                    "could not find a target datastore for VM {} with source datastore {}: \
                     ensure you add a corresponding datastore mapping to the config file",
                    source_vm.name, disk.datastore
                ))
            })?;
            mapped.insert(disk.datastore.clone(), target.clone());
        }
        Ok(mapped)
    }
}

/// Network mapper backed by the global source-to-target name dictionary.
pub struct MappedNetwork {
    network_map: HashMap<String, String>,
}

impl MappedNetwork {
    pub fn new(network_map: HashMap<String, String>) -> Self {
        MappedNetwork { network_map }
    }
}

impl NetworkMapper for MappedNetwork {
    fn target_networks(&self, source_vm: &Vm) -> Result<HashMap<String, String>> {
        let mut mapped = HashMap::new();
        for src in &source_vm.networks {
            let target = self.network_map.get(src).ok_or_else(|| {
                MigrateError::MissingMapping(format!(
                    "could not find a target network for VM {} attached to network {}: \
                     ensure you add a corresponding network mapping to the config file",
                    source_vm.name, src
                ))
            })?;
            mapped.insert(src.clone(), target.clone());
        }
        Ok(mapped)
    }
}

/// Rewrites a source folder path onto the target datacenter, preserving all
/// sub-folders under the datacenter's `vm` root.
pub fn target_folder(source_vm_folder: &str, target_datacenter: &str) -> Result<String> {
    let mut parts: Vec<&str> = source_vm_folder
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return Err(MigrateError::LookupError(format!(
            "expected a source VM folder path of at least 2 parts, but got '{}'",
            source_vm_folder
        )));
    }
    if parts[1] != "vm" {
        return Err(MigrateError::LookupError(format!(
            "expected a source VM folder path to contain 'vm' in path under datacenter, \
             but got '{}'",
            parts[1]
        )));
    }

    parts[0] = target_datacenter;
    Ok(format!("/{}", parts.join("/")))
}

/// Combines the three mappers and the folder rewrite into a full per-VM plan.
pub struct Converter {
    net_mapper: Box<dyn NetworkMapper>,
    ds_mapper: Box<dyn DatastoreMapper>,
    compute_mapper: Box<dyn ComputeMapper>,
}

impl Converter {
    pub fn new(
        net_mapper: Box<dyn NetworkMapper>,
        ds_mapper: Box<dyn DatastoreMapper>,
        compute_mapper: Box<dyn ComputeMapper>,
    ) -> Self {
        Converter {
            net_mapper,
            ds_mapper,
            compute_mapper,
        }
    }

    pub fn target_spec(&self, source_vm: &Vm) -> Result<TargetSpec> {
        let networks = self.net_mapper.target_networks(source_vm)?;
        let datastores = self.ds_mapper.target_datastores(source_vm)?;
        let compute = self.compute_mapper.target_compute(source_vm)?;
        let folder = target_folder(&source_vm.folder, &compute.datacenter)?;

        Ok(TargetSpec {
            name: source_vm.name.clone(),
            datacenter: compute.datacenter,
            cluster: compute.cluster,
            resource_pool: compute.resource_pool,
            folder,
            datastores,
            networks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::Disk;

    fn az(name: &str, dc: &str, cluster: &str, rp: &str) -> Az {
        Az {
            name: name.to_string(),
            datacenter: dc.to_string(),
            cluster: cluster.to_string(),
            resource_pool: rp.to_string(),
        }
    }

    fn source_vm() -> Vm {
        Vm {
            name: "vm1".to_string(),
            az: "az1".to_string(),
            datacenter: "DC1".to_string(),
            cluster: "C1".to_string(),
            resource_pool: "RP1".to_string(),
            folder: "/DC1/vm".to_string(),
            disks: vec![
                Disk {
                    id: 2001,
                    datastore: "DS1".to_string(),
                },
                Disk {
                    id: 2000,
                    datastore: "DS1".to_string(),
                },
            ],
            networks: vec!["N1".to_string()],
        }
    }

    #[test]
    fn test_compute_match_is_case_insensitive() {
        let compute = MappedCompute::new(vec![AzMapping {
            source: az("AZ1", "dc1", "c1", "rp1"),
            target: az("az1", "DC2", "C2", "RP2"),
        }]);
        let targets = compute
            .target_computes_from_source_az(&az("az1", "DC1", "C1", "RP1"))
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].cluster, "C2");
    }

    #[test]
    fn test_compute_normalizes_default_resource_pool() {
        let compute = MappedCompute::new(vec![AzMapping {
            source: az("az1", "DC1", "C1", ""),
            target: az("az1", "DC2", "C2", ""),
        }]);
        // the sentinel root pool name must match the empty pool
        let targets = compute
            .target_computes_from_source_az(&az("az1", "DC1", "C1", "Resources"))
            .unwrap();
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_compute_missing_mapping_names_the_source() {
        let compute = MappedCompute::new(vec![]);
        let err = compute
            .target_computes_from_source_az(&az("az9", "DC9", "C9", "RP9"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("az9"));
        assert!(msg.contains("DC9"));
        assert!(msg.contains("C9"));
        assert!(msg.contains("RP9"));
    }

    #[test]
    fn test_compute_validates_inputs() {
        let compute = MappedCompute::new(vec![]);
        assert!(compute
            .target_computes_from_source_az(&az("az1", "", "C1", ""))
            .is_err());
        assert!(compute
            .target_computes_from_source_az(&az("az1", "DC1", "", ""))
            .is_err());
        assert!(compute
            .target_computes_from_source_az(&az("", "DC1", "C1", ""))
            .is_err());
    }

    #[test]
    fn test_compute_many_to_many_returns_all_matches() {
        // 2 source clusters x 2 target clusters in one AZ
        let mut mappings = Vec::new();
        for sc in ["sC1", "sC2"] {
            for tc in ["tC1", "tC2"] {
                mappings.push(AzMapping {
                    source: az("az1", "DC1", sc, "sRP1"),
                    target: az("az1", "DC2", tc, "tRP1"),
                });
            }
        }
        let compute = MappedCompute::new(mappings);
        let targets = compute
            .target_computes_from_source_az(&az("az1", "DC1", "sC1", "sRP1"))
            .unwrap();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_compute_random_pick_eventually_covers_all_targets() {
        let compute = MappedCompute::new(vec![
            AzMapping {
                source: az("az1", "DC1", "sC1", "sRP1"),
                target: az("az1", "DC2", "tC1", ""),
            },
            AzMapping {
                source: az("az1", "DC1", "sC1", "sRP1"),
                target: az("az1", "DC2", "tC2", ""),
            },
        ]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            let t = compute
                .target_compute_from_source_az(&az("az1", "DC1", "sC1", "sRP1"))
                .unwrap();
            seen.insert(t.cluster);
        }
        assert!(seen.contains("tC1"));
        assert!(seen.contains("tC2"));
    }

    #[test]
    fn test_datastore_mapper_covers_all_disks() {
        let ds = MappedDatastore::new(HashMap::from([("DS1".to_string(), "DS2".to_string())]));
        let mapped = ds.target_datastores(&source_vm()).unwrap();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped["DS1"], "DS2");
    }

    #[test]
    fn test_datastore_mapper_fails_on_unmapped() {
        let ds = MappedDatastore::new(HashMap::new());
        let err = ds.target_datastores(&source_vm()).unwrap_err();
        assert!(err.to_string().contains("vm1"));
        assert!(err.to_string().contains("DS1"));
    }

    #[test]
    fn test_network_mapper_fails_on_unmapped() {
        let net = MappedNetwork::new(HashMap::new());
        let err = net.target_networks(&source_vm()).unwrap_err();
        assert!(err.to_string().contains("N1"));
    }

    #[test]
    fn test_target_folder_rewrites_datacenter() {
        assert_eq!(target_folder("/DC1/vm", "DC2").unwrap(), "/DC2/vm");
        assert_eq!(
            target_folder("/DC1/vm/tenants/prod", "DC2").unwrap(),
            "/DC2/vm/tenants/prod"
        );
    }

    #[test]
    fn test_target_folder_rejects_bad_paths() {
        assert!(target_folder("/DC1", "DC2").is_err());
        assert!(target_folder("/DC1/host/C1", "DC2").is_err());
        assert!(target_folder("", "DC2").is_err());
    }

    #[test]
    fn test_cluster_compute_maps_cluster_names() {
        let compute = ClusterCompute::new(
            HashMap::from([("C1".to_string(), "C5".to_string())]),
            "DC2",
            "RP5",
        );
        let target = compute.target_compute(&source_vm()).unwrap();
        assert_eq!(target.cluster, "C5");
        assert_eq!(target.datacenter, "DC2");
        assert_eq!(target.resource_pool, "RP5");

        let unmapped = ClusterCompute::new(HashMap::new(), "DC2", "");
        assert!(unmapped.target_compute(&source_vm()).is_err());
    }

    #[test]
    fn test_converter_builds_full_target_spec() {
        let converter = Converter::new(
            Box::new(MappedNetwork::new(HashMap::from([(
                "N1".to_string(),
                "N2".to_string(),
            )]))),
            Box::new(MappedDatastore::new(HashMap::from([(
                "DS1".to_string(),
                "DS2".to_string(),
            )]))),
            Box::new(MappedCompute::new(vec![AzMapping {
                source: az("az1", "DC1", "C1", "RP1"),
                target: az("az1", "DC2", "C2", "RP2"),
            }])),
        );

        let spec = converter.target_spec(&source_vm()).unwrap();
        assert_eq!(spec.name, "vm1");
        assert_eq!(spec.datacenter, "DC2");
        assert_eq!(spec.cluster, "C2");
        assert_eq!(spec.resource_pool, "RP2");
        assert_eq!(spec.folder, "/DC2/vm");
        assert_eq!(spec.datastores["DS1"], "DS2");
        assert_eq!(spec.networks["N1"], "N2");
    }

    #[test]
    fn test_converter_surfaces_first_mapper_failure() {
        let converter = Converter::new(
            Box::new(MappedNetwork::new(HashMap::new())),
            Box::new(MappedDatastore::new(HashMap::new())),
            Box::new(MappedCompute::new(vec![])),
        );
        let err = converter.target_spec(&source_vm()).unwrap_err();
        // network mapper runs first
        assert!(err.to_string().contains("N1"));
    }
}
