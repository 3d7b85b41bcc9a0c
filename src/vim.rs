//! vSphere SDK seam.
//!
//! The core consumes the hypervisor through the [`VimBackend`] trait; the
//! wire-level types here mirror the subset of the SDK's relocate surface the
//! tool needs. Sessions are produced by a [`VimConnector`] so tests can plug
//! an in-memory inventory in place of a live endpoint.

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A managed object reference: type plus opaque per-vCenter identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ManagedRef {
    pub kind: String,
    pub value: String,
}

impl ManagedRef {
    pub fn new(kind: &str, value: &str) -> Self {
        ManagedRef {
            kind: kind.to_string(),
            value: value.to_string(),
        }
    }
}

/// Resolved handle to a VM in a datacenter's inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub name: String,
    pub inventory_path: String,
    pub moref: ManagedRef,
}

/// A hypervisor host inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub name: String,
    pub moref: ManagedRef,
    pub in_maintenance: bool,
}

/// One virtual disk: opaque device key plus the datastore backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub id: i32,
    pub datastore: String,
}

/// The supported virtual NIC models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdapterKind {
    Vmxnet3,
    E1000,
}

/// Ethernet card backing, one variant per network flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NetworkBacking {
    DistributedPort {
        portgroup_key: String,
        switch_uuid: String,
    },
    Standard {
        device_name: String,
        network: ManagedRef,
    },
    Opaque {
        network_id: String,
        network_type: String,
    },
}

impl NetworkBacking {
    /// The backing's network identifier in its native form, used for equality
    /// against a network's discovered identifier.
    pub fn network_id(&self) -> &str {
        match self {
            NetworkBacking::DistributedPort { portgroup_key, .. } => portgroup_key,
            NetworkBacking::Standard { network, .. } => &network.value,
            NetworkBacking::Opaque { network_id, .. } => network_id,
        }
    }
}

/// A virtual NIC on a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkAdapter {
    pub key: i32,
    pub kind: AdapterKind,
    pub mac_address: String,
    pub backing: NetworkBacking,
}

/// A named network plus the ethernet-card backing template it hands out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub name: String,
    pub moref: ManagedRef,
    pub backing: NetworkBacking,
}

impl NetworkHandle {
    pub fn id(&self) -> &str {
        self.backing.network_id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceOperation {
    Edit,
}

/// A device mutation carried inside the relocate spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceChange {
    pub operation: DeviceOperation,
    pub device: NetworkAdapter,
}

/// Per-disk placement inside the relocate spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskLocator {
    pub disk_id: i32,
    pub datastore: ManagedRef,
}

/// Destination endpoint pinning for cross-vCenter relocates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceLocator {
    pub url: String,
    pub instance_uuid: String,
    pub username: String,
    pub password: String,
    pub ssl_thumbprint: String,
}

/// The complete relocation specification handed to the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelocateSpec {
    pub host: ManagedRef,
    pub pool: ManagedRef,
    pub folder: Option<ManagedRef>,
    pub datastore: ManagedRef,
    pub disks: Vec<DiskLocator>,
    pub device_changes: Vec<DeviceChange>,
    pub service: Option<ServiceLocator>,
}

/// One progress update from a long-running hypervisor task.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub percent: f32,
    pub detail: Option<String>,
    pub error: Option<String>,
}

/// An authenticated vCenter session.
#[async_trait]
pub trait VimBackend: Send + Sync {
    /// The vCenter instance UUID, used in cross-vCenter service locators.
    fn instance_uuid(&self) -> String;

    /// Lightweight call used by the session keep-alive loop.
    async fn current_time(&self) -> Result<chrono::DateTime<chrono::Utc>>;

    async fn find_vm(&self, datacenter: &str, name_or_path: &str) -> Result<Option<VmHandle>>;

    async fn vm_cluster(&self, vm: &VmHandle) -> Result<String>;
    async fn vm_resource_pool(&self, vm: &VmHandle) -> Result<String>;
    async fn vm_networks(&self, vm: &VmHandle) -> Result<Vec<String>>;
    async fn vm_disks(&self, vm: &VmHandle) -> Result<Vec<Disk>>;
    async fn vm_adapters(&self, vm: &VmHandle) -> Result<Vec<NetworkAdapter>>;

    /// Device keys of CD-ROM devices with connected media.
    async fn vm_connected_cdroms(&self, vm: &VmHandle) -> Result<Vec<i32>>;
    async fn disconnect_cdrom(&self, vm: &VmHandle, device_key: i32) -> Result<()>;

    async fn cluster_hosts(&self, datacenter: &str, cluster: &str) -> Result<Vec<HostInfo>>;
    async fn resource_pool(&self, datacenter: &str, path: &str) -> Result<ManagedRef>;
    async fn datastore(&self, datacenter: &str, name: &str) -> Result<ManagedRef>;
    async fn network(&self, datacenter: &str, name: &str) -> Result<NetworkHandle>;

    /// Resolves a folder by inventory path; `None` when absent.
    async fn folder(&self, datacenter: &str, path: &str) -> Result<Option<ManagedRef>>;

    /// Creates a child folder under `parent_path`. Surfaces a lookup error
    /// containing "already exists" when another caller won the race.
    async fn create_folder(
        &self,
        datacenter: &str,
        parent_path: &str,
        name: &str,
    ) -> Result<ManagedRef>;

    /// Dispatches the relocate task and waits for it, streaming progress
    /// reports into `progress` until completion.
    async fn relocate_vm(
        &self,
        datacenter: &str,
        vm: &VmHandle,
        spec: &RelocateSpec,
        progress: mpsc::UnboundedSender<ProgressReport>,
    ) -> Result<()>;

    async fn logout(&self) -> Result<()>;
}

/// Builds authenticated sessions; the seam where the SOAP transport plugs in.
#[async_trait]
pub trait VimConnector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        username: &str,
        password: &str,
        insecure: bool,
    ) -> Result<Arc<dyn VimBackend>>;
}

/// Connector used when no transport has been linked into the build; every
/// connection attempt surfaces a transport error.
pub struct DisconnectedConnector;

#[async_trait]
impl VimConnector for DisconnectedConnector {
    async fn connect(
        &self,
        host: &str,
        _username: &str,
        _password: &str,
        _insecure: bool,
    ) -> Result<Arc<dyn VimBackend>> {
        Err(crate::MigrateError::TransportError(format!(
            "no vSphere transport is linked into this build, cannot reach {}",
            host
        )))
    }
}
