//! Scriptable in-memory doubles for the hypervisor and orchestrator seams,
//! shared by unit and integration tests.

use crate::vim::{
    Disk, HostInfo, ManagedRef, NetworkAdapter, NetworkHandle, ProgressReport, RelocateSpec,
    VimBackend, VimConnector, VmHandle,
};
use crate::vm_source::{OrchestratorClient, OrchestratorVm};
use crate::{MigrateError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the fake knows about one VM.
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub handle: VmHandle,
    pub cluster: String,
    pub resource_pool: String,
    pub networks: Vec<String>,
    pub disks: Vec<Disk>,
    pub adapters: Vec<NetworkAdapter>,
    pub connected_cdroms: Vec<i32>,
}

impl VmRecord {
    /// A minimal record with a `/dc/vm/name` inventory path.
    pub fn new(datacenter: &str, name: &str, cluster: &str) -> Self {
        VmRecord {
            handle: VmHandle {
                name: name.to_string(),
                inventory_path: format!("/{}/vm/{}", datacenter, name),
                moref: ManagedRef::new("VirtualMachine", &format!("vm-{}", name)),
            },
            cluster: cluster.to_string(),
            resource_pool: "Resources".to_string(),
            networks: Vec::new(),
            disks: Vec::new(),
            adapters: Vec::new(),
            connected_cdroms: Vec::new(),
        }
    }
}

#[derive(Default)]
struct State {
    vms: HashMap<(String, String), VmRecord>,
    cluster_hosts: HashMap<(String, String), Vec<HostInfo>>,
    datastores: HashMap<(String, String), ManagedRef>,
    networks: HashMap<(String, String), NetworkHandle>,
    folders: HashSet<(String, String)>,
    resource_pools: HashSet<(String, String)>,
    relocations: Vec<(String, RelocateSpec)>,
    relocate_faults: HashMap<String, Vec<String>>,
    relocate_delay: Duration,
    ejected_cdroms: Vec<(String, i32)>,
}

/// An in-memory vCenter inventory implementing [`VimBackend`].
pub struct FakeVim {
    uuid: String,
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    logged_out: AtomicBool,
    fail_next_create_with_exists: AtomicBool,
}

impl FakeVim {
    pub fn new(uuid: &str) -> Arc<Self> {
        Arc::new(FakeVim {
            uuid: uuid.to_string(),
            state: Mutex::new(State::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            logged_out: AtomicBool::new(false),
            fail_next_create_with_exists: AtomicBool::new(false),
        })
    }

    pub fn add_vm(&self, datacenter: &str, record: VmRecord) {
        let mut s = self.state.lock().unwrap();
        s.vms
            .insert((datacenter.to_string(), record.handle.name.clone()), record);
    }

    pub fn add_host(&self, datacenter: &str, cluster: &str, name: &str, in_maintenance: bool) {
        let mut s = self.state.lock().unwrap();
        s.cluster_hosts
            .entry((datacenter.to_string(), cluster.to_string()))
            .or_default()
            .push(HostInfo {
                name: name.to_string(),
                moref: ManagedRef::new("HostSystem", &format!("host-{}", name)),
                in_maintenance,
            });
    }

    pub fn add_cluster(&self, datacenter: &str, cluster: &str) {
        let mut s = self.state.lock().unwrap();
        s.cluster_hosts
            .entry((datacenter.to_string(), cluster.to_string()))
            .or_default();
    }

    pub fn add_datastore(&self, datacenter: &str, name: &str) {
        let mut s = self.state.lock().unwrap();
        let moref = ManagedRef::new("Datastore", &format!("datastore-{}", name));
        s.datastores
            .insert((datacenter.to_string(), name.to_string()), moref);
    }

    pub fn add_network(&self, datacenter: &str, handle: NetworkHandle) {
        let mut s = self.state.lock().unwrap();
        s.networks
            .insert((datacenter.to_string(), handle.name.clone()), handle);
    }

    pub fn add_folder(&self, datacenter: &str, path: &str) {
        let mut s = self.state.lock().unwrap();
        s.folders
            .insert((datacenter.to_string(), path.to_string()));
    }

    pub fn add_resource_pool(&self, datacenter: &str, path: &str) {
        let mut s = self.state.lock().unwrap();
        s.resource_pools
            .insert((datacenter.to_string(), path.to_string()));
    }

    pub fn set_relocate_delay(&self, delay: Duration) {
        self.state.lock().unwrap().relocate_delay = delay;
    }

    /// Makes the next relocate of `vm_name` fail with the given nested fault
    /// messages.
    pub fn fail_relocate(&self, vm_name: &str, messages: &[&str]) {
        self.state.lock().unwrap().relocate_faults.insert(
            vm_name.to_string(),
            messages.iter().map(|m| m.to_string()).collect(),
        );
    }

    /// Simulates a sibling worker winning the next folder-creation race.
    pub fn fail_next_create_folder_with_exists(&self) {
        self.fail_next_create_with_exists.store(true, Ordering::SeqCst);
    }

    pub fn relocations(&self) -> Vec<(String, RelocateSpec)> {
        self.state.lock().unwrap().relocations.clone()
    }

    pub fn ejected_cdroms(&self) -> Vec<(String, i32)> {
        self.state.lock().unwrap().ejected_cdroms.clone()
    }

    pub fn folder_exists(&self, datacenter: &str, path: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .folders
            .contains(&(datacenter.to_string(), path.to_string()))
    }

    pub fn max_in_flight_relocates(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn was_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    fn datacenter_of(handle: &VmHandle) -> String {
        handle
            .inventory_path
            .split('/')
            .find(|p| !p.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    fn record(&self, handle: &VmHandle) -> Result<VmRecord> {
        let dc = Self::datacenter_of(handle);
        self.state
            .lock()
            .unwrap()
            .vms
            .get(&(dc, handle.name.clone()))
            .cloned()
            .ok_or_else(|| {
                MigrateError::LookupError(format!(
                    "failed to find virtual machine {}",
                    handle.name
                ))
            })
    }
}

#[async_trait]
impl VimBackend for FakeVim {
    fn instance_uuid(&self) -> String {
        self.uuid.clone()
    }

    async fn current_time(&self) -> Result<chrono::DateTime<chrono::Utc>> {
        Ok(chrono::Utc::now())
    }

    async fn find_vm(&self, datacenter: &str, name_or_path: &str) -> Result<Option<VmHandle>> {
        let name = name_or_path.rsplit('/').next().unwrap_or(name_or_path);
        let s = self.state.lock().unwrap();
        Ok(s.vms
            .get(&(datacenter.to_string(), name.to_string()))
            .map(|r| r.handle.clone()))
    }

    async fn vm_cluster(&self, vm: &VmHandle) -> Result<String> {
        Ok(self.record(vm)?.cluster)
    }

    async fn vm_resource_pool(&self, vm: &VmHandle) -> Result<String> {
        Ok(self.record(vm)?.resource_pool)
    }

    async fn vm_networks(&self, vm: &VmHandle) -> Result<Vec<String>> {
        Ok(self.record(vm)?.networks)
    }

    async fn vm_disks(&self, vm: &VmHandle) -> Result<Vec<Disk>> {
        Ok(self.record(vm)?.disks)
    }

    async fn vm_adapters(&self, vm: &VmHandle) -> Result<Vec<NetworkAdapter>> {
        Ok(self.record(vm)?.adapters)
    }

    async fn vm_connected_cdroms(&self, vm: &VmHandle) -> Result<Vec<i32>> {
        Ok(self.record(vm)?.connected_cdroms)
    }

    async fn disconnect_cdrom(&self, vm: &VmHandle, device_key: i32) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .ejected_cdroms
            .push((vm.name.clone(), device_key));
        Ok(())
    }

    async fn cluster_hosts(&self, datacenter: &str, cluster: &str) -> Result<Vec<HostInfo>> {
        let s = self.state.lock().unwrap();
        s.cluster_hosts
            .get(&(datacenter.to_string(), cluster.to_string()))
            .cloned()
            .ok_or_else(|| {
                MigrateError::LookupError(format!("failed to find cluster {}", cluster))
            })
    }

    async fn resource_pool(&self, datacenter: &str, path: &str) -> Result<ManagedRef> {
        let s = self.state.lock().unwrap();
        if s.resource_pools
            .contains(&(datacenter.to_string(), path.to_string()))
        {
            Ok(ManagedRef::new("ResourcePool", path))
        } else {
            Err(MigrateError::LookupError(format!(
                "failed to find resource pool {}",
                path
            )))
        }
    }

    async fn datastore(&self, datacenter: &str, name: &str) -> Result<ManagedRef> {
        let s = self.state.lock().unwrap();
        s.datastores
            .get(&(datacenter.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                MigrateError::LookupError(format!("failed to find datastore {}", name))
            })
    }

    async fn network(&self, datacenter: &str, name: &str) -> Result<NetworkHandle> {
        let s = self.state.lock().unwrap();
        s.networks
            .get(&(datacenter.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                MigrateError::LookupError(format!("failed to find target network {}", name))
            })
    }

    async fn folder(&self, datacenter: &str, path: &str) -> Result<Option<ManagedRef>> {
        let s = self.state.lock().unwrap();
        if s.folders.contains(&(datacenter.to_string(), path.to_string())) {
            Ok(Some(ManagedRef::new("Folder", path)))
        } else {
            Ok(None)
        }
    }

    async fn create_folder(
        &self,
        datacenter: &str,
        parent_path: &str,
        name: &str,
    ) -> Result<ManagedRef> {
        let path = format!("{}/{}", parent_path, name);
        let mut s = self.state.lock().unwrap();
        s.folders.insert((datacenter.to_string(), path.clone()));
        drop(s);

        if self.fail_next_create_with_exists.swap(false, Ordering::SeqCst) {
            return Err(MigrateError::LookupError(format!(
                "folder '{}' already exists",
                path
            )));
        }
        Ok(ManagedRef::new("Folder", &path))
    }

    async fn relocate_vm(
        &self,
        _datacenter: &str,
        vm: &VmHandle,
        spec: &RelocateSpec,
        progress: mpsc::UnboundedSender<ProgressReport>,
    ) -> Result<()> {
        let (fault, delay) = {
            let s = self.state.lock().unwrap();
            (
                s.relocate_faults.get(&vm.name).cloned(),
                s.relocate_delay,
            )
        };

        if let Some(messages) = fault {
            let _ = progress.send(ProgressReport {
                percent: 0.0,
                detail: None,
                error: Some(messages.join(", ")),
            });
            return Err(MigrateError::task_from_faults(&vm.name, &messages));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let _ = progress.send(ProgressReport {
            percent: 50.0,
            detail: None,
            error: None,
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let _ = progress.send(ProgressReport {
            percent: 100.0,
            detail: None,
            error: None,
        });

        self.state
            .lock()
            .unwrap()
            .relocations
            .push((vm.name.clone(), spec.clone()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Routes connection attempts to registered [`FakeVim`] instances by host.
pub struct FakeConnector {
    backends: Mutex<HashMap<String, Arc<FakeVim>>>,
    auth_failures: Mutex<HashSet<String>>,
    connect_counts: Mutex<HashMap<String, usize>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeConnector {
            backends: Mutex::new(HashMap::new()),
            auth_failures: Mutex::new(HashSet::new()),
            connect_counts: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, host: &str, backend: Arc<FakeVim>) {
        self.backends
            .lock()
            .unwrap()
            .insert(host.to_string(), backend);
    }

    /// Makes every login against `host` fail.
    pub fn fail_auth(&self, host: &str) {
        self.auth_failures.lock().unwrap().insert(host.to_string());
    }

    pub fn connect_count(&self, host: &str) -> usize {
        *self
            .connect_counts
            .lock()
            .unwrap()
            .get(host)
            .unwrap_or(&0)
    }
}

#[async_trait]
impl VimConnector for FakeConnector {
    async fn connect(
        &self,
        host: &str,
        _username: &str,
        _password: &str,
        _insecure: bool,
    ) -> Result<Arc<dyn VimBackend>> {
        *self
            .connect_counts
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_insert(0) += 1;

        if self.auth_failures.lock().unwrap().contains(host) {
            return Err(MigrateError::AuthError(format!(
                "could not login to {}",
                host
            )));
        }

        let backend = self.backends.lock().unwrap().get(host).cloned();
        backend
            .map(|b| b as Arc<dyn VimBackend>)
            .ok_or_else(|| {
                MigrateError::TransportError(format!("unknown endpoint {}", host))
            })
    }
}

/// Fixed thumbprint source.
pub struct FakeThumbprinter(pub String);

#[async_trait]
impl crate::thumbprint::Thumbprinter for FakeThumbprinter {
    async fn retrieve_sha1(&self, _host: &str, _port: u16) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Orchestrator double returning a fixed VM list.
pub struct ScriptedOrchestrator(pub Vec<OrchestratorVm>);

#[async_trait]
impl OrchestratorClient for ScriptedOrchestrator {
    async fn vms_and_stemcells(&self) -> Result<Vec<OrchestratorVm>> {
        Ok(self.0.clone())
    }
}
