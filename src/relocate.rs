use crate::adapter;
use crate::client_pool::ClientPool;
use crate::host_pool::HostPool;
use crate::progress::{ProgressLogger, UpdatableStdout};
use crate::vcenter::{Client, TargetSpec, Vm};
use crate::vim::{
    DeviceChange, DeviceOperation, DiskLocator, HostInfo, RelocateSpec, ServiceLocator, VimBackend,
    VmHandle,
};
use crate::{log_debug, log_error, log_info, log_warn, MigrateError, Result};
use std::sync::{Arc, Mutex};

/// Builds the hypervisor relocation specification for one VM.
pub struct RelocateSpecBuilder {
    dry_run: bool,
    source_client: Arc<Client>,
    destination_client: Arc<Client>,
    src_vm: Option<Vm>,
    target_spec: Option<TargetSpec>,
    target_host: Option<HostInfo>,
}

impl RelocateSpecBuilder {
    pub fn new(source_client: Arc<Client>, destination_client: Arc<Client>) -> Self {
        RelocateSpecBuilder {
            dry_run: false,
            source_client,
            destination_client,
            src_vm: None,
            target_spec: None,
            target_host: None,
        }
    }

    pub fn with_source_vm(mut self, vm: Vm) -> Self {
        self.src_vm = Some(vm);
        self
    }

    pub fn with_target_spec(mut self, target_spec: TargetSpec) -> Self {
        self.target_spec = Some(target_spec);
        self
    }

    pub fn with_target_host(mut self, host: HostInfo) -> Self {
        self.target_host = Some(host);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn build(&self) -> Result<RelocateSpec> {
        let src_vm = self.src_vm.as_ref().ok_or_else(|| {
            MigrateError::Internal("must set a source VM first before calling build".to_string())
        })?;
        let target_host = self.target_host.as_ref().ok_or_else(|| {
            MigrateError::Internal("must set a target host first before calling build".to_string())
        })?;
        let target_spec = self.target_spec.as_ref().ok_or_else(|| {
            MigrateError::Internal(
                "must set a target VM spec first before calling build".to_string(),
            )
        })?;

        let source_backend = self.source_client.session().await?;
        let destination_backend = self.destination_client.session().await?;

        // the target resource pool, fully qualified under the cluster
        let pool_path = target_spec.fully_qualified_resource_pool();
        let pool = destination_backend
            .resource_pool(&target_spec.datacenter, &pool_path)
            .await?;

        let folder = self.resolve_folder(&destination_backend, target_spec).await?;

        let mut disks = Vec::new();
        for src_disk in &src_vm.disks {
            let target_datastore =
                target_spec.datastores.get(&src_disk.datastore).ok_or_else(|| {
                    MigrateError::MissingMapping(format!(
                        "could not find target datastore for disk {} on source datastore {}",
                        src_disk.id, src_disk.datastore
                    ))
                })?;
            let datastore = destination_backend
                .datastore(&target_spec.datacenter, target_datastore)
                .await?;
            disks.push(DiskLocator {
                disk_id: src_disk.id,
                datastore,
            });
        }

        if disks.is_empty() {
            return Err(MigrateError::Internal(format!(
                "found 0 disk mappings for VM {}",
                src_vm.name
            )));
        }

        // the lowest-id disk's datastore doubles as the VM default datastore
        disks.sort_by_key(|d| d.disk_id);
        let default_datastore = disks[0].datastore.clone();

        let mut device_changes = Vec::new();
        for (source_net, target_net) in &target_spec.networks {
            let src_adapter = adapter::find_adapter(
                &source_backend,
                &src_vm.datacenter,
                &src_vm.name,
                source_net,
            )
            .await?;

            let target_network = destination_backend
                .network(&target_spec.datacenter, target_net)
                .await?;
            let updated = adapter::retarget(&src_adapter, &target_network);

            device_changes.push(DeviceChange {
                operation: DeviceOperation::Edit,
                device: updated,
            });
        }

        let service = self.service_locator(&destination_backend).await?;

        Ok(RelocateSpec {
            host: target_host.moref.clone(),
            pool,
            folder,
            datastore: default_datastore,
            disks,
            device_changes,
            service,
        })
    }

    /// Makes sure the destination folder exists, creating missing levels.
    /// Dry-run only looks the folder up and tolerates its absence so a plan
    /// can be produced before folders are pre-created.
    async fn resolve_folder(
        &self,
        destination_backend: &Arc<dyn VimBackend>,
        target_spec: &TargetSpec,
    ) -> Result<Option<crate::vim::ManagedRef>> {
        if self.dry_run {
            match destination_backend
                .folder(&target_spec.datacenter, &target_spec.folder)
                .await?
            {
                Some(folder) => Ok(Some(folder)),
                None => {
                    log_warn!(
                        "Could not find target VM folder {}, but continuing since dry-run is true",
                        target_spec.folder
                    );
                    Ok(None)
                }
            }
        } else {
            let folder = self
                .destination_client
                .create_folder(&target_spec.folder)
                .await?;
            Ok(Some(folder))
        }
    }

    /// Cross-vCenter relocates carry a service locator pinning the
    /// destination endpoint; same-vCenter relocates omit it.
    async fn service_locator(
        &self,
        destination_backend: &Arc<dyn VimBackend>,
    ) -> Result<Option<ServiceLocator>> {
        if self.source_client.url() == self.destination_client.url() {
            return Ok(None);
        }

        let thumbprint = self.destination_client.thumbprint().await?;
        Ok(Some(ServiceLocator {
            url: self.destination_client.url(),
            instance_uuid: destination_backend.instance_uuid(),
            username: self.destination_client.username().to_string(),
            password: self.destination_client.password().to_string(),
            ssl_thumbprint: thumbprint,
        }))
    }
}

/// Dispatches relocates: leases a destination host, builds the spec and runs
/// the hypervisor task with progress streamed to the status output.
pub struct VmRelocator {
    dry_run: bool,
    clients: Arc<ClientPool>,
    destination_host_pool: Arc<HostPool>,
    out: Arc<UpdatableStdout>,
    details_lock: Mutex<()>,
}

impl VmRelocator {
    pub fn new(
        clients: Arc<ClientPool>,
        destination_host_pool: Arc<HostPool>,
        out: Arc<UpdatableStdout>,
    ) -> Self {
        VmRelocator {
            dry_run: false,
            clients,
            destination_host_pool,
            out,
            details_lock: Mutex::new(()),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn relocate_vm(&self, src_vm: &Vm, target_spec: &TargetSpec) -> Result<()> {
        log_info!("Starting {} migration", src_vm.name);

        self.destination_host_pool.initialize().await?;
        let target_host = self
            .destination_host_pool
            .wait_for_lease_available_host(&src_vm.az)
            .await?;

        let result = self.relocate_on_host(src_vm, target_spec, &target_host).await;
        self.destination_host_pool.release(&target_host);
        result
    }

    async fn relocate_on_host(
        &self,
        src_vm: &Vm,
        target_spec: &TargetSpec,
        target_host: &HostInfo,
    ) -> Result<()> {
        let source_client = self.clients.source_client_by_az(&src_vm.az).ok_or_else(|| {
            MigrateError::LookupError(format!(
                "could not find source vcenter client for VM {} in AZ {}",
                src_vm.name, src_vm.az
            ))
        })?;
        let target_client = self.clients.target_client_by_az(&src_vm.az).ok_or_else(|| {
            MigrateError::LookupError(format!(
                "could not find target vcenter client for VM {} in AZ {}",
                src_vm.name, src_vm.az
            ))
        })?;

        self.debug_log_vm_target(src_vm, target_client.host_name(), target_spec);

        let spec = RelocateSpecBuilder::new(Arc::clone(&source_client), Arc::clone(&target_client))
            .with_source_vm(src_vm.clone())
            .with_target_spec(target_spec.clone())
            .with_target_host(target_host.clone())
            .with_dry_run(self.dry_run)
            .build()
            .await?;

        // everything after this point mutates state
        debug_log_relocate_spec(&spec);
        if self.dry_run {
            return Ok(());
        }

        let source_backend = source_client.session().await?;
        let handle = source_backend
            .find_vm(&src_vm.datacenter, &src_vm.name)
            .await?
            .ok_or_else(|| {
                MigrateError::LookupError(format!(
                    "failed to find virtual machine {}",
                    src_vm.name
                ))
            })?;

        // eject any connected media first to avoid host device missing errors
        if let Err(e) = self.eject_media(&source_backend, &handle).await {
            log_error!(
                "Could not eject {} CD-ROM, attempting migration anyway: {}",
                src_vm.name,
                e
            );
        }

        self.move_vm(&source_backend, src_vm, &handle, &spec).await
    }

    async fn eject_media(
        &self,
        source_backend: &Arc<dyn VimBackend>,
        vm: &VmHandle,
    ) -> Result<()> {
        let cdroms = source_backend.vm_connected_cdroms(vm).await?;
        for device_key in cdroms {
            log_debug!("Disconnecting {} CD-ROM device {}", vm.name, device_key);
            source_backend.disconnect_cdrom(vm, device_key).await?;
        }
        Ok(())
    }

    async fn move_vm(
        &self,
        source_backend: &Arc<dyn VimBackend>,
        src_vm: &Vm,
        handle: &VmHandle,
        spec: &RelocateSpec,
    ) -> Result<()> {
        let progress = ProgressLogger::new(Arc::clone(&self.out));
        let sink = progress.sink(&src_vm.name);

        source_backend
            .relocate_vm(&src_vm.datacenter, handle, spec, sink)
            .await
            .map_err(|e| match e {
                // task errors already carry the flattened fault messages
                MigrateError::TaskError(_) => e,
                other => MigrateError::TaskError(format!(
                    "error migrating VM {}: {}",
                    src_vm.name, other
                )),
            })
    }

    fn debug_log_vm_target(&self, src_vm: &Vm, target_host_name: &str, target_spec: &TargetSpec) {
        // keep one VM's multi-line details whole across concurrent workers
        let _guard = self.details_lock.lock().unwrap();

        let dry_run = if self.dry_run { " [DRY-RUN]" } else { "" };
        log_debug!("{} target details{}:", src_vm.name, dry_run);
        log_debug!("  vcenter:       {}", target_host_name);
        log_debug!("  datacenter:    {}", target_spec.datacenter);
        log_debug!("  cluster:       {}", target_spec.cluster);
        log_debug!("  resource pool: {}", target_spec.resource_pool);
        for net in target_spec.networks.values() {
            log_debug!("  network:       {}", net);
        }
        for ds in target_spec.datastores.values() {
            log_debug!("  datastore:     {}", ds);
        }
    }
}

fn debug_log_relocate_spec(spec: &RelocateSpec) {
    // nothing extra to log for same-vcenter moves
    if spec.service.is_none() {
        return;
    }

    let mut masked = spec.clone();
    if let Some(service) = masked.service.as_mut() {
        service.password = "<redacted>".to_string();
    }
    match serde_json::to_string_pretty(&masked) {
        Ok(json) => {
            log_debug!("RelocateSpec:");
            log_debug!("{}", json);
        }
        Err(e) => log_error!("Could not serialize move spec: {}", e),
    }
}
