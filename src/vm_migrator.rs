use crate::client_pool::ClientPool;
use crate::convert::Converter;
use crate::progress::UpdatableStdout;
use crate::relocate::VmRelocator;
use crate::vm_source::SourceVm;
use crate::{log_error, log_info, MigrateError, Result};
use std::sync::Arc;

const GREEN_CHECK: &str = "\u{2705}";
const RED_X: &str = "\u{274C}";

/// Migrates one VM end to end: find it in the source, plan the move, hand it
/// to the relocator. A VM that is gone from its candidate source clusters is
/// skipped, on the assumption a prior run already moved it.
pub struct VmMigrator {
    clients: Arc<ClientPool>,
    converter: Converter,
    relocator: VmRelocator,
    out: Arc<UpdatableStdout>,
}

impl VmMigrator {
    pub fn new(
        clients: Arc<ClientPool>,
        converter: Converter,
        relocator: VmRelocator,
        out: Arc<UpdatableStdout>,
    ) -> Self {
        VmMigrator {
            clients,
            converter,
            relocator,
            out,
        }
    }

    pub async fn migrate(&self, source_vm: &SourceVm) -> Result<()> {
        self.print_processing(&source_vm.name, "preparing");

        let source_client = self.clients.source_client_by_az(&source_vm.az).ok_or_else(|| {
            MigrateError::LookupError(format!(
                "could not find source vcenter client for VM {} in AZ {}",
                source_vm.name, source_vm.az
            ))
        })?;
        let target_client = self.clients.target_client_by_az(&source_vm.az).ok_or_else(|| {
            MigrateError::LookupError(format!(
                "could not find target vcenter client for VM {} in AZ {}",
                source_vm.name, source_vm.az
            ))
        })?;

        log_info!(
            "Migrating VM {} from {} to {}",
            source_vm.name,
            source_client.host_name(),
            target_client.host_name()
        );

        let vm = match source_client
            .find_vm_in_clusters(&source_vm.az, &source_vm.name, &source_vm.clusters)
            .await
        {
            Ok(vm) => vm,
            Err(e) if e.is_vm_not_found() => {
                // consult the target side only to word the skip message
                let already_there = target_client
                    .find_vm(&source_vm.az, &source_vm.name)
                    .await
                    .is_ok();
                if already_there {
                    self.print_success(&source_vm.name, "already migrated, skipping");
                } else {
                    self.print_success(&source_vm.name, "not found in source vCenter, skipping");
                }
                return Ok(());
            }
            Err(e) => {
                self.print_failure(&source_vm.name, &e);
                return Err(e);
            }
        };

        let target_spec = match self.converter.target_spec(&vm) {
            Ok(spec) => spec,
            Err(e) => {
                self.print_failure(&source_vm.name, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.relocator.relocate_vm(&vm, &target_spec).await {
            self.print_failure(&source_vm.name, &e);
            return Err(e);
        }

        self.print_success(&source_vm.name, "done");
        Ok(())
    }

    fn print_processing(&self, vm_name: &str, msg: &str) {
        log_info!("{} processing: {}", vm_name, msg);
        self.out
            .print_updatable(vm_name, &format!("{} - {:<40}", vm_name, msg));
    }

    fn print_success(&self, vm_name: &str, msg: &str) {
        log_info!("{} done: {}", vm_name, msg);
        self.out
            .print_updatable(vm_name, &format!("{} {} - {:<40}", vm_name, GREEN_CHECK, msg));
    }

    fn print_failure(&self, vm_name: &str, err: &MigrateError) {
        log_error!("{} failed: {}", vm_name, err);
        self.out
            .print_updatable(vm_name, &format!("{} {} - {}", vm_name, RED_X, err));
    }
}
