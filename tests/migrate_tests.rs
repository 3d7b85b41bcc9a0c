// Full-run migration scenarios: skips, failure aggregation, host saturation
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vmshift::client_pool::ClientPool;
use vmshift::convert::{Az, AzMapping, Converter, MappedCompute, MappedDatastore, MappedNetwork};
use vmshift::fakes::{FakeConnector, FakeThumbprinter, FakeVim, ScriptedOrchestrator, VmRecord};
use vmshift::host_pool::{HostPool, HostPoolConfig};
use vmshift::progress::UpdatableStdout;
use vmshift::relocate::VmRelocator;
use vmshift::vim::{AdapterKind, ManagedRef, NetworkAdapter, NetworkBacking, NetworkHandle, VimConnector};
use vmshift::vm_migrator::VmMigrator;
use vmshift::vm_source::{OrchestratorVm, SourceVm};
use vmshift::{FoundationMigrator, MigrateError, MigrationConfig};

fn std_backing(device_name: &str, network_value: &str) -> NetworkBacking {
    NetworkBacking::Standard {
        device_name: device_name.to_string(),
        network: ManagedRef::new("Network", network_value),
    }
}

fn network(name: &str, value: &str) -> NetworkHandle {
    NetworkHandle {
        name: name.to_string(),
        moref: ManagedRef::new("Network", value),
        backing: std_backing(name, value),
    }
}

fn migratable_vm(backend: &FakeVim, name: &str, datastore: &str) {
    let mut vm = VmRecord::new("DC1", name, "C1");
    vm.resource_pool = "RP1".to_string();
    vm.disks = vec![vmshift::vim::Disk {
        id: 2000,
        datastore: datastore.to_string(),
    }];
    vm.networks = vec!["N1".to_string()];
    vm.adapters = vec![NetworkAdapter {
        key: 4000,
        kind: AdapterKind::Vmxnet3,
        mac_address: "00:50:56:00:00:01".to_string(),
        backing: std_backing("src", "network-n1"),
    }];
    backend.add_vm("DC1", vm);
}

fn populate_world(backend: &FakeVim, host_count: usize) {
    backend.add_network("DC1", network("N1", "network-n1"));
    backend.add_network("DC1", network("N2", "network-n2"));
    backend.add_folder("DC1", "/DC1/vm");
    backend.add_cluster("DC1", "C2");
    for i in 1..=host_count {
        backend.add_host("DC1", "C2", &format!("esx{}", i), false);
    }
    backend.add_resource_pool("DC1", "/DC1/host/C2/Resources/RP2");
    backend.add_datastore("DC1", "DS2");
}

fn config() -> MigrationConfig {
    toml::from_str(
        r#"
[networks]
"N1" = "N2"

[datastores]
"DS1" = "DS2"

[[compute.source]]
name = "az1"
clusters = [{ name = "C1", resource_pool = "RP1" }]
[compute.source.vcenter]
host = "vc1"
username = "admin1"
password = "pw1"
datacenter = "DC1"

[[compute.target]]
name = "az1"
clusters = [{ name = "C2", resource_pool = "RP2" }]
[compute.target.vcenter]
host = "vc1"
username = "admin1"
password = "pw1"
datacenter = "DC1"
"#,
    )
    .unwrap()
}

fn foundation(
    connector: Arc<FakeConnector>,
    vms: Vec<&str>,
) -> FoundationMigrator {
    let orchestrator_vms: Vec<OrchestratorVm> = vms
        .into_iter()
        .map(|name| OrchestratorVm {
            name: name.to_string(),
            az: "az1".to_string(),
        })
        .collect();
    FoundationMigrator::from_config(
        &config(),
        connector,
        Arc::new(FakeThumbprinter("AA:BB".to_string())),
        Box::new(ScriptedOrchestrator(orchestrator_vms)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_vm_outside_candidate_clusters_is_skipped() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 1);
    // vm1 exists, but already sits in the target cluster
    let vm = VmRecord::new("DC1", "vm1", "C2");
    backend.add_vm("DC1", vm);

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));

    let m = foundation(connector, vec!["vm1"]);
    m.migrate().await.unwrap();

    assert!(backend.relocations().is_empty());
}

#[tokio::test]
async fn test_vm_missing_everywhere_is_skipped() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 1);

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));

    let m = foundation(connector, vec!["ghost-vm"]);
    m.migrate().await.unwrap();

    assert!(backend.relocations().is_empty());
}

#[tokio::test]
async fn test_unmapped_datastore_fails_only_that_vm() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 2);
    migratable_vm(&backend, "vm1", "DS1");
    migratable_vm(&backend, "vm2", "DS9");

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));

    let m = foundation(connector, vec!["vm1", "vm2"]);
    let err = m.migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::FailedVms(1)));
    let relocations = backend.relocations();
    assert_eq!(relocations.len(), 1);
    assert_eq!(relocations[0].0, "vm1");
}

#[tokio::test]
async fn test_hypervisor_fault_messages_surface_in_the_error() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 1);
    migratable_vm(&backend, "vm1", "DS1");
    backend.fail_relocate("vm1", &["insufficient resources", "admission check failed"]);

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));

    let m = foundation(connector, vec!["vm1"]);
    let err = m.migrate().await.unwrap_err();
    assert!(matches!(err, MigrateError::FailedVms(1)));
}

#[tokio::test]
async fn test_clients_are_logged_out_after_a_run() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 1);
    migratable_vm(&backend, "vm1", "DS1");

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));

    let m = foundation(connector, vec!["vm1"]);
    m.migrate().await.unwrap();

    assert!(backend.was_logged_out());
}

#[tokio::test]
async fn test_empty_fleet_succeeds() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 1);

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));

    let m = foundation(connector, vec![]);
    m.migrate().await.unwrap();
}

#[tokio::test]
async fn test_auth_failure_aborts_before_fan_out() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 1);
    migratable_vm(&backend, "vm1", "DS1");

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));
    connector.fail_auth("vc1");

    let m = foundation(Arc::clone(&connector), vec!["vm1"]);
    let err = m.migrate().await.unwrap_err();

    assert!(matches!(err, MigrateError::AuthError(_)));
    // the memoized failure means the endpoint saw exactly one login attempt
    assert_eq!(connector.connect_count("vc1"), 1);
    assert!(backend.relocations().is_empty());
}

#[tokio::test]
async fn test_source_auth_failure_is_cached_across_vms() {
    // source endpoint rejects logins; target endpoint works
    let target = FakeVim::new("uuid-tgt");
    target.add_cluster("DC1", "C2");
    target.add_host("DC1", "C2", "esx1", false);

    let connector = FakeConnector::new();
    connector.register("vc2", Arc::clone(&target));
    connector.fail_auth("vc1");

    let mut c = config();
    c.compute.target[0].vcenter.host = "vc2".to_string();
    let m = FoundationMigrator::from_config(
        &c,
        Arc::clone(&connector) as Arc<dyn VimConnector>,
        Arc::new(FakeThumbprinter("AA:BB".to_string())),
        Box::new(ScriptedOrchestrator(vec![
            OrchestratorVm {
                name: "vm1".to_string(),
                az: "az1".to_string(),
            },
            OrchestratorVm {
                name: "vm2".to_string(),
                az: "az1".to_string(),
            },
        ])),
    )
    .unwrap();

    let err = m.migrate().await.unwrap_err();
    assert!(matches!(err, MigrateError::FailedVms(2)));
    // both VMs share the memoized failure, the endpoint saw one login attempt
    assert_eq!(connector.connect_count("vc1"), 1);
}

/// Two destination hosts at max one lease each must cap concurrent relocates
/// at two, with the third VM waiting for a released lease.
#[tokio::test]
async fn test_host_saturation_bounds_in_flight_relocates() {
    let backend = FakeVim::new("uuid-1");
    populate_world(&backend, 2);
    for name in ["vm1", "vm2", "vm3"] {
        migratable_vm(&backend, name, "DS1");
    }
    backend.set_relocate_delay(Duration::from_millis(200));

    let connector = FakeConnector::new();
    connector.register("vc1", Arc::clone(&backend));

    let mut clients = ClientPool::new(
        connector,
        Arc::new(FakeThumbprinter("AA:BB".to_string())),
    );
    clients.add_source("az1", "vc1", "admin1", "pw1", "DC1", false);
    clients.add_target("az1", "vc1", "admin1", "pw1", "DC1", false);
    let clients = Arc::new(clients);

    let mut host_pool = HostPool::new(
        Arc::clone(&clients),
        HostPoolConfig {
            azs: HashMap::from([("az1".to_string(), vec!["C2".to_string()])]),
        },
    );
    host_pool.lease_check_interval = Duration::from_millis(25);
    host_pool.lease_wait_timeout = Duration::from_secs(10);
    let host_pool = Arc::new(host_pool);

    let out = Arc::new(UpdatableStdout::with_writer(Box::new(std::io::sink())));
    let relocator = VmRelocator::new(
        Arc::clone(&clients),
        Arc::clone(&host_pool),
        Arc::clone(&out),
    );
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
            source: Az {
                name: "az1".to_string(),
                datacenter: "DC1".to_string(),
                cluster: "C1".to_string(),
                resource_pool: "RP1".to_string(),
            },
            target: Az {
                name: "az1".to_string(),
                datacenter: "DC1".to_string(),
                cluster: "C2".to_string(),
                resource_pool: "RP2".to_string(),
            },
        }])),
    );
    let migrator = Arc::new(VmMigrator::new(
        Arc::clone(&clients),
        converter,
        relocator,
        out,
    ));

    let mut handles = Vec::new();
    for name in ["vm1", "vm2", "vm3"] {
        let migrator = Arc::clone(&migrator);
        let vm = SourceVm {
            name: name.to_string(),
            az: "az1".to_string(),
            clusters: vec!["C1".to_string()],
        };
        handles.push(tokio::spawn(async move { migrator.migrate(&vm).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(backend.relocations().len(), 3);
    assert_eq!(backend.max_in_flight_relocates(), 2);
    assert_eq!(host_pool.lease_count("az1", "esx1"), Some(0));
    assert_eq!(host_pool.lease_count("az1", "esx2"), Some(0));
}
