use crate::vim::{NetworkAdapter, NetworkBacking, NetworkHandle, VimBackend};
use crate::{log_debug, MigrateError, Result};
use std::sync::Arc;

/// Finds the adapter on `vm_name` currently backed by `network_name`.
///
/// Matching is by backing network identifier in its native form (portgroup
/// key, network reference value, or opaque network id), covering VMXNET3 and
/// E1000 adapters over distributed, standard and opaque networks.
pub async fn find_adapter(
    backend: &Arc<dyn VimBackend>,
    datacenter: &str,
    vm_name: &str,
    network_name: &str,
) -> Result<NetworkAdapter> {
    log_debug!("Finding VM {} adapter on network {}", vm_name, network_name);

    let network = backend.network(datacenter, network_name).await?;

    let vm = backend
        .find_vm(datacenter, vm_name)
        .await?
        .ok_or_else(|| MigrateError::LookupError(format!("failed to find VM {}", vm_name)))?;

    let adapters = backend.vm_adapters(&vm).await?;
    for adapter in adapters {
        if adapter.backing.network_id() == network.id() {
            log_debug!(
                "Found {} {:?} ({}) attached to network {}",
                vm_name,
                adapter.kind,
                adapter.mac_address,
                network_name
            );
            return Ok(adapter);
        }
        log_debug!(
            "{} {:?} ({}) was not attached to {}, continuing search",
            vm_name,
            adapter.kind,
            adapter.mac_address,
            network_name
        );
    }

    Err(MigrateError::AdapterNotFound {
        vm: vm_name.to_string(),
        network: network_name.to_string(),
    })
}

/// Re-targets an adapter at a new network by swapping in a backing of the
/// target network's variant; the adapter model is preserved.
pub fn retarget(adapter: &NetworkAdapter, target: &NetworkHandle) -> NetworkAdapter {
    let backing = match &target.backing {
        NetworkBacking::DistributedPort {
            portgroup_key,
            switch_uuid,
        } => NetworkBacking::DistributedPort {
            portgroup_key: portgroup_key.clone(),
            switch_uuid: switch_uuid.clone(),
        },
        NetworkBacking::Standard {
            device_name,
            network,
        } => NetworkBacking::Standard {
            device_name: device_name.clone(),
            network: network.clone(),
        },
        NetworkBacking::Opaque {
            network_id,
            network_type,
        } => NetworkBacking::Opaque {
            network_id: network_id.clone(),
            network_type: network_type.clone(),
        },
    };

    NetworkAdapter {
        key: adapter.key,
        kind: adapter.kind,
        mac_address: adapter.mac_address.clone(),
        backing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::{AdapterKind, ManagedRef};

    #[test]
    fn test_retarget_preserves_adapter_kind() {
        let adapter = NetworkAdapter {
            key: 4000,
            kind: AdapterKind::E1000,
            mac_address: "00:50:56:aa:bb:cc".to_string(),
            backing: NetworkBacking::Standard {
                device_name: "old-net".to_string(),
                network: ManagedRef::new("Network", "network-1"),
            },
        };
        let target = NetworkHandle {
            name: "new-net".to_string(),
            moref: ManagedRef::new("DistributedVirtualPortgroup", "dvportgroup-7"),
            backing: NetworkBacking::DistributedPort {
                portgroup_key: "dvportgroup-7".to_string(),
                switch_uuid: "11-22".to_string(),
            },
        };

        let updated = retarget(&adapter, &target);
        assert_eq!(updated.kind, AdapterKind::E1000);
        assert_eq!(updated.key, 4000);
        assert_eq!(updated.backing.network_id(), "dvportgroup-7");
    }

    #[test]
    fn test_backing_network_id_per_variant() {
        let dvs = NetworkBacking::DistributedPort {
            portgroup_key: "pg-1".to_string(),
            switch_uuid: "u".to_string(),
        };
        let std_net = NetworkBacking::Standard {
            device_name: "n".to_string(),
            network: ManagedRef::new("Network", "network-9"),
        };
        let opaque = NetworkBacking::Opaque {
            network_id: "nsx-5".to_string(),
            network_type: "nsx.LogicalSwitch".to_string(),
        };
        assert_eq!(dvs.network_id(), "pg-1");
        assert_eq!(std_net.network_id(), "network-9");
        assert_eq!(opaque.network_id(), "nsx-5");
    }
}
