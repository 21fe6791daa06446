//! Guess whether we are running inside a virtual machine.
//!
//! Hypervisors hand out MAC addresses from their vendor's OUI block, so the
//! share of interfaces with such an address is a cheap likelihood estimate.

use sysinfo::Networks;

/// OUI prefixes assigned to hypervisor vendors.
const VM_MAC_PREFIXES: &[[u8; 3]] = &[
    [0x00, 0x50, 0x56], // VMware ESX 3, Server, Workstation, Player
    [0x00, 0x0C, 0x29], // VMware ESX 3, Server, Workstation, Player
    [0x00, 0x05, 0x69], // VMware ESX 3, Server, Workstation, Player
    [0x00, 0x03, 0xFF], // Microsoft Hyper-V, Virtual Server, Virtual PC
    [0x00, 0x1C, 0x42], // Parallels Desktop, Workstation, Server, Virtuozzo
    [0x00, 0x0F, 0x4B], // Virtual Iron 4
    [0x00, 0x16, 0x3E], // Red Hat Xen, Oracle VM, XenSource, Novell Xen
    [0x08, 0x00, 0x27], // Sun xVM VirtualBox
    [0x52, 0x54, 0x00], // QEMU/KVM
];

/// Share (0.0-1.0) of the given interface MACs that belong to a hypervisor.
///
/// All-zero addresses (loopback, tunnels) are ignored.
pub fn likelihood_from_macs(macs: &[[u8; 6]]) -> f64 {
    let real: Vec<&[u8; 6]> = macs.iter().filter(|mac| **mac != [0u8; 6]).collect();
    if real.is_empty() {
        return 0.0;
    }
    let virtual_count = real
        .iter()
        .filter(|mac| VM_MAC_PREFIXES.iter().any(|prefix| mac[..3] == prefix[..]))
        .count();
    virtual_count as f64 / real.len() as f64
}

/// Likelihood for the host's current network interfaces.
pub fn virtual_machine_likelihood() -> f64 {
    let networks = Networks::new_with_refreshed_list();
    let macs: Vec<[u8; 6]> = networks
        .list()
        .values()
        .map(|data| data.mac_address().0)
        .collect();
    likelihood_from_macs(&macs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_interfaces_is_zero() {
        assert_eq!(likelihood_from_macs(&[]), 0.0);
        assert_eq!(likelihood_from_macs(&[[0; 6]]), 0.0);
    }

    #[test]
    fn test_mixed_interfaces() {
        let macs = [
            [0x08, 0x00, 0x27, 0x11, 0x22, 0x33],
            [0x3C, 0x22, 0xFB, 0x01, 0x02, 0x03],
            [0, 0, 0, 0, 0, 0],
        ];
        assert_eq!(likelihood_from_macs(&macs), 0.5);
    }

    #[test]
    fn test_host_likelihood_is_a_share() {
        let value = virtual_machine_likelihood();
        assert!((0.0..=1.0).contains(&value));
    }
}
