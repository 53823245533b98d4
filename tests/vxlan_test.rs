mod common;

use common::{nic, vxlan_driver, FakeHost};
use std::error::Error;
use tempfile::TempDir;
use vnm_vlan::config::{DriverConfig, TaggingKind, VxlanConfig};
use vnm_vlan::{VlanDriver, VnmError};

#[test]
fn test_vxlan_activate_and_deactivate() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let host = FakeHost::new();
    host.with_physical("eth0");
    let driver = vxlan_driver(&host, dir.path());
    let nics = [nic(0, "eth0", "br100", 100)];

    driver.activate(&nics)?;

    assert!(host.mutations().contains(
        &"link add name eth0.100 type vxlan id 100 dev eth0 group 239.0.0.100 dstport 0"
            .to_string()
    ));
    let link = host.link("eth0.100").ok_or("eth0.100 missing")?;
    assert_eq!(link.kind.as_deref(), Some("vxlan"));
    assert_eq!(link.group.as_deref(), Some("239.0.0.100"));
    assert_eq!(link.master.as_deref(), Some("br100"));

    driver.deactivate(&nics)?;
    assert!(!host.has_link("eth0.100"));
    assert!(!host.has_link("br100"));
    Ok(())
}

#[test]
fn test_vxlan_from_config() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let host = FakeHost::new();
    host.with_physical("bond0");

    let config = DriverConfig {
        lock_file: dir.path().join("vnm.lock"),
        tagging: TaggingKind::Vxlan,
        vxlan: VxlanConfig {
            multicast_base: "239.1.0.0".parse()?,
            ttl: Some(16),
            dst_port: 4789,
        },
        ..Default::default()
    };
    let driver = VlanDriver::from_config(&config, host.clone());
    assert_eq!(driver.tagging().kind(), "vxlan");

    let mut vxlan_nic = nic(0, "bond0", "br7", 7);
    vxlan_nic.mtu = Some(1450);
    driver.activate(&[vxlan_nic])?;

    let expected = "link add name bond0.7 mtu 1450 type vxlan id 7 dev bond0 \
                    group 239.1.0.7 dstport 4789 ttl 16";
    assert!(host.mutations().iter().any(|c| c == expected));
    Ok(())
}

#[test]
fn test_vxlan_conflict_uses_vni() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let host = FakeHost::new();
    host.with_physical("eth0");
    let driver = vxlan_driver(&host, dir.path());

    driver.activate(&[nic(0, "eth0", "br0", 100)])?;
    host.clear_log();

    let mut other = nic(1, "eth0", "br0", 200);
    other.conf.validate_vlan_id = true;

    match driver.activate(&[other]) {
        Err(VnmError::VlanConflict { device, found, .. }) => {
            assert_eq!(device, "eth0.100");
            assert_eq!(found, 100);
        }
        other => panic!("Expected VLAN conflict, got {:?}", other),
    }
    assert!(host.mutations().is_empty());
    Ok(())
}
