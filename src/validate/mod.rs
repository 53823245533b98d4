//! VLAN consistency check for bridges shared by several VMs.

use std::collections::BTreeSet;
use tracing::error;

use crate::error::{Result, VnmError};

/// Verify that no member of `bridge` carries a VLAN tag other than `vlan_id`.
///
/// `tag_of` reports the tag carried by a member, `None` for untagged
/// devices. The first mismatching member is returned as a conflict.
pub fn check_vlan_consistency<F>(
    bridge: &str,
    members: &BTreeSet<String>,
    vlan_id: u32,
    mut tag_of: F,
) -> Result<()>
where
    F: FnMut(&str) -> Result<Option<u32>>,
{
    for device in members {
        let Some(tag) = tag_of(device)? else {
            continue;
        };

        if tag != vlan_id {
            error!(
                "The interface {} has vlan_id = {} but the network is configured with vlan_id = {}",
                device, tag, vlan_id
            );
            return Err(VnmError::VlanConflict {
                bridge: bridge.to_string(),
                device: device.clone(),
                found: tag,
                expected: vlan_id,
            });
        }
    }

    Ok(())
}
