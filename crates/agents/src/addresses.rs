//! Local interface enumeration for agent announcements.

use std::net::IpAddr;

use sharemesh_protocol::types::AddressList;

/// Returns the non-loopback addresses this machine answers on,
/// excluding link-local ranges.
pub fn local_addresses() -> AddressList {
    let mut list = AddressList::default();

    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return list;
    };

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        match iface.ip() {
            IpAddr::V4(ip) => {
                // Skip APIPA (169.254.x.x).
                if ip.octets()[0] == 169 && ip.octets()[1] == 254 {
                    continue;
                }
                list.ipv4.push(ip.to_string());
            }
            IpAddr::V6(ip) => {
                if ip.segments()[0] & 0xffc0 == 0xfe80 {
                    continue;
                }
                list.ipv6.push(ip.to_string());
            }
        }
    }

    list
}
