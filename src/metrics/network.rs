// Network metric family
//
// Collects cumulative traffic counters per interface and their sum.

use serde::{Deserialize, Serialize};
use sysinfo::Networks;
use tracing::debug;

/// Counters for one network interface since boot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InterfaceStats {
    pub name: String,
    pub mac_address: String,
    pub received_bytes: u64,
    pub transmitted_bytes: u64,
    pub received_packets: u64,
    pub transmitted_packets: u64,
    pub receive_errors: u64,
    pub transmit_errors: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkTotals {
    pub received_bytes: u64,
    pub transmitted_bytes: u64,
    pub received_packets: u64,
    pub transmitted_packets: u64,
    pub receive_errors: u64,
    pub transmit_errors: u64,
}

/// Network traffic snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkInfo {
    pub interfaces: Vec<InterfaceStats>,
    pub totals: NetworkTotals,
}

impl NetworkInfo {
    pub fn from_interfaces(mut interfaces: Vec<InterfaceStats>) -> Self {
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));

        let totals = interfaces.iter().fold(NetworkTotals::default(), |mut t, i| {
            t.received_bytes = t.received_bytes.saturating_add(i.received_bytes);
            t.transmitted_bytes = t.transmitted_bytes.saturating_add(i.transmitted_bytes);
            t.received_packets = t.received_packets.saturating_add(i.received_packets);
            t.transmitted_packets = t.transmitted_packets.saturating_add(i.transmitted_packets);
            t.receive_errors = t.receive_errors.saturating_add(i.receive_errors);
            t.transmit_errors = t.transmit_errors.saturating_add(i.transmit_errors);
            t
        });

        NetworkInfo { interfaces, totals }
    }
}

/// Samples every network interface (blocking)
pub fn sample() -> NetworkInfo {
    debug!("Collecting network metrics");

    let networks = Networks::new_with_refreshed_list();

    let interfaces: Vec<InterfaceStats> = networks
        .list()
        .iter()
        .map(|(name, data)| InterfaceStats {
            name: name.clone(),
            mac_address: data.mac_address().to_string(),
            received_bytes: data.total_received(),
            transmitted_bytes: data.total_transmitted(),
            received_packets: data.total_packets_received(),
            transmitted_packets: data.total_packets_transmitted(),
            receive_errors: data.total_errors_on_received(),
            transmit_errors: data.total_errors_on_transmitted(),
        })
        .collect();

    debug!("Collected counters for {} interface(s)", interfaces.len());

    NetworkInfo::from_interfaces(interfaces)
}
