use std::collections::HashSet;

use log::{debug, warn};
use pool_common::NetworkEntry;

use crate::platform::ScannedNetwork;

/// Render scan results as a JSON array no longer than `budget` bytes.
///
/// Strongest networks go first and each identifier appears once. Entries
/// are appended until the next one, plus its separator and the closing
/// bracket, would overflow the budget. Hidden networks are skipped.
pub fn listing(networks: &[ScannedNetwork], budget: usize) -> String {
    let mut sorted: Vec<&ScannedNetwork> = networks.iter().filter(|n| !n.ssid.is_empty()).collect();
    sorted.sort_by(|a, b| b.rssi.cmp(&a.rssi));

    let mut seen = HashSet::new();
    let mut json = String::from("[");
    let mut count = 0;

    for network in sorted {
        if !seen.insert(network.ssid.as_str()) {
            continue;
        }

        let entry = NetworkEntry {
            ssid: network.ssid.clone(),
            rssi: network.rssi,
            open: network.open,
        };
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("provisioning: cannot encode {:?}: {}", network.ssid, e);
                continue;
            }
        };

        let separator = usize::from(count > 0);
        if json.len() + separator + encoded.len() + 1 > budget {
            debug!("provisioning: scan listing full after {} entries", count);
            break;
        }

        if separator == 1 {
            json.push(',');
        }
        json.push_str(&encoded);
        count += 1;
    }

    json.push(']');
    json
}
