/*
 * SPDX-FileCopyrightText: Copyright (c) 2024-2025 Anvil Metal Authors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Upfront privilege verification with actionable errors.

use crate::ns;
use crate::NetifError;

/// CAP_NET_ADMIN bit in the effective capability mask.
const CAP_NET_ADMIN: u64 = 12;

/// Verify the preconditions for DHCP proxy interface management:
/// reachability of the host network namespace via PID 1 and
/// CAP_NET_ADMIN. Refuses with a message naming the missing pod spec
/// keys rather than failing later inside netlink.
pub fn check_network_privileges() -> Result<(), NetifError> {
    let mut missing = Vec::new();

    match ns::open_ns(ns::HOST_NS_PATH) {
        Ok(_) => match ns::in_host_namespace() {
            Ok(true) => missing.push(
                "  - process is already in the host network namespace; run in an isolated \
                 namespace with hostPID: true instead of hostNetwork: true"
                    .to_string(),
            ),
            Ok(false) => {}
            Err(err) => missing.push(format!("  - cannot compare network namespaces: {err}")),
        },
        Err(err) => missing.push(format!(
            "  - cannot access the host network namespace via PID 1 (requires hostPID: true): {err}"
        )),
    }

    match effective_capabilities() {
        Ok(caps) if caps & (1 << CAP_NET_ADMIN) != 0 => {}
        Ok(_) => missing.push("  - CAP_NET_ADMIN capability is not set".to_string()),
        Err(err) => missing.push(format!("  - cannot read process capabilities: {err}")),
    }

    if missing.is_empty() {
        return Ok(());
    }

    Err(NetifError::MissingPrivileges(format!(
        "{}\n\nTo resolve, ensure the pod spec includes:\n    spec:\n      hostPID: true\n      \
         containers:\n      - securityContext:\n          capabilities:\n            add: \
         [\"NET_ADMIN\"]\n          seccompProfile:\n            type: Unconfined   # required \
         for the eBPF strategy",
        missing.join("\n")
    )))
}

fn effective_capabilities() -> Result<u64, NetifError> {
    let status = std::fs::read_to_string("/proc/self/status")?;
    parse_cap_eff(&status)
        .ok_or_else(|| NetifError::Namespace("CapEff not found in /proc/self/status".to_string()))
}

fn parse_cap_eff(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|hex| u64::from_str_radix(hex.trim(), 16).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_eff_parsing() {
        let status = "Name:\tanvild\nCapInh:\t0000000000000000\nCapEff:\t00000000a80435fb\n";
        let caps = parse_cap_eff(status).unwrap();
        assert_eq!(caps, 0x00000000a80435fb);
        // NET_ADMIN (bit 12) happens to be set in this fixture.
        assert_ne!(caps & (1 << CAP_NET_ADMIN), 0);
    }

    #[test]
    fn missing_cap_eff_yields_none() {
        assert!(parse_cap_eff("Name:\tanvild\n").is_none());
    }
}
