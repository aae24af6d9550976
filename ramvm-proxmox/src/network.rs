//! Guest-agent network discovery.
//!
//! After start, the VM's address is read from the QEMU guest agent through
//! `qm guest cmd <id> network-get-interfaces`. The agent comes up some time
//! after boot, so the query is polled at a fixed interval until an IPv4
//! address in the expected network shows up or the timeout runs out.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::error::{ProxmoxError, Result};
use crate::executor::{ExecOptions, RemoteExecutor};
use crate::qm;

/// Address reported in dry-run mode.
pub const DRY_RUN_IP: &str = "10.DRY.RUN.IP";

/// Default pause between guest-agent queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default overall wait for an address.
pub const DEFAULT_IP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default prefix an address must have to count as the lab network.
pub const DEFAULT_IP_PREFIX: &str = "10.";

const LOOPBACK: &str = "lo";

/// Address family tag used by the guest agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpAddressType {
    Ipv4,
    Ipv6,
}

/// One address of a guest interface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuestIpAddress {
    #[serde(rename = "ip-address-type")]
    pub address_type: IpAddressType,
    #[serde(rename = "ip-address")]
    pub address: String,
    #[serde(default)]
    pub prefix: Option<u8>,
}

/// One network interface as reported by the guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuestInterface {
    pub name: String,
    #[serde(rename = "hardware-address", default)]
    pub hardware_address: Option<String>,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<GuestIpAddress>,
}

/// The agent reply is a bare list; some tooling wraps it in `{"result": …}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AgentReply {
    List(Vec<GuestInterface>),
    Wrapped { result: Vec<GuestInterface> },
}

/// Parse a `network-get-interfaces` reply.
pub fn parse_interfaces(json: &str) -> Result<Vec<GuestInterface>> {
    let reply: AgentReply =
        serde_json::from_str(json).map_err(|e| ProxmoxError::GuestAgent(e.to_string()))?;
    Ok(match reply {
        AgentReply::List(list) => list,
        AgentReply::Wrapped { result } => result,
    })
}

/// First IPv4 address starting with `prefix`, ignoring loopback.
pub fn select_ip<'a>(interfaces: &'a [GuestInterface], prefix: &str) -> Option<&'a str> {
    interfaces
        .iter()
        .filter(|iface| iface.name != LOOPBACK)
        .flat_map(|iface| iface.ip_addresses.iter())
        .find(|addr| addr.address_type == IpAddressType::Ipv4 && addr.address.starts_with(prefix))
        .map(|addr| addr.address.as_str())
}

/// Polling parameters for [`wait_for_ip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Give up after this long
    pub timeout: Duration,
    /// Pause between attempts
    pub interval: Duration,
    /// Accept only IPv4 addresses with this prefix
    pub ip_prefix: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_IP_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
            ip_prefix: DEFAULT_IP_PREFIX.to_string(),
        }
    }
}

/// One guest-agent query. `Ok(None)` means "not yet".
async fn poll_once(executor: &RemoteExecutor, vm_id: u32, prefix: &str) -> Result<Option<String>> {
    let out = executor
        .execute(
            &qm::guest_network_interfaces(vm_id),
            ExecOptions::new().quiet().ignore_errors(),
        )
        .await?;
    if out.trim().is_empty() {
        return Ok(None);
    }
    let interfaces = parse_interfaces(&out)?;
    Ok(select_ip(&interfaces, prefix).map(str::to_string))
}

/// Wait until the guest agent reports an address in the lab network.
///
/// Every failure of a single attempt is treated as "not available yet".
/// Attempts are cut off at the overall deadline, so the call returns `None`
/// no later than `poll.timeout` even when a query hangs.
#[instrument(skip(executor, poll), fields(timeout_secs = poll.timeout.as_secs()))]
pub async fn wait_for_ip(
    executor: &RemoteExecutor,
    vm_id: u32,
    dry_run: bool,
    poll: &PollConfig,
) -> Option<String> {
    if dry_run {
        return Some(DRY_RUN_IP.to_string());
    }

    info!("Waiting for IP address (max {}s)", poll.timeout.as_secs());
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        let remaining = poll.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break;
        }
        attempts += 1;
        match timeout(remaining, poll_once(executor, vm_id, &poll.ip_prefix)).await {
            Ok(Ok(Some(ip))) => {
                info!(attempts, "IP found: {}", ip);
                return Some(ip);
            }
            Ok(Ok(None)) => debug!(attempts, "No qualifying address yet"),
            Ok(Err(e)) => debug!(attempts, error = %e, "Guest agent query failed"),
            Err(_) => debug!(attempts, "Guest agent query did not answer before the deadline"),
        }
        sleep(poll.interval.min(poll.timeout.saturating_sub(started.elapsed()))).await;
    }

    warn!(attempts, "Timeout waiting for IP, guest agent might not be running");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::Arc;

    const AGENT_REPLY: &str = r#"[
        {"name": "lo", "hardware-address": "00:00:00:00:00:00",
         "ip-addresses": [{"ip-address-type": "ipv4", "ip-address": "127.0.0.1", "prefix": 8},
                          {"ip-address-type": "ipv6", "ip-address": "::1", "prefix": 128}]},
        {"name": "docker0",
         "ip-addresses": [{"ip-address-type": "ipv4", "ip-address": "172.17.0.1", "prefix": 16}]},
        {"name": "eth0", "hardware-address": "bc:24:11:2a:6f:01",
         "ip-addresses": [{"ip-address-type": "ipv6", "ip-address": "fe80::be24:11ff:fe2a:6f01", "prefix": 64},
                          {"ip-address-type": "ipv4", "ip-address": "10.20.30.41", "prefix": 24}]}
    ]"#;

    fn fast_poll(timeout_ms: u64) -> PollConfig {
        PollConfig {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(10),
            ip_prefix: "10.".to_string(),
        }
    }

    #[test]
    fn test_parse_and_select() {
        let interfaces = parse_interfaces(AGENT_REPLY).unwrap();
        assert_eq!(interfaces.len(), 3);
        assert_eq!(interfaces[2].ip_addresses[1].prefix, Some(24));
        assert_eq!(interfaces[2].hardware_address.as_deref(), Some("bc:24:11:2a:6f:01"));
        assert_eq!(interfaces[1].hardware_address, None);
        assert_eq!(select_ip(&interfaces, "10."), Some("10.20.30.41"));
        assert_eq!(select_ip(&interfaces, "172."), Some("172.17.0.1"));
        assert_eq!(select_ip(&interfaces, "127."), None);
    }

    #[test]
    fn test_parse_wrapped_reply() {
        let json = r#"{"result": [{"name": "ens18", "ip-addresses": [
            {"ip-address-type": "ipv4", "ip-address": "10.0.0.5"}]}]}"#;
        let interfaces = parse_interfaces(json).unwrap();
        assert_eq!(select_ip(&interfaces, "10."), Some("10.0.0.5"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_interfaces("QEMU guest agent is not running"),
            Err(ProxmoxError::GuestAgent(_))
        ));
        assert!(parse_interfaces(r#"[{"ip-addresses": []}]"#).is_err());
    }

    #[test]
    fn test_interface_without_addresses() {
        let interfaces = parse_interfaces(r#"[{"name": "eth0"}]"#).unwrap();
        assert!(interfaces[0].ip_addresses.is_empty());
        assert_eq!(select_ip(&interfaces, "10."), None);
    }

    #[tokio::test]
    async fn test_dry_run_returns_sentinel_without_polling() {
        let mock = Arc::new(MockTransport::new());
        let executor = RemoteExecutor::new(mock.clone());
        let ip = wait_for_ip(&executor, 200, true, &fast_poll(50)).await;
        assert_eq!(ip.as_deref(), Some(DRY_RUN_IP));
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn test_retries_until_agent_answers() {
        let mock = Arc::new(MockTransport::new());
        mock.on_failure("network-get-interfaces", 2, "QEMU guest agent is not running")
            .on_success("network-get-interfaces", "not json yet")
            .on_success("network-get-interfaces", AGENT_REPLY);
        let executor = RemoteExecutor::new(mock.clone());

        let ip = wait_for_ip(&executor, 200, false, &fast_poll(2_000)).await;

        assert_eq!(ip.as_deref(), Some("10.20.30.41"));
        assert_eq!(mock.count_matching("qm guest cmd 200 network-get-interfaces"), 3);
    }

    #[tokio::test]
    async fn test_always_failing_transport_times_out_with_bounded_attempts() {
        let mock = Arc::new(MockTransport::new());
        mock.on_transport_error("network-get-interfaces", "connection reset by peer");
        let executor = RemoteExecutor::new(mock.clone());
        let poll = fast_poll(100);

        let started = std::time::Instant::now();
        let ip = wait_for_ip(&executor, 200, false, &poll).await;

        assert_eq!(ip, None);
        assert!(started.elapsed() >= poll.timeout);
        let attempts = mock.count_matching("network-get-interfaces");
        assert!(attempts >= 1);
        assert!(attempts as u128 <= poll.timeout.as_millis() / poll.interval.as_millis() + 1);
    }

    #[tokio::test]
    async fn test_hanging_query_is_cut_off_at_timeout() {
        let mock = Arc::new(MockTransport::new());
        mock.on_stall("network-get-interfaces", Duration::from_secs(5));
        let executor = RemoteExecutor::new(mock.clone());
        let poll = fast_poll(200);

        let started = std::time::Instant::now();
        let ip = wait_for_ip(&executor, 200, false, &poll).await;

        assert_eq!(ip, None);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(mock.count_matching("network-get-interfaces"), 1);
    }

    #[tokio::test]
    async fn test_addresses_outside_prefix_are_ignored() {
        let mock = Arc::new(MockTransport::new());
        mock.on_success(
            "network-get-interfaces",
            r#"[{"name": "eth0", "ip-addresses": [{"ip-address-type": "ipv4", "ip-address": "192.168.1.7"}]}]"#,
        );
        let executor = RemoteExecutor::new(mock.clone());
        assert_eq!(wait_for_ip(&executor, 200, false, &fast_poll(60)).await, None);
    }
}
