//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::HostIdentity;
use crate::protocol::constants::{SONY_VENDOR_ID, SUPPORTED_PIDS};

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub device: DeviceConfig,
    pub ipc: IpcConfig,
    pub session: SessionConfig,
    pub pairing: PairingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_ids: Vec<u16>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: SONY_VENDOR_ID,
            product_ids: SUPPORTED_PIDS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Well-known socket path; any stale file there is removed on bind.
    pub socket_path: PathBuf,
    /// Listen backlog.
    pub backlog: i32,
    /// Read/write deadline for a single client exchange.
    pub client_timeout_ms: u64,
}

impl IpcConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/ds4d.ipc"),
            backlog: 10,
            client_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on one readiness wait; also the shutdown latency.
    pub poll_timeout_ms: u16,
    pub scan_retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 2000,
            scan_retry: RetryPolicy::default(),
        }
    }
}

/// Delay between discovery attempts that found nothing or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Retry at once.
    Immediate,
    Fixed { delay_ms: u64 },
    /// Double the delay on every consecutive miss, capped at `max_ms`.
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed { delay_ms: 100 }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based count of consecutive misses).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Immediate => Duration::ZERO,
            RetryPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryPolicy::Exponential { initial_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                let ms = initial_ms.saturating_mul(1u64 << shift).min(max_ms);
                Duration::from_millis(ms)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Host identity written to the controller when pairing.
    pub host: Option<HostIdentity>,
    /// Provision a USB-attached controller when the daemon starts.
    pub auto_pair: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BdAddr, LinkKey};

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.device.vendor_id, 0x054C);
        assert_eq!(config.device.product_ids, vec![0x05C4, 0x09CC]);
        assert_eq!(config.ipc.backlog, 10);
        assert_eq!(config.session.poll_timeout_ms, 2000);
        assert!(config.pairing.host.is_none());
    }

    #[test]
    fn test_retry_policy_delays() {
        assert_eq!(RetryPolicy::Immediate.delay(5), Duration::ZERO);
        assert_eq!(
            RetryPolicy::Fixed { delay_ms: 250 }.delay(9),
            Duration::from_millis(250)
        );

        let backoff = RetryPolicy::Exponential {
            initial_ms: 100,
            max_ms: 1000,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [ipc]
            socket_path = "/tmp/ds4.ipc"

            [session]
            scan_retry = { kind = "exponential", initial_ms = 50, max_ms = 2000 }

            [pairing]
            auto_pair = true
            host = { address = "00:1a:7d:da:71:13", link_key = "000102030405060708090a0b0c0d0e0f" }
            "#,
        )
        .unwrap();

        assert_eq!(config.ipc.socket_path, PathBuf::from("/tmp/ds4.ipc"));
        assert_eq!(config.ipc.backlog, 10);
        assert_eq!(
            config.session.scan_retry,
            RetryPolicy::Exponential {
                initial_ms: 50,
                max_ms: 2000
            }
        );
        let host = config.pairing.host.unwrap();
        assert_eq!(host.address, BdAddr::new([0x00, 0x1a, 0x7d, 0xda, 0x71, 0x13]));
        assert_eq!(host.link_key.as_bytes()[15], 0x0f);
        assert!(config.pairing.auto_pair);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds4d.toml");

        let mut config = DaemonConfig::default();
        config.pairing.host = Some(HostIdentity {
            address: BdAddr::new([1, 2, 3, 4, 5, 6]),
            link_key: LinkKey::new([7; 16]),
        });
        config.save_to_file(&path).unwrap();

        let loaded = DaemonConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
