//! Pairing session - reads and writes the controller's pairing reports.

use tracing::{info, instrument, warn};

use super::nusb::{ClaimedController, discover};
use super::traits::{ClaimedChannel, FeatureReportChannel, PairingError};
use crate::protocol::constants::{
    GET_PAIRING_REPORT_LEN, REPORT_ID_GET_PAIRING, REPORT_ID_SET_PAIRING, SET_PAIRING_REPORT_LEN,
};
use crate::protocol::{HostIdentity, PairingInfo, decode_get_report, encode_set_report};

/// Pairing operations over any feature-report channel.
pub struct PairingSession<C: FeatureReportChannel> {
    channel: C,
}

impl<C: FeatureReportChannel> PairingSession<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Read the controller address and the host address it is paired to.
    pub fn get_mac(&self) -> Result<PairingInfo, PairingError> {
        let raw = self
            .channel
            .get_feature_report(REPORT_ID_GET_PAIRING, GET_PAIRING_REPORT_LEN)?;
        if raw.len() != GET_PAIRING_REPORT_LEN {
            return Err(PairingError::Transfer {
                report: REPORT_ID_GET_PAIRING,
                expected: GET_PAIRING_REPORT_LEN,
                actual: raw.len(),
            });
        }
        Ok(decode_get_report(&raw)?)
    }

    /// Write `identity` as the controller's paired host.
    pub fn set_mac(&self, identity: &HostIdentity) -> Result<(), PairingError> {
        let msg = encode_set_report(&identity.address, &identity.link_key);
        let written = self.channel.set_feature_report(REPORT_ID_SET_PAIRING, &msg)?;
        if written != SET_PAIRING_REPORT_LEN {
            return Err(PairingError::Transfer {
                report: REPORT_ID_SET_PAIRING,
                expected: SET_PAIRING_REPORT_LEN,
                actual: written,
            });
        }
        Ok(())
    }

    /// Pair with `identity` unless the controller already points at it.
    ///
    /// The stored host is read back after writing to confirm the update.
    pub fn pair(&self, identity: &HostIdentity) -> Result<ProvisionOutcome, PairingError> {
        let before = self.get_mac()?;
        if before.stored_host_addr == identity.address {
            return Ok(ProvisionOutcome::AlreadyPaired(before));
        }

        self.set_mac(identity)?;
        let after = self.get_mac()?;
        if after.stored_host_addr != identity.address {
            return Err(PairingError::VerifyFailed {
                expected: identity.address.to_string(),
                actual: after.stored_host_addr.to_string(),
            });
        }
        Ok(ProvisionOutcome::Paired {
            previous: before,
            current: after,
        })
    }
}

/// Result of a provisioning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Controller already stored the requested host; nothing was written.
    AlreadyPaired(PairingInfo),
    /// Controller was re-pointed at the requested host.
    Paired {
        previous: PairingInfo,
        current: PairingInfo,
    },
}

impl ProvisionOutcome {
    pub fn info(&self) -> &PairingInfo {
        match self {
            ProvisionOutcome::AlreadyPaired(info) => info,
            ProvisionOutcome::Paired { current, .. } => current,
        }
    }
}

/// Claim the first USB-attached controller and run `op` on it.
///
/// The interface is released on every exit path.
pub fn with_usb_controller<T>(
    vid: u16,
    pids: &[u16],
    op: impl FnOnce(&PairingSession<ClaimedController>) -> Result<T, PairingError>,
) -> Result<T, PairingError> {
    let devices = discover(vid, pids);
    let Some(device) = devices.first() else {
        return Err(PairingError::DeviceNotFound { vid });
    };
    if devices.len() > 1 {
        warn!(count = devices.len(), "Multiple controllers attached, using the first");
    }

    run_claimed(ClaimedController::claim(device)?, op)
}

/// Run `op` on an already claimed channel, then release it.
///
/// The claim is released exactly once whatever `op` returns.
pub fn run_claimed<C: ClaimedChannel, T>(
    channel: C,
    op: impl FnOnce(&PairingSession<C>) -> Result<T, PairingError>,
) -> Result<T, PairingError> {
    let session = PairingSession::new(channel);
    let result = op(&session);
    session.into_inner().release();
    result
}

/// Read the pairing state of a USB-attached controller.
#[instrument(level = "info")]
pub fn read_pairing(vid: u16, pids: &[u16]) -> Result<PairingInfo, PairingError> {
    with_usb_controller(vid, pids, |session| session.get_mac())
}

/// Pair a USB-attached controller with `identity`.
#[instrument(level = "info", skip(identity), fields(host = %identity.address))]
pub fn provision(
    vid: u16,
    pids: &[u16],
    identity: &HostIdentity,
) -> Result<ProvisionOutcome, PairingError> {
    let outcome = with_usb_controller(vid, pids, |session| session.pair(identity))?;
    match &outcome {
        ProvisionOutcome::AlreadyPaired(info) => {
            info!(device = %info.device_addr, "Controller already paired with this host");
        }
        ProvisionOutcome::Paired { previous, current } => {
            info!(
                device = %current.device_addr,
                previous_host = %previous.stored_host_addr,
                host = %current.stored_host_addr,
                "Controller paired"
            );
        }
    }
    Ok(outcome)
}
