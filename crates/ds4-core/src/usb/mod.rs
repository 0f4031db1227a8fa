//! USB pairing layer.

pub mod mock;
pub mod nusb;
pub mod session;
pub mod traits;

pub use mock::MockPairingChannel;
pub use self::nusb::{ClaimedController, discover};
pub use session::{
    PairingSession, ProvisionOutcome, provision, read_pairing, run_claimed, with_usb_controller,
};
pub use traits::{ClaimedChannel, FeatureReportChannel, PairingError};
