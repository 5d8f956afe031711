//! Reward address validation
//!
//! The engine only needs a yes/no answer for a reward address. The default
//! validator checks the bech32 encoding DERO uses for wallet addresses.

use crate::{Error, Result};
use bech32::{primitives::decode::CheckedHrpstring, Bech32};

/// Validates reward addresses before they are used for a connection
pub trait AddressValidator: Send + Sync {
    fn validate(&self, address: &str) -> Result<()>;
}

/// Human readable prefixes for mainnet, testnet and integrated addresses
const PREFIXES: [&str; 4] = ["dero", "deto", "deroi", "detoi"];

/// Address version byte followed by a compressed public key
const MIN_PAYLOAD_LEN: usize = 34;

/// Bech32 validator for DERO wallet addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct DeroAddressValidator;

impl AddressValidator for DeroAddressValidator {
    fn validate(&self, address: &str) -> Result<()> {
        if address.is_empty() {
            return Err(Error::address("address is empty"));
        }

        if address.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(Error::address("address must be lower case"));
        }

        let decoded = CheckedHrpstring::new::<Bech32>(address)
            .map_err(|e| Error::address(format!("invalid bech32 encoding: {}", e)))?;

        let hrp = decoded.hrp();
        if !PREFIXES.contains(&hrp.as_str()) {
            return Err(Error::address(format!("unknown prefix {:?}", hrp.as_str())));
        }

        let payload: Vec<u8> = decoded.byte_iter().collect();
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(Error::address(format!(
                "payload has {} bytes, expected at least {}",
                payload.len(),
                MIN_PAYLOAD_LEN
            )));
        }

        if payload[0] != 1 {
            return Err(Error::address(format!("unknown address version {}", payload[0])));
        }

        Ok(())
    }
}
