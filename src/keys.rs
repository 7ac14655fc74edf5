//! In-memory keyring holding the signing identities
//!
//! Identities are derived from a BIP-39 mnemonic along the Cosmos HD path
//! and live only for the lifetime of the process.

use crate::error::{CompounderError, CompounderResult};

use bip39::{Language, Mnemonic};
use cosmrs::bip32::DerivationPath;
use cosmrs::crypto::secp256k1::SigningKey;
use cosmrs::crypto::PublicKey;
use cosmrs::AccountId;
use dashmap::DashMap;
use rand_core::{OsRng, RngCore};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Standard Cosmos account derivation path (coin type 118)
pub const COSMOS_HD_PATH: &str = "m/44'/118'/0'/0/0";

/// Entropy for a generated 24-word phrase
const GENERATED_ENTROPY_BYTES: usize = 32;

/// A key-derived account able to sign for one chain address
pub struct SigningIdentity {
    name: String,
    address: AccountId,
    signing_key: SigningKey,
}

impl SigningIdentity {
    fn from_mnemonic(name: &str, mnemonic: &Mnemonic, prefix: &str) -> CompounderResult<Self> {
        let path: DerivationPath = COSMOS_HD_PATH
            .parse()
            .map_err(|e| CompounderError::Key(format!("Invalid derivation path: {}", e)))?;
        let seed = mnemonic.to_seed("");
        let signing_key = SigningKey::derive_from_path(seed, &path)
            .map_err(|e| CompounderError::Key(format!("Key derivation failed: {}", e)))?;
        let address = signing_key
            .public_key()
            .account_id(prefix)
            .map_err(|e| CompounderError::Key(format!("Cannot encode address: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            address,
            signing_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bech32 account address
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub fn account_id(&self) -> &AccountId {
        &self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing_key.public_key()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("name", &self.name)
            .field("address", &self.address.as_ref())
            .finish_non_exhaustive()
    }
}

/// Named signing identities for one address prefix
pub struct Keyring {
    prefix: String,
    identities: DashMap<String, Arc<SigningIdentity>>,
}

impl Keyring {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            identities: DashMap::new(),
        }
    }

    /// Return the identity stored under `name`, creating it if absent.
    ///
    /// A supplied mnemonic of any BIP-39 length (12 to 24 words) is used for
    /// derivation; without one a fresh 24-word mnemonic is generated. A
    /// malformed mnemonic is a setup error.
    pub fn get_or_create(
        &self,
        name: &str,
        mnemonic: Option<&str>,
    ) -> CompounderResult<Arc<SigningIdentity>> {
        if let Some(existing) = self.identities.get(name) {
            debug!("Keyring hit for {}", name);
            return Ok(existing.clone());
        }

        let mnemonic = match mnemonic {
            Some(phrase) => parse_mnemonic(phrase)
                .map_err(|e| CompounderError::Key(format!("Invalid mnemonic for {}: {}", name, e)))?,
            None => {
                info!("No mnemonic supplied for {}, generating a new one", name);
                generate_mnemonic()?
            }
        };

        let identity = Arc::new(SigningIdentity::from_mnemonic(
            name,
            &mnemonic,
            &self.prefix,
        )?);

        // First insert under a name wins
        let stored = self
            .identities
            .entry(name.to_string())
            .or_insert(identity)
            .clone();

        info!(
            "Keyring loaded {} with address {} ({} identities)",
            stored.name(),
            stored.address(),
            self.identities.len()
        );
        Ok(stored)
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<Arc<SigningIdentity>> {
        self.identities.get(name).map(|entry| entry.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.identities.len()
    }
}

/// Parse a phrase in any word count, collapsing runs of whitespace
fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, bip39::Error> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    Mnemonic::parse_in_normalized(Language::English, &normalized)
}

fn generate_mnemonic() -> CompounderResult<Mnemonic> {
    let mut entropy = [0u8; GENERATED_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut entropy);
    Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| CompounderError::Key(format!("Cannot generate mnemonic: {}", e)))
}

#[cfg(test)]
pub(crate) const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
