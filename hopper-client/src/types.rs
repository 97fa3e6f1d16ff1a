//! Identifier types shared by every component.
//!
//! All values live in the BN254 scalar field used by the proving system and
//! are carried as [`U256`]. The newtypes keep leaves, nullifiers and roots
//! from being swapped for one another at call sites.

use std::fmt;

use ethers::types::{Address, U256};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{MixerError, Result};

/// BN254 scalar field modulus, the exclusive upper bound for field elements.
pub const SNARK_SCALAR_FIELD: U256 = U256([
    0x43e1_f593_f000_0001,
    0x2833_e848_79b9_7091,
    0xb850_45b6_8181_585d,
    0x3064_4e72_e131_a029,
]);

/// Deepest tree the prover accepts.
pub const MAX_TREE_DEPTH: usize = 32;

/// Number of random bytes drawn for a fresh secret. 240 bits always fits
/// below the field modulus.
const SECRET_BYTES: usize = 30;

/// Parse a field element from decimal or `0x`-prefixed hex.
pub fn parse_field_element(text: &str) -> Result<U256> {
    let parsed = parse_word(text)?;
    if parsed >= SNARK_SCALAR_FIELD {
        return Err(MixerError::InvalidParams(format!(
            "{} is not below the scalar field modulus",
            text.trim()
        )));
    }
    Ok(parsed)
}

/// Parse a 256-bit word, `0x`-prefixed hex or decimal, with no field bound.
pub fn parse_word(text: &str) -> Result<U256> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16)
            .map_err(|e| MixerError::InvalidParams(format!("invalid hex word {text}: {e:?}"))),
        None => U256::from_dec_str(text)
            .map_err(|e| MixerError::InvalidParams(format!("invalid word {text}: {e:?}"))),
    }
}

/// Interpret an address as the field element the circuit binds to.
pub fn address_to_field(address: Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

/// Reject the zero address, which the mixer never pays out to.
pub fn ensure_address(address: Address, role: &str) -> Result<Address> {
    if address.is_zero() {
        return Err(MixerError::InvalidParams(format!("{role} address must be non-zero")));
    }
    Ok(address)
}

/// The depositor's secret. Never logged; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(U256);

impl Secret {
    /// Wrap a value, checking `0 < value < SNARK_SCALAR_FIELD`.
    pub fn new(value: U256) -> Result<Self> {
        if value.is_zero() {
            return Err(MixerError::InvalidParams("secret must be non-zero".into()));
        }
        if value >= SNARK_SCALAR_FIELD {
            return Err(MixerError::InvalidParams(
                "secret must be below the scalar field modulus".into(),
            ));
        }
        Ok(Self(value))
    }

    /// Draw a fresh secret.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes[32 - SECRET_BYTES..]);
            let value = U256::from_big_endian(&bytes);
            if !value.is_zero() {
                return Self(value);
            }
        }
    }

    /// Parse from decimal or `0x` hex.
    pub fn parse(text: &str) -> Result<Self> {
        Self::new(parse_field_element(text)?)
    }

    /// Raw field element. Only the hash calls and the witness need it.
    pub fn expose(&self) -> U256 {
        self.0
    }

    /// Decimal rendering, for handing the secret back to its owner.
    pub fn to_decimal(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

macro_rules! field_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub U256);

        impl $name {
            /// The underlying field element.
            pub fn value(&self) -> U256 {
                self.0
            }
        }

        impl From<U256> for $name {
            fn from(value: U256) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

field_newtype!(
    /// Commitment `hash(secret, recipient)`, one slot in the tree.
    Leaf
);
field_newtype!(
    /// `hash(secret)`, revealed at withdrawal.
    Nullifier
);
field_newtype!(
    /// Tree root at some point in ledger state.
    MerkleRoot
);

/// Sibling hashes from a leaf up to the root, leaf level first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerklePath(Vec<U256>);

impl MerklePath {
    pub fn new(siblings: Vec<U256>) -> Self {
        Self(siblings)
    }

    pub fn siblings(&self) -> &[U256] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where and when a commitment landed in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingEvent {
    pub block_number: u64,
    pub leaf_index: u64,
}
