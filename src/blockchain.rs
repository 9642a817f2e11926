// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Chain primitives shared by the swap protocol and the market tracker: the two asset types, the
//! currency amount, the 32-byte identifiers, and the unlock conditions guarding outputs.

use secp256k1::PublicKey;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tiny_keccak::{Hasher, Keccak};

use std::fmt;
use std::io;
use std::str::FromStr;

use crate::consensus::{self, serialize, CanonicalBytes, Decodable, Encodable};

/// Number of base units in one coin.
pub const COIN_PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

/// Fixed fee, paid in coin, attached to every swap and fill transaction. The party contributing
/// the coin side pays it.
pub const MINER_FEE: Currency = Currency(5 * COIN_PRECISION);

/// The two independently accounted asset types exchanged by a swap.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[display(Debug)]
pub enum Asset {
    /// The native asset, pays network fees.
    Coin,
    /// The second asset, never used for fees.
    Fund,
}

impl Asset {
    /// Return the other asset type.
    pub fn other(&self) -> Self {
        match self {
            Self::Coin => Self::Fund,
            Self::Fund => Self::Coin,
        }
    }
}

impl Encodable for Asset {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            Asset::Coin => 0x01u8.consensus_encode(writer),
            Asset::Fund => 0x02u8.consensus_encode(writer),
        }
    }
}

impl Decodable for Asset {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(Asset::Coin),
            0x02u8 => Ok(Asset::Fund),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl FromStr for Asset {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Coin" | "coin" => Ok(Asset::Coin),
            "Fund" | "fund" => Ok(Asset::Fund),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// An amount of either asset, in base units. Arithmetic is explicit: checked or saturating.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Currency(pub u128);

impl Currency {
    /// The zero amount.
    pub const ZERO: Currency = Currency(0);

    /// Create an amount from base units.
    pub const fn new(units: u128) -> Self {
        Currency(units)
    }

    /// Create an amount of whole coins.
    pub const fn from_coins(coins: u64) -> Self {
        Currency(coins as u128 * COIN_PRECISION)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Currency) -> Option<Currency> {
        self.0.checked_add(other.0).map(Currency)
    }

    pub fn checked_sub(self, other: Currency) -> Option<Currency> {
        self.0.checked_sub(other.0).map(Currency)
    }

    pub fn saturating_add(self, other: Currency) -> Currency {
        Currency(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Currency(s.trim().parse()?))
    }
}

impl Encodable for Currency {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        self.0.consensus_encode(s)
    }
}

impl Decodable for Currency {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Currency(Decodable::consensus_decode(d)?))
    }
}

// Amounts exceed the integer range of most JSON consumers, they travel as decimal strings.
impl Serialize for Currency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Currency, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

fixed_hash::construct_fixed_hash!(
    /// A Keccak-256 digest.
    pub struct Hash256(32);
);

fixed_hash::construct_fixed_hash!(
    /// Identify an output created by a transaction. For bids this is also the bid identifier: the
    /// output reserved by the bidder.
    pub struct OutputId(32);
);

fixed_hash::construct_fixed_hash!(
    /// Identify a transaction by the hash of all its fields except the signatures.
    pub struct TransactionId(32);
);

fixed_hash::construct_fixed_hash!(
    /// An address, the hash of the [`UnlockConditions`] able to spend an output. The zero value
    /// is the unset address.
    pub struct UnlockHash(32);
);

fixed_hash::construct_fixed_hash!(
    /// Identify a block.
    pub struct BlockId(32);
);

fixed_hash::construct_fixed_hash!(
    /// Identify a consensus change delivered by the consensus feed.
    pub struct ConsensusChangeId(32);
);

macro_rules! impl_hash_encoding {
    ($name:ident) => {
        impl $name {
            /// Returns the full lowercase hex representation, without prefix.
            pub fn to_hex(&self) -> String {
                hex::encode(self.as_bytes())
            }
        }

        impl FromStr for $name {
            type Err = consensus::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(consensus::Error::new)?;
                if bytes.len() != Self::len_bytes() {
                    return Err(consensus::Error::ParseFailed("hash must be 32 bytes"));
                }
                Ok(Self::from_slice(&bytes))
            }
        }

        impl Encodable for $name {
            fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
                self.to_fixed_bytes().consensus_encode(s)
            }
        }

        impl Decodable for $name {
            fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
                let bytes: [u8; 32] = Decodable::consensus_decode(d)?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<$name, D::Error>
            where
                D: Deserializer<'de>,
            {
                String::deserialize(deserializer)?
                    .parse()
                    .map_err(de::Error::custom)
            }
        }
    };
}

impl_hash_encoding!(Hash256);
impl_hash_encoding!(OutputId);
impl_hash_encoding!(TransactionId);
impl_hash_encoding!(UnlockHash);
impl_hash_encoding!(BlockId);
impl_hash_encoding!(ConsensusChangeId);

impl From<OutputId> for Hash256 {
    fn from(id: OutputId) -> Self {
        Hash256(id.0)
    }
}

impl From<Hash256> for OutputId {
    fn from(h: Hash256) -> Self {
        OutputId(h.0)
    }
}

/// Compute the Keccak-256 digest of the concatenated parts.
pub fn keccak256(parts: &[&[u8]]) -> Hash256 {
    let mut keccak = Keccak::v256();
    let mut out = [0u8; 32];
    for part in parts {
        keccak.update(part);
    }
    keccak.finalize(&mut out);
    Hash256(out)
}

/// The conditions that must be met to spend an output: a minimum height and a threshold of
/// signatures from a set of public keys. Their hash is the output address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockConditions {
    pub timelock: u64,
    pub public_keys: Vec<PublicKey>,
    pub signatures_required: u64,
}

impl UnlockConditions {
    /// Single key, no timelock. What wallets hand out for every receiving address.
    pub fn standard(key: PublicKey) -> Self {
        UnlockConditions {
            timelock: 0,
            public_keys: vec![key],
            signatures_required: 1,
        }
    }

    /// The address these conditions unlock.
    pub fn unlock_hash(&self) -> UnlockHash {
        UnlockHash(keccak256(&[&serialize(self)]).0)
    }
}

impl Encodable for UnlockConditions {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.timelock.consensus_encode(s)?;
        len += (self.public_keys.len() as u64).consensus_encode(s)?;
        for key in &self.public_keys {
            len += key.as_canonical_bytes().consensus_encode(s)?;
        }
        Ok(len + self.signatures_required.consensus_encode(s)?)
    }
}

impl Decodable for UnlockConditions {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        let timelock = Decodable::consensus_decode(d)?;
        let count: u64 = Decodable::consensus_decode(d)?;
        let mut public_keys = vec![];
        for _ in 0..count {
            public_keys.push(PublicKey::from_canonical_bytes(unwrap_vec_ref!(d).as_ref())?);
        }
        Ok(UnlockConditions {
            timelock,
            public_keys,
            signatures_required: Decodable::consensus_decode(d)?,
        })
    }
}

/// Serde helpers encoding raw bytes as hex strings.
pub(crate) mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        hex::decode(String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}
