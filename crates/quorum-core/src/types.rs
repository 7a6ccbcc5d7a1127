//! Core identifiers and newtypes

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{QuorumError, Result};

/// Minimum key ID length accepted by the signature backend
pub const KEY_ID_LENGTH_MIN: usize = 4;

/// Maximum key ID length accepted by the signature backend
pub const KEY_ID_LENGTH_MAX: usize = 256;

/// Length of a payload hash
pub const HASH_LENGTH: usize = 32;

/// Maximum byte length of an address
pub const ADDRESS_LENGTH_MAX: usize = 255;

/// Maximum length of an external chain name
pub const CHAIN_NAME_LENGTH_MAX: usize = 20;

/// Reject empty strings and strings containing non-printable characters
pub fn validate_string(s: &str) -> Result<()> {
    if s.is_empty() {
        return Err(QuorumError::Validation("string must not be empty".to_string()));
    }

    if s.chars().any(|c| c.is_control()) {
        return Err(QuorumError::Validation(format!(
            "string {:?} contains non-printable characters",
            s
        )));
    }

    Ok(())
}

/// Identifier of a generated key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key for this ID; lookups are case-insensitive
    pub fn index_key(&self) -> String {
        self.0.to_lowercase()
    }

    /// Backend key UID of the given share of this key
    pub fn share_uid(&self, share_index: u32) -> String {
        format!("{}_{}", self.0, share_index)
    }

    pub fn validate_basic(&self) -> Result<()> {
        validate_string(&self.0)
            .map_err(|e| QuorumError::Validation(format!("invalid key id: {}", e)))?;

        let len = self.0.len();
        if !(KEY_ID_LENGTH_MIN..=KEY_ID_LENGTH_MAX).contains(&len) {
            return Err(QuorumError::Validation(format!(
                "key id length {} not in range [{},{}]",
                len, KEY_ID_LENGTH_MIN, KEY_ID_LENGTH_MAX
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Name of an external chain a key is rotated for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainName(String);

impl ChainName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key for this chain; chain names compare case-insensitively
    pub fn index_key(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn validate_basic(&self) -> Result<()> {
        validate_string(&self.0)
            .map_err(|e| QuorumError::Validation(format!("invalid chain name: {}", e)))?;

        if self.0.len() > CHAIN_NAME_LENGTH_MAX {
            return Err(QuorumError::Validation(format!(
                "chain name length {} is greater than {}",
                self.0.len(),
                CHAIN_NAME_LENGTH_MAX
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for ChainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Payload hash a signing session signs over (32 bytes, never zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "hex_bytes_32")] pub [u8; HASH_LENGTH]);

impl Hash {
    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build a hash from a slice, rejecting anything that is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; HASH_LENGTH] = bytes.try_into().map_err(|_| {
            QuorumError::Validation(format!(
                "hash length must be {}, got {}",
                HASH_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| QuorumError::Validation(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn validate_basic(&self) -> Result<()> {
        if self.0 == [0u8; HASH_LENGTH] {
            return Err(QuorumError::Validation("hash cannot be zero".to_string()));
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

macro_rules! address_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
                Self(bytes.into())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(&self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(|e| QuorumError::Validation(e.to_string()))?;
                let address = Self(bytes);
                address.validate_basic()?;
                Ok(address)
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Address format check: non-empty and at most 255 bytes
            pub fn validate_basic(&self) -> Result<()> {
                if self.0.is_empty() {
                    return Err(QuorumError::Validation("address cannot be empty".to_string()));
                }
                if self.0.len() > ADDRESS_LENGTH_MAX {
                    return Err(QuorumError::Validation(format!(
                        "address max length is {}, got {}",
                        ADDRESS_LENGTH_MAX,
                        self.0.len()
                    )));
                }
                Ok(())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&hex::encode(&self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&hex::encode(&self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                Ok(Self(bytes))
            }
        }
    };
}

address_type!(
    /// Validator operator address
    ValAddress
);

address_type!(
    /// Account address; validators submit through proxy accounts
    AccAddress
);

/// Serde helper for 32-byte arrays as hex strings
pub mod hex_bytes_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Serde helper for 33-byte arrays as hex strings
pub mod hex_bytes_33 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 33], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 33], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 33];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Serde helper for variable-length byte strings as hex
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

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
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_length_bounds() {
        assert!(KeyId::new("abc").validate_basic().is_err());
        assert!(KeyId::new("abcd").validate_basic().is_ok());
        assert!(KeyId::new("a".repeat(256)).validate_basic().is_ok());
        assert!(KeyId::new("a".repeat(257)).validate_basic().is_err());
    }

    #[test]
    fn test_key_id_rejects_control_characters() {
        assert!(KeyId::new("key\n1").validate_basic().is_err());
    }

    #[test]
    fn test_key_id_share_uid() {
        assert_eq!(KeyId::new("evm-1").share_uid(2), "evm-1_2");
    }

    #[test]
    fn test_hash_length_and_zero() {
        assert!(Hash::from_slice(&[1u8; 31]).is_err());
        let hash = Hash::from_slice(&[1u8; 32]).unwrap();
        assert!(hash.validate_basic().is_ok());
        assert!(Hash::new([0u8; 32]).validate_basic().is_err());
    }

    #[test]
    fn test_address_roundtrip_and_bounds() {
        let addr = ValAddress::new(vec![0xab, 0xcd]);
        assert_eq!(addr.to_string(), "abcd");
        assert_eq!(ValAddress::from_hex("0xabcd").unwrap(), addr);
        assert!(ValAddress::new(Vec::new()).validate_basic().is_err());
        assert!(AccAddress::new(vec![1u8; 256]).validate_basic().is_err());

        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"abcd\"");
    }
}
