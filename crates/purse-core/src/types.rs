//! Core newtypes for SHA device material

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Copy `N` bytes starting at `offset` out of a fixed-size buffer.
///
/// Callers only pass compile-time offsets that lie inside the buffer.
pub(crate) fn take<const N: usize, const M: usize>(buf: &[u8; M], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

macro_rules! byte_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "hex_bytes")] pub [u8; $len]);

        impl $name {
            /// Size in bytes
            pub const LEN: usize = $len;

            pub fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }
    };
}

byte_newtype!(
    /// 7-byte binding code combined with a token's page and address
    BindCode,
    7
);

byte_newtype!(
    /// 32-byte binding data fed as the page input of a bind computation
    BindData,
    32
);

byte_newtype!(
    /// 15-byte binding code, ready to be placed at scratchpad offset 8
    FullBindCode,
    15
);

byte_newtype!(
    /// 3-byte challenge issued by the coprocessor
    Challenge,
    3
);

byte_newtype!(
    /// 8-byte 1-Wire network address (family, serial, crc8)
    TokenAddress,
    8
);

impl TokenAddress {
    /// Family code byte
    pub fn family_code(&self) -> u8 {
        self.0[0]
    }

    /// First seven address bytes, as folded into MAC scratchpads
    pub fn serial7(&self) -> [u8; 7] {
        take(&self.0, 0)
    }
}

/// 20-byte MAC produced by the SHA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mac(#[serde(with = "hex_bytes")] pub [u8; 20]);

impl Mac {
    pub const LEN: usize = 20;

    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Constant-time comparison
    pub fn ct_matches(&self, other: &Mac) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl AsRef<[u8]> for Mac {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 32-byte scratchpad staging buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratchpad(pub [u8; 32]);

impl Scratchpad {
    pub const LEN: usize = 32;

    /// Scratchpad filled with `0xFF`, the erased state of the device
    pub fn erased() -> Self {
        Self([0xFF; 32])
    }

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; 32] {
        &mut self.0
    }

    /// Four-byte little-endian write-cycle counter at offset 8, or `0xFF`s
    pub fn set_write_counter(&mut self, counter: Option<u32>) {
        let bytes = counter.map_or([0xFF; 4], u32::to_le_bytes);
        self.0[8..12].copy_from_slice(&bytes);
    }

    /// Three challenge bytes at offset 20
    pub fn set_challenge(&mut self, challenge: &Challenge) {
        self.0[20..23].copy_from_slice(&challenge.0);
    }

    /// The 20 bytes at offset 8 holding a computed MAC
    pub fn mac(&self) -> Mac {
        Mac(take(&self.0, 8))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for Scratchpad {
    fn default() -> Self {
        Self::erased()
    }
}

/// 8-byte device secret
///
/// Zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 8]);

impl Secret {
    pub const LEN: usize = 8;

    /// All-zero secret used by ComputeFirstSecret
    pub const NULL: [u8; 8] = [0u8; 8];

    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn null() -> Self {
        Self(Self::NULL)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl Default for Secret {
    fn default() -> Self {
        Self::null()
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Secret::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for fixed-size byte arrays as hex strings
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; N];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Serde helper for variable-length byte vectors as hex strings
pub mod hex_vec {
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
    fn test_address_serial7() {
        let addr = TokenAddress::new([0x18, 1, 2, 3, 4, 5, 6, 0xAA]);
        assert_eq!(addr.family_code(), 0x18);
        assert_eq!(addr.serial7(), [0x18, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_hex_roundtrip() {
        let code = BindCode::new([1, 2, 3, 4, 5, 6, 7]);
        let parsed = BindCode::from_hex(&code.to_hex()).unwrap();
        assert_eq!(code, parsed);
        assert!(Challenge::from_hex("0102").is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new([0xAB; 8]);
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("ab"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_mac_ct_matches() {
        let a = Mac::new([7u8; 20]);
        let mut other = [7u8; 20];
        assert!(a.ct_matches(&Mac::new(other)));
        other[19] = 8;
        assert!(!a.ct_matches(&Mac::new(other)));
    }

    #[test]
    fn test_scratchpad_counter_fields() {
        let mut pad = Scratchpad::erased();
        pad.set_write_counter(Some(0x0102_0304));
        assert_eq!(&pad.0[8..12], &[4, 3, 2, 1]);
        pad.set_write_counter(None);
        assert_eq!(&pad.0[8..12], &[0xFF; 4]);
        pad.set_challenge(&Challenge::new([9, 8, 7]));
        assert_eq!(&pad.0[20..23], &[9, 8, 7]);
    }
}
