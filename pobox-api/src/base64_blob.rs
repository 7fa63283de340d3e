//! [`serde`] helpers for byte buffers that cross the wire and the disk as
//! standard base64 strings.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Artifact(#[serde(with = "pobox_api::base64_blob")] Vec<u8>);
//! ```

use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serializer};

const ENGINE: base64::engine::GeneralPurpose =
    base64::engine::general_purpose::STANDARD;

/// Encode `bytes` to a base64 string.
pub fn encode(bytes: &[u8]) -> String {
    ENGINE.encode(bytes)
}

/// Decode a base64 string.
pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    ENGINE.decode(s)
}

pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    decode(&encoded).map_err(de::Error::custom)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob(#[serde(with = "super")] Vec<u8>);

    #[test]
    fn known_vector() {
        let json = serde_json::to_string(&Blob(b"%PDF-1.4\n".to_vec()))
            .unwrap();
        assert_eq!(json, "\"JVBERi0xLjQK\"");
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(serde_json::from_str::<Blob>("\"not!base64?\"").is_err());
    }

    proptest! {
        #[test]
        fn roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let blob = Blob(bytes);
            let json = serde_json::to_string(&blob).unwrap();
            let back: Blob = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, blob);
        }
    }
}
