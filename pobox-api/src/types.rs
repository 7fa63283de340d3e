use std::{convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A purchase-order number, the identity under which an invoice travels
/// through the whole pipeline.
///
/// Opaque: the backend never interprets the contents, and comparisons are
/// case-sensitive. Most PNs are decimal strings ("1030") because that is
/// what the upstream order service issues, but nothing here assumes it.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoNumber(String);

/// A player identifier, the key under which a WebSocket session is indexed.
///
/// Supplied by the client in its `register` frame and treated as opaque;
/// whether a game front end uses emails, display names, or random tokens is
/// its own business.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

macro_rules! opaque_string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_string_id!(PoNumber);
opaque_string_id!(PlayerId);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_case_sensitive() {
        assert_ne!(PoNumber::from("AB-1"), PoNumber::from("ab-1"));
        assert_ne!(PlayerId::from("Alice"), PlayerId::from("alice"));
    }

    #[test]
    fn serde_is_transparent() {
        let pn = PoNumber::from("1030");
        assert_eq!(serde_json::to_string(&pn).unwrap(), "\"1030\"");
        let back: PoNumber = serde_json::from_str("\"1030\"").unwrap();
        assert_eq!(back, pn);
    }
}
