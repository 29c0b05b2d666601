// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Per-socket payload codecs. `pickle` is the default inter-agent codec
//! (rendered here with `bincode`, OQ-3 in DESIGN.md); `json` uses
//! `serde_json`; `raw` and `unformatted` pass bytes through, with
//! `unformatted` additionally forbidding topic framing.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::global::{invalid_data_io_error, invalid_input_io_error};

/// Codec identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    /// Binary, via `bincode`. Default for inter-agent sockets.
    Pickle,
    /// Textual JSON-like, via `serde_json`.
    Json,
    /// Raw bytes, passed through unchanged.
    Raw,
    /// Raw bytes, and forbids topic framing.
    Unformatted,
}

impl Codec {
    /// Whether this codec permits a publish topic prefix to be attached.
    pub fn allows_topic_framing(&self) -> bool {
        !matches!(self, Codec::Unformatted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Pickle => "pickle",
            Codec::Json => "json",
            Codec::Raw => "raw",
            Codec::Unformatted => "unformatted",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> std::io::Result<Vec<u8>> {
        match self {
            Codec::Pickle => {
                bincode::serialize(value).map_err(|e| invalid_data_io_error_dyn(e))
            }
            Codec::Json => {
                serde_json::to_vec(value).map_err(|e| invalid_data_io_error_dyn(e))
            }
            Codec::Raw | Codec::Unformatted => {
                Err(invalid_data_io_error(
                    "raw/unformatted codecs require encode_bytes, not encode",
                ))
            }
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> std::io::Result<T> {
        match self {
            Codec::Pickle => {
                bincode::deserialize(bytes).map_err(|e| invalid_data_io_error_dyn(e))
            }
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| invalid_data_io_error_dyn(e))
            }
            Codec::Raw | Codec::Unformatted => Err(invalid_data_io_error(
                "raw/unformatted codecs require decode_bytes, not decode",
            )),
        }
    }

    /// Pass-through encode for `raw`/`unformatted` sockets.
    pub fn encode_bytes(&self, value: Vec<u8>) -> Vec<u8> {
        value
    }

    /// Pass-through decode for `raw`/`unformatted` sockets.
    pub fn decode_bytes(&self, bytes: Vec<u8>) -> Vec<u8> {
        bytes
    }
}

fn invalid_data_io_error_dyn(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

impl std::str::FromStr for Codec {
    type Err = std::io::Error;

    fn from_str(s: &str) -> std::io::Result<Codec> {
        match s {
            "pickle" => Ok(Codec::Pickle),
            "json" => Ok(Codec::Json),
            "raw" => Ok(Codec::Raw),
            "unformatted" => Ok(Codec::Unformatted),
            _ => Err(invalid_input_io_error("unknown codec")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Payload {
        n: u32,
        label: String,
    }

    #[test]
    fn pickle_roundtrips() {
        let p = Payload { n: 7, label: "seven".into() };
        let bytes = Codec::Pickle.encode(&p).unwrap();
        let back: Payload = Codec::Pickle.decode(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn json_roundtrips() {
        let p = Payload { n: 7, label: "seven".into() };
        let bytes = Codec::Json.encode(&p).unwrap();
        let back: Payload = Codec::Json.decode(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn unformatted_forbids_topic_framing() {
        assert!(!Codec::Unformatted.allows_topic_framing());
        assert!(Codec::Raw.allows_topic_framing());
    }

    #[test]
    fn as_str_roundtrips_through_from_str() {
        for codec in [Codec::Pickle, Codec::Json, Codec::Raw, Codec::Unformatted] {
            let parsed: Codec = codec.as_str().parse().unwrap();
            assert_eq!(parsed, codec);
        }
    }

    #[test]
    fn from_str_rejects_unknown_codec() {
        assert!("rot13".parse::<Codec>().is_err());
    }
}
