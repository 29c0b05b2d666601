// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! An agent's attribute map: user-settable named state, readable and
//! writable by the agent's own handlers and, via the control channel, by
//! the operator's `Proxy::get`/`Proxy::set`.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::{AgentError, AgentResult};

pub struct Attributes {
    values: HashMap<String, Vec<u8>>,
    codec: Codec,
}

impl Attributes {
    pub fn new(codec: Codec) -> Attributes {
        Attributes { values: HashMap::new(), codec }
    }

    pub fn set<T: Serialize>(&mut self, name: &str, value: &T) -> AgentResult<()> {
        let bytes = self
            .codec
            .encode(value)
            .map_err(|source| AgentError::DecodeFailed { alias: name.to_owned(), source })?;
        self.values.insert(name.to_owned(), bytes);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> AgentResult<T> {
        let bytes = self
            .values
            .get(name)
            .ok_or_else(|| AgentError::UnknownAlias { alias: name.to_owned() })?;
        self.codec
            .decode(bytes)
            .map_err(|source| AgentError::DecodeFailed { alias: name.to_owned(), source })
    }

    /// Raw form used by the control channel, which moves already-encoded
    /// bytes across the wire without knowing the attribute's Rust type.
    pub fn set_raw(&mut self, name: &str, bytes: Vec<u8>) {
        self.values.insert(name.to_owned(), bytes);
    }

    pub fn get_raw(&self, name: &str) -> AgentResult<&[u8]> {
        self.values
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| AgentError::UnknownAlias { alias: name.to_owned() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut attrs = Attributes::new(Codec::Json);
        attrs.set("count", &42u32).unwrap();

        let back: u32 = attrs.get("count").unwrap();
        assert_eq!(back, 42);
    }

    #[test]
    fn get_missing_is_unknown_alias() {
        let attrs = Attributes::new(Codec::Json);
        let err = attrs.get::<u32>("missing").unwrap_err();
        assert!(matches!(err, AgentError::UnknownAlias { .. }));
    }
}
