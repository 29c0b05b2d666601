// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Process-wide, immutable-after-startup configuration. Constructed once
//! by the operator and handed by value to every spawned agent thread.

use std::env;
use std::time::Duration;

use crate::codec::Codec;

const SHARED_SECRET_VAR: &str = "SWARMRT_SHARED_SECRET";
const IDLE_SLICE_MS_VAR: &str = "SWARMRT_IDLE_SLICE_MS";

/// Default idle poll slice bound.
const DEFAULT_IDLE_SLICE_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret compared constant-time against every control request's
    /// auth token, when present.
    shared_secret: Option<Vec<u8>>,
    /// Upper bound on how long the event loop's poll call may block when no
    /// timer is sooner.
    idle_slice: Duration,
    /// Default codec used when a `bind`/`connect` control verb omits one.
    default_codec: Codec,
}

impl Config {
    pub fn new() -> Config {
        Config {
            shared_secret: None,
            idle_slice: Duration::from_millis(DEFAULT_IDLE_SLICE_MS),
            default_codec: Codec::Pickle,
        }
    }

    /// Reads `SWARMRT_SHARED_SECRET` and `SWARMRT_IDLE_SLICE_MS` from the
    /// environment.
    pub fn from_env() -> Config {
        let mut config = Config::new();

        if let Ok(secret) = env::var(SHARED_SECRET_VAR) {
            config.shared_secret = Some(secret.into_bytes());
        }

        if let Ok(ms) = env::var(IDLE_SLICE_MS_VAR) {
            if let Ok(ms) = ms.parse::<u64>() {
                config.idle_slice = Duration::from_millis(ms);
            }
        }

        config
    }

    pub fn with_shared_secret(mut self, secret: impl Into<Vec<u8>>) -> Config {
        self.shared_secret = Some(secret.into());
        self
    }

    pub fn with_idle_slice(mut self, slice: Duration) -> Config {
        self.idle_slice = slice;
        self
    }

    pub fn with_default_codec(mut self, codec: Codec) -> Config {
        self.default_codec = codec;
        self
    }

    pub fn shared_secret(&self) -> Option<&[u8]> {
        self.shared_secret.as_deref()
    }

    pub fn idle_slice(&self) -> Duration {
        self.idle_slice
    }

    pub fn default_codec(&self) -> Codec {
        self.default_codec
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_secret_and_50ms_slice() {
        let config = Config::new();
        assert!(config.shared_secret().is_none());
        assert_eq!(config.idle_slice(), Duration::from_millis(50));
    }

    #[test]
    fn builder_overrides_stick() {
        let config = Config::new()
            .with_shared_secret("s3cr3t")
            .with_idle_slice(Duration::from_millis(10));

        assert_eq!(config.shared_secret(), Some(b"s3cr3t".as_ref()));
        assert_eq!(config.idle_slice(), Duration::from_millis(10));
    }
}
