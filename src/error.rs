// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! The structured error surface for agent operations. `UnknownAlias`,
//! `HandlerPanicked`, `DecodeFailed`, and `RequestTimeout` recover locally
//! and are logged, not fatal. `BindFailed`, `ConnectFailed`,
//! `NameCollision`, `RegistryUnavailable`, and `ShutdownInProgress`
//! surface synchronously to the operator.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("bind failed for {addr}: {source}")]
    BindFailed { addr: String, #[source] source: io::Error },

    #[error("connect failed for {addr}: {source}")]
    ConnectFailed { addr: String, #[source] source: io::Error },

    #[error("role mismatch: expected peer of {expected}, got {actual}")]
    RoleMismatch { expected: String, actual: String },

    #[error("unknown alias: {alias}")]
    UnknownAlias { alias: String },

    #[error("alias already in use: {alias}")]
    AliasInUse { alias: String },

    #[error("handler '{handler}' panicked: {message}")]
    HandlerPanicked { handler: String, message: String },

    #[error("failed to decode message on '{alias}': {source}")]
    DecodeFailed { alias: String, #[source] source: io::Error },

    #[error("did not receive req {request_id} within deadline")]
    RequestTimeout { request_id: String },

    #[error("name '{name}' is already registered")]
    NameCollision { name: String },

    #[error("name server registry unavailable: {message}")]
    RegistryUnavailable { message: String },

    #[error("agent is shutting down")]
    ShutdownInProgress,

    #[error("unauthorized control request")]
    Unauthorized,

    #[error("unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("'{alias}' binds a publish-family role with the unformatted codec, which forbids topic framing")]
    TopicFramingUnsupported { alias: String },

    /// An error a remote agent's control channel reported back to a
    /// `Proxy`, forwarded verbatim (it was already formatted by this same
    /// enum's `Display` on the agent side).
    #[error("remote agent error: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
