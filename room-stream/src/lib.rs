#![allow(clippy::doc_overindented_list_items)]

mod address;
mod error;
mod negotiator;
mod sandbox;
mod signature;
mod types;

pub mod catalog;
pub mod http;

#[cfg(test)]
mod testing;

pub use self::address::{RoomAddress, is_platform_url};
pub use self::catalog::{PREFERRED, Preferred};
pub use self::error::{ErrorKind, StreamError, StreamResult};
pub use self::http::{HttpClient, HttpResponse, HttpSettings, ReqwestClient};
pub use self::negotiator::{AUTH_FAILED_BODY, DEFAULT_PLAY_ENDPOINT, StreamNegotiator};
pub use self::sandbox::{
    DEFAULT_ENTRY, NATIVE_CODE_SENTINEL, SandboxLimits, ScriptSandbox, SigningFunction,
};
pub use self::signature::{DEFAULT_SCRIPT_ENDPOINT, SignatureCache};
pub use self::types::{DeviceId, ResolutionOptions, ResolvedStream, SignaturePayload, unix_timestamp};
