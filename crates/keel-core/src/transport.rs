//! Opaque submission seam to the metadata service.
//!
//! The engine never talks to the network itself. It hands a fully signed
//! request — verb, positional arguments, keyword arguments — to a
//! [`Transport`] and inspects the returned map for an `error` key. Retry,
//! backoff, and channel authentication all belong to the transport
//! implementation, not to this crate.

use serde_json::Value;

use crate::error::Error;

/// Result map returned by the metadata service.
pub type ResultMap = serde_json::Map<String, Value>;

/// Key carrying a remote error message in a [`ResultMap`].
pub const ERROR_KEY: &str = "error";

/// Opaque submission call to the metadata service.
pub trait Transport {
    /// Submits one operation and returns the service's result map.
    ///
    /// Implementations report transport-level failures through the `error`
    /// key of the returned map or their own error type folded into
    /// [`Error::Remote`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the call cannot be delivered.
    fn submit(&self, verb: &str, args: &[Value], kwargs: &ResultMap) -> Result<ResultMap, Error>;
}

/// Extracts the remote error from a result map, if any.
#[must_use]
pub fn remote_error(result: &ResultMap) -> Option<String> {
    result.get(ERROR_KEY).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
