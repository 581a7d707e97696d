use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::POSTCARD_TYPE;
use crate::error::{Result, WirecallError};

/// Marks a connection as a wirecall connection. A peer presenting anything
/// else in its handshake is not speaking this protocol and is disconnected
/// without a response.
pub const MAGIC_NUMBER: u32 = 0x57_43_01;

/// Default client-side connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Well-known path the registry answers on.
pub const REGISTRY_PATH: &str = "/wirecall/registry";

/// Registry response header carrying the comma-joined alive-address list.
pub const REGISTRY_SERVERS_HEADER: &str = "X-Wirecall-Servers";

/// Registry request header carrying the one address to register/refresh.
pub const REGISTRY_SERVER_HEADER: &str = "X-Wirecall-Server";

/// Connection handshake, sent once by the client before any request.
///
/// The handshake itself is always JSON-encoded so both ends can agree on the
/// body codec before using it; `codec_type` names the codec for every
/// header/body pair that follows. Timeouts are in milliseconds, 0 meaning
/// unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectOptions {
    pub magic: u32,
    pub codec_type: String,
    pub connect_timeout_ms: u64,
    pub handle_timeout_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            magic: MAGIC_NUMBER,
            codec_type: POSTCARD_TYPE.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handle_timeout_ms: 0,
        }
    }
}

impl ConnectOptions {
    pub fn with_codec(mut self, codec_type: impl Into<String>) -> Self {
        self.codec_type = codec_type.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Connect timeout as a duration, `None` meaning unlimited.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Handle timeout as a duration, `None` meaning unlimited.
    pub fn handle_timeout(&self) -> Option<Duration> {
        match self.handle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Per-message envelope. One header precedes exactly one body on the stream.
///
/// `seq` is chosen by the client and correlates a response to its request;
/// responses may arrive in any order. `error` is empty on requests and on
/// successful responses; the server fills it when the call fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    /// Dotted "Service.Method" name.
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

impl Header {
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Splits `service_method` on its last `.` into (service, method).
    pub fn split_service_method(&self) -> Result<(&str, &str)> {
        split_service_method(&self.service_method)
    }
}

/// Splits a dotted `Service.Method` name on its last `.`; everything before
/// the dot is the service name, the rest is the method.
pub fn split_service_method(service_method: &str) -> Result<(&str, &str)> {
    match service_method.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < service_method.len() => {
            Ok((&service_method[..dot], &service_method[dot + 1..]))
        }
        _ => Err(WirecallError::IllFormedServiceMethod(
            service_method.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.magic, MAGIC_NUMBER);
        assert_eq!(opts.codec_type, POSTCARD_TYPE);
        assert_eq!(opts.connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(opts.handle_timeout(), None);
    }

    #[test]
    fn test_options_json_round_trip() {
        let opts = ConnectOptions::default()
            .with_codec("application/json")
            .with_handle_timeout(Duration::from_secs(1));

        let encoded = serde_json::to_vec(&opts).unwrap();
        let decoded: ConnectOptions = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(opts, decoded);
        assert_eq!(decoded.handle_timeout_ms, 1000);
    }

    #[test]
    fn test_split_service_method() {
        let (service, method) = split_service_method("Arith.Sum").unwrap();
        assert_eq!(service, "Arith");
        assert_eq!(method, "Sum");

        // last dot wins for nested service names
        let (service, method) = split_service_method("app.Arith.Sum").unwrap();
        assert_eq!(service, "app.Arith");
        assert_eq!(method, "Sum");
    }

    #[test]
    fn test_split_service_method_ill_formed() {
        for sm in ["", "Arith", ".Sum", "Arith."] {
            assert!(matches!(
                split_service_method(sm),
                Err(WirecallError::IllFormedServiceMethod(_))
            ));
        }
    }

    #[test]
    fn test_header_request_has_empty_error() {
        let h = Header::request("Arith.Sum", 7);
        assert_eq!(h.seq, 7);
        assert!(h.error.is_empty());
    }
}
