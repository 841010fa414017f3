//! Private state threaded between plan and apply.
//!
//! The envelope is a JSON object mapping each key to the base64 encoding of
//! its raw bytes. Keys beginning with `.` belong to the framework; every other
//! key belongs to the provider and is reachable through [`ProviderData`].

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

use crate::diag::{Diagnostic, Diagnostics};

/// Prefix reserved for framework-owned keys.
pub const FRAMEWORK_KEY_PREFIX: &str = ".";

const DEFECT_NOTICE: &str =
    "This is always a problem with Hemmer or the Hemmer plugin framework. Please report this to the provider developer.";

/// Private state of a single resource instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrivateState {
    /// Framework-owned entries, keyed with a leading `.`.
    pub framework: BTreeMap<String, Vec<u8>>,
    /// Provider-owned entries.
    pub provider: ProviderData,
}

impl PrivateState {
    /// Create an empty private state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether neither namespace holds any entry.
    pub fn is_empty(&self) -> bool {
        self.framework.is_empty() && self.provider.is_empty()
    }

    /// Decode the JSON envelope.
    ///
    /// Empty input yields an empty instance. Envelopes written by the legacy
    /// SDK, whose values are not base64, are ignored.
    pub fn from_bytes(bytes: &[u8]) -> (Self, Diagnostics) {
        let mut diags = Diagnostics::new();

        if bytes.is_empty() {
            return (Self::new(), diags);
        }

        let envelope: BTreeMap<String, serde_json::Value> = match serde_json::from_slice(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                diags.add_error(
                    "Error Decoding Private State",
                    format!(
                        "An error was encountered when decoding private state: {}.\n\n{}",
                        e, DEFECT_NOTICE
                    ),
                );
                return (Self::new(), diags);
            },
        };

        let mut decoded = BTreeMap::new();
        for (key, value) in envelope {
            let raw = value.as_str().and_then(|s| STANDARD.decode(s).ok());
            match raw {
                Some(raw) => {
                    decoded.insert(key, raw);
                },
                None => {
                    debug!(key = %key, "ignoring private state not written by this framework");
                    return (Self::new(), diags);
                },
            }
        }

        let mut state = Self::new();
        for (key, raw) in decoded {
            if let Err(problem) = check_value(&raw) {
                diags.add_error(
                    "Error Decoding Private State",
                    format!(
                        "An error was encountered when validating private state value.\n\
                         The value being supplied for key {:?} is not valid {}.\n\n{}",
                        key, problem, DEFECT_NOTICE
                    ),
                );
                return (Self::new(), diags);
            }

            if key.starts_with(FRAMEWORK_KEY_PREFIX) {
                state.framework.insert(key, raw);
            } else {
                state.provider.data.insert(key, raw);
            }
        }

        (state, diags)
    }

    /// Encode into the JSON envelope.
    ///
    /// An empty state encodes to no bytes at all. Entries with empty values
    /// are skipped.
    pub fn to_bytes(&self) -> (Vec<u8>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut envelope = serde_json::Map::new();

        for (key, value) in self.framework.iter().chain(self.provider.data.iter()) {
            if value.is_empty() {
                continue;
            }

            if let Err(problem) = check_value(value) {
                diags.add_error(
                    "Error Encoding Private State",
                    format!(
                        "An error was encountered when validating private state value. \
                         The value associated with key {:?} is not valid {}.\n\n{}",
                        key, problem, DEFECT_NOTICE
                    ),
                );
                return (Vec::new(), diags);
            }

            envelope.insert(key.clone(), serde_json::Value::String(STANDARD.encode(value)));
        }

        if envelope.is_empty() {
            return (Vec::new(), diags);
        }

        match serde_json::to_vec(&envelope) {
            Ok(bytes) => (bytes, diags),
            Err(e) => {
                diags.add_error(
                    "Error Encoding Private State",
                    format!(
                        "An error was encountered when encoding private state: {}.\n\n{}",
                        e, DEFECT_NOTICE
                    ),
                );
                (Vec::new(), diags)
            },
        }
    }
}

/// The provider-owned namespace of private state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderData {
    data: BTreeMap<String, Vec<u8>>,
}

impl ProviderData {
    /// Create an empty provider namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read the value stored under `key`; empty when absent.
    pub fn get_key(&self, key: &str) -> (Vec<u8>, Diagnostics) {
        let diags = validate_provider_key(key);
        if diags.has_error() {
            return (Vec::new(), diags);
        }

        (self.data.get(key).cloned().unwrap_or_default(), diags)
    }

    /// Store `value` under `key`. An empty value removes the key.
    pub fn set_key(&mut self, key: &str, value: &[u8]) -> Diagnostics {
        let mut diags = validate_provider_key(key);
        if diags.has_error() {
            return diags;
        }

        if value.is_empty() {
            self.data.remove(key);
            return diags;
        }

        match check_value(value) {
            Err(ValueProblem::Utf8) => diags.add_error(
                "UTF-8 Invalid",
                format!(
                    "Values stored in private state must be valid UTF-8.\n\n\
                     The value being supplied for key {:?} is invalid. Please verify that the value is valid UTF-8.",
                    key
                ),
            ),
            Err(ValueProblem::Json) => diags.add_error(
                "JSON Invalid",
                format!(
                    "Values stored in private state must be valid JSON.\n\n\
                     The value being supplied for key {:?} is invalid. Please verify that the value is valid JSON.",
                    key
                ),
            ),
            Ok(()) => {
                self.data.insert(key.to_string(), value.to_vec());
            },
        }

        diags
    }
}

/// Reject keys in the framework-reserved namespace.
pub fn validate_provider_key(key: &str) -> Diagnostics {
    let mut diags = Diagnostics::new();
    if key.starts_with(FRAMEWORK_KEY_PREFIX) {
        diags.push(
            Diagnostic::error("Restricted Resource Private State Namespace").with_detail(format!(
                "Using a period ('.') as a prefix for a key used in private state is not allowed.\n\n\
                 The key {:?} is invalid. Please check the key you are supplying does not use a period ('.') as a prefix.",
                key
            )),
        );
    }
    diags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueProblem {
    Utf8,
    Json,
}

impl std::fmt::Display for ValueProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueProblem::Utf8 => f.write_str("UTF-8"),
            ValueProblem::Json => f.write_str("JSON"),
        }
    }
}

fn check_value(value: &[u8]) -> Result<(), ValueProblem> {
    if std::str::from_utf8(value).is_err() {
        return Err(ValueProblem::Utf8);
    }
    if serde_json::from_slice::<serde::de::IgnoredAny>(value).is_err() {
        return Err(ValueProblem::Json);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVALID_UTF8: &[u8] = b"{\"key\": \"\xff\xfe\"}";

    fn envelope(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(STANDARD.encode(v))))
            .collect();
        serde_json::to_vec(&map).unwrap()
    }

    #[test]
    fn test_from_bytes_empty() {
        let (state, diags) = PrivateState::from_bytes(&[]);
        assert!(state.is_empty());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_from_bytes_invalid_json() {
        let (state, diags) = PrivateState::from_bytes(b"{");
        assert!(state.is_empty());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.iter().next().unwrap().summary, "Error Decoding Private State");
    }

    #[test]
    fn test_from_bytes_splits_namespaces() {
        let bytes = envelope(&[
            (".frameworkKey", br#"{"fw": 1}"#),
            ("providerKey", br#"{"p": 2}"#),
        ]);
        let (state, diags) = PrivateState::from_bytes(&bytes);

        assert!(diags.is_empty());
        assert_eq!(state.framework.get(".frameworkKey").unwrap(), br#"{"fw": 1}"#);
        let (value, diags) = state.provider.get_key("providerKey");
        assert!(diags.is_empty());
        assert_eq!(value, br#"{"p": 2}"#.to_vec());
    }

    #[test]
    fn test_from_bytes_ignores_legacy_sdk_data() {
        let bytes = serde_json::to_vec(&serde_json::json!({"schema_version": "2"})).unwrap();
        let (state, diags) = PrivateState::from_bytes(&bytes);
        assert!(state.is_empty());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_from_bytes_rejects_invalid_values() {
        let bytes = envelope(&[("providerKey", INVALID_UTF8)]);
        let (_, diags) = PrivateState::from_bytes(&bytes);
        let detail = diags.iter().next().unwrap().detail.clone().unwrap();
        assert!(detail.contains("\"providerKey\" is not valid UTF-8"));

        let bytes = envelope(&[(".fw", b"{")]);
        let (_, diags) = PrivateState::from_bytes(&bytes);
        let detail = diags.iter().next().unwrap().detail.clone().unwrap();
        assert!(detail.contains("\".fw\" is not valid JSON"));
    }

    #[test]
    fn test_to_bytes() {
        let (bytes, diags) = PrivateState::new().to_bytes();
        assert!(bytes.is_empty());
        assert!(diags.is_empty());

        let mut state = PrivateState::new();
        state
            .framework
            .insert(".frameworkKeyOne".to_string(), br#"{"fwKeyOne": {"k0": "zero", "k1": 1}}"#.to_vec());
        state.framework.insert(".frameworkKeyTwo".to_string(), Vec::new());
        assert!(state
            .provider
            .set_key("providerKeyOne", br#"{"pKeyOne": {"k0": "zero", "k1": 1}}"#)
            .is_empty());

        let (bytes, diags) = state.to_bytes();
        assert!(diags.is_empty());
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            concat!(
                r#"{".frameworkKeyOne":"eyJmd0tleU9uZSI6IHsiazAiOiAiemVybyIsICJrMSI6IDF9fQ==","#,
                r#""providerKeyOne":"eyJwS2V5T25lIjogeyJrMCI6ICJ6ZXJvIiwgImsxIjogMX19"}"#
            )
        );

        let (decoded, diags) = PrivateState::from_bytes(&bytes);
        assert!(diags.is_empty());
        assert_eq!(decoded.provider, state.provider);
    }

    #[test]
    fn test_to_bytes_rejects_invalid_framework_value() {
        let mut state = PrivateState::new();
        state.framework.insert(".frameworkKeyOne".to_string(), b"}".to_vec());

        let (bytes, diags) = state.to_bytes();
        assert!(bytes.is_empty());
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.summary, "Error Encoding Private State");
        assert!(diag.detail.as_ref().unwrap().contains("not valid JSON"));
    }

    #[test]
    fn test_set_key() {
        let mut data = ProviderData::new();

        let diags = data.set_key(".key", b"{}");
        assert_eq!(
            diags.iter().next().unwrap().summary,
            "Restricted Resource Private State Namespace"
        );

        let diags = data.set_key("key", INVALID_UTF8);
        assert_eq!(diags.iter().next().unwrap().summary, "UTF-8 Invalid");

        let diags = data.set_key("key", b"{");
        assert_eq!(diags.iter().next().unwrap().summary, "JSON Invalid");
        assert!(data.is_empty());

        assert!(data.set_key("key", br#"{"foo": "bar"}"#).is_empty());
        assert_eq!(data.get_key("key").0, br#"{"foo": "bar"}"#.to_vec());

        assert!(data.set_key("key", b"").is_empty());
        assert!(data.is_empty());
    }

    #[test]
    fn test_get_key() {
        let data = ProviderData::new();
        let (value, diags) = data.get_key("missing");
        assert!(value.is_empty());
        assert!(diags.is_empty());

        let (_, diags) = data.get_key(".restricted");
        assert!(diags.has_error());
    }
}
