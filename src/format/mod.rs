//! Payload format collaborators.
//!
//! A connection negotiates one named format at handshake time. The proxy only
//! uses the name for lookup and the codec for opaque byte passthrough; value
//! contents are never interpreted above this seam.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unknown payload format `{0}`")]
    Unknown(String),
    #[error("payload rejected by format `{format}`: {detail}")]
    Invalid { format: &'static str, detail: String },
}

/// Named codec for opaque payload bytes.
pub trait PayloadFormat: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, value: &[u8]) -> Result<Bytes, FormatError>;
    fn decode(&self, raw: &[u8]) -> Result<Bytes, FormatError>;
}

/// Bytes in, bytes out.
pub struct PassthroughFormat;

impl PayloadFormat for PassthroughFormat {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn encode(&self, value: &[u8]) -> Result<Bytes, FormatError> {
        Ok(Bytes::copy_from_slice(value))
    }

    fn decode(&self, raw: &[u8]) -> Result<Bytes, FormatError> {
        Ok(Bytes::copy_from_slice(raw))
    }
}

/// Passthrough that insists payloads are well-formed JSON documents.
pub struct JsonFormat;

impl JsonFormat {
    fn check(&self, bytes: &[u8]) -> Result<(), FormatError> {
        serde_json::from_slice::<serde_json::Value>(bytes).map_err(|err| FormatError::Invalid {
            format: self.name(),
            detail: err.to_string(),
        })?;
        Ok(())
    }
}

impl PayloadFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &[u8]) -> Result<Bytes, FormatError> {
        self.check(value)?;
        Ok(Bytes::copy_from_slice(value))
    }

    fn decode(&self, raw: &[u8]) -> Result<Bytes, FormatError> {
        self.check(raw)?;
        Ok(Bytes::copy_from_slice(raw))
    }
}

/// Name-to-codec table consulted once per connection at handshake.
pub struct FormatRegistry {
    formats: HashMap<&'static str, Arc<dyn PayloadFormat>>,
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            formats: HashMap::new(),
        }
    }

    pub fn register(&mut self, format: Arc<dyn PayloadFormat>) {
        self.formats.insert(format.name(), format);
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn PayloadFormat>, FormatError> {
        self.formats
            .get(name)
            .cloned()
            .ok_or_else(|| FormatError::Unknown(name.to_string()))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PassthroughFormat));
        registry.register(Arc::new(JsonFormat));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_formats() {
        let registry = FormatRegistry::default();
        assert_eq!(registry.lookup("passthrough").unwrap().name(), "passthrough");
        assert_eq!(registry.lookup("json").unwrap().name(), "json");
        assert!(matches!(
            registry.lookup("pof"),
            Err(FormatError::Unknown(_))
        ));
    }

    #[test]
    fn json_format_rejects_malformed_documents() {
        let json = JsonFormat;
        assert!(json.decode(br#"{"a":1}"#).is_ok());
        assert!(json.decode(b"not-json").is_err());
    }
}
