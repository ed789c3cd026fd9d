//! Codec settings.

use serde::{Deserialize, Serialize};

/// Settings shared by every session created from one [`Codec`](crate::Codec).
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use weft_codec::CodecConfig;
///
/// let config: CodecConfig = serde_json::from_str(r#"{ "max_depth": 8 }"#).unwrap();
/// assert_eq!(config.max_depth, 8);
/// assert!(!config.debug_mode);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Object nesting depth after which deferrable objects are written later
    /// from an explicit stack instead of recursively.
    pub max_depth: u32,
    /// Interleave sentinels and writer locations in the stream.
    ///
    /// Only the writer's setting matters: it is recorded in the stream header.
    pub debug_mode: bool,
    /// Largest length-prefixed payload (string or byte block), in bytes.
    pub max_payload: usize,
}

impl CodecConfig {
    pub const DEFAULT_MAX_DEPTH: u32 = 128;
    pub const DEFAULT_MAX_PAYLOAD: usize = 1 << 30;
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
            debug_mode: false,
            max_payload: Self::DEFAULT_MAX_PAYLOAD,
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::CodecConfig;

    #[test]
    fn ron_with_defaults() {
        let config: CodecConfig = ron::from_str("(debug_mode: true)").unwrap();
        assert!(config.debug_mode);
        assert_eq!(config.max_depth, CodecConfig::DEFAULT_MAX_DEPTH);
        assert_eq!(config.max_payload, CodecConfig::DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn json_round_trip() {
        let config = CodecConfig {
            max_depth: 0,
            debug_mode: true,
            max_payload: 64,
        };
        let text = serde_json::to_string(&config).unwrap();
        let back: CodecConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
