//! Document text encoding.

use crate::Result;

/// Turns JSON documents into column text and back.
pub trait Serializer: Send + Sync {
    fn serialize(&self, document: &serde_json::Value) -> Result<String>;

    fn deserialize(&self, text: &str) -> Result<serde_json::Value>;
}

/// Plain `serde_json` encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indent stored documents. Useful when inspecting tables by hand.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, document: &serde_json::Value) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(document)?
        } else {
            serde_json::to_string(document)?
        };
        Ok(text)
    }

    fn deserialize(&self, text: &str) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(text)?)
    }
}
