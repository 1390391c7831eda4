use serde::{Deserialize, Serialize};

/// Provider-agnostic image payload: base64 JPEG plus its size after downscaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedImage {
    pub mime: String,
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }

    /// Text form for providers that cannot take image attachments.
    pub fn inline_text(&self) -> String {
        format!("\n\nImage (base64): {}", self.data_uri())
    }
}

/// Outcome of a visual check and what it was based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualEvidence {
    pub matched: bool,
    pub evidence: String,
}

/// Model reply for text/element checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualCheck {
    pub found: bool,
    #[serde(default)]
    pub evidence: String,
}
