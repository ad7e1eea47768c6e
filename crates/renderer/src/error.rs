/// Errors from volume loading and projection rendering.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The render service returned a non-2xx status code.
    #[error("Render service error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unsupported volume: {0}")]
    UnsupportedVolume(String),

    /// The renderer produced a projection whose dimensions and pixel
    /// count disagree.
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    #[error("Render context already released")]
    Released,
}
