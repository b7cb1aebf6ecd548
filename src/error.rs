//! Central error handling for the gravlens renderer
//!
//! Provides a unified RenderError enum with consistent categorization.
//! Silent ray termination (march bound exceeded) and a missing potential
//! field are deliberately not errors; see the tracer module.

/// Centralized error type for all renderer operations
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Shader compile error: {0}")]
    Compile(String),

    #[error("Render target error: {0}")]
    Target(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Convenience constructors for common error types
    pub fn compile<T: ToString>(msg: T) -> Self {
        RenderError::Compile(msg.to_string())
    }

    pub fn target<T: ToString>(msg: T) -> Self {
        RenderError::Target(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        RenderError::Readback(msg.to_string())
    }
}

/// Result type alias for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;
