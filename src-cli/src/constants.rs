//! Application-wide constants

/// Files read by the runner
pub mod paths {
    /// Configuration file looked up in the working directory
    pub const CONFIG_FILE: &str = "canvas-runner.json";
}

/// Environment variables that override configuration
pub mod env {
    /// Base URL of the generation service
    pub const SERVICE_URL: &str = "CANVAS_SERVICE_URL";
    /// API key for the generation service
    pub const API_KEY: &str = "CANVAS_API_KEY";
}
