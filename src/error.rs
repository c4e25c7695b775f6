//! Error types for voxlink.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxlinkError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Resource errors
    #[error("Resource exhausted while allocating {what}: {message}")]
    ResourceExhausted { what: String, message: String },

    // Initialization errors (fatal, surfaced by `Pipeline::open`)
    #[error("Audio front-end initialization failed: {message}")]
    FrontEndInit { message: String },

    #[error("Decoder initialization failed: {message}")]
    DecoderInit { message: String },

    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    // Device errors
    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    // Remote chat channel errors
    #[error("Chat channel error: {message}")]
    Channel { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VoxlinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxlinkError::ConfigInvalidValue {
            key: "playback.volume".to_string(),
            message: "must be between 0 and 100".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for playback.volume: must be between 0 and 100"
        );
    }

    #[test]
    fn test_resource_exhausted_display() {
        let error = VoxlinkError::ResourceExhausted {
            what: "decode queue".to_string(),
            message: "capacity must be non-zero".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Resource exhausted while allocating decode queue: capacity must be non-zero"
        );
    }

    #[test]
    fn test_front_end_init_display() {
        let error = VoxlinkError::FrontEndInit {
            message: "channel roles 'XX' invalid".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio front-end initialization failed: channel roles 'XX' invalid"
        );
    }

    #[test]
    fn test_decoder_init_display() {
        let error = VoxlinkError::DecoderInit {
            message: "unsupported sample rate".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Decoder initialization failed: unsupported sample rate"
        );
    }

    #[test]
    fn test_audio_format_mismatch_display() {
        let error = VoxlinkError::AudioFormatMismatch {
            expected: "16000Hz/1ch/16bit".to_string(),
            actual: "24000Hz/1ch/16bit".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio format mismatch: expected 16000Hz/1ch/16bit, got 24000Hz/1ch/16bit"
        );
    }

    #[test]
    fn test_other_display() {
        let error = VoxlinkError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxlinkError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxlinkError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: VoxlinkError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxlinkError>();
        assert_sync::<VoxlinkError>();
    }
}
