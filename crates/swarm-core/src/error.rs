use serde::Serialize;

/// Error kinds per the error-handling policy table: config validation fails
/// construction, transport/protocol errors are logged and the offending
/// frame or send is dropped, illegal transitions are fatal.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("transport init failed: {0}")]
    TransportInit(String),

    #[error("transport send failed: {0}")]
    TransportSend(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Serialize for SwarmError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = SwarmError::Config("buffer_size must be a power of two".to_string());
        assert_eq!(
            err.to_string(),
            "config error: buffer_size must be a power of two"
        );
    }

    #[test]
    fn illegal_transition_display() {
        let err = SwarmError::IllegalTransition("hatch received while RUNNING".to_string());
        assert!(err.to_string().contains("hatch received while RUNNING"));
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SwarmError = io_err.into();
        assert!(err.to_string().contains("IO error"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn serde_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: SwarmError = json_err.into();
        assert!(err.to_string().contains("serialization error"));
    }

    #[test]
    fn serialize_produces_string() {
        let err = SwarmError::Protocol("missing hatch_rate".to_string());
        let json = serde_json::to_string(&err).expect("serialize should succeed");
        assert_eq!(json, "\"protocol error: missing hatch_rate\"");
    }

    #[test]
    fn error_is_debug() {
        let err = SwarmError::Internal("unreachable".to_string());
        let debug = format!("{:?}", err);
        assert!(debug.contains("Internal"));
    }
}
