//! Unified error classification and recovery.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Network,
    Timeout,
    Server,
    Protocol,
    Configuration,
    Serialization,
    State,
    Device,
    Unknown,
}

impl ErrorCategory {
    /// Whether errors in this category are worth retrying automatically.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }

    pub fn recovery_suggestion(self) -> RecoverySuggestion {
        match self {
            Self::Authentication => RecoverySuggestion::CheckCredentials,
            Self::Network | Self::Server => RecoverySuggestion::RetryWithBackoff,
            Self::Timeout => RecoverySuggestion::IncreaseTimeout,
            Self::Configuration => RecoverySuggestion::CheckConfiguration,
            Self::State => RecoverySuggestion::WaitForActiveSession,
            Self::Device => RecoverySuggestion::CheckAudioDevice,
            Self::Protocol | Self::Serialization | Self::Unknown => {
                RecoverySuggestion::ContactSupport
            }
        }
    }
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckCredentials,
    CheckConfiguration,
    IncreaseTimeout,
    WaitForActiveSession,
    CheckAudioDevice,
    ReconnectManually,
    ContactSupport,
}
