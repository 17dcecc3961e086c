//! Frame timing configuration

use std::time::Duration;

use crate::error::ConfigError;

/// Cache lifetimes and build pacing for the frame repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTiming {
    /// Absolute expiration of the cached i-frame.
    pub iframe_expiration: Duration,
    /// `max-age` advertised to clients for the i-frame.
    pub iframe_max_age: Duration,
    /// TTL of a freshly built p-frame.
    pub pframe_expiration: Duration,
    /// TTL of a p-frame that was quietly extended after revalidation.
    pub pframe_polling: Duration,
    /// Delay before a build competes for the revalidation gate.
    pub build_delay: Duration,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self {
            iframe_expiration: Duration::from_secs(3600), // 1 hour
            iframe_max_age: Duration::from_secs(3600),
            pframe_expiration: Duration::from_secs(60),
            pframe_polling: Duration::from_secs(20),
            build_delay: Duration::from_millis(5),
        }
    }
}

impl FrameTiming {
    /// Create timing with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the i-frame absolute expiration.
    pub fn with_iframe_expiration(mut self, duration: Duration) -> Self {
        self.iframe_expiration = duration;
        self
    }

    /// Set the i-frame client max-age.
    pub fn with_iframe_max_age(mut self, duration: Duration) -> Self {
        self.iframe_max_age = duration;
        self
    }

    /// Set the p-frame TTL after a build.
    pub fn with_pframe_expiration(mut self, duration: Duration) -> Self {
        self.pframe_expiration = duration;
        self
    }

    /// Set the p-frame TTL after a quiet extension.
    pub fn with_pframe_polling(mut self, duration: Duration) -> Self {
        self.pframe_polling = duration;
        self
    }

    /// Set the pre-gate build delay. Zero is allowed.
    pub fn with_build_delay(mut self, duration: Duration) -> Self {
        self.build_delay = duration;
        self
    }

    /// Reject zero lifetimes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lifetimes = [
            ("iframe_expiration", self.iframe_expiration),
            ("iframe_max_age", self.iframe_max_age),
            ("pframe_expiration", self.pframe_expiration),
            ("pframe_polling", self.pframe_polling),
        ];
        for (field, value) in lifetimes {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0s".to_string(),
                    reason: "must be > 0".to_string(),
                });
            }
        }
        Ok(())
    }
}
