use thiserror::Error;

/// Outcome of a failed token refresh.
///
/// `Clone` so every caller joined on the same in-flight refresh receives it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Token refresh failed (attempt {attempts}): {message}")]
    Failed { attempts: u32, message: String },

    #[error("Token refresh attempts exhausted after {attempts} tries")]
    Exhausted { attempts: u32 },
}

impl RefreshError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RefreshError::Exhausted { .. })
    }
}
