//! Error returned when a suppressed purchase action cannot be replayed

use thiserror::Error;

use crate::models::ControlId;

#[derive(Debug, Error)]
pub enum ResumeError {
    /// The control left the page and there is no form or link to fall back on.
    #[error("control {control} is no longer on the page and has no form or link target")]
    ControlGone { control: ControlId },

    /// Every applicable strategy was tried and failed.
    #[error("could not resume action for control {control}: {reasons}")]
    Exhausted { control: ControlId, reasons: String },
}

impl ResumeError {
    pub fn control(&self) -> &ControlId {
        match self {
            Self::ControlGone { control } | Self::Exhausted { control, .. } => control,
        }
    }
}
