//! Replays a suppressed purchase action once the user chose to proceed.
//!
//! Strategies, in order: submit the enclosing form, synthesize a click on the
//! original control, navigate to the link target. A synthetic click re-enters
//! the interceptor like any other click; it passes through because the gate is
//! already `PROCEEDED` by the time the dispatcher runs. Failures are reported
//! once and never retried.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::ResumeError;
use crate::models::PendingAction;
use crate::traits::PageDriver;

#[derive(Clone)]
pub struct ResumeDispatcher {
    page: Arc<dyn PageDriver>,
}

impl ResumeDispatcher {
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self { page }
    }

    pub fn resume(&self, action: &PendingAction) -> Result<(), ResumeError> {
        let mut failures = Vec::new();

        if let Some(form) = &action.form {
            match self.page.submit_form(form) {
                Ok(()) => {
                    info!("Resumed {} by submitting {}", action.control_id, form.selector);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Form submit failed for {}: {}", action.control_id, e);
                    failures.push(format!("form submit: {e}"));
                }
            }
        }

        match self.page.click(&action.control_id, &action.selector) {
            Ok(()) => {
                info!("Resumed {} with a synthetic click", action.control_id);
                return Ok(());
            }
            Err(e) => {
                debug!("Synthetic click failed for {}: {}", action.control_id, e);
                failures.push(format!("click: {e}"));
            }
        }

        if let Some(href) = &action.href {
            match self.page.navigate(href) {
                Ok(()) => {
                    info!("Resumed {} by navigating to {}", action.control_id, href);
                    return Ok(());
                }
                Err(e) => failures.push(format!("navigate: {e}")),
            }
        }

        let err = if action.form.is_none() && action.href.is_none() {
            ResumeError::ControlGone {
                control: action.control_id.clone(),
            }
        } else {
            ResumeError::Exhausted {
                control: action.control_id.clone(),
                reasons: failures.join("; "),
            }
        };

        error!("Purchase action not resumed: {}", err);
        Err(err)
    }
}
