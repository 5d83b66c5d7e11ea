//! Configuration linting for operational pitfalls
//!
//! Checks configuration for settings that are valid but likely to cause
//! trouble in production.

use super::{ValidationResult, ValidationWarning};
use crate::{Config, LETS_ENCRYPT_STAGING};
use certward_common::VerificationStatus;

/// Lint configuration for operational pitfalls
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.acme.email.is_none() {
        result.add_warning(ValidationWarning::new(
            "No ACME contact email configured (a new account cannot be created)",
        ));
    }

    if config.acme.directory_url() == LETS_ENCRYPT_STAGING {
        result.add_warning(ValidationWarning::new(
            "Using the Let's Encrypt staging directory (certificates will not be trusted)",
        ));
    }

    // Renewal window must reach past the freshness threshold, otherwise
    // certificates between the two are never picked up by either path
    if config.renewal.days_before_expiry <= config.batch.fresh_threshold_days {
        result.add_warning(ValidationWarning::new(format!(
            "Renewal window ({} days) is not larger than the batch freshness threshold ({} days)",
            config.renewal.days_before_expiry, config.batch.fresh_threshold_days
        )));
    }

    let attempt_budget = config.renewal.item_timeout_secs;
    if config.acme.validation_timeout_secs >= attempt_budget {
        result.add_warning(ValidationWarning::new(format!(
            "ACME validation timeout ({}s) is not shorter than the renewal item timeout ({}s)",
            config.acme.validation_timeout_secs, attempt_budget
        )));
    }

    if !config.renewal.enabled {
        result.add_warning(ValidationWarning::new(
            "Renewal scheduler is disabled (certificates will expire unless renewed manually)",
        ));
    }

    if config.challenge.listen.ends_with(":80") && config.challenge.webroot.is_some() {
        result.add_warning(ValidationWarning::new(
            "Challenge listener on port 80 and a webroot are both configured (only one is usually reachable)",
        ));
    }

    for domain in &config.domains {
        if domain.status != VerificationStatus::Verified {
            result.add_warning(ValidationWarning::new(format!(
                "Domain '{}' ({}) is {} and will be rejected by batch activation",
                domain.id, domain.name, domain.status
            )));
        }
    }

    result
}
