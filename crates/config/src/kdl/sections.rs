//! Per-block KDL parsing.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use ::kdl::KdlNode;
use tracing::trace;

use certward_common::VerificationStatus;

use super::helpers::{
    get_bool_entry, get_first_arg_string, get_prop_string, get_string_entry, get_uint_entry,
};
use crate::{
    default_batch_timeout_ms, default_challenge_listen, default_chunk_pause_ms,
    default_days_before_expiry, default_fallback_validity_days, default_fresh_threshold_days,
    default_host_prefix, default_item_pause_ms, default_item_timeout_secs,
    default_job_retention_secs, default_max_attempts, default_max_concurrent,
    default_max_renewals_per_run, default_retry_backoff_secs, default_storage_path,
    default_validation_timeout, AcmeConfig, BatchConfig, ChallengeConfig, DailyTime,
    DomainEntry, FallbackConfig, RenewalConfig, StorageConfig,
};

/// Parse the `acme` block
pub fn parse_acme(node: &KdlNode) -> Result<AcmeConfig> {
    let config = AcmeConfig {
        email: get_string_entry(node, "email")?,
        directory: get_string_entry(node, "directory")?,
        staging: get_bool_entry(node, "staging")?.unwrap_or(false),
        validation_timeout_secs: get_uint_entry(node, "validation-timeout-secs")?
            .unwrap_or_else(default_validation_timeout),
        host_prefix: match get_string_entry(node, "host-prefix")? {
            Some(prefix) if prefix.is_empty() => None,
            Some(prefix) => Some(prefix),
            None => Some(default_host_prefix()),
        },
    };

    trace!(
        staging = config.staging,
        has_email = config.email.is_some(),
        "Parsed acme configuration"
    );
    Ok(config)
}

/// Parse the `storage` block
pub fn parse_storage(node: &KdlNode) -> Result<StorageConfig> {
    Ok(StorageConfig {
        path: get_string_entry(node, "path")?
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_path),
    })
}

/// Parse the `challenge` block
pub fn parse_challenge(node: &KdlNode) -> Result<ChallengeConfig> {
    Ok(ChallengeConfig {
        listen: get_string_entry(node, "listen")?.unwrap_or_else(default_challenge_listen),
        webroot: get_string_entry(node, "webroot")?.map(PathBuf::from),
    })
}

/// Parse the `batch` block
pub fn parse_batch(node: &KdlNode) -> Result<BatchConfig> {
    let config = BatchConfig {
        timeout_ms: get_uint_entry(node, "timeout-ms")?.unwrap_or_else(default_batch_timeout_ms),
        max_concurrent: get_uint_entry(node, "max-concurrent")?
            .unwrap_or_else(default_max_concurrent),
        fallback_to_self_signed: get_bool_entry(node, "fallback-to-self-signed")?.unwrap_or(true),
        chunk_pause_ms: get_uint_entry(node, "chunk-pause-ms")?
            .unwrap_or_else(default_chunk_pause_ms),
        fresh_threshold_days: get_uint_entry(node, "fresh-threshold-days")?
            .unwrap_or_else(default_fresh_threshold_days),
        job_retention_secs: get_uint_entry(node, "job-retention-secs")?
            .unwrap_or_else(default_job_retention_secs),
    };

    trace!(
        timeout_ms = config.timeout_ms,
        max_concurrent = config.max_concurrent,
        "Parsed batch configuration"
    );
    Ok(config)
}

/// Parse the `renewal` block
pub fn parse_renewal(node: &KdlNode) -> Result<RenewalConfig> {
    let schedule = match get_string_entry(node, "schedule")? {
        Some(raw) => raw
            .parse::<DailyTime>()
            .map_err(|e| anyhow!("invalid renewal schedule '{raw}': {}", e.code))?,
        None => DailyTime::default(),
    };

    Ok(RenewalConfig {
        enabled: get_bool_entry(node, "enabled")?.unwrap_or(true),
        schedule,
        days_before_expiry: get_uint_entry(node, "days-before-expiry")?
            .unwrap_or_else(default_days_before_expiry),
        max_renewals_per_run: get_uint_entry(node, "max-renewals-per-run")?
            .unwrap_or_else(default_max_renewals_per_run),
        item_timeout_secs: get_uint_entry(node, "item-timeout-secs")?
            .unwrap_or_else(default_item_timeout_secs),
        item_pause_ms: get_uint_entry(node, "item-pause-ms")?
            .unwrap_or_else(default_item_pause_ms),
        max_attempts: get_uint_entry(node, "max-attempts")?.unwrap_or_else(default_max_attempts),
        retry_backoff_secs: get_uint_entry(node, "retry-backoff-secs")?
            .unwrap_or_else(default_retry_backoff_secs),
        fallback_to_self_signed: get_bool_entry(node, "fallback-to-self-signed")?
            .unwrap_or(false),
    })
}

/// Parse the `fallback` block
pub fn parse_fallback(node: &KdlNode) -> Result<FallbackConfig> {
    Ok(FallbackConfig {
        validity_days: get_uint_entry(node, "validity-days")?
            .unwrap_or_else(default_fallback_validity_days),
    })
}

/// Parse the `domains` block
///
/// ```kdl
/// domains {
///     domain "dom-1" name="shop.example.com" status="verified" store="store-1"
/// }
/// ```
pub fn parse_domains(node: &KdlNode) -> Result<Vec<DomainEntry>> {
    let mut domains = Vec::new();

    let Some(children) = node.children() else {
        return Ok(domains);
    };

    for child in children.nodes() {
        if child.name().value() != "domain" {
            continue;
        }

        let id = get_first_arg_string(child)
            .ok_or_else(|| anyhow!("domain entry requires an id argument"))?;
        let name = get_prop_string(child, "name")
            .ok_or_else(|| anyhow!("domain '{id}' requires a name property"))?;
        let status = get_prop_string(child, "status")
            .map(|s| VerificationStatus::from_str_loose(&s))
            .unwrap_or_default();

        domains.push(DomainEntry {
            id,
            name,
            status,
            store: get_prop_string(child, "store"),
        });
    }

    trace!(count = domains.len(), "Parsed domains");
    Ok(domains)
}
