//! KDL configuration parsing.

mod helpers;
mod sections;

use anyhow::{Context, Result};
use ::kdl::KdlDocument;
use tracing::{trace, warn};

use crate::Config;

/// Parse a full configuration document
pub fn parse_config(content: &str) -> Result<Config> {
    let doc: KdlDocument = content.parse().context("Invalid KDL syntax")?;

    let mut config = Config::default();

    for node in doc.nodes() {
        let name = node.name().value();
        trace!(block = %name, "Parsing configuration block");
        match name {
            "acme" => config.acme = sections::parse_acme(node)?,
            "storage" => config.storage = sections::parse_storage(node)?,
            "challenge" => config.challenge = sections::parse_challenge(node)?,
            "batch" => config.batch = sections::parse_batch(node)?,
            "renewal" => config.renewal = sections::parse_renewal(node)?,
            "fallback" => config.fallback = sections::parse_fallback(node)?,
            "domains" => config.domains = sections::parse_domains(node)?,
            other => warn!(block = %other, "Ignoring unknown configuration block"),
        }
    }

    Ok(config)
}
