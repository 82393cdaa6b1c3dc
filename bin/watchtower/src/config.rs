//! Declarative job configuration.
//!
//! Jobs are loaded from a YAML or JSON file (decided by extension) into the
//! typed [`JobDefinition`] structure. All validation happens here, at load
//! time: an unknown source, mapper, or target name, a duplicate job id, or
//! a mapper that cannot run against its source all fail before the first
//! tick ever runs.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use watchtower_core::models::JobDefinition;

/// Top-level configuration file.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub jobs: Vec<JobDefinition>,
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?,
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?,
            other => bail!(
                "Unsupported config extension {:?} for {} (expected yaml, yml or json)",
                other,
                path.display()
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            bail!("Config declares no jobs");
        }

        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            if !seen.insert(&job.id) {
                bail!("Duplicate job id '{}'", job.id);
            }
            if job.handlers.is_empty() {
                bail!("Job '{}' declares no handlers", job.id);
            }
            if job.poll_interval_secs == 0 {
                bail!("Job '{}' has a zero poll interval", job.id);
            }
            if job.batch_size == 0 {
                bail!("Job '{}' has a zero batch size", job.id);
            }
            for handler in &job.handlers {
                // A mapper only understands payloads from its own chain family.
                if handler.mapper.family() != job.source.family() {
                    bail!(
                        "Job '{}': mapper {:?} ({}) cannot run against a {} source",
                        job.id,
                        handler.mapper,
                        handler.mapper.family(),
                        job.source.family()
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(jobs: serde_json::Value) -> Result<AppConfig> {
        let config: AppConfig = serde_json::from_value(serde_json::json!({ "jobs": jobs }))?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn valid_config_passes() {
        let config = base_config(serde_json::json!([{
            "id": "eth-messages",
            "chain_id": 2,
            "source": { "kind": "evm", "rpc_url": "http://localhost:8545" },
            "handlers": [ { "mapper": "evm_log", "target": { "kind": "sink" } } ]
        }]));
        assert!(config.is_ok());
    }

    #[test]
    fn duplicate_job_ids_are_rejected() {
        let job = serde_json::json!({
            "id": "same",
            "chain_id": 2,
            "source": { "kind": "evm", "rpc_url": "http://x" },
            "handlers": [ { "mapper": "evm_log", "target": { "kind": "sink" } } ]
        });
        let err = base_config(serde_json::json!([job, job])).unwrap_err();
        assert!(err.to_string().contains("Duplicate job id"));
    }

    // Test critique: un mapper Solana sur une source EVM doit échouer au
    // chargement, pas produire silencieusement zéro événement
    #[test]
    fn cross_family_mapper_is_rejected() {
        let err = base_config(serde_json::json!([{
            "id": "mismatched",
            "chain_id": 2,
            "source": { "kind": "evm", "rpc_url": "http://x" },
            "handlers": [ { "mapper": "solana", "target": { "kind": "sink" } } ]
        }]))
        .unwrap_err();
        assert!(err.to_string().contains("cannot run against"));
    }

    #[test]
    fn job_without_handlers_is_rejected() {
        let err = base_config(serde_json::json!([{
            "id": "empty",
            "chain_id": 2,
            "source": { "kind": "evm", "rpc_url": "http://x" },
            "handlers": []
        }]))
        .unwrap_err();
        assert!(err.to_string().contains("declares no handlers"));
    }
}
