//! Delivery configuration
//!
//! Loaded from `ARKIV_*` environment variables (and a `.env` file, if
//! present). Command-line flags override individual values.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::command::{
    CandidateKeyValidationCommand, DeliveryCommand, ForeignKeyValidationCommand,
    DEFAULT_FOREIGN_TABLES_TO_CACHE,
};
use crate::handler::DEFAULT_MAX_RETRIES_PER_TABLE;
use crate::memory::DEFAULT_CHUNK_SIZE;

const DEFAULT_TABLES_SIMULTANEOUSLY: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Tables processed concurrently
    pub tables_simultaneously: usize,
    /// Retries granted to each table after a data error
    pub max_table_retries: u32,
    /// Rows per chunk read from the data repository
    pub chunk_size: usize,
    /// Address budget of the foreign key value cache
    pub foreign_tables_to_cache: usize,
    pub remove_orphans: bool,
    pub require_candidate_key: bool,
    pub validate_foreign_keys: bool,
    pub validate_candidate_keys: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            tables_simultaneously: DEFAULT_TABLES_SIMULTANEOUSLY,
            max_table_retries: DEFAULT_MAX_RETRIES_PER_TABLE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            foreign_tables_to_cache: DEFAULT_FOREIGN_TABLES_TO_CACHE,
            remove_orphans: false,
            require_candidate_key: true,
            validate_foreign_keys: true,
            validate_candidate_keys: true,
        }
    }
}

impl DeliveryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            tables_simultaneously: env_or("ARKIV_TABLES_SIMULTANEOUSLY", defaults.tables_simultaneously)?,
            max_table_retries: env_or("ARKIV_MAX_TABLE_RETRIES", defaults.max_table_retries)?,
            chunk_size: env_or("ARKIV_CHUNK_SIZE", defaults.chunk_size)?,
            foreign_tables_to_cache: env_or("ARKIV_FOREIGN_TABLES_TO_CACHE", defaults.foreign_tables_to_cache)?,
            remove_orphans: env_or("ARKIV_REMOVE_ORPHANS", defaults.remove_orphans)?,
            require_candidate_key: env_or("ARKIV_REQUIRE_CANDIDATE_KEY", defaults.require_candidate_key)?,
            validate_foreign_keys: env_or("ARKIV_VALIDATE_FOREIGN_KEYS", defaults.validate_foreign_keys)?,
            validate_candidate_keys: env_or("ARKIV_VALIDATE_CANDIDATE_KEYS", defaults.validate_candidate_keys)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tables_simultaneously == 0 {
            bail!("ARKIV_TABLES_SIMULTANEOUSLY must be greater than 0");
        }
        if self.chunk_size == 0 {
            bail!("ARKIV_CHUNK_SIZE must be greater than 0");
        }
        if self.foreign_tables_to_cache == 0 {
            bail!("ARKIV_FOREIGN_TABLES_TO_CACHE must be greater than 0");
        }
        Ok(())
    }

    /// Delivery command carrying the enabled validations
    pub fn to_command(&self) -> DeliveryCommand {
        let mut command =
            DeliveryCommand::new().with_tables_handled_simultaneously(self.tables_simultaneously);

        if self.validate_foreign_keys {
            command = command.with_validation(ForeignKeyValidationCommand {
                number_of_foreign_tables_to_cache: self.foreign_tables_to_cache,
                remove_orphans: self.remove_orphans,
            });
        }
        if self.validate_candidate_keys {
            command = command.with_validation(CandidateKeyValidationCommand {
                require_candidate_key: self.require_candidate_key,
            });
        }
        command
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", name, raw)),
        _ => Ok(default),
    }
}
