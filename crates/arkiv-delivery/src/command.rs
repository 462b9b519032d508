//! Delivery and validation commands
//!
//! A [`DeliveryCommand`] is the parameter object of one delivery run. It
//! carries a bag of typed validation commands; each validator declares the
//! command type it understands and only runs when that type is present (see
//! [`crate::validation::Dispatch`]).

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Default number of referenced candidate keys whose values are cached
pub const DEFAULT_FOREIGN_TABLES_TO_CACHE: usize = 10;

/// Typed parameters of one kind of validation
pub trait ValidationCommand: Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Resolves a validator's declared command type from a delivery command
pub trait CommandType: Send + Sync + 'static {
    fn select(command: &DeliveryCommand) -> Option<&Self>;
}

impl<T: ValidationCommand> CommandType for T {
    fn select(command: &DeliveryCommand) -> Option<&Self> {
        command.validation::<T>()
    }
}

/// Validators declaring `DeliveryCommand` participate in every run
impl CommandType for DeliveryCommand {
    fn select(command: &DeliveryCommand) -> Option<&Self> {
        Some(command)
    }
}

/// Enables the foreign key validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyValidationCommand {
    /// Address budget of the foreign key value cache
    pub number_of_foreign_tables_to_cache: usize,

    /// Drop rows without a referenced row instead of failing the table
    pub remove_orphans: bool,
}

impl Default for ForeignKeyValidationCommand {
    fn default() -> Self {
        Self {
            number_of_foreign_tables_to_cache: DEFAULT_FOREIGN_TABLES_TO_CACHE,
            remove_orphans: false,
        }
    }
}

impl ValidationCommand for ForeignKeyValidationCommand {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Enables the candidate/primary key validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKeyValidationCommand {
    /// Treat a table without candidate keys as a metadata error
    pub require_candidate_key: bool,
}

impl Default for CandidateKeyValidationCommand {
    fn default() -> Self {
        Self {
            require_candidate_key: true,
        }
    }
}

impl ValidationCommand for CandidateKeyValidationCommand {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parameters of one delivery run
#[derive(Debug, Clone)]
pub struct DeliveryCommand {
    /// Replaces the data source's package identifier when set
    pub package_id: Option<Uuid>,

    /// Validate only; skip every archive write
    pub validation_only: bool,

    /// Restrict the run to one table (target or source name)
    pub target_table: Option<String>,

    /// Number of tables processed concurrently, at least 1
    pub tables_handled_simultaneously: usize,

    validations: Vec<Arc<dyn ValidationCommand>>,
}

impl Default for DeliveryCommand {
    fn default() -> Self {
        Self {
            package_id: None,
            validation_only: false,
            target_table: None,
            tables_handled_simultaneously: 1,
            validations: Vec::new(),
        }
    }
}

impl DeliveryCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation command, replacing one of the same type
    pub fn with_validation<C: ValidationCommand>(mut self, command: C) -> Self {
        self.validations.retain(|c| !c.as_any().is::<C>());
        self.validations.push(Arc::new(command));
        self
    }

    pub fn with_target_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self
    }

    pub fn with_tables_handled_simultaneously(mut self, tables: usize) -> Self {
        self.tables_handled_simultaneously = tables;
        self
    }

    pub fn validation_only(mut self, validation_only: bool) -> Self {
        self.validation_only = validation_only;
        self
    }

    /// The validation command of type `C`, if the run carries one
    pub fn validation<C: ValidationCommand>(&self) -> Option<&C> {
        self.validations
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<C>())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tables_handled_simultaneously == 0 {
            return Err(DeliveryError::Argument(
                "tables_handled_simultaneously must be at least 1".to_string(),
            ));
        }
        if matches!(self.target_table.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(DeliveryError::Argument("target_table must not be empty".to_string()));
        }
        Ok(())
    }
}
