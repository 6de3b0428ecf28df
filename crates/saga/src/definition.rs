use std::collections::HashSet;

use crate::error::{Result, SagaError};
use crate::step::SagaStep;

/// An immutable, ordered list of saga steps.
#[derive(Debug, Clone)]
pub struct SagaDefinition<C> {
    name: String,
    steps: Vec<SagaStep<C>>,
}

impl<C> SagaDefinition<C> {
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder<C> {
        SagaDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[SagaStep<C>] {
        &self.steps
    }
}

/// Builder for [`SagaDefinition`].
#[derive(Debug)]
pub struct SagaDefinitionBuilder<C> {
    name: String,
    steps: Vec<SagaStep<C>>,
}

impl<C> SagaDefinitionBuilder<C> {
    /// Appends a step. Steps run in the order they are added.
    #[must_use]
    pub fn step(mut self, step: SagaStep<C>) -> Self {
        self.steps.push(step);
        self
    }

    /// Validates and builds the definition.
    ///
    /// # Errors
    ///
    /// Returns an error if no steps were added or a step name repeats.
    pub fn build(self) -> Result<SagaDefinition<C>> {
        if self.steps.is_empty() {
            return Err(SagaError::EmptyDefinition { saga: self.name });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(SagaError::DuplicateStep {
                    saga: self.name.clone(),
                    step: step.name().to_string(),
                });
            }
        }

        Ok(SagaDefinition {
            name: self.name,
            steps: self.steps,
        })
    }
}
