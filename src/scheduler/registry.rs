//! Builds schedulers from JSON configurations tagged by `"type"`.
//!
//! `"simple"` is always available. Other scheduler types are added at runtime
//! with [`SchedulerRegistry::register`]; tags are matched case-insensitively.
use std::{collections::HashMap, fmt, sync::Arc};

use serde::Deserialize;
use serde_json::Value;

use super::{Scheduler, SimpleScheduler};
use crate::error::{Error, Result};

/// Creates a scheduler from its full configuration, `"type"` tag included.
pub type SchedulerFactory = Arc<dyn Fn(Value) -> Result<Box<dyn Scheduler>> + Send + Sync>;

/// Scheduler types shipped with the crate.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BuiltinScheduler {
    Simple(SimpleScheduler),
}

impl BuiltinScheduler {
    pub const TAGS: &'static [&'static str] = &["simple"];

    pub fn into_scheduler(self) -> Box<dyn Scheduler> {
        match self {
            Self::Simple(scheduler) => Box::new(scheduler),
        }
    }
}

#[derive(Default, Clone)]
pub struct SchedulerRegistry {
    factories: HashMap<String, SchedulerFactory>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an external scheduler type.
    ///
    /// Fails for built-in tags and tags registered before.
    pub fn register<F>(&mut self, tag: &str, factory: F) -> Result<()>
    where
        F: Fn(Value) -> Result<Box<dyn Scheduler>> + Send + Sync + 'static,
    {
        let tag = tag.to_lowercase();
        if self.is_registered(&tag) {
            return Err(Error::DuplicateScheduler(tag));
        }
        tracing::debug!(tag = %tag, "registered scheduler type");
        self.factories.insert(tag, Arc::new(factory));
        Ok(())
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        BuiltinScheduler::TAGS.contains(&tag.as_str()) || self.factories.contains_key(&tag)
    }

    /// Every known tag, built-in ones first.
    pub fn tags(&self) -> Vec<String> {
        let mut external: Vec<String> = self.factories.keys().cloned().collect();
        external.sort();
        BuiltinScheduler::TAGS
            .iter()
            .map(|tag| tag.to_string())
            .chain(external)
            .collect()
    }

    pub fn from_value(&self, mut value: Value) -> Result<Box<dyn Scheduler>> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(Error::MissingSchedulerType)?
            .to_lowercase();

        if BuiltinScheduler::TAGS.contains(&tag.as_str()) {
            value["type"] = Value::String(tag);
            let builtin: BuiltinScheduler = serde_json::from_value(value)?;
            return Ok(builtin.into_scheduler());
        }

        match self.factories.get(&tag) {
            Some(factory) => factory(value),
            None => Err(Error::UnknownScheduler(tag)),
        }
    }

    /// Parses a scheduler configuration document.
    pub fn parse(&self, json: &str) -> Result<Box<dyn Scheduler>> {
        self.from_value(serde_json::from_str(json)?)
    }
}

impl fmt::Debug for SchedulerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
