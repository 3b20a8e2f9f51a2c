// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use crate::config::{Config, MachineModel, TransformerDescriptor};

/// Static machine-model catalog consulted at registration time.
#[derive(Debug, Clone, Default)]
pub struct MachineCatalog {
    models: HashMap<String, MachineModel>,
    descriptors: HashMap<String, TransformerDescriptor>,
}

/// Why a machine model did not resolve to a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Unresolved {
    Model,
    Descriptor(String),
}

impl MachineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut catalog = Self::new();
        for model in &cfg.machine_models {
            catalog.add_model(model.clone());
        }
        for descriptor in &cfg.transformers {
            catalog.add_descriptor(descriptor.clone());
        }
        catalog
    }

    pub fn add_model(&mut self, model: MachineModel) {
        self.models.insert(model.id.clone(), model);
    }

    pub fn add_descriptor(&mut self, descriptor: TransformerDescriptor) {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }

    /// Shorthand for a model whose descriptor has the same id.
    pub fn with_model(mut self, model_id: &str, entry_point: &str) -> Self {
        self.add_model(MachineModel {
            id: model_id.to_string(),
            oem: String::new(),
            equipment_model: String::new(),
            controller: String::new(),
            transformer: model_id.to_string(),
        });
        self.add_descriptor(TransformerDescriptor {
            id: model_id.to_string(),
            metadata: HashMap::new(),
            module: String::new(),
            entry_point: entry_point.to_string(),
        });
        self
    }

    pub fn model(&self, model_id: &str) -> Option<&MachineModel> {
        self.models.get(model_id)
    }

    pub fn resolve(&self, model_id: &str) -> Result<&TransformerDescriptor, Unresolved> {
        let model = self.models.get(model_id).ok_or(Unresolved::Model)?;
        self.descriptors
            .get(&model.transformer)
            .ok_or_else(|| Unresolved::Descriptor(model.transformer.clone()))
    }
}
