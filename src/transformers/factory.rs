// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::plc::PlcTransformer;
use super::robot::RobotTransformer;
use super::workcell::WorkcellTransformer;
use crate::config::WorkcellConfig;
use crate::engine::{reducer_from_config, RegistryHandle, WorkcellEngine, WorkcellSettings};
use crate::traits::{StatusEventSink, StatusReducer, Transformer};

/// Everything a transformer constructor may draw on.
pub struct TransformerContext {
    pub device_id: String,
    pub options: HashMap<String, Value>,
    pub workcell: Option<WorkcellConfig>,
    /// Overrides the reducer named in `workcell`.
    pub reducer: Option<Arc<dyn StatusReducer>>,
    pub registry: RegistryHandle,
    pub sink: Arc<dyn StatusEventSink>,
    pub member_read_timeout: Duration,
}

pub type TransformerConstructor =
    Arc<dyn Fn(&TransformerContext) -> Result<Arc<dyn Transformer>, String> + Send + Sync>;

/// Entry points a transformer descriptor may name.
#[derive(Clone)]
pub struct TransformerCatalog {
    constructors: HashMap<String, TransformerConstructor>,
}

impl TransformerCatalog {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Catalog with the robot, PLC and workcell families.
    ///
    /// - "RobotTransformer" -> articulated robot controllers
    /// - "PlcTransformer" -> safety and cell PLCs
    /// - "WorkcellTransformer" -> workcell aggregate (needs a `workcell` section)
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("RobotTransformer", Arc::new(|ctx: &TransformerContext| {
            Ok(Arc::new(RobotTransformer::new(&ctx.options)) as Arc<dyn Transformer>)
        }));
        catalog.register("PlcTransformer", Arc::new(|ctx: &TransformerContext| {
            Ok(Arc::new(PlcTransformer::new(&ctx.options)) as Arc<dyn Transformer>)
        }));
        catalog.register("WorkcellTransformer", Arc::new(build_workcell));
        catalog
    }

    pub fn register(&mut self, entry_point: &str, constructor: TransformerConstructor) {
        self.constructors.insert(entry_point.to_string(), constructor);
    }

    pub fn create_transformer(
        &self,
        entry_point: &str,
        ctx: &TransformerContext,
    ) -> Result<Arc<dyn Transformer>, String> {
        let constructor = self
            .constructors
            .get(entry_point)
            .ok_or_else(|| format!("Unknown transformer entry point: '{}'", entry_point))?;
        constructor(ctx)
    }

    pub fn list_available_implementations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_implementation_available(&self, entry_point: &str) -> bool {
        self.constructors.contains_key(entry_point)
    }
}

impl Default for TransformerCatalog {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn build_workcell(ctx: &TransformerContext) -> Result<Arc<dyn Transformer>, String> {
    let workcell = ctx
        .workcell
        .as_ref()
        .ok_or_else(|| format!("workcell device '{}' has no 'workcell' section", ctx.device_id))?;

    let reducer = ctx
        .reducer
        .clone()
        .unwrap_or_else(|| reducer_from_config(&workcell.reducer));
    let settings = WorkcellSettings {
        workcell_id: ctx.device_id.clone(),
        members: workcell.members.clone(),
        reducer,
        failure_threshold: workcell.failure_threshold,
        max_recovery_attempts: workcell.max_recovery_attempts,
        member_read_timeout: ctx.member_read_timeout,
        indicator: workcell.indicator.clone(),
        auto_clear_alarms: workcell.auto_clear_alarms,
    };
    let engine = WorkcellEngine::new(settings, ctx.registry.clone(), ctx.sink.clone());
    Ok(Arc::new(WorkcellTransformer::new(engine)))
}
