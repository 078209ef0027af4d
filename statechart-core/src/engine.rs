//! Statechart engine - registry of documents and running instances.

use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::CoreError;
use crate::eval::JsonDataModel;
use crate::event::Event;
use crate::executor::{ExecutionState, InstanceSnapshot, Interpreter, MacrostepOutcome};
use crate::reporter::{ErrorReporter, TracingReporter};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Point-in-time view of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub document: String,
    pub status: ExecutionState,
    pub configuration: Vec<String>,
    pub ctx: Value,
}

struct Instance {
    document: Arc<Document>,
    interpreter: Interpreter<JsonDataModel>,
}

impl Instance {
    fn info(&self, id: &str) -> InstanceInfo {
        InstanceInfo {
            id: id.to_string(),
            document: self.document.name.clone(),
            status: self.interpreter.status(),
            configuration: self.interpreter.active_ids(),
            ctx: self.interpreter.evaluator().ctx().clone(),
        }
    }
}

/// The statechart engine.
///
/// Documents are compiled once and shared; each instance sits behind its own
/// lock so different instances can be driven from different threads.
pub struct StatechartEngine {
    /// Documents indexed by name.
    documents: DashMap<String, Arc<Document>>,

    /// Instances indexed by ID.
    instances: DashMap<String, Mutex<Instance>>,

    reporter: Arc<dyn ErrorReporter>,
    config: EngineConfig,
}

impl StatechartEngine {
    /// Creates an engine that reports runtime problems through `tracing`.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    pub fn with_reporter(config: EngineConfig, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            documents: DashMap::new(),
            instances: DashMap::new(),
            reporter,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Document Management
    // =========================================================================

    /// Registers a document. Returns its checksum and whether it was newly
    /// stored; re-registering identical content is a no-op.
    pub fn put_document(&self, name: &str, json: &Value) -> Result<(String, bool), CoreError> {
        let document = Document::from_json(name, json)?;

        match self.documents.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                if e.get().checksum == document.checksum {
                    return Ok((document.checksum, false));
                }
                Err(CoreError::DocumentExists {
                    name: name.to_string(),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let checksum = document.checksum.clone();
                e.insert(Arc::new(document));
                tracing::info!(document = name, checksum = %checksum, "registered document");
                Ok((checksum, true))
            }
        }
    }

    pub fn get_document(&self, name: &str) -> Result<Arc<Document>, CoreError> {
        self.documents
            .get(name)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::DocumentNotFound {
                name: name.to_string(),
            })
    }

    /// Lists document names in sorted order.
    pub fn list_documents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    // =========================================================================
    // Instance Management
    // =========================================================================

    /// Creates and starts an instance. Without an id a UUID is generated;
    /// without a context the document's datamodel is used.
    pub fn create_instance(
        &self,
        instance_id: Option<&str>,
        document: &str,
        ctx: Option<Value>,
    ) -> Result<InstanceInfo, CoreError> {
        let id = instance_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.instances.contains_key(&id) {
            return Err(CoreError::InstanceExists { instance_id: id });
        }

        let document = self.get_document(document)?;
        let ctx = ctx.unwrap_or_else(|| document.datamodel.clone());
        let mut interpreter = Interpreter::new(
            Arc::clone(&document.tree),
            JsonDataModel::new(ctx),
            Arc::clone(&self.reporter),
            self.config.clone(),
        );
        interpreter.start()?;

        let instance = Instance {
            document,
            interpreter,
        };
        let info = instance.info(&id);
        tracing::debug!(instance = %id, document = %info.document, "created instance");
        self.insert(id, instance)?;
        Ok(info)
    }

    /// Rebuilds an instance from a snapshot and a datamodel.
    pub fn restore_instance(
        &self,
        instance_id: &str,
        document: &str,
        snapshot: &InstanceSnapshot,
        ctx: Value,
    ) -> Result<InstanceInfo, CoreError> {
        if self.instances.contains_key(instance_id) {
            return Err(CoreError::InstanceExists {
                instance_id: instance_id.to_string(),
            });
        }

        let document = self.get_document(document)?;
        let interpreter = Interpreter::restore(
            Arc::clone(&document.tree),
            JsonDataModel::new(ctx),
            Arc::clone(&self.reporter),
            self.config.clone(),
            snapshot,
        )?;

        let instance = Instance {
            document,
            interpreter,
        };
        let info = instance.info(instance_id);
        self.insert(instance_id.to_string(), instance)?;
        Ok(info)
    }

    fn insert(&self, id: String, instance: Instance) -> Result<(), CoreError> {
        match self.instances.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(e) => Err(CoreError::InstanceExists {
                instance_id: e.key().clone(),
            }),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(Mutex::new(instance));
                Ok(())
            }
        }
    }

    /// Gets an instance by ID.
    pub fn get_instance(&self, instance_id: &str) -> Result<InstanceInfo, CoreError> {
        self.instances
            .get(instance_id)
            .map(|r| r.lock().info(instance_id))
            .ok_or_else(|| not_found(instance_id))
    }

    /// Processes one external event on an instance.
    pub fn send(&self, instance_id: &str, event: Event) -> Result<MacrostepOutcome, CoreError> {
        let entry = self
            .instances
            .get(instance_id)
            .ok_or_else(|| not_found(instance_id))?;
        let mut instance = entry.lock();
        instance.interpreter.process_event(event)
    }

    pub fn snapshot_instance(&self, instance_id: &str) -> Result<(InstanceSnapshot, Value), CoreError> {
        let entry = self
            .instances
            .get(instance_id)
            .ok_or_else(|| not_found(instance_id))?;
        let instance = entry.lock();
        Ok((
            instance.interpreter.snapshot(),
            instance.interpreter.evaluator().ctx().clone(),
        ))
    }

    pub fn delete_instance(&self, instance_id: &str) -> Result<(), CoreError> {
        self.instances
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| not_found(instance_id))
    }

    /// Lists instance ids in sorted order.
    pub fn list_instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

fn not_found(instance_id: &str) -> CoreError {
    CoreError::InstanceNotFound {
        instance_id: instance_id.to_string(),
    }
}
