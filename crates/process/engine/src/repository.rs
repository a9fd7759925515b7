//! Process repository: deployed definitions and persisted execution trees
//!
//! Definitions are immutable once deployed. Deploying a definition whose
//! key already exists creates the next version. Execution trees are
//! loaded as working copies and written back only when a command succeeds.

use process_types::{
    ExecutionTree, ProcessDefinition, ProcessDefinitionId, ProcessError, ProcessInstanceId,
    ProcessResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Storage for definitions and execution trees
pub trait ProcessRepository: Send + Sync {
    /// Validate and store a definition, returning its id
    fn deploy(&self, definition: ProcessDefinition) -> ProcessResult<ProcessDefinitionId>;

    fn definition(&self, id: &ProcessDefinitionId) -> ProcessResult<Arc<ProcessDefinition>>;

    /// Highest deployed version for a key
    fn latest_definition_by_key(&self, key: &str) -> ProcessResult<Arc<ProcessDefinition>>;

    /// A working copy of an instance's tree
    fn load(&self, instance: &ProcessInstanceId) -> ProcessResult<ExecutionTree>;

    fn save(&self, tree: ExecutionTree) -> ProcessResult<()>;

    fn delete(&self, instance: &ProcessInstanceId) -> ProcessResult<()>;

    /// Write back every tree touched by one command
    fn commit(&self, trees: Vec<ExecutionTree>) -> ProcessResult<()> {
        for tree in trees {
            self.save(tree)?;
        }
        Ok(())
    }
}

/// Repository held in memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    definitions: RwLock<DefinitionStore>,
    instances: RwLock<BTreeMap<ProcessInstanceId, ExecutionTree>>,
}

#[derive(Debug, Default)]
struct DefinitionStore {
    by_id: HashMap<ProcessDefinitionId, Arc<ProcessDefinition>>,
    /// Key → ids in deployment order
    by_key: HashMap<String, Vec<ProcessDefinitionId>>,
}

fn poisoned(what: &str) -> ProcessError {
    ProcessError::Repository(format!("{} store poisoned", what))
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every deployed version of a key, oldest first
    pub fn versions_by_key(&self, key: &str) -> Vec<Arc<ProcessDefinition>> {
        let Ok(store) = self.definitions.read() else {
            return Vec::new();
        };
        store
            .by_key
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| store.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn instance_ids(&self) -> Vec<ProcessInstanceId> {
        self.instances
            .read()
            .map(|i| i.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().map(|i| i.len()).unwrap_or(0)
    }

    /// Suspend every version of a key so new call activities reject it
    pub fn suspend_key(&self, key: &str) -> ProcessResult<()> {
        let mut store = self.definitions.write().map_err(|_| poisoned("definition"))?;
        let ids = store.by_key.get(key).cloned().unwrap_or_default();
        if ids.is_empty() {
            return Err(ProcessError::DefinitionNotFound(key.to_string()));
        }
        for id in ids {
            if let Some(def) = store.by_id.get_mut(&id) {
                let mut suspended = (**def).clone();
                suspended.suspend();
                *def = Arc::new(suspended);
            }
        }
        tracing::info!(key = %key, "Process definition suspended");
        Ok(())
    }
}

impl ProcessRepository for InMemoryRepository {
    fn deploy(&self, mut definition: ProcessDefinition) -> ProcessResult<ProcessDefinitionId> {
        definition.validate()?;

        let mut store = self.definitions.write().map_err(|_| poisoned("definition"))?;
        let latest_version = store
            .by_key
            .get(&definition.key)
            .and_then(|ids| ids.last())
            .and_then(|id| store.by_id.get(id))
            .map(|d| d.version);
        if let Some(latest) = latest_version {
            definition.version = definition.version.max(latest + 1);
        }

        let id = definition.id.clone();
        let key = definition.key.clone();
        tracing::info!(
            definition_id = %id,
            key = %key,
            version = definition.version,
            "Process definition deployed"
        );
        store.by_id.insert(id.clone(), Arc::new(definition));
        store.by_key.entry(key).or_default().push(id.clone());
        Ok(id)
    }

    fn definition(&self, id: &ProcessDefinitionId) -> ProcessResult<Arc<ProcessDefinition>> {
        let store = self.definitions.read().map_err(|_| poisoned("definition"))?;
        store
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| ProcessError::DefinitionNotFound(id.to_string()))
    }

    fn latest_definition_by_key(&self, key: &str) -> ProcessResult<Arc<ProcessDefinition>> {
        let store = self.definitions.read().map_err(|_| poisoned("definition"))?;
        store
            .by_key
            .get(key)
            .and_then(|ids| ids.last())
            .and_then(|id| store.by_id.get(id))
            .cloned()
            .ok_or_else(|| ProcessError::DefinitionNotFound(key.to_string()))
    }

    fn load(&self, instance: &ProcessInstanceId) -> ProcessResult<ExecutionTree> {
        let instances = self.instances.read().map_err(|_| poisoned("instance"))?;
        instances
            .get(instance)
            .cloned()
            .ok_or_else(|| ProcessError::InstanceNotFound(instance.clone()))
    }

    fn save(&self, tree: ExecutionTree) -> ProcessResult<()> {
        tree.check_consistency()?;
        let mut instances = self.instances.write().map_err(|_| poisoned("instance"))?;
        instances.insert(tree.process_instance_id.clone(), tree);
        Ok(())
    }

    fn delete(&self, instance: &ProcessInstanceId) -> ProcessResult<()> {
        let mut instances = self.instances.write().map_err(|_| poisoned("instance"))?;
        instances
            .remove(instance)
            .map(|_| ())
            .ok_or_else(|| ProcessError::InstanceNotFound(instance.clone()))
    }

    fn commit(&self, trees: Vec<ExecutionTree>) -> ProcessResult<()> {
        for tree in &trees {
            tree.check_consistency()?;
        }
        let mut instances = self.instances.write().map_err(|_| poisoned("instance"))?;
        for tree in trees {
            instances.insert(tree.process_instance_id.clone(), tree);
        }
        Ok(())
    }
}
