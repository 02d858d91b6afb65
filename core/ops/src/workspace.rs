// queue-ops/core/ops/src/workspace.rs

// Workspace: named blobs, named queues and operator execution
use crate::config::WorkspaceConfig;
use crate::operator::{NetDef, Operator, OperatorDef, OperatorRegistry};
use crate::queue::BlobsQueue;
use crate::registry::QueueRegistry;
use crate::tensor::Tensor;
use crate::types::OperatorError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Value bound to a name in a workspace
#[derive(Debug, Clone)]
pub enum Blob {
    Tensor(Tensor),
    /// Boolean status written by queue operators
    Status(bool),
}

impl Blob {
    pub fn kind(&self) -> &'static str {
        match self {
            Blob::Tensor(_) => "tensor",
            Blob::Status(_) => "status",
        }
    }
}

/// A net whose operators were instantiated once and can be run repeatedly
pub struct Net {
    name: String,
    ops: Vec<(String, Box<dyn Operator>)>,
}

impl Net {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run every operator in order, stopping at the first failure
    pub fn run(&self, ws: &Workspace) -> Result<(), OperatorError> {
        for (op_type, op) in &self.ops {
            if let Err(e) = op.run(ws) {
                warn!(net = %self.name, op = %op_type, "Operator failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ops: Vec<&str> = self.ops.iter().map(|(t, _)| t.as_str()).collect();
        f.debug_struct("Net")
            .field("name", &self.name)
            .field("ops", &ops)
            .finish()
    }
}

/// Execution context for a graph.
///
/// Holds the blob namespace operators read and write, and the queue registry
/// that lets independent operators share a queue by name. A workspace is an
/// explicit value: each test or graph builds its own.
pub struct Workspace {
    config: WorkspaceConfig,
    blobs: RwLock<HashMap<String, Blob>>,
    queues: QueueRegistry,
    nets: RwLock<HashMap<String, Arc<Net>>>,
    operators: Arc<OperatorRegistry>,
}

impl Workspace {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self::with_operators(config, Arc::new(OperatorRegistry::with_cpu_ops()))
    }

    pub fn with_operators(config: WorkspaceConfig, operators: Arc<OperatorRegistry>) -> Self {
        debug!(workspace = %config.name, "Created workspace");
        Self {
            config,
            blobs: RwLock::new(HashMap::new()),
            queues: QueueRegistry::new(),
            nets: RwLock::new(HashMap::new()),
            operators,
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn queue(&self, name: &str) -> Result<Arc<BlobsQueue>, OperatorError> {
        self.queues
            .get(name)
            .ok_or_else(|| OperatorError::QueueNotFound(name.to_string()))
    }

    pub fn feed_blob(&self, name: &str, tensor: Tensor) {
        self.blobs
            .write()
            .insert(name.to_string(), Blob::Tensor(tensor));
    }

    pub fn feed_status(&self, name: &str, status: bool) {
        self.blobs
            .write()
            .insert(name.to_string(), Blob::Status(status));
    }

    pub fn fetch_blob(&self, name: &str) -> Result<Blob, OperatorError> {
        self.blobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OperatorError::BlobNotFound(name.to_string()))
    }

    pub fn fetch_tensor(&self, name: &str) -> Result<Tensor, OperatorError> {
        match self.fetch_blob(name)? {
            Blob::Tensor(tensor) => Ok(tensor),
            other => Err(OperatorError::BlobKindMismatch {
                name: name.to_string(),
                expected: "tensor",
                actual: other.kind(),
            }),
        }
    }

    pub fn fetch_status(&self, name: &str) -> Result<bool, OperatorError> {
        match self.fetch_blob(name)? {
            Blob::Status(status) => Ok(status),
            other => Err(OperatorError::BlobKindMismatch {
                name: name.to_string(),
                expected: "status",
                actual: other.kind(),
            }),
        }
    }

    pub fn has_blob(&self, name: &str) -> bool {
        self.blobs.read().contains_key(name)
    }

    /// Blob names, sorted
    pub fn blobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn remove_blob(&self, name: &str) -> Option<Blob> {
        self.blobs.write().remove(name)
    }

    pub fn create_operator(&self, def: &OperatorDef) -> Result<Box<dyn Operator>, OperatorError> {
        self.operators.create(def)
    }

    pub fn run_operator_once(&self, def: &OperatorDef) -> Result<(), OperatorError> {
        self.create_operator(def)?.run(self)
    }

    /// Run operators in order, stopping at the first failure
    pub fn run_operators_once(&self, defs: &[OperatorDef]) -> Result<(), OperatorError> {
        for def in defs {
            if let Err(e) = self.run_operator_once(def) {
                warn!(workspace = %self.config.name, op = %def.op_type, "Operator failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn run_net_once(&self, net: &NetDef) -> Result<(), OperatorError> {
        debug!(workspace = %self.config.name, net = %net.name, ops = net.ops.len(), "Running net");
        self.run_operators_once(&net.ops)
    }

    /// Instantiate `net`'s operators and keep them under the net's name.
    ///
    /// Fails with `NetExists` if the name is taken and `overwrite` is not set.
    /// Nothing is stored if any operator fails to build.
    pub fn create_net(&self, net: &NetDef, overwrite: bool) -> Result<Arc<Net>, OperatorError> {
        if net.name.is_empty() {
            return Err(OperatorError::InvalidArgument {
                name: "name".to_string(),
                reason: "a stored net needs a name".to_string(),
            });
        }
        if !overwrite && self.nets.read().contains_key(&net.name) {
            return Err(OperatorError::NetExists(net.name.clone()));
        }

        let ops = net
            .ops
            .iter()
            .map(|def| self.create_operator(def).map(|op| (def.op_type.clone(), op)))
            .collect::<Result<Vec<_>, OperatorError>>()?;
        let created = Arc::new(Net {
            name: net.name.clone(),
            ops,
        });

        let mut nets = self.nets.write();
        if !overwrite && nets.contains_key(&net.name) {
            return Err(OperatorError::NetExists(net.name.clone()));
        }
        nets.insert(net.name.clone(), created.clone());
        info!(workspace = %self.config.name, net = %net.name, ops = created.len(), "Created net");
        Ok(created)
    }

    /// Run a net stored by [`Workspace::create_net`]
    pub fn run_net(&self, name: &str) -> Result<(), OperatorError> {
        // Operators may block; never hold the table lock while running
        let net = self
            .nets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OperatorError::NetNotFound(name.to_string()))?;
        net.run(self)
    }

    /// Stored net names, sorted
    pub fn nets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nets.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_net(&self, name: &str) -> bool {
        self.nets.read().contains_key(name)
    }

    pub fn remove_net(&self, name: &str) -> Option<Arc<Net>> {
        self.nets.write().remove(name)
    }

    /// Drop all blobs and nets, and tear down the queue registry
    pub fn reset(&self) {
        let blob_count = {
            let mut blobs = self.blobs.write();
            let n = blobs.len();
            blobs.clear();
            n
        };
        let net_count = {
            let mut nets = self.nets.write();
            let n = nets.len();
            nets.clear();
            n
        };
        let queue_count = self.queues.len();
        self.queues.clear(self.config.close_queues_on_reset);
        info!(
            workspace = %self.config.name,
            blobs = blob_count,
            nets = net_count,
            queues = queue_count,
            "Workspace reset"
        );
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(WorkspaceConfig::default())
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("config", &self.config)
            .field("blobs", &self.blobs())
            .field("nets", &self.nets())
            .field("queues", &self.queues.names())
            .finish()
    }
}
