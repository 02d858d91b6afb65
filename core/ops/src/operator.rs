// queue-ops/core/ops/src/operator.rs

// Operator definitions and the factory table the executor instantiates from
use crate::tensor::Device;
use crate::types::OperatorError;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Device family an operator implementation targets
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOption {
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub device_id: u32,
}

impl DeviceOption {
    pub fn gpu(device_id: u32) -> Self {
        Self {
            device_type: DeviceType::Gpu,
            device_id,
        }
    }

    pub fn device(&self) -> Device {
        match self.device_type {
            DeviceType::Cpu => Device::Cpu,
            DeviceType::Gpu => Device::Gpu(self.device_id),
        }
    }
}

/// Operator argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argument {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Float(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::Str(v.to_string())
    }
}

/// Serializable description of one operator invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub args: BTreeMap<String, Argument>,
    #[serde(default)]
    pub device_option: DeviceOption,
}

impl OperatorDef {
    pub fn new<I, O>(op_type: &str, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            op_type: op_type.to_string(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            args: BTreeMap::new(),
            device_option: DeviceOption::default(),
        }
    }

    pub fn arg(mut self, name: &str, value: impl Into<Argument>) -> Self {
        self.args.insert(name.to_string(), value.into());
        self
    }

    pub fn on_device(mut self, device_option: DeviceOption) -> Self {
        self.device_option = device_option;
        self
    }

    /// Integer argument that must be present and non-negative
    pub fn required_usize(&self, name: &str) -> Result<usize, OperatorError> {
        match self.args.get(name) {
            Some(Argument::Int(v)) => usize::try_from(*v).map_err(|_| OperatorError::InvalidArgument {
                name: name.to_string(),
                reason: format!("expected a non-negative integer, got {}", v),
            }),
            Some(other) => Err(OperatorError::InvalidArgument {
                name: name.to_string(),
                reason: format!("expected an integer, got {:?}", other),
            }),
            None => Err(OperatorError::MissingArgument(name.to_string())),
        }
    }

    /// Optional timeout given in (possibly fractional) seconds
    pub fn optional_timeout(&self, name: &str) -> Result<Option<Duration>, OperatorError> {
        let secs = match self.args.get(name) {
            None => return Ok(None),
            Some(Argument::Int(v)) => *v as f64,
            Some(Argument::Float(v)) => *v,
            Some(other) => {
                return Err(OperatorError::InvalidArgument {
                    name: name.to_string(),
                    reason: format!("expected seconds, got {:?}", other),
                })
            }
        };
        if !secs.is_finite() || secs < 0.0 {
            return Err(OperatorError::InvalidArgument {
                name: name.to_string(),
                reason: format!("timeout must be a non-negative number, got {}", secs),
            });
        }
        // Zero means wait forever
        if secs == 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| OperatorError::InvalidArgument {
                name: name.to_string(),
                reason: format!("timeout of {} seconds: {}", secs, e),
            })
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> OperatorError {
        OperatorError::InvalidDefinition {
            op_type: self.op_type.clone(),
            reason: reason.into(),
        }
    }
}

/// An ordered list of operators run as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ops: Vec<OperatorDef>,
}

impl NetDef {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// An instantiated operator.
///
/// `run` is called synchronously on an executor-owned thread and may block.
/// Implementations must not spawn threads of their own.
pub trait Operator: Send + Sync {
    fn run(&self, ws: &Workspace) -> Result<(), OperatorError>;
}

pub type OperatorFactory =
    Box<dyn Fn(&OperatorDef) -> Result<Box<dyn Operator>, OperatorError> + Send + Sync>;

/// Factory table keyed by operator type and device family
#[derive(Default)]
pub struct OperatorRegistry {
    factories: HashMap<(String, DeviceType), OperatorFactory>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the CPU queue operators
    pub fn with_cpu_ops() -> Self {
        let mut registry = Self::new();
        crate::ops::register_cpu_ops(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, op_type: &str, device_type: DeviceType, factory: F)
    where
        F: Fn(&OperatorDef) -> Result<Box<dyn Operator>, OperatorError> + Send + Sync + 'static,
    {
        self.factories
            .insert((op_type.to_string(), device_type), Box::new(factory));
    }

    pub fn contains(&self, op_type: &str, device_type: DeviceType) -> bool {
        self.factories
            .contains_key(&(op_type.to_string(), device_type))
    }

    pub fn create(&self, def: &OperatorDef) -> Result<Box<dyn Operator>, OperatorError> {
        let device_type = def.device_option.device_type;
        let factory = self
            .factories
            .get(&(def.op_type.clone(), device_type))
            .ok_or_else(|| OperatorError::UnknownOperator {
                op_type: def.op_type.clone(),
                device_type,
            })?;
        debug!(op = %def.op_type, device = ?device_type, "Creating operator");
        factory(def)
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.factories.keys().collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        f.debug_struct("OperatorRegistry")
            .field("operators", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_def_from_json() {
        let json = r#"{
            "name": "loader",
            "ops": [
                {"type": "CreateBlobsQueue", "outputs": ["q"],
                 "args": {"capacity": 4, "num_blobs": 2}},
                {"type": "DequeueBlobs", "inputs": ["q"], "outputs": ["x", "y", "ok"],
                 "args": {"timeout_secs": 0.5},
                 "device_option": {"device_type": "gpu", "device_id": 1}}
            ]
        }"#;
        let net = NetDef::from_json(json).unwrap();
        assert_eq!(net.name, "loader");
        assert_eq!(net.ops.len(), 2);

        let create = &net.ops[0];
        assert_eq!(create.required_usize("capacity").unwrap(), 4);
        assert_eq!(create.device_option.device(), Device::Cpu);

        let dequeue = &net.ops[1];
        assert_eq!(
            dequeue.optional_timeout("timeout_secs").unwrap(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(dequeue.device_option.device(), Device::Gpu(1));
    }

    #[test]
    fn test_argument_validation() {
        let def = OperatorDef::new("CreateBlobsQueue", Vec::<String>::new(), ["q"])
            .arg("capacity", -1i64)
            .arg("num_blobs", "two")
            .arg("timeout_secs", -3.0);

        assert!(matches!(
            def.required_usize("capacity"),
            Err(OperatorError::InvalidArgument { .. })
        ));
        assert!(matches!(
            def.required_usize("num_blobs"),
            Err(OperatorError::InvalidArgument { .. })
        ));
        assert!(matches!(
            def.required_usize("missing"),
            Err(OperatorError::MissingArgument(_))
        ));
        assert!(def.optional_timeout("timeout_secs").is_err());
        assert_eq!(def.optional_timeout("absent").unwrap(), None);
    }

    #[test]
    fn test_zero_timeout_means_blocking() {
        let def = OperatorDef::new("DequeueBlobs", ["q"], ["x", "ok"]).arg("timeout_secs", 0i64);
        assert_eq!(def.optional_timeout("timeout_secs").unwrap(), None);
    }

    #[test]
    fn test_huge_timeouts() {
        let too_big = OperatorDef::new("DequeueBlobs", ["q"], ["x", "ok"]).arg("timeout_secs", 1e20);
        assert!(matches!(
            too_big.optional_timeout("timeout_secs"),
            Err(OperatorError::InvalidArgument { .. })
        ));

        // Representable as a Duration even if not as a deadline
        let far = OperatorDef::new("DequeueBlobs", ["q"], ["x", "ok"]).arg("timeout_secs", 1e19);
        assert_eq!(
            far.optional_timeout("timeout_secs").unwrap(),
            Some(Duration::from_secs_f64(1e19))
        );
    }

    #[test]
    fn test_unknown_operator() {
        let registry = OperatorRegistry::new();
        let def = OperatorDef::new("Nope", ["a"], ["b"]).on_device(DeviceOption::gpu(0));
        match registry.create(&def) {
            Err(OperatorError::UnknownOperator {
                op_type,
                device_type,
            }) => {
                assert_eq!(op_type, "Nope");
                assert_eq!(device_type, DeviceType::Gpu);
            }
            _ => panic!("expected unknown operator"),
        }
    }

    #[test]
    fn test_cpu_registry_contents() {
        let registry = OperatorRegistry::with_cpu_ops();
        for op in ["CreateBlobsQueue", "EnqueueBlobs", "DequeueBlobs", "CloseBlobsQueue"] {
            assert!(registry.contains(op, DeviceType::Cpu), "{} missing", op);
            assert!(!registry.contains(op, DeviceType::Gpu));
        }
    }
}
