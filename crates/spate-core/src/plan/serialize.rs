//! Plan serialization and the operator storage agent.
//!
//! The plan serializes to a self-contained snapshot: attributes as
//! `(token, encoded)` pairs, operators and streams in insertion order, and
//! each operator instance as an opaque byte blob produced by a
//! [`StorageAgent`]. Snapshot structs are `Vec`-based so output is
//! deterministic for a given build sequence; persistence of the resulting
//! bytes is the caller's responsibility.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::plan::context;
use crate::plan::error::PlanError;
use crate::plan::logical::LogicalPlan;
use crate::plan::operator::{seed_operator_ids_below, DefaultUnifier, Operator, OperatorMeta};
use crate::plan::ports::PortRef;
use crate::plan::stream::Locality;

/// File name the application master expects its serialized plan under.
pub const SER_FILE_NAME: &str = "dt-conf.ser";

/// File name of the launch configuration artifact.
pub const LAUNCH_CONFIG_FILE_NAME: &str = "dt-launch-config.xml";

/// Checkpoint subdirectory under the application path.
pub const SUBDIR_CHECKPOINTS: &str = "checkpoints";

/// Stats subdirectory under the application path.
pub const SUBDIR_STATS: &str = "stats";

/// Event-log subdirectory under the application path.
pub const SUBDIR_EVENTS: &str = "events";

/// Capability that persists operator instances.
///
/// The plan never assumes a specific backend; it hands each operator to
/// the agent on write and asks the agent to produce one on read.
pub trait StorageAgent: fmt::Debug {
    /// Writes `operator` to `sink`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the sink or the operator snapshot.
    fn store(&self, sink: &mut dyn Write, operator: &dyn Operator) -> io::Result<()>;

    /// Reads one operator back from `source`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the stream is malformed or the operator
    /// type is unknown.
    fn retrieve(&self, source: &mut dyn Read) -> io::Result<Box<dyn Operator>>;
}

/// Factory that rebuilds an operator from its snapshot bytes.
pub type OperatorFactory = fn(&[u8]) -> io::Result<Box<dyn Operator>>;

/// Maps operator type tags to rehydration factories.
#[derive(Debug)]
pub struct OperatorRegistry {
    factories: FxHashMap<&'static str, OperatorFactory>,
}

impl OperatorRegistry {
    /// Creates a registry pre-loaded with the built-in operators.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            factories: FxHashMap::default(),
        };
        registry.register("spate.DefaultUnifier", |_| Ok(Box::new(DefaultUnifier)));
        registry
    }

    /// Registers a factory for `type_tag`, replacing any previous one.
    pub fn register(&mut self, type_tag: &'static str, factory: OperatorFactory) {
        self.factories.insert(type_tag, factory);
    }

    /// Rebuilds an operator from its tag and snapshot bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if no factory is registered for `type_tag`,
    /// or the factory's own error.
    pub fn rebuild(&self, type_tag: &str, snapshot: &[u8]) -> io::Result<Box<dyn Operator>> {
        let factory = self.factories.get(type_tag).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown operator type tag: {type_tag}"),
            )
        })?;
        factory(snapshot)
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Default storage agent: a path-addressable byte store.
///
/// Streams are framed as `[tag length][tag][payload length][payload]` with
/// little-endian `u32` lengths. The same framing backs the
/// [`save`](Self::save)/[`load`](Self::load) file addressing used for
/// operator checkpoints.
#[derive(Debug, Clone)]
pub struct FsStorageAgent {
    base_path: PathBuf,
    registry: Arc<OperatorRegistry>,
}

impl FsStorageAgent {
    /// Creates an agent rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>, registry: Arc<OperatorRegistry>) -> Self {
        Self {
            base_path: base_path.into(),
            registry,
        }
    }

    /// The agent's base directory.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Stores `operator` under `<base>/<name>` and returns the path.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from directory creation or the write.
    pub fn save(&self, operator: &dyn Operator, name: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.base_path)?;
        let path = self.base_path.join(name);
        let mut file = File::create(&path)?;
        self.store(&mut file, operator)?;
        Ok(path)
    }

    /// Loads the operator stored under `<base>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the read, or `InvalidData` for unknown
    /// operator types.
    pub fn load(&self, name: &str) -> io::Result<Box<dyn Operator>> {
        let mut file = File::open(self.base_path.join(name))?;
        self.retrieve(&mut file)
    }
}

fn write_chunk(sink: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk exceeds u32 length"))?;
    sink.write_all(&len.to_le_bytes())?;
    sink.write_all(bytes)
}

fn read_chunk(source: &mut dyn Read) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    source.read_exact(&mut len)?;
    let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
    source.read_exact(&mut bytes)?;
    Ok(bytes)
}

impl StorageAgent for FsStorageAgent {
    fn store(&self, sink: &mut dyn Write, operator: &dyn Operator) -> io::Result<()> {
        write_chunk(sink, operator.type_tag().as_bytes())?;
        write_chunk(sink, &operator.snapshot()?)
    }

    fn retrieve(&self, source: &mut dyn Read) -> io::Result<Box<dyn Operator>> {
        let tag = String::from_utf8(read_chunk(source)?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let snapshot = read_chunk(source)?;
        self.registry.rebuild(&tag, &snapshot)
    }
}

#[derive(Serialize, Deserialize)]
struct PortAttributes {
    port: String,
    attributes: Vec<(String, String)>,
}

#[derive(Serialize, Deserialize)]
struct OperatorSnapshot {
    name: String,
    id: i32,
    attributes: Vec<(String, String)>,
    input_ports: Vec<PortAttributes>,
    output_ports: Vec<PortAttributes>,
    operator: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct StreamSnapshot {
    id: String,
    source: Option<PortRef>,
    sinks: Vec<PortRef>,
    locality: Option<Locality>,
}

#[derive(Serialize, Deserialize)]
struct PlanSnapshot {
    attributes: Vec<(String, String)>,
    operators: Vec<OperatorSnapshot>,
    streams: Vec<StreamSnapshot>,
}

impl LogicalPlan {
    /// Serializes the plan to `sink` as a self-contained object graph.
    ///
    /// Operator instances are handed to `agent`; attributes without a
    /// string codec are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Storage`] for agent failures and
    /// [`PlanError::Json`] for encoding failures.
    pub fn write(&self, sink: &mut dyn Write, agent: &dyn StorageAgent) -> Result<(), PlanError> {
        let mut operators = Vec::with_capacity(self.operator_count());
        for om in self.operators() {
            let mut payload = Vec::new();
            agent.store(&mut payload, om.operator())?;
            operators.push(OperatorSnapshot {
                name: om.name().to_string(),
                id: om.id(),
                attributes: om.attributes().encoded_entries(),
                input_ports: om
                    .input_ports()
                    .iter()
                    .map(|p| PortAttributes {
                        port: p.port_name().to_string(),
                        attributes: p.attributes().encoded_entries(),
                    })
                    .collect(),
                output_ports: om
                    .output_ports()
                    .iter()
                    .map(|p| PortAttributes {
                        port: p.port_name().to_string(),
                        attributes: p.attributes().encoded_entries(),
                    })
                    .collect(),
                operator: payload,
            });
        }
        let streams = self
            .streams()
            .map(|s| StreamSnapshot {
                id: s.id().to_string(),
                source: s.source().cloned(),
                sinks: s.sinks().to_vec(),
                locality: s.locality(),
            })
            .collect();
        let snapshot = PlanSnapshot {
            attributes: self.attributes().encoded_entries(),
            operators,
            streams,
        };
        serde_json::to_writer(sink, &snapshot)?;
        Ok(())
    }

    /// Reads a plan back from `source`, rebuilding operator instances
    /// through `agent` and rebinding attributes by token.
    ///
    /// The logical operator id sequencer is seeded below the minimum id
    /// seen so operators added afterwards get fresh ids.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Json`] for malformed snapshots,
    /// [`PlanError::Storage`] for agent failures, and attribute errors
    /// when a token cannot rebind.
    pub fn read(source: &mut dyn Read, agent: &dyn StorageAgent) -> Result<Self, PlanError> {
        context::register_builtins();
        let snapshot: PlanSnapshot = serde_json::from_reader(source)?;

        let mut plan = LogicalPlan::new();
        for (token, encoded) in &snapshot.attributes {
            plan.attributes_mut().decode_and_put(token, encoded)?;
        }

        let mut min_id = 0;
        for os in snapshot.operators {
            min_id = min_id.min(os.id);
            let operator = agent.retrieve(&mut os.operator.as_slice())?;
            plan.insert_operator_meta(OperatorMeta::with_id(os.id, os.name.clone(), operator)?)?;

            let Some(om) = plan.operator_mut(&os.name) else {
                continue;
            };
            for (token, encoded) in &os.attributes {
                om.attributes_mut().decode_and_put(token, encoded)?;
            }
            for pa in &os.input_ports {
                let pm = om.input_port_mut(&pa.port).ok_or_else(|| {
                    PlanError::PortNotFound(PortRef::new(os.name.clone(), pa.port.clone()))
                })?;
                for (token, encoded) in &pa.attributes {
                    pm.attributes_mut().decode_and_put(token, encoded)?;
                }
            }
            for pa in &os.output_ports {
                let pm = om.output_port_mut(&pa.port).ok_or_else(|| {
                    PlanError::PortNotFound(PortRef::new(os.name.clone(), pa.port.clone()))
                })?;
                for (token, encoded) in &pa.attributes {
                    pm.attributes_mut().decode_and_put(token, encoded)?;
                }
            }
        }
        seed_operator_ids_below(min_id);

        for ss in snapshot.streams {
            plan.add_stream(ss.id.clone())?;
            if let Some(source) = ss.source {
                plan.set_stream_source(&ss.id, source)?;
            }
            for sink in ss.sinks {
                plan.add_stream_sink(&ss.id, sink)?;
            }
            plan.set_stream_locality(&ss.id, ss.locality)?;
        }
        Ok(plan)
    }
}
