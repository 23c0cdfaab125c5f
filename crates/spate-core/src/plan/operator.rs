//! Operator trait, descriptors, and per-operator plan metadata.
//!
//! Operators declare their shape through an [`OperatorDescriptor`] built
//! explicitly by the operator author. The plan materializes the descriptor
//! into [`OperatorMeta`]: the owned operator instance, its port metadata,
//! attributes, wiring adjacency, and validator scratch state.

use std::any::Any;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::attr::{Attr, AttrType, AttributeMap};
use crate::plan::error::PlanError;
use crate::plan::metrics::{MetricAggregatorMeta, MetricKind};
use crate::plan::ports::{InputPortMeta, OutputPortMeta};

/// Process-global sequencer for logical operator ids. Ids decrease from -1
/// so they never collide with physical operator ids assigned upward.
static OPERATOR_ID_SEQ: AtomicI32 = AtomicI32::new(0);

fn next_operator_id() -> i32 {
    OPERATOR_ID_SEQ.fetch_sub(1, Ordering::SeqCst) - 1
}

/// Moves the sequencer so the next assigned id is below `id`. Called after
/// deserialization with the minimum id seen in the loaded plan.
pub(crate) fn seed_operator_ids_below(id: i32) {
    OPERATOR_ID_SEQ.fetch_min(id, Ordering::SeqCst);
}

/// Delivery-semantics contract of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Tuples may be lost on failure; never replayed.
    AtMostOnce,
    /// Tuples may be replayed on failure.
    AtLeastOnce,
    /// Tuples are processed exactly once; downstream must be at-most-once.
    ExactlyOnce,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AtMostOnce => "AT_MOST_ONCE",
            Self::AtLeastOnce => "AT_LEAST_ONCE",
            Self::ExactlyOnce => "EXACTLY_ONCE",
        };
        f.write_str(name)
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AT_MOST_ONCE" => Ok(Self::AtMostOnce),
            "AT_LEAST_ONCE" => Ok(Self::AtLeastOnce),
            "EXACTLY_ONCE" => Ok(Self::ExactlyOnce),
            other => Err(format!("unknown processing mode: {other}")),
        }
    }
}

/// Capability for operators that control their own partitioning. Consulted
/// by the physical planner (out of scope here) when scaling an operator.
pub trait Partitioner: fmt::Debug + Send + Sync {
    /// Desired number of physical partitions given the current count.
    fn target_partition_count(&self, current: usize) -> usize;
}

/// A user-supplied stateful processing node.
///
/// The plan owns operator instances as trait objects; execution semantics
/// live entirely in the runtime. Implementations describe their ports and
/// class-level traits through [`descriptor`](Operator::descriptor), and
/// provide a byte snapshot so storage agents can persist them.
pub trait Operator: fmt::Debug + Send {
    /// Declares ports, class annotations, capabilities, and metrics.
    fn descriptor(&self) -> OperatorDescriptor;

    /// Stable identity used to locate a rehydration factory on load.
    fn type_tag(&self) -> &'static str;

    /// The operator as [`Any`], for constraint checkers that downcast.
    fn as_any(&self) -> &dyn Any;

    /// Serializes the operator's configuration to bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the state cannot be encoded.
    fn snapshot(&self) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Factory producing a fresh unifier instance for an output port.
pub type UnifierFactory = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

struct InputPortSpec {
    name: String,
    optional: bool,
    app_data_query: bool,
}

struct OutputPortSpec {
    name: String,
    optional: bool,
    app_data_result: bool,
    unifier: Option<UnifierFactory>,
}

/// One declared auto-metric source: a field or a bean-style read accessor.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    name: String,
    kind: MetricKind,
}

impl MetricSpec {
    /// The metric name (field or accessor name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The metric's numeric kind.
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.kind
    }
}

/// Explicit declaration of an operator's ports, class annotations,
/// capabilities, and auto-metrics.
///
/// # Example
///
/// ```rust
/// use spate_core::plan::{MetricKind, OperatorDescriptor};
///
/// let descriptor = OperatorDescriptor::builder()
///     .input("in")
///     .optional_input("side")
///     .output("out")
///     .metric_field("bytes_in", MetricKind::Integral)
///     .build();
/// ```
pub struct OperatorDescriptor {
    inputs: Vec<InputPortSpec>,
    outputs: Vec<OutputPortSpec>,
    partitionable: bool,
    checkpointable_within_app_window: bool,
    input_operator: bool,
    partitioner: bool,
    metric_fields: Vec<MetricSpec>,
    metric_accessors: Vec<MetricSpec>,
}

impl OperatorDescriptor {
    /// Starts a descriptor with no ports, partitionable and checkpointable
    /// anywhere by default.
    #[must_use]
    pub fn builder() -> OperatorDescriptorBuilder {
        OperatorDescriptorBuilder {
            descriptor: Self {
                inputs: Vec::new(),
                outputs: Vec::new(),
                partitionable: true,
                checkpointable_within_app_window: true,
                input_operator: false,
                partitioner: false,
                metric_fields: Vec::new(),
                metric_accessors: Vec::new(),
            },
        }
    }
}

impl fmt::Debug for OperatorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorDescriptor")
            .field("inputs", &self.inputs.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("outputs", &self.outputs.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("partitionable", &self.partitionable)
            .field("input_operator", &self.input_operator)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`OperatorDescriptor`].
pub struct OperatorDescriptorBuilder {
    descriptor: OperatorDescriptor,
}

impl OperatorDescriptorBuilder {
    /// Declares a required input port.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.descriptor.inputs.push(InputPortSpec {
            name: name.into(),
            optional: false,
            app_data_query: false,
        });
        self
    }

    /// Declares an input port that may stay unconnected.
    #[must_use]
    pub fn optional_input(mut self, name: impl Into<String>) -> Self {
        self.descriptor.inputs.push(InputPortSpec {
            name: name.into(),
            optional: true,
            app_data_query: false,
        });
        self
    }

    /// Declares an optional input port that accepts application-data
    /// queries.
    #[must_use]
    pub fn query_input(mut self, name: impl Into<String>) -> Self {
        self.descriptor.inputs.push(InputPortSpec {
            name: name.into(),
            optional: true,
            app_data_query: true,
        });
        self
    }

    /// Declares a required output port.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.descriptor.outputs.push(OutputPortSpec {
            name: name.into(),
            optional: false,
            app_data_result: false,
            unifier: None,
        });
        self
    }

    /// Declares an output port that may stay unconnected.
    #[must_use]
    pub fn optional_output(mut self, name: impl Into<String>) -> Self {
        self.descriptor.outputs.push(OutputPortSpec {
            name: name.into(),
            optional: true,
            app_data_result: false,
            unifier: None,
        });
        self
    }

    /// Declares an optional output port that publishes application-data
    /// results.
    #[must_use]
    pub fn result_output(mut self, name: impl Into<String>) -> Self {
        self.descriptor.outputs.push(OutputPortSpec {
            name: name.into(),
            optional: true,
            app_data_result: true,
            unifier: None,
        });
        self
    }

    /// Declares a required output port with a custom unifier.
    #[must_use]
    pub fn output_with_unifier(mut self, name: impl Into<String>, unifier: UnifierFactory) -> Self {
        self.descriptor.outputs.push(OutputPortSpec {
            name: name.into(),
            optional: false,
            app_data_result: false,
            unifier: Some(unifier),
        });
        self
    }

    /// Marks the operator class as not partitionable.
    #[must_use]
    pub fn not_partitionable(mut self) -> Self {
        self.descriptor.partitionable = false;
        self
    }

    /// Marks the operator as not checkpointable in the middle of an
    /// application window.
    #[must_use]
    pub fn not_checkpointable_within_app_window(mut self) -> Self {
        self.descriptor.checkpointable_within_app_window = false;
        self
    }

    /// Marks the operator as an input operator (a valid plan root).
    #[must_use]
    pub fn input_operator(mut self) -> Self {
        self.descriptor.input_operator = true;
        self
    }

    /// Marks the operator class as implementing the partitioner capability.
    #[must_use]
    pub fn partitioner_capability(mut self) -> Self {
        self.descriptor.partitioner = true;
        self
    }

    /// Declares an auto-metric field.
    #[must_use]
    pub fn metric_field(mut self, name: impl Into<String>, kind: MetricKind) -> Self {
        self.descriptor.metric_fields.push(MetricSpec {
            name: name.into(),
            kind,
        });
        self
    }

    /// Declares an auto-metric read accessor.
    #[must_use]
    pub fn metric_accessor(mut self, name: impl Into<String>, kind: MetricKind) -> Self {
        self.descriptor.metric_accessors.push(MetricSpec {
            name: name.into(),
            kind,
        });
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> OperatorDescriptor {
        self.descriptor
    }
}

/// Class-level annotations and capabilities captured from the descriptor.
#[derive(Debug, Clone, Copy)]
struct OperatorClass {
    partitionable: bool,
    checkpointable_within_app_window: bool,
    input_operator: bool,
    partitioner: bool,
}

/// Wiring-ordered adjacency: `(port name, stream id)` pairs.
pub type PortStreams = SmallVec<[(String, String); 4]>;

/// Per-operator metadata held by the plan.
///
/// Owns the user operator instance, its materialized port metadata, the
/// operator-scope attribute map, and the adjacency between ports and
/// streams. Also carries transient validator scratch that is reset at the
/// start of every validation run.
pub struct OperatorMeta {
    name: String,
    id: i32,
    operator: Box<dyn Operator>,
    class: OperatorClass,
    attributes: AttributeMap,
    in_ports: Vec<InputPortMeta>,
    out_ports: Vec<OutputPortMeta>,
    input_streams: PortStreams,
    output_streams: PortStreams,
    metric_fields: Vec<MetricSpec>,
    metric_accessors: Vec<MetricSpec>,
    metric_aggregator: Option<MetricAggregatorMeta>,
    // Tarjan scratch
    pub(crate) nindex: Option<u32>,
    pub(crate) lowlink: u32,
    // OIO scratch: visited flag kept apart from the root value so an
    // unset root never doubles as a not-yet-visited sentinel.
    pub(crate) oio_visited: bool,
    pub(crate) oio_root: Option<i32>,
}

impl OperatorMeta {
    pub(crate) fn new(name: String, operator: Box<dyn Operator>) -> Result<Self, PlanError> {
        Self::build(name, operator, AttributeMap::new(), None)
    }

    pub(crate) fn with_attributes(
        name: String,
        operator: Box<dyn Operator>,
        attributes: AttributeMap,
    ) -> Result<Self, PlanError> {
        Self::build(name, operator, attributes, None)
    }

    pub(crate) fn with_id(
        id: i32,
        name: String,
        operator: Box<dyn Operator>,
    ) -> Result<Self, PlanError> {
        Self::build(name, operator, AttributeMap::new(), Some(id))
    }

    fn build(
        name: String,
        operator: Box<dyn Operator>,
        attributes: AttributeMap,
        id: Option<i32>,
    ) -> Result<Self, PlanError> {
        tracing::debug!(operator = %name, operator_type = operator.type_tag(), "initializing operator");
        let descriptor = operator.descriptor();

        let mut seen = FxHashSet::default();
        for port in descriptor
            .inputs
            .iter()
            .map(|p| &p.name)
            .chain(descriptor.outputs.iter().map(|p| &p.name))
        {
            if !seen.insert(port.clone()) {
                return Err(PlanError::DuplicatePortName {
                    operator: name,
                    port: port.clone(),
                });
            }
        }

        let in_ports = descriptor
            .inputs
            .into_iter()
            .map(|p| InputPortMeta::new(name.clone(), p.name, p.optional, p.app_data_query))
            .collect();
        let out_ports = descriptor
            .outputs
            .into_iter()
            .map(|p| {
                OutputPortMeta::new(name.clone(), p.name, p.optional, p.app_data_result, p.unifier)
            })
            .collect();

        Ok(Self {
            name,
            id: id.unwrap_or_else(next_operator_id),
            operator,
            class: OperatorClass {
                partitionable: descriptor.partitionable,
                checkpointable_within_app_window: descriptor.checkpointable_within_app_window,
                input_operator: descriptor.input_operator,
                partitioner: descriptor.partitioner,
            },
            attributes,
            in_ports,
            out_ports,
            input_streams: SmallVec::new(),
            output_streams: SmallVec::new(),
            metric_fields: descriptor.metric_fields,
            metric_accessors: descriptor.metric_accessors,
            metric_aggregator: None,
            nindex: None,
            lowlink: 0,
            oio_visited: false,
            oio_root: None,
        })
    }

    /// The operator's unique name within the plan.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operator's logical id (negative, process-unique).
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The owned user operator.
    #[must_use]
    pub fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }

    /// The operator-scope attribute map.
    #[must_use]
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Mutable access to the operator-scope attribute map.
    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    /// Attribute lookup with plan-scope fallback: own value, else the
    /// plan's, else the key default.
    #[must_use]
    pub fn value_with<T: AttrType>(&self, plan_attributes: &AttributeMap, key: &Attr<T>) -> Option<T> {
        self.attributes
            .get(key)
            .or_else(|| plan_attributes.get(key))
            .or_else(|| key.default_value())
    }

    /// Declared input ports, in declaration order.
    #[must_use]
    pub fn input_ports(&self) -> &[InputPortMeta] {
        &self.in_ports
    }

    /// Declared output ports, in declaration order.
    #[must_use]
    pub fn output_ports(&self) -> &[OutputPortMeta] {
        &self.out_ports
    }

    /// Looks up a declared input port by name.
    #[must_use]
    pub fn input_port(&self, name: &str) -> Option<&InputPortMeta> {
        self.in_ports.iter().find(|p| p.port_name() == name)
    }

    pub(crate) fn input_port_mut(&mut self, name: &str) -> Option<&mut InputPortMeta> {
        self.in_ports.iter_mut().find(|p| p.port_name() == name)
    }

    /// Looks up a declared output port by name.
    #[must_use]
    pub fn output_port(&self, name: &str) -> Option<&OutputPortMeta> {
        self.out_ports.iter().find(|p| p.port_name() == name)
    }

    pub(crate) fn output_port_mut(&mut self, name: &str) -> Option<&mut OutputPortMeta> {
        self.out_ports.iter_mut().find(|p| p.port_name() == name)
    }

    /// Wiring-ordered `(input port, stream id)` adjacency.
    #[must_use]
    pub fn input_streams(&self) -> &[(String, String)] {
        &self.input_streams
    }

    /// Wiring-ordered `(output port, stream id)` adjacency.
    #[must_use]
    pub fn output_streams(&self) -> &[(String, String)] {
        &self.output_streams
    }

    /// The stream attached to the named input port, if any.
    #[must_use]
    pub fn input_stream_for(&self, port: &str) -> Option<&str> {
        self.input_streams
            .iter()
            .find(|(p, _)| p == port)
            .map(|(_, s)| s.as_str())
    }

    /// The stream attached to the named output port, if any.
    #[must_use]
    pub fn output_stream_for(&self, port: &str) -> Option<&str> {
        self.output_streams
            .iter()
            .find(|(p, _)| p == port)
            .map(|(_, s)| s.as_str())
    }

    pub(crate) fn connect_input(&mut self, port: String, stream: String) {
        self.input_streams.push((port, stream));
    }

    pub(crate) fn connect_output(&mut self, port: String, stream: String) {
        self.output_streams.push((port, stream));
    }

    pub(crate) fn disconnect_input(&mut self, port: &str) {
        self.input_streams.retain(|(p, _)| p != port);
    }

    pub(crate) fn disconnect_output(&mut self, port: &str) {
        self.output_streams.retain(|(p, _)| p != port);
    }

    /// Whether the class annotation allows partitioning.
    #[must_use]
    pub fn partitionable(&self) -> bool {
        self.class.partitionable
    }

    /// Whether the operator may checkpoint mid application window.
    #[must_use]
    pub fn checkpointable_within_app_window(&self) -> bool {
        self.class.checkpointable_within_app_window
    }

    /// Whether the operator supports the input-operator capability.
    #[must_use]
    pub fn is_input_operator(&self) -> bool {
        self.class.input_operator
    }

    /// Whether the operator class implements the partitioner capability.
    #[must_use]
    pub fn has_partitioner_capability(&self) -> bool {
        self.class.partitioner
    }

    /// Declared auto-metric fields.
    #[must_use]
    pub fn metric_fields(&self) -> &[MetricSpec] {
        &self.metric_fields
    }

    /// Declared auto-metric accessors.
    #[must_use]
    pub fn metric_accessors(&self) -> &[MetricSpec] {
        &self.metric_accessors
    }

    /// Metric-aggregator metadata, populated during validation.
    #[must_use]
    pub fn metric_aggregator_meta(&self) -> Option<&MetricAggregatorMeta> {
        self.metric_aggregator.as_ref()
    }

    pub(crate) fn set_metric_aggregator(&mut self, meta: MetricAggregatorMeta) {
        self.metric_aggregator = Some(meta);
    }

    pub(crate) fn reset_scratch(&mut self) {
        self.nindex = None;
        self.lowlink = 0;
        self.oio_visited = false;
        self.oio_root = None;
    }
}

impl fmt::Debug for OperatorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorMeta")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("operator", &self.operator)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

// Identity is the plan-unique name; the attribute map takes no part in
// equality or hashing.
impl PartialEq for OperatorMeta {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for OperatorMeta {}

impl std::hash::Hash for OperatorMeta {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Pass-through unifier attached to output ports that do not supply their
/// own. Merges partitioned physical streams without reordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUnifier;

impl Operator for DefaultUnifier {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .optional_input("input")
            .optional_output("output")
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "spate.DefaultUnifier"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Unifier wrapper that re-emits aggregates over a sliding window: it keeps
/// `number_of_buckets` partial aggregates and unifies the trailing
/// `number_of_sliding_windows` buckets on each application window boundary.
#[derive(Debug)]
pub struct Slider {
    unifier: Box<dyn Operator>,
    number_of_buckets: u32,
    number_of_sliding_windows: u32,
}

impl Slider {
    /// Wraps `unifier` with sliding-window bucketing.
    #[must_use]
    pub fn new(unifier: Box<dyn Operator>, number_of_buckets: u32, number_of_sliding_windows: u32) -> Self {
        Self {
            unifier,
            number_of_buckets,
            number_of_sliding_windows,
        }
    }

    /// The wrapped unifier.
    #[must_use]
    pub fn unifier(&self) -> &dyn Operator {
        self.unifier.as_ref()
    }

    /// Number of partial-aggregate buckets kept.
    #[must_use]
    pub fn number_of_buckets(&self) -> u32 {
        self.number_of_buckets
    }

    /// Number of trailing buckets unified per emission.
    #[must_use]
    pub fn number_of_sliding_windows(&self) -> u32 {
        self.number_of_sliding_windows
    }
}

impl Operator for Slider {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .optional_input("input")
            .optional_output("output")
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "spate.Slider"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
