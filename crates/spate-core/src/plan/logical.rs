//! The logical plan: operators and streams wired into a dataflow graph.
//!
//! Operators have ports that are connected through streams. Ports can be
//! mandatory or optional with respect to their need to connect a stream to
//! them. Each port can be connected to a single stream only. A stream has
//! to be connected to one output port and can go to multiple input ports.
//!
//! The plan is serialized and deployed to the cluster, where it is
//! translated into the physical plan. It is not a concurrent structure:
//! construction and validation happen on one thread, and a failed builder
//! call leaves the plan untouched.

use std::collections::hash_map::Entry;
use std::fmt;

use fxhash::{FxHashMap, FxHashSet};

use crate::attr::{Attr, AttrType, AttributeMap};
use crate::plan::constraint::{ConstraintChecker, NoopConstraintChecker};
use crate::plan::context;
use crate::plan::error::PlanError;
use crate::plan::metrics::{infer_default_aggregator, MetricAggregatorMeta, MetricsAggregator};
use crate::plan::operator::{Operator, OperatorMeta, ProcessingMode};
use crate::plan::ports::{InputPortMeta, OutputPortMeta, PortRef};
use crate::plan::stream::{Locality, StreamMeta};
use std::sync::Arc;

/// The logical declaration of a dataflow application.
///
/// Owns all operator and stream metadata. Lookup tables are hash maps;
/// iteration always follows explicit insertion-order vectors so that two
/// plans built with the same call sequence behave and serialize
/// identically.
pub struct LogicalPlan {
    operators: FxHashMap<String, OperatorMeta>,
    operator_order: Vec<String>,
    streams: FxHashMap<String, StreamMeta>,
    stream_order: Vec<String>,
    /// Operators with no inbound stream, in the order they became roots.
    root_operators: Vec<String>,
    attributes: AttributeMap,
    constraint_checker: Box<dyn ConstraintChecker>,
}

impl LogicalPlan {
    /// Creates an empty plan with the no-op constraint checker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operators: FxHashMap::default(),
            operator_order: Vec::new(),
            streams: FxHashMap::default(),
            stream_order: Vec::new(),
            root_operators: Vec::new(),
            attributes: AttributeMap::new(),
            constraint_checker: Box::new(NoopConstraintChecker),
        }
    }

    /// Replaces the constraint checker consulted by [`validate`](Self::validate).
    pub fn set_constraint_checker(&mut self, checker: Box<dyn ConstraintChecker>) {
        self.constraint_checker = checker;
    }

    // ---- Construction ----

    /// Adds an operator under a plan-unique name.
    ///
    /// The new operator enters the root set; it leaves the first time one
    /// of its input ports becomes a stream sink.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DuplicateOperator`] if the name is taken, or
    /// [`PlanError::DuplicatePortName`] if the operator's descriptor
    /// declares two ports with the same name.
    pub fn add_operator(
        &mut self,
        name: impl Into<String>,
        operator: Box<dyn Operator>,
    ) -> Result<&mut OperatorMeta, PlanError> {
        match self.operators.entry(name.into()) {
            Entry::Occupied(e) => Err(PlanError::DuplicateOperator(e.key().clone())),
            Entry::Vacant(e) => {
                let meta = OperatorMeta::new(e.key().clone(), operator)?;
                self.operator_order.push(e.key().clone());
                self.root_operators.push(e.key().clone());
                Ok(e.insert(meta))
            }
        }
    }

    pub(crate) fn insert_operator_meta(
        &mut self,
        meta: OperatorMeta,
    ) -> Result<(), PlanError> {
        match self.operators.entry(meta.name().to_string()) {
            Entry::Occupied(e) => Err(PlanError::DuplicateOperator(e.key().clone())),
            Entry::Vacant(e) => {
                self.operator_order.push(e.key().clone());
                self.root_operators.push(e.key().clone());
                e.insert(meta);
                Ok(())
            }
        }
    }

    /// Creates an empty stream under a plan-unique id.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DuplicateStream`] if the id is taken.
    pub fn add_stream(&mut self, id: impl Into<String>) -> Result<&mut StreamMeta, PlanError> {
        match self.streams.entry(id.into()) {
            Entry::Occupied(e) => Err(PlanError::DuplicateStream(e.key().clone())),
            Entry::Vacant(e) => {
                let meta = StreamMeta::new(e.key().clone());
                self.stream_order.push(e.key().clone());
                Ok(e.insert(meta))
            }
        }
    }

    /// Sets the stream's source output port.
    ///
    /// Re-pointing a stream detaches the previous source port first.
    ///
    /// # Errors
    ///
    /// Fails if the stream, operator, or port does not exist, or with
    /// [`PlanError::OutputAlreadyConnected`] if the owning operator
    /// already has a stream on that output port.
    pub fn set_stream_source(
        &mut self,
        stream_id: &str,
        source: impl Into<PortRef>,
    ) -> Result<(), PlanError> {
        let source: PortRef = source.into();
        if !self.streams.contains_key(stream_id) {
            return Err(PlanError::StreamNotFound(stream_id.to_string()));
        }
        let om = self
            .operators
            .get(&source.operator)
            .ok_or_else(|| PlanError::OperatorNotFound(source.operator.clone()))?;
        if om.output_port(&source.port).is_none() {
            return Err(PlanError::PortNotFound(source));
        }
        if let Some(existing) = om.output_stream_for(&source.port) {
            return Err(PlanError::OutputAlreadyConnected {
                operator: source.operator,
                port: source.port,
                stream: existing.to_string(),
            });
        }

        let previous = self
            .streams
            .get_mut(stream_id)
            .and_then(|s| s.set_source(source.clone()));
        if let Some(previous) = previous {
            if let Some(om) = self.operators.get_mut(&previous.operator) {
                om.disconnect_output(&previous.port);
            }
        }
        if let Some(om) = self.operators.get_mut(&source.operator) {
            om.connect_output(source.port, stream_id.to_string());
        }
        Ok(())
    }

    /// Appends a sink input port to the stream.
    ///
    /// The sink's operator leaves the root set.
    ///
    /// # Errors
    ///
    /// Fails if the stream, operator, or port does not exist, or with
    /// [`PlanError::InputAlreadyConnected`] if the input port is already
    /// bound in any stream.
    pub fn add_stream_sink(
        &mut self,
        stream_id: &str,
        sink: impl Into<PortRef>,
    ) -> Result<(), PlanError> {
        let sink: PortRef = sink.into();
        if !self.streams.contains_key(stream_id) {
            return Err(PlanError::StreamNotFound(stream_id.to_string()));
        }
        let om = self
            .operators
            .get(&sink.operator)
            .ok_or_else(|| PlanError::OperatorNotFound(sink.operator.clone()))?;
        if om.input_port(&sink.port).is_none() {
            return Err(PlanError::PortNotFound(sink));
        }
        if let Some(existing) = om.input_stream_for(&sink.port) {
            return Err(PlanError::InputAlreadyConnected {
                operator: sink.operator,
                port: sink.port,
                stream: existing.to_string(),
            });
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.push_sink(sink.clone());
        }
        if let Some(om) = self.operators.get_mut(&sink.operator) {
            om.connect_input(sink.port.clone(), stream_id.to_string());
        }
        self.root_operators.retain(|n| n != &sink.operator);
        Ok(())
    }

    /// Sets or clears the stream's locality hint.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StreamNotFound`] for an unknown id.
    pub fn set_stream_locality(
        &mut self,
        stream_id: &str,
        locality: Option<Locality>,
    ) -> Result<(), PlanError> {
        self.streams
            .get_mut(stream_id)
            .ok_or_else(|| PlanError::StreamNotFound(stream_id.to_string()))?
            .set_locality(locality);
        Ok(())
    }

    /// Creates a stream and wires its source and sinks in one call.
    ///
    /// # Errors
    ///
    /// Propagates the first failure from [`add_stream`](Self::add_stream),
    /// [`set_stream_source`](Self::set_stream_source), or
    /// [`add_stream_sink`](Self::add_stream_sink); wiring applied before
    /// the failure remains, as with the granular calls.
    pub fn connect<S, I>(&mut self, id: &str, source: S, sinks: I) -> Result<(), PlanError>
    where
        S: Into<PortRef>,
        I: IntoIterator,
        I::Item: Into<PortRef>,
    {
        self.add_stream(id)?;
        self.set_stream_source(id, source)?;
        for sink in sinks {
            self.add_stream_sink(id, sink)?;
        }
        Ok(())
    }

    /// Removes a stream, detaching all endpoints.
    ///
    /// Sink operators left without any inbound stream return to the root
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StreamNotFound`] for an unknown id.
    pub fn remove_stream(&mut self, stream_id: &str) -> Result<(), PlanError> {
        let mut stream = self
            .streams
            .remove(stream_id)
            .ok_or_else(|| PlanError::StreamNotFound(stream_id.to_string()))?;
        let (source, sinks) = stream.take_endpoints();

        for sink in &sinks {
            if let Some(om) = self.operators.get_mut(&sink.operator) {
                om.disconnect_input(&sink.port);
                if om.input_streams().is_empty() {
                    self.root_operators.push(sink.operator.clone());
                }
            }
        }
        if let Some(source) = &source {
            if let Some(om) = self.operators.get_mut(&source.operator) {
                om.disconnect_output(&source.port);
            }
        }
        self.stream_order.retain(|s| s != stream_id);
        Ok(())
    }

    /// Removes an operator from the plan.
    ///
    /// The operator's input ports are unbound from the streams they sink,
    /// and every stream sourced on the operator is removed entirely (which
    /// re-promotes newly isolated sink operators to roots).
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::OperatorNotFound`] for an unknown name.
    pub fn remove_operator(&mut self, name: &str) -> Result<(), PlanError> {
        let (inputs, outputs) = {
            let om = self
                .operators
                .get(name)
                .ok_or_else(|| PlanError::OperatorNotFound(name.to_string()))?;
            (
                om.input_streams().to_vec(),
                om.output_streams()
                    .iter()
                    .map(|(_, sid)| sid.clone())
                    .collect::<Vec<_>>(),
            )
        };

        for (port, stream_id) in &inputs {
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.retain_sinks(|r| !(r.operator == name && &r.port == port));
            }
        }
        for stream_id in outputs {
            self.remove_stream(&stream_id)?;
        }

        self.operators.remove(name);
        self.operator_order.retain(|n| n != name);
        self.root_operators.retain(|n| n != name);
        Ok(())
    }

    // ---- Accessors ----

    /// Number of operators in the plan.
    #[must_use]
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Number of streams in the plan.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// All operators, in insertion order.
    pub fn operators(&self) -> impl Iterator<Item = &OperatorMeta> {
        self.operator_order.iter().filter_map(|n| self.operators.get(n))
    }

    /// All streams, in insertion order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamMeta> {
        self.stream_order.iter().filter_map(|s| self.streams.get(s))
    }

    /// Looks up an operator by name.
    #[must_use]
    pub fn operator(&self, name: &str) -> Option<&OperatorMeta> {
        self.operators.get(name)
    }

    /// Mutable lookup of an operator by name.
    pub fn operator_mut(&mut self, name: &str) -> Option<&mut OperatorMeta> {
        self.operators.get_mut(name)
    }

    /// Looks up a stream by id.
    #[must_use]
    pub fn stream(&self, id: &str) -> Option<&StreamMeta> {
        self.streams.get(id)
    }

    /// Mutable lookup of a stream by id.
    pub fn stream_mut(&mut self, id: &str) -> Option<&mut StreamMeta> {
        self.streams.get_mut(id)
    }

    /// Names of root operators (no inbound stream), in root order.
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.root_operators
    }

    /// Root operator metadata, in root order.
    pub fn root_operators(&self) -> impl Iterator<Item = &OperatorMeta> {
        self.root_operators.iter().filter_map(|n| self.operators.get(n))
    }

    /// The plan-scope attribute map.
    #[must_use]
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Mutable access to the plan-scope attribute map.
    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    /// Plan-scope attribute lookup: stored value, else the key default.
    #[must_use]
    pub fn value<T: AttrType>(&self, key: &Attr<T>) -> Option<T> {
        self.attributes.value(key)
    }

    /// Operator-scope attribute lookup: operator value, else plan value,
    /// else the key default.
    #[must_use]
    pub fn operator_value<T: AttrType>(&self, operator: &str, key: &Attr<T>) -> Option<T> {
        self.operators
            .get(operator)
            .and_then(|om| om.value_with(&self.attributes, key))
    }

    /// Sets a plan-scope attribute.
    pub fn set_attribute<T: AttrType>(&mut self, key: &'static Attr<T>, value: T) {
        self.attributes.put(key, value);
    }

    /// Sets an operator-scope attribute.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::OperatorNotFound`] for an unknown operator.
    pub fn set_operator_attribute<T: AttrType>(
        &mut self,
        operator: &str,
        key: &'static Attr<T>,
        value: T,
    ) -> Result<(), PlanError> {
        self.operators
            .get_mut(operator)
            .ok_or_else(|| PlanError::OperatorNotFound(operator.to_string()))?
            .attributes_mut()
            .put(key, value);
        Ok(())
    }

    /// Sets an attribute on an input port.
    ///
    /// # Errors
    ///
    /// Fails if the operator or port does not exist.
    pub fn set_input_port_attribute<T: AttrType>(
        &mut self,
        port: impl Into<PortRef>,
        key: &'static Attr<T>,
        value: T,
    ) -> Result<(), PlanError> {
        self.input_port_meta_mut(&port.into())?
            .attributes_mut()
            .put(key, value);
        Ok(())
    }

    /// Sets an attribute on an output port.
    ///
    /// # Errors
    ///
    /// Fails if the operator or port does not exist.
    pub fn set_output_port_attribute<T: AttrType>(
        &mut self,
        port: impl Into<PortRef>,
        key: &'static Attr<T>,
        value: T,
    ) -> Result<(), PlanError> {
        self.output_port_meta_mut(&port.into())?
            .attributes_mut()
            .put(key, value);
        Ok(())
    }

    /// Sets an attribute on the unifier of an output port, creating the
    /// unifier sub-operator if needed.
    ///
    /// # Errors
    ///
    /// Fails if the operator or port does not exist, or if the unifier
    /// cannot be materialized.
    pub fn set_unifier_attribute<T: AttrType>(
        &mut self,
        port: impl Into<PortRef>,
        key: &'static Attr<T>,
        value: T,
    ) -> Result<(), PlanError> {
        self.output_port_meta_mut(&port.into())?
            .unifier_meta()?
            .attributes_mut()
            .put(key, value);
        Ok(())
    }

    fn input_port_meta_mut(&mut self, port: &PortRef) -> Result<&mut InputPortMeta, PlanError> {
        self.operators
            .get_mut(&port.operator)
            .ok_or_else(|| PlanError::OperatorNotFound(port.operator.clone()))?
            .input_port_mut(&port.port)
            .ok_or_else(|| PlanError::PortNotFound(port.clone()))
    }

    fn output_port_meta_mut(&mut self, port: &PortRef) -> Result<&mut OutputPortMeta, PlanError> {
        self.operators
            .get_mut(&port.operator)
            .ok_or_else(|| PlanError::OperatorNotFound(port.operator.clone()))?
            .output_port_mut(&port.port)
            .ok_or_else(|| PlanError::PortNotFound(port.clone()))
    }

    // ---- Launch context helpers ----

    /// Upper bound on container requests.
    #[must_use]
    pub fn max_container_count(&self) -> i32 {
        self.value(&context::CONTAINERS_MAX_COUNT).unwrap_or(i32::MAX)
    }

    /// Whether debug behavior is requested.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.value(&context::DEBUG).unwrap_or(false)
    }

    /// Memory granted to the application master, in megabytes.
    #[must_use]
    pub fn master_memory_mb(&self) -> u32 {
        self.value(&context::MASTER_MEMORY_MB).unwrap_or(1024)
    }

    /// Extra JVM options for launched containers, if configured.
    #[must_use]
    pub fn master_jvm_options(&self) -> Option<String> {
        self.value(&context::CONTAINER_JVM_OPTIONS)
    }

    /// The persistent application path.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ApplicationPathMissing`] if the attribute is
    /// unset.
    pub fn assert_app_path(&self) -> Result<String, PlanError> {
        self.attributes
            .get(&context::APPLICATION_PATH)
            .ok_or(PlanError::ApplicationPathMissing)
    }

    // ---- Validation ----

    /// Validates the plan.
    ///
    /// Runs, in order: per-operator checks (field constraints, class
    /// annotations, port connectivity, thread-local fan-in), cycle
    /// detection over the stream graph, dangling-stream and root-operator
    /// checks, processing-mode propagation from the roots, and
    /// metric-aggregator population. Validation scratch state is reset on
    /// entry, so the call is idempotent on a valid plan.
    ///
    /// # Errors
    ///
    /// Returns the first failed check; the plan remains structurally
    /// unchanged apart from inherited processing-mode attributes.
    pub fn validate(&mut self) -> Result<(), PlanError> {
        for om in self.operators.values_mut() {
            om.reset_scratch();
        }

        let order = self.operator_order.clone();
        for name in &order {
            self.check_operator(name)?;
        }

        let mut scratch = TarjanScratch::default();
        let mut cycles = Vec::new();
        for name in &order {
            if self.operators.get(name).is_some_and(|om| om.nindex.is_none()) {
                self.find_strongly_connected(name, &mut scratch, &mut cycles);
            }
        }
        if !cycles.is_empty() {
            return Err(PlanError::Cycles(cycles));
        }

        for stream_id in &self.stream_order {
            if let Some(stream) = self.streams.get(stream_id) {
                if stream.source().is_none() || stream.sinks().is_empty() {
                    return Err(PlanError::StreamDisconnected(stream_id.clone()));
                }
            }
        }

        for name in self.root_operators.clone() {
            if self.operators.get(&name).is_some_and(|om| !om.is_input_operator()) {
                return Err(PlanError::RootNotInputOperator(name));
            }
        }

        let mut visited = FxHashSet::default();
        for name in self.root_operators.clone() {
            self.validate_processing_mode(&name, &mut visited)?;
        }

        for name in &order {
            self.populate_metric_aggregator(name);
        }
        Ok(())
    }

    fn check_operator(&mut self, name: &str) -> Result<(), PlanError> {
        {
            let om = self
                .operators
                .get(name)
                .ok_or_else(|| PlanError::OperatorNotFound(name.to_string()))?;

            let violations = self.constraint_checker.check(name, om.operator());
            if !violations.is_empty() {
                return Err(PlanError::ConstraintViolations {
                    operator: name.to_string(),
                    violations,
                });
            }

            if !om.partitionable() {
                for pm in om.input_ports() {
                    if pm.value(&context::PARTITION_PARALLEL) == Some(true) {
                        return Err(PlanError::ParallelPartitionNotAllowed {
                            operator: name.to_string(),
                            port: pm.port_name().to_string(),
                        });
                    }
                }
                let partitioner_set = om
                    .value_with(&self.attributes, &context::PARTITIONER)
                    .is_some();
                if partitioner_set || om.has_partitioner_capability() {
                    return Err(PlanError::PartitionerNotAllowed(name.to_string()));
                }
            }

            if !om.checkpointable_within_app_window() {
                let checkpoint_windows = om
                    .value_with(&self.attributes, &context::CHECKPOINT_WINDOW_COUNT)
                    .unwrap_or(1);
                let app_windows = om
                    .value_with(&self.attributes, &context::APPLICATION_WINDOW_COUNT)
                    .unwrap_or(1);
                if app_windows == 0 || checkpoint_windows % app_windows != 0 {
                    return Err(PlanError::CheckpointWindowMismatch {
                        operator: name.to_string(),
                        checkpoint_window_count: checkpoint_windows,
                        application_window_count: app_windows,
                    });
                }
            }
        }

        let input_count = self.operators.get(name).map_or(0, |om| om.input_ports().len());
        for i in 0..input_count {
            let (port, optional, stream_id) = {
                let Some(om) = self.operators.get(name) else { break };
                let pm = &om.input_ports()[i];
                (
                    pm.port_name().to_string(),
                    pm.is_optional(),
                    om.input_stream_for(pm.port_name()).map(ToString::to_string),
                )
            };
            match stream_id {
                None => {
                    if !optional {
                        return Err(PlanError::InputPortConnectionRequired {
                            operator: name.to_string(),
                            port,
                        });
                    }
                }
                Some(stream_id) => {
                    let thread_local = self
                        .streams
                        .get(&stream_id)
                        .and_then(StreamMeta::locality)
                        == Some(Locality::ThreadLocal);
                    let multi_input = self
                        .operators
                        .get(name)
                        .is_some_and(|om| om.input_streams().len() > 1);
                    if thread_local && multi_input {
                        self.validate_thread_local(name)?;
                    }
                }
            }
        }

        let om = self
            .operators
            .get(name)
            .ok_or_else(|| PlanError::OperatorNotFound(name.to_string()))?;
        let mut all_ports_optional = true;
        for pm in om.output_ports() {
            if om.output_stream_for(pm.port_name()).is_none() && !pm.is_optional() {
                return Err(PlanError::OutputPortConnectionRequired {
                    operator: name.to_string(),
                    port: pm.port_name().to_string(),
                });
            }
            all_ports_optional &= pm.is_optional();
        }
        if !all_ports_optional && om.output_streams().is_empty() {
            return Err(PlanError::OutputStreamRequired(name.to_string()));
        }
        Ok(())
    }

    /// Validates thread-local fan-in for an operator with more than one
    /// input stream. For the operator to run one-input-one-output, every
    /// input stream must be thread-local and all of them must trace back
    /// to a single root producer.
    fn validate_thread_local(&mut self, name: &str) -> Result<(), PlanError> {
        if self.operators.get(name).is_some_and(|om| om.oio_visited) {
            return Ok(());
        }

        let input_streams: Vec<String> = self
            .operators
            .get(name)
            .map(|om| om.input_streams().iter().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default();

        let mut oio_root: Option<i32> = None;
        for stream_id in input_streams {
            let (locality, source) = match self.streams.get(&stream_id) {
                Some(stream) => (
                    stream.locality(),
                    stream.source().map(|r| r.operator.clone()),
                ),
                None => (None, None),
            };
            if locality != Some(Locality::ThreadLocal) {
                return Err(PlanError::OioLocalityMixed(name.to_string()));
            }
            let source = source.ok_or_else(|| PlanError::StreamDisconnected(stream_id.clone()))?;
            let stream_root = self.oio_root_of(&source)?;
            match oio_root {
                None => oio_root = Some(stream_root),
                Some(root) if root != stream_root => {
                    return Err(PlanError::OioRootDivergence(name.to_string()));
                }
                Some(_) => {}
            }
        }

        if let Some(om) = self.operators.get_mut(name) {
            om.oio_visited = true;
            om.oio_root = oio_root;
        }
        Ok(())
    }

    /// Memoized one-input-one-output root lookup: follows single-input
    /// thread-local chains upstream to their origin.
    fn oio_root_of(&mut self, name: &str) -> Result<i32, PlanError> {
        if let Some(om) = self.operators.get(name) {
            if om.oio_visited {
                return Ok(om.oio_root.unwrap_or_else(|| om.id()));
            }
        }

        let (own_id, inputs) = self
            .operators
            .get(name)
            .map(|om| {
                (
                    om.id(),
                    om.input_streams()
                        .iter()
                        .map(|(_, s)| s.clone())
                        .collect::<Vec<_>>(),
                )
            })
            .ok_or_else(|| PlanError::OperatorNotFound(name.to_string()))?;

        match inputs.as_slice() {
            [] => {
                self.mark_oio_root(name, own_id);
                Ok(own_id)
            }
            [stream_id] => {
                let (locality, source) = match self.streams.get(stream_id) {
                    Some(stream) => (
                        stream.locality(),
                        stream.source().map(|r| r.operator.clone()),
                    ),
                    None => (None, None),
                };
                if locality == Some(Locality::ThreadLocal) {
                    let source =
                        source.ok_or_else(|| PlanError::StreamDisconnected(stream_id.clone()))?;
                    let root = self.oio_root_of(&source)?;
                    self.mark_oio_root(name, root);
                    Ok(root)
                } else {
                    self.mark_oio_root(name, own_id);
                    Ok(own_id)
                }
            }
            _ => {
                self.validate_thread_local(name)?;
                Ok(self
                    .operators
                    .get(name)
                    .and_then(|om| om.oio_root)
                    .unwrap_or(own_id))
            }
        }
    }

    fn mark_oio_root(&mut self, name: &str, root: i32) {
        if let Some(om) = self.operators.get_mut(name) {
            om.oio_visited = true;
            om.oio_root = Some(root);
        }
    }

    /// Checks for cycles in the graph reachable from `name` by finding
    /// strongly connected components (Tarjan).
    fn find_strongly_connected(
        &mut self,
        name: &str,
        scratch: &mut TarjanScratch,
        cycles: &mut Vec<Vec<String>>,
    ) {
        let index = scratch.node_index;
        scratch.node_index += 1;
        if let Some(om) = self.operators.get_mut(name) {
            om.nindex = Some(index);
            om.lowlink = index;
        }
        scratch.stack.push(name.to_string());
        scratch.on_stack.insert(name.to_string());

        let successors: Vec<String> = self
            .operators
            .get(name)
            .map(|om| {
                om.output_streams()
                    .iter()
                    .filter_map(|(_, stream_id)| self.streams.get(stream_id))
                    .flat_map(|stream| stream.sinks().iter().map(|r| r.operator.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for successor in successors {
            if successor == name {
                cycles.push(vec![name.to_string()]);
            }
            match self.operators.get(&successor).and_then(|om| om.nindex) {
                None => {
                    self.find_strongly_connected(&successor, scratch, cycles);
                    let successor_lowlink =
                        self.operators.get(&successor).map_or(0, |om| om.lowlink);
                    if let Some(om) = self.operators.get_mut(name) {
                        om.lowlink = om.lowlink.min(successor_lowlink);
                    }
                }
                Some(successor_index) if scratch.on_stack.contains(&successor) => {
                    if let Some(om) = self.operators.get_mut(name) {
                        om.lowlink = om.lowlink.min(successor_index);
                    }
                }
                Some(_) => {}
            }
        }

        let root_of_component = self
            .operators
            .get(name)
            .is_some_and(|om| om.nindex == Some(om.lowlink));
        if root_of_component {
            let mut connected = Vec::new();
            while let Some(top) = scratch.stack.pop() {
                scratch.on_stack.remove(&top);
                let done = top == name;
                connected.push(top);
                if done {
                    break;
                }
            }
            if connected.len() > 1 {
                tracing::debug!(operator = name, ?connected, "detected cycle");
                cycles.push(connected);
            }
        }
    }

    /// Propagates processing modes downstream from `name`, which must only
    /// be visited once all of its input sources have been visited.
    fn validate_processing_mode(
        &mut self,
        name: &str,
        visited: &mut FxHashSet<String>,
    ) -> Result<(), PlanError> {
        let upstream_ready = self.operators.get(name).is_some_and(|om| {
            om.input_streams().iter().all(|(_, stream_id)| {
                self.streams
                    .get(stream_id)
                    .and_then(StreamMeta::source)
                    .map_or(true, |source| visited.contains(&source.operator))
            })
        });
        if !upstream_ready {
            return Ok(());
        }
        visited.insert(name.to_string());

        let mode = self.operator_value(name, &context::PROCESSING_MODE);
        let downstream: Vec<String> = self
            .operators
            .get(name)
            .map(|om| {
                om.output_streams()
                    .iter()
                    .filter_map(|(_, stream_id)| self.streams.get(stream_id))
                    .flat_map(|stream| stream.sinks().iter().map(|r| r.operator.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for sink_name in downstream {
            let sink_mode = self
                .operators
                .get(&sink_name)
                .and_then(|om| om.attributes().get(&context::PROCESSING_MODE));
            match (mode, sink_mode) {
                (Some(ProcessingMode::AtMostOnce), None) => {
                    tracing::warn!(
                        operator = %sink_name,
                        mode = %ProcessingMode::AtMostOnce,
                        "setting processing mode inherited from upstream"
                    );
                    if let Some(om) = self.operators.get_mut(&sink_name) {
                        om.attributes_mut()
                            .put(&context::PROCESSING_MODE, ProcessingMode::AtMostOnce);
                    }
                }
                (Some(ProcessingMode::ExactlyOnce), None) => {
                    return Err(PlanError::ProcessingModeConflict {
                        upstream: name.to_string(),
                        upstream_mode: ProcessingMode::ExactlyOnce,
                        downstream: sink_name,
                        downstream_mode: None,
                    });
                }
                (Some(upstream_mode), Some(sink)) => {
                    let conflict = match upstream_mode {
                        ProcessingMode::AtMostOnce | ProcessingMode::ExactlyOnce => {
                            sink != ProcessingMode::AtMostOnce
                        }
                        ProcessingMode::AtLeastOnce => false,
                    };
                    if conflict {
                        return Err(PlanError::ProcessingModeConflict {
                            upstream: name.to_string(),
                            upstream_mode,
                            downstream: sink_name,
                            downstream_mode: Some(sink),
                        });
                    }
                }
                (Some(ProcessingMode::AtLeastOnce), None) | (None, _) => {}
            }
            self.validate_processing_mode(&sink_name, visited)?;
        }
        Ok(())
    }

    /// Resolves the effective metric aggregator for `name`: the explicit
    /// attribute when set, otherwise a sum aggregator inferred from the
    /// operator's declared auto-metrics.
    fn populate_metric_aggregator(&mut self, name: &str) {
        let explicit = self.operator_value(name, &context::METRICS_AGGREGATOR);
        let scheme = self.operator_value(name, &context::METRICS_DIMENSIONS_SCHEME);
        let aggregator = explicit.or_else(|| {
            self.operators
                .get(name)
                .and_then(|om| infer_default_aggregator(om.metric_fields(), om.metric_accessors()))
                .map(|a| Arc::new(a) as Arc<dyn MetricsAggregator>)
        });
        if let Some(om) = self.operators.get_mut(name) {
            om.set_metric_aggregator(MetricAggregatorMeta::new(aggregator, scheme));
        }
    }
}

#[derive(Default)]
struct TarjanScratch {
    node_index: u32,
    stack: Vec<String>,
    on_stack: FxHashSet<String>,
}

impl Default for LogicalPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalPlan")
            .field("operator_count", &self.operators.len())
            .field("stream_count", &self.streams.len())
            .field("roots", &self.root_operators)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
