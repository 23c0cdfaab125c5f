//! Unit tests for plan construction, validation, and serialization.

use std::any::Any;
use std::sync::Arc;

use fxhash::FxHashSet;

use super::constraint::{ConstraintChecker, ConstraintViolation};
use super::context;
use super::error::PlanError;
use super::logical::LogicalPlan;
use super::metrics::{MetricKind, MetricValue, MetricsAggregator, SumAggregator};
use super::operator::{Operator, OperatorDescriptor, Partitioner, ProcessingMode};
use super::serialize::{FsStorageAgent, OperatorRegistry};
use super::stream::Locality;

// ---- Test operators ----

/// Input operator with a single required output `out`.
#[derive(Debug, Default, Clone, Copy)]
struct NumberSource;

impl Operator for NumberSource {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder().input_operator().output("out").build()
    }

    fn type_tag(&self) -> &'static str {
        "test.NumberSource"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Input operator with two required outputs `out1` and `out2`.
#[derive(Debug, Default, Clone, Copy)]
struct DualSource;

impl Operator for DualSource {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .input_operator()
            .output("out1")
            .output("out2")
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "test.DualSource"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `in` -> `out` pass-through.
#[derive(Debug, Default, Clone, Copy)]
struct PassThrough;

impl Operator for PassThrough {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder().input("in").output("out").build()
    }

    fn type_tag(&self) -> &'static str {
        "test.PassThrough"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Terminal operator with a single required input.
#[derive(Debug, Default, Clone, Copy)]
struct Collector;

impl Operator for Collector {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder().input("in").build()
    }

    fn type_tag(&self) -> &'static str {
        "test.Collector"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Two required inputs, one optional output.
#[derive(Debug, Default, Clone, Copy)]
struct FanIn;

impl Operator for FanIn {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .input("in1")
            .input("in2")
            .optional_output("out")
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "test.FanIn"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Required `in1`, optional `in2`, optional output.
#[derive(Debug, Default, Clone, Copy)]
struct OptionalSide;

impl Operator for OptionalSide {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .input("in1")
            .optional_input("in2")
            .optional_output("out")
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "test.OptionalSide"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Required `in`, optional self-loop input, required output.
#[derive(Debug, Default, Clone, Copy)]
struct SelfLoop;

impl Operator for SelfLoop {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .input("in")
            .optional_input("loop")
            .output("out")
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "test.SelfLoop"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn linear_plan() -> LogicalPlan {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(PassThrough)).unwrap();
    plan.add_operator("C", Box::new(Collector)).unwrap();
    plan.connect("s1", ("A", "out"), [("B", "in")]).unwrap();
    plan.connect("s2", ("B", "out"), [("C", "in")]).unwrap();
    plan
}

// ---- Construction and root bookkeeping ----

#[test]
fn test_empty_plan() {
    let plan = LogicalPlan::new();
    assert_eq!(plan.operator_count(), 0);
    assert_eq!(plan.stream_count(), 0);
    assert!(plan.roots().is_empty());
}

#[test]
fn test_duplicate_operator_name() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("src", Box::new(NumberSource)).unwrap();
    let err = plan.add_operator("src", Box::new(NumberSource)).unwrap_err();
    assert!(matches!(err, PlanError::DuplicateOperator(_)));
    assert_eq!(plan.operator_count(), 1);
}

#[test]
fn test_duplicate_stream_id() {
    let mut plan = LogicalPlan::new();
    plan.add_stream("s1").unwrap();
    let err = plan.add_stream("s1").unwrap_err();
    assert!(matches!(err, PlanError::DuplicateStream(_)));
    assert_eq!(plan.stream_count(), 1);
}

#[test]
fn test_duplicate_port_name_rejected() {
    #[derive(Debug)]
    struct BadPorts;
    impl Operator for BadPorts {
        fn descriptor(&self) -> OperatorDescriptor {
            OperatorDescriptor::builder().input("x").output("x").build()
        }
        fn type_tag(&self) -> &'static str {
            "test.BadPorts"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    let mut plan = LogicalPlan::new();
    let err = plan.add_operator("bad", Box::new(BadPorts)).unwrap_err();
    assert!(matches!(err, PlanError::DuplicatePortName { .. }));
    // failed call has no observable effect
    assert_eq!(plan.operator_count(), 0);
    assert!(plan.roots().is_empty());
}

#[test]
fn test_roots_track_inbound_streams() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(PassThrough)).unwrap();
    plan.add_operator("C", Box::new(Collector)).unwrap();
    assert_eq!(plan.roots(), ["A", "B", "C"]);

    plan.connect("s1", ("A", "out"), [("B", "in")]).unwrap();
    assert_eq!(plan.roots(), ["A", "C"]);

    plan.connect("s2", ("B", "out"), [("C", "in")]).unwrap();
    assert_eq!(plan.roots(), ["A"]);

    // roots are exactly the operators without inbound streams
    let no_inbound: Vec<&str> = plan
        .operators()
        .filter(|om| om.input_streams().is_empty())
        .map(|om| om.name())
        .collect();
    assert_eq!(plan.roots().iter().map(String::as_str).collect::<Vec<_>>(), no_inbound);
}

#[test]
fn test_stream_remove_restores_roots() {
    let mut plan = linear_plan();
    assert_eq!(plan.roots(), ["A"]);

    plan.remove_stream("s2").unwrap();
    assert_eq!(plan.roots(), ["A", "C"]);
    assert!(plan.stream("s2").is_none());
    assert_eq!(plan.operator("B").unwrap().output_streams().len(), 0);

    plan.remove_stream("s1").unwrap();
    assert_eq!(plan.roots(), ["A", "C", "B"]);
}

#[test]
fn test_source_port_single_stream() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(PassThrough)).unwrap();
    plan.add_operator("C", Box::new(PassThrough)).unwrap();
    plan.connect("s1", ("A", "out"), [("B", "in")]).unwrap();

    plan.add_stream("s2").unwrap();
    let err = plan.set_stream_source("s2", ("A", "out")).unwrap_err();
    assert!(matches!(err, PlanError::OutputAlreadyConnected { .. }));
    assert!(plan.stream("s2").unwrap().source().is_none());
}

#[test]
fn test_sink_port_single_stream() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(DualSource)).unwrap();
    plan.add_operator("B", Box::new(PassThrough)).unwrap();
    plan.connect("s1", ("A", "out1"), [("B", "in")]).unwrap();

    plan.add_stream("s2").unwrap();
    plan.set_stream_source("s2", ("A", "out2")).unwrap();
    let err = plan.add_stream_sink("s2", ("B", "in")).unwrap_err();
    assert!(matches!(err, PlanError::InputAlreadyConnected { .. }));
    assert!(plan.stream("s2").unwrap().sinks().is_empty());
}

#[test]
fn test_unknown_port_and_operator() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_stream("s1").unwrap();

    let err = plan.set_stream_source("s1", ("A", "nope")).unwrap_err();
    assert!(matches!(err, PlanError::PortNotFound(_)));

    let err = plan.set_stream_source("s1", ("ghost", "out")).unwrap_err();
    assert!(matches!(err, PlanError::OperatorNotFound(_)));

    let err = plan.add_stream_sink("missing", ("A", "out")).unwrap_err();
    assert!(matches!(err, PlanError::StreamNotFound(_)));
}

#[test]
fn test_remove_operator_unbinds_and_drops_sourced_streams() {
    let mut plan = linear_plan();
    plan.remove_operator("B").unwrap();

    // B's sink is unbound from s1; the stream it sourced is gone entirely
    assert_eq!(plan.operator_count(), 2);
    assert!(plan.operator("B").is_none());
    assert!(plan.stream("s2").is_none());
    assert!(plan.stream("s1").unwrap().sinks().is_empty());
    // C lost its only inbound stream and is a root again
    assert_eq!(plan.roots(), ["A", "C"]);
}

#[test]
fn test_port_descriptors_stable() {
    let mut plan = linear_plan();
    let first: Vec<String> = plan
        .operator("B")
        .unwrap()
        .input_ports()
        .iter()
        .map(|p| p.port_name().to_string())
        .collect();
    plan.validate().unwrap();
    let second: Vec<String> = plan
        .operator("B")
        .unwrap()
        .input_ports()
        .iter()
        .map(|p| p.port_name().to_string())
        .collect();
    assert_eq!(first, second);
    assert_eq!(first, ["in"]);
}

// ---- Attribute scoping ----

#[test]
fn test_operator_scope_falls_back_to_plan() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();

    // key default
    assert_eq!(plan.operator_value("A", &context::CHECKPOINT_WINDOW_COUNT), Some(60));

    // plan scope shadows the default
    plan.set_attribute(&context::CHECKPOINT_WINDOW_COUNT, 120);
    assert_eq!(plan.operator_value("A", &context::CHECKPOINT_WINDOW_COUNT), Some(120));

    // operator scope shadows the plan
    plan.set_operator_attribute("A", &context::CHECKPOINT_WINDOW_COUNT, 30)
        .unwrap();
    assert_eq!(plan.operator_value("A", &context::CHECKPOINT_WINDOW_COUNT), Some(30));
}

#[test]
fn test_port_scope_does_not_chain_to_operator() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("B", Box::new(PassThrough)).unwrap();
    plan.set_operator_attribute("B", &context::PARTITION_PARALLEL, true)
        .unwrap();

    let port = plan.operator("B").unwrap().input_port("in").unwrap();
    assert_eq!(port.value(&context::PARTITION_PARALLEL), Some(false));

    plan.set_input_port_attribute(("B", "in"), &context::PARTITION_PARALLEL, true)
        .unwrap();
    let port = plan.operator("B").unwrap().input_port("in").unwrap();
    assert_eq!(port.value(&context::PARTITION_PARALLEL), Some(true));
}

// ---- Validation scenarios ----

#[test]
fn test_linear_plan_validates() {
    let mut plan = linear_plan();
    plan.validate().unwrap();
    assert_eq!(plan.roots(), ["A"]);
}

#[test]
fn test_cycle_rejected() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(FanIn)).unwrap();
    plan.add_operator("C", Box::new(PassThrough)).unwrap();
    plan.connect("s1", ("A", "out"), [("B", "in1")]).unwrap();
    plan.connect("s2", ("B", "out"), [("C", "in")]).unwrap();
    plan.connect("s3", ("C", "out"), [("B", "in2")]).unwrap();

    let err = plan.validate().unwrap_err();
    match err {
        PlanError::Cycles(cycles) => {
            assert_eq!(cycles.len(), 1);
            let mut members = cycles[0].clone();
            members.sort();
            assert_eq!(members, ["B", "C"]);
        }
        other => panic!("expected cycle error, got {other}"),
    }
}

#[test]
fn test_self_loop_reported_as_singleton() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(SelfLoop)).unwrap();
    plan.connect("s1", ("A", "out"), [("B", "in")]).unwrap();
    plan.connect("s2", ("B", "out"), [("B", "loop")]).unwrap();

    let err = plan.validate().unwrap_err();
    match err {
        PlanError::Cycles(cycles) => assert_eq!(cycles, vec![vec!["B".to_string()]]),
        other => panic!("expected cycle error, got {other}"),
    }
}

#[test]
fn test_dag_has_no_cycles() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(DualSource)).unwrap();
    plan.add_operator("B", Box::new(PassThrough)).unwrap();
    plan.add_operator("C", Box::new(PassThrough)).unwrap();
    plan.add_operator("D", Box::new(FanIn)).unwrap();
    plan.connect("s1", ("A", "out1"), [("B", "in")]).unwrap();
    plan.connect("s2", ("A", "out2"), [("C", "in")]).unwrap();
    plan.connect("s3", ("B", "out"), [("D", "in1")]).unwrap();
    plan.connect("s4", ("C", "out"), [("D", "in2")]).unwrap();
    plan.validate().unwrap();
}

#[test]
fn test_unconnected_required_input() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(OptionalSide)).unwrap();
    plan.connect("s1", ("A", "out"), [("B", "in2")]).unwrap();

    let err = plan.validate().unwrap_err();
    assert_eq!(err.to_string(), "Input port connection required: B.in1");
}

#[test]
fn test_unconnected_required_output() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::OutputPortConnectionRequired { .. }));
}

#[test]
fn test_dangling_stream_rejected() {
    let mut plan = linear_plan();
    plan.add_stream("s9").unwrap();
    let err = plan.validate().unwrap_err();
    match err {
        PlanError::StreamDisconnected(id) => assert_eq!(id, "s9"),
        other => panic!("expected dangling stream error, got {other}"),
    }
}

#[test]
fn test_root_must_be_input_operator() {
    #[derive(Debug)]
    struct Detached;
    impl Operator for Detached {
        fn descriptor(&self) -> OperatorDescriptor {
            OperatorDescriptor::builder()
                .optional_input("in")
                .optional_output("out")
                .build()
        }
        fn type_tag(&self) -> &'static str {
            "test.Detached"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    let mut plan = LogicalPlan::new();
    plan.add_operator("lonely", Box::new(Detached)).unwrap();
    let err = plan.validate().unwrap_err();
    match err {
        PlanError::RootNotInputOperator(name) => assert_eq!(name, "lonely"),
        other => panic!("expected root error, got {other}"),
    }
}

#[test]
fn test_validate_is_idempotent() {
    let mut plan = linear_plan();
    plan.set_operator_attribute("A", &context::PROCESSING_MODE, ProcessingMode::AtMostOnce)
        .unwrap();
    plan.validate().unwrap();
    let roots_first: Vec<String> = plan.roots().to_vec();
    let mode_first = plan
        .operator("B")
        .unwrap()
        .attributes()
        .get(&context::PROCESSING_MODE);

    plan.validate().unwrap();
    assert_eq!(plan.roots(), roots_first.as_slice());
    assert_eq!(
        plan.operator("B").unwrap().attributes().get(&context::PROCESSING_MODE),
        mode_first
    );
}

// ---- Constraint and annotation checks ----

#[test]
fn test_constraint_violations_aggregated() {
    #[derive(Debug)]
    struct RejectB;
    impl ConstraintChecker for RejectB {
        fn check(&self, operator_name: &str, _operator: &dyn Operator) -> Vec<ConstraintViolation> {
            if operator_name == "B" {
                vec![
                    ConstraintViolation::new("threshold", "must be positive"),
                    ConstraintViolation::new("window", "must be set"),
                ]
            } else {
                Vec::new()
            }
        }
    }

    let mut plan = linear_plan();
    plan.set_constraint_checker(Box::new(RejectB));
    let err = plan.validate().unwrap_err();
    match err {
        PlanError::ConstraintViolations { operator, violations } => {
            assert_eq!(operator, "B");
            assert_eq!(violations.len(), 2);
        }
        other => panic!("expected constraint error, got {other}"),
    }
    assert!(plan.validate().unwrap_err().to_string().contains("threshold"));
}

#[derive(Debug)]
struct Fixed;

impl Operator for Fixed {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .input_operator()
            .optional_input("in")
            .optional_output("out")
            .not_partitionable()
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "test.Fixed"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Doubler;

impl Partitioner for Doubler {
    fn target_partition_count(&self, current: usize) -> usize {
        current * 2
    }
}

#[test]
fn test_not_partitionable_rejects_parallel_partition() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("F", Box::new(Fixed)).unwrap();
    plan.set_input_port_attribute(("F", "in"), &context::PARTITION_PARALLEL, true)
        .unwrap();
    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::ParallelPartitionNotAllowed { .. }));
}

#[test]
fn test_not_partitionable_rejects_partitioner_attribute() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("F", Box::new(Fixed)).unwrap();
    let partitioner: Arc<dyn Partitioner> = Arc::new(Doubler);
    plan.set_operator_attribute("F", &context::PARTITIONER, partitioner)
        .unwrap();
    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::PartitionerNotAllowed(_)));
}

#[test]
fn test_not_partitionable_rejects_partitioner_capability() {
    #[derive(Debug)]
    struct FixedButCapable;
    impl Operator for FixedButCapable {
        fn descriptor(&self) -> OperatorDescriptor {
            OperatorDescriptor::builder()
                .input_operator()
                .optional_output("out")
                .not_partitionable()
                .partitioner_capability()
                .build()
        }
        fn type_tag(&self) -> &'static str {
            "test.FixedButCapable"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    let mut plan = LogicalPlan::new();
    plan.add_operator("F", Box::new(FixedButCapable)).unwrap();
    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::PartitionerNotAllowed(_)));
}

#[derive(Debug)]
struct WindowBound;

impl Operator for WindowBound {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .input_operator()
            .optional_output("out")
            .not_checkpointable_within_app_window()
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "test.WindowBound"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn test_checkpoint_window_must_align() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("W", Box::new(WindowBound)).unwrap();
    // defaults (60 % 1 == 0) pass
    plan.validate().unwrap();

    plan.set_operator_attribute("W", &context::CHECKPOINT_WINDOW_COUNT, 5)
        .unwrap();
    plan.set_operator_attribute("W", &context::APPLICATION_WINDOW_COUNT, 2)
        .unwrap();
    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::CheckpointWindowMismatch { .. }));
}

// ---- Processing modes ----

#[test]
fn test_processing_mode_conflict() {
    let mut plan = linear_plan();
    plan.set_operator_attribute("A", &context::PROCESSING_MODE, ProcessingMode::AtMostOnce)
        .unwrap();
    plan.set_operator_attribute("B", &context::PROCESSING_MODE, ProcessingMode::AtLeastOnce)
        .unwrap();
    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::ProcessingModeConflict { .. }));
    assert!(err.to_string().contains('B'));
}

#[test]
fn test_at_most_once_inherited_downstream() {
    let mut plan = linear_plan();
    plan.set_operator_attribute("A", &context::PROCESSING_MODE, ProcessingMode::AtMostOnce)
        .unwrap();
    plan.validate().unwrap();
    assert_eq!(
        plan.operator("B").unwrap().attributes().get(&context::PROCESSING_MODE),
        Some(ProcessingMode::AtMostOnce)
    );
    assert_eq!(
        plan.operator("C").unwrap().attributes().get(&context::PROCESSING_MODE),
        Some(ProcessingMode::AtMostOnce)
    );
}

#[test]
fn test_exactly_once_requires_at_most_once_downstream() {
    let mut plan = linear_plan();
    plan.set_operator_attribute("A", &context::PROCESSING_MODE, ProcessingMode::ExactlyOnce)
        .unwrap();
    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::ProcessingModeConflict { .. }));

    plan.set_operator_attribute("B", &context::PROCESSING_MODE, ProcessingMode::AtMostOnce)
        .unwrap();
    plan.set_operator_attribute("C", &context::PROCESSING_MODE, ProcessingMode::AtMostOnce)
        .unwrap();
    plan.validate().unwrap();
}

#[test]
fn test_at_least_once_upstream_is_unconstrained() {
    let mut plan = linear_plan();
    plan.set_operator_attribute("A", &context::PROCESSING_MODE, ProcessingMode::AtLeastOnce)
        .unwrap();
    plan.set_operator_attribute("B", &context::PROCESSING_MODE, ProcessingMode::AtMostOnce)
        .unwrap();
    plan.validate().unwrap();
    // nothing was inherited into C
    assert_eq!(
        plan.operator("C").unwrap().attributes().get(&context::PROCESSING_MODE),
        None
    );
}

// ---- Thread-local (OIO) validation ----

#[test]
fn test_oio_root_divergence() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("R1", Box::new(NumberSource)).unwrap();
    plan.add_operator("R2", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(FanIn)).unwrap();
    plan.connect("s1", ("R1", "out"), [("B", "in1")]).unwrap();
    plan.connect("s2", ("R2", "out"), [("B", "in2")]).unwrap();
    plan.set_stream_locality("s1", Some(Locality::ThreadLocal)).unwrap();
    plan.set_stream_locality("s2", Some(Locality::ThreadLocal)).unwrap();

    let err = plan.validate().unwrap_err();
    match err {
        PlanError::OioRootDivergence(name) => assert_eq!(name, "B"),
        other => panic!("expected OIO divergence, got {other}"),
    }
}

#[test]
fn test_oio_mixed_locality() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("R1", Box::new(NumberSource)).unwrap();
    plan.add_operator("R2", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(FanIn)).unwrap();
    plan.connect("s1", ("R1", "out"), [("B", "in1")]).unwrap();
    plan.connect("s2", ("R2", "out"), [("B", "in2")]).unwrap();
    plan.set_stream_locality("s1", Some(Locality::ThreadLocal)).unwrap();
    plan.set_stream_locality("s2", Some(Locality::ContainerLocal)).unwrap();

    let err = plan.validate().unwrap_err();
    assert!(matches!(err, PlanError::OioLocalityMixed(_)));
}

#[test]
fn test_oio_root_follows_thread_local_chains() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("R", Box::new(DualSource)).unwrap();
    plan.add_operator("M1", Box::new(PassThrough)).unwrap();
    plan.add_operator("M2", Box::new(PassThrough)).unwrap();
    plan.add_operator("F", Box::new(FanIn)).unwrap();
    plan.connect("s1", ("R", "out1"), [("M1", "in")]).unwrap();
    plan.connect("s2", ("R", "out2"), [("M2", "in")]).unwrap();
    plan.connect("s3", ("M1", "out"), [("F", "in1")]).unwrap();
    plan.connect("s4", ("M2", "out"), [("F", "in2")]).unwrap();
    for stream in ["s1", "s2", "s3", "s4"] {
        plan.set_stream_locality(stream, Some(Locality::ThreadLocal)).unwrap();
    }

    plan.validate().unwrap();
    let root_id = plan.operator("R").unwrap().id();
    assert_eq!(plan.operator("F").unwrap().oio_root, Some(root_id));
    assert_eq!(plan.operator("M1").unwrap().oio_root, Some(root_id));
    assert_eq!(plan.operator("M2").unwrap().oio_root, Some(root_id));
}

#[test]
fn test_oio_root_stops_at_remote_edge() {
    // R -> M1 is container-local, so the thread-local chain ends at M1;
    // the fan-in operator converges on M1, not R.
    let mut plan = LogicalPlan::new();
    plan.add_operator("R", Box::new(NumberSource)).unwrap();
    plan.add_operator("M1", Box::new(PassThrough)).unwrap();
    plan.add_operator("F", Box::new(FanIn)).unwrap();

    plan.connect("s0", ("R", "out"), [("M1", "in")]).unwrap();
    plan.connect("s1", ("M1", "out"), [("F", "in1"), ("F", "in2")]).unwrap();
    plan.set_stream_locality("s0", Some(Locality::ContainerLocal)).unwrap();
    plan.set_stream_locality("s1", Some(Locality::ThreadLocal)).unwrap();

    plan.validate().unwrap();
    let m1_id = plan.operator("M1").unwrap().id();
    let r_id = plan.operator("R").unwrap().id();
    assert_eq!(plan.operator("F").unwrap().oio_root, Some(m1_id));
    assert_ne!(plan.operator("F").unwrap().oio_root, Some(r_id));
}

// ---- Metric aggregation ----

#[derive(Debug, Default)]
struct Metered;

impl Operator for Metered {
    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::builder()
            .input_operator()
            .optional_output("out")
            .metric_field("bytesIn", MetricKind::Integral)
            .metric_field("lastTag", MetricKind::Other)
            .metric_accessor("rate", MetricKind::Floating)
            .metric_accessor("bytesIn", MetricKind::Floating)
            .build()
    }

    fn type_tag(&self) -> &'static str {
        "test.Metered"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn test_metric_aggregator_inference() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("M", Box::new(Metered)).unwrap();
    plan.validate().unwrap();

    let meta = plan.operator("M").unwrap().metric_aggregator_meta().unwrap();
    let aggregator = meta.aggregator().expect("inferred aggregator");

    let snapshot = vec![
        ("bytesIn".to_string(), MetricValue::Long(5)),
        ("rate".to_string(), MetricValue::Double(0.5)),
        ("lastTag".to_string(), MetricValue::Long(9)),
    ];
    let logical = aggregator.aggregate(&[snapshot.clone(), snapshot]);
    assert_eq!(
        logical,
        vec![
            ("bytesIn".to_string(), MetricValue::Long(10)),
            ("rate".to_string(), MetricValue::Double(1.0)),
        ]
    );
}

#[test]
fn test_explicit_aggregator_suppresses_inference() {
    #[derive(Debug)]
    struct MaxAggregator;
    impl MetricsAggregator for MaxAggregator {
        fn aggregate(&self, _physical: &[Vec<(String, MetricValue)>]) -> Vec<(String, MetricValue)> {
            Vec::new()
        }
    }

    let mut plan = LogicalPlan::new();
    plan.add_operator("M", Box::new(Metered)).unwrap();
    let explicit: Arc<dyn MetricsAggregator> = Arc::new(MaxAggregator);
    plan.set_operator_attribute("M", &context::METRICS_AGGREGATOR, Arc::clone(&explicit))
        .unwrap();
    plan.validate().unwrap();

    let meta = plan.operator("M").unwrap().metric_aggregator_meta().unwrap();
    assert!(Arc::ptr_eq(meta.aggregator().unwrap(), &explicit));
}

#[test]
fn test_no_metrics_no_aggregator() {
    let mut plan = linear_plan();
    plan.validate().unwrap();
    let meta = plan.operator("B").unwrap().metric_aggregator_meta().unwrap();
    assert!(meta.aggregator().is_none());
}

#[test]
fn test_default_aggregator_registration() {
    use super::metrics::infer_default_aggregator;

    let om_plan = {
        let mut plan = LogicalPlan::new();
        plan.add_operator("M", Box::new(Metered)).unwrap();
        plan
    };
    let om = om_plan.operator("M").unwrap();
    let aggregator = infer_default_aggregator(om.metric_fields(), om.metric_accessors()).unwrap();
    assert_eq!(
        aggregator.registered(),
        [
            ("bytesIn".to_string(), SumAggregator::LongSum),
            ("rate".to_string(), SumAggregator::DoubleSum),
        ]
    );
}

// ---- Unifiers ----

#[test]
fn test_unifier_created_on_demand() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.set_unifier_attribute(("A", "out"), &context::APPLICATION_WINDOW_COUNT, 4)
        .unwrap();

    let port = plan.operator("A").unwrap().output_port("out").unwrap();
    let unifier = port.unifier().expect("unifier materialized");
    assert_eq!(unifier.name(), "A.out#unifier");
    assert_eq!(unifier.operator().type_tag(), "spate.DefaultUnifier");
    assert_eq!(
        unifier.attributes().get(&context::APPLICATION_WINDOW_COUNT),
        Some(4)
    );
}

#[test]
fn test_sliding_unifier_inherits_unifier_attributes() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.set_unifier_attribute(("A", "out"), &context::CHECKPOINT_WINDOW_COUNT, 90)
        .unwrap();

    let om = plan.operator_mut("A").unwrap();
    let port = om.output_port_mut("out").unwrap();
    let slider = port.sliding_unifier_meta(4, 2, 3).unwrap();
    assert_eq!(slider.name(), "A.out#slider");
    assert_eq!(slider.attributes().get(&context::CHECKPOINT_WINDOW_COUNT), Some(90));
    assert_eq!(slider.attributes().get(&context::APPLICATION_WINDOW_COUNT), Some(2));
    assert_eq!(slider.operator().type_tag(), "spate.Slider");
}

// ---- Serialization ----

fn test_registry() -> Arc<OperatorRegistry> {
    let mut registry = OperatorRegistry::new();
    registry.register("test.NumberSource", |_| Ok(Box::new(NumberSource)));
    registry.register("test.PassThrough", |_| Ok(Box::new(PassThrough)));
    registry.register("test.Collector", |_| Ok(Box::new(Collector)));
    Arc::new(registry)
}

fn serialized(plan: &LogicalPlan, agent: &FsStorageAgent) -> Vec<u8> {
    let mut buffer = Vec::new();
    plan.write(&mut buffer, agent).unwrap();
    buffer
}

#[test]
fn test_serialize_round_trip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let agent = FsStorageAgent::new(dir.path(), test_registry());

    let mut plan = linear_plan();
    plan.set_attribute(&context::CONTAINERS_MAX_COUNT, 5);
    plan.set_operator_attribute("B", &context::CHECKPOINT_WINDOW_COUNT, 120)
        .unwrap();
    plan.set_input_port_attribute(("B", "in"), &context::PARTITION_PARALLEL, true)
        .unwrap();
    plan.set_stream_locality("s2", Some(Locality::ContainerLocal)).unwrap();
    // codec-less attributes drop out of the snapshot without breaking it
    let partitioner: Arc<dyn Partitioner> = Arc::new(Doubler);
    plan.set_operator_attribute("B", &context::PARTITIONER, partitioner)
        .unwrap();

    let first = serialized(&plan, &agent);
    let restored = LogicalPlan::read(&mut first.as_slice(), &agent).unwrap();
    let second = serialized(&restored, &agent);
    assert_eq!(first, second);
}

#[test]
fn test_deserialized_plan_preserves_structure() {
    let dir = tempfile::tempdir().unwrap();
    let agent = FsStorageAgent::new(dir.path(), test_registry());

    let mut plan = linear_plan();
    plan.set_stream_locality("s1", Some(Locality::ThreadLocal)).unwrap();
    let bytes = serialized(&plan, &agent);

    let mut restored = LogicalPlan::read(&mut bytes.as_slice(), &agent).unwrap();
    assert_eq!(restored.operator_count(), 3);
    assert_eq!(restored.stream_count(), 2);
    assert_eq!(restored.roots(), ["A"]);
    assert_eq!(restored.stream("s1").unwrap().locality(), Some(Locality::ThreadLocal));
    assert_eq!(
        restored.operator("A").unwrap().id(),
        plan.operator("A").unwrap().id()
    );
    assert_eq!(
        restored.operator("A").unwrap().operator().type_tag(),
        "test.NumberSource"
    );
    restored.validate().unwrap();
}

#[test]
fn test_id_sequencer_seeded_below_loaded_ids() {
    let dir = tempfile::tempdir().unwrap();
    let agent = FsStorageAgent::new(dir.path(), test_registry());

    let plan = linear_plan();
    let min_loaded = plan.operators().map(super::operator::OperatorMeta::id).min().unwrap();
    let bytes = serialized(&plan, &agent);

    let mut restored = LogicalPlan::read(&mut bytes.as_slice(), &agent).unwrap();
    restored.add_operator("late", Box::new(NumberSource)).unwrap();
    assert!(restored.operator("late").unwrap().id() < min_loaded);
}

#[test]
fn test_storage_agent_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let agent = FsStorageAgent::new(dir.path(), test_registry());

    let path = agent.save(&NumberSource, "numbers").unwrap();
    assert!(path.exists());
    let loaded = agent.load("numbers").unwrap();
    assert_eq!(loaded.type_tag(), "test.NumberSource");
}

#[test]
fn test_unknown_operator_tag() {
    let registry = OperatorRegistry::new();
    let err = registry.rebuild("test.Never", &[]).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

// ---- Determinism ----

#[test]
fn test_identical_build_sequences_serialize_identically() {
    let dir = tempfile::tempdir().unwrap();
    let agent = FsStorageAgent::new(dir.path(), test_registry());

    let build = || {
        let mut plan = LogicalPlan::new();
        plan.add_operator("A", Box::new(NumberSource)).unwrap();
        plan.add_operator("B", Box::new(PassThrough)).unwrap();
        plan.add_operator("C", Box::new(Collector)).unwrap();
        plan.connect("s1", ("A", "out"), [("B", "in")]).unwrap();
        plan.connect("s2", ("B", "out"), [("C", "in")]).unwrap();
        plan.set_attribute(&context::DEBUG, true);
        plan.set_attribute(&context::MASTER_MEMORY_MB, 2048);
        plan
    };

    let mut first = serialized(&build(), &agent);
    let mut second = serialized(&build(), &agent);
    // operator ids come from a process-global sequencer; mask them before
    // comparing the rest of the snapshots
    let strip_ids = |bytes: &mut Vec<u8>| {
        let mut json: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        if let Some(operators) = json.get_mut("operators").and_then(|v| v.as_array_mut()) {
            for operator in operators {
                if let Some(obj) = operator.as_object_mut() {
                    obj.remove("id");
                }
            }
        }
        *bytes = serde_json::to_vec(&json).unwrap();
    };
    strip_ids(&mut first);
    strip_ids(&mut second);
    assert_eq!(first, second);
}

#[test]
fn test_operator_ids_decrease_monotonically() {
    let mut plan = LogicalPlan::new();
    plan.add_operator("A", Box::new(NumberSource)).unwrap();
    plan.add_operator("B", Box::new(PassThrough)).unwrap();
    let a = plan.operator("A").unwrap().id();
    let b = plan.operator("B").unwrap().id();
    assert!(b < a);
    assert!(a < 0);
}

#[test]
fn test_operator_identity_is_name() {
    let mut left = LogicalPlan::new();
    let mut right = LogicalPlan::new();
    left.add_operator("A", Box::new(NumberSource)).unwrap();
    right.add_operator("A", Box::new(NumberSource)).unwrap();
    right
        .set_operator_attribute("A", &context::CHECKPOINT_WINDOW_COUNT, 10)
        .unwrap();

    let mut set = FxHashSet::default();
    set.insert(left.operator("A").unwrap());
    assert!(set.contains(right.operator("A").unwrap()));
}
