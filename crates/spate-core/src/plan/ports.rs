//! Port descriptors and port references.
//!
//! Ports are declared by the operator's [`OperatorDescriptor`] and
//! materialize into `InputPortMeta`/`OutputPortMeta` when the operator is
//! added to a plan. Streams and adjacency lists address ports through
//! [`PortRef`] (owning operator key plus field name) rather than object
//! identity.
//!
//! [`OperatorDescriptor`]: crate::plan::operator::OperatorDescriptor

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attr::{Attr, AttrType, AttributeMap};
use crate::plan::context;
use crate::plan::error::PlanError;
use crate::plan::operator::{DefaultUnifier, OperatorMeta, Slider, UnifierFactory};

/// A reference to a port: owning operator name plus port (field) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    /// Name of the owning operator.
    pub operator: String,
    /// Field name of the port within the operator.
    pub port: String,
}

impl PortRef {
    /// Creates a port reference.
    pub fn new(operator: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.operator, self.port)
    }
}

impl<O: Into<String>, P: Into<String>> From<(O, P)> for PortRef {
    fn from((operator, port): (O, P)) -> Self {
        Self::new(operator, port)
    }
}

/// Metadata for one declared input port.
#[derive(Debug)]
pub struct InputPortMeta {
    operator: String,
    name: String,
    optional: bool,
    app_data_query: bool,
    attributes: AttributeMap,
}

impl InputPortMeta {
    pub(crate) fn new(operator: String, name: String, optional: bool, app_data_query: bool) -> Self {
        Self {
            operator,
            name,
            optional,
            app_data_query,
            attributes: AttributeMap::new(),
        }
    }

    /// Name of the owning operator.
    #[must_use]
    pub fn operator_name(&self) -> &str {
        &self.operator
    }

    /// The port's field name.
    #[must_use]
    pub fn port_name(&self) -> &str {
        &self.name
    }

    /// Whether the port may be left unconnected.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the port accepts application-data queries.
    #[must_use]
    pub fn is_app_data_query(&self) -> bool {
        self.app_data_query
    }

    /// The port's own attribute map.
    #[must_use]
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Mutable access to the port's attribute map.
    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    /// Attribute lookup: the port's own value, else the key default.
    /// Port scope does not chain to the operator.
    #[must_use]
    pub fn value<T: AttrType>(&self, key: &Attr<T>) -> Option<T> {
        self.attributes.value(key)
    }

    /// This port as a [`PortRef`].
    #[must_use]
    pub fn port_ref(&self) -> PortRef {
        PortRef::new(&self.operator, &self.name)
    }
}

/// Metadata for one declared output port.
///
/// Besides annotations and attributes, an output port lazily owns the
/// unifier sub-operator (and optionally a sliding unifier) that the
/// physical plan uses to fan in partitioned streams.
pub struct OutputPortMeta {
    operator: String,
    name: String,
    optional: bool,
    app_data_result: bool,
    attributes: AttributeMap,
    unifier_factory: Option<UnifierFactory>,
    unifier: Option<Box<OperatorMeta>>,
    slider: Option<Box<OperatorMeta>>,
}

impl std::fmt::Debug for OutputPortMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPortMeta")
            .field("operator", &self.operator)
            .field("name", &self.name)
            .field("optional", &self.optional)
            .field("app_data_result", &self.app_data_result)
            .field("attributes", &self.attributes)
            .field("unifier_factory", &self.unifier_factory.as_ref().map(|_| "<fn>"))
            .field("unifier", &self.unifier)
            .field("slider", &self.slider)
            .finish()
    }
}

impl OutputPortMeta {
    pub(crate) fn new(
        operator: String,
        name: String,
        optional: bool,
        app_data_result: bool,
        unifier_factory: Option<UnifierFactory>,
    ) -> Self {
        Self {
            operator,
            name,
            optional,
            app_data_result,
            attributes: AttributeMap::new(),
            unifier_factory,
            unifier: None,
            slider: None,
        }
    }

    /// Name of the owning operator.
    #[must_use]
    pub fn operator_name(&self) -> &str {
        &self.operator
    }

    /// The port's field name.
    #[must_use]
    pub fn port_name(&self) -> &str {
        &self.name
    }

    /// Whether the port may be left unconnected.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the port publishes application-data results.
    #[must_use]
    pub fn is_app_data_result(&self) -> bool {
        self.app_data_result
    }

    /// The port's own attribute map.
    #[must_use]
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Mutable access to the port's attribute map.
    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    /// Attribute lookup: the port's own value, else the key default.
    #[must_use]
    pub fn value<T: AttrType>(&self, key: &Attr<T>) -> Option<T> {
        self.attributes.value(key)
    }

    /// This port as a [`PortRef`].
    #[must_use]
    pub fn port_ref(&self) -> PortRef {
        PortRef::new(&self.operator, &self.name)
    }

    fn new_unifier_operator(&self) -> Box<dyn crate::plan::operator::Operator> {
        match &self.unifier_factory {
            Some(factory) => {
                let unifier = factory();
                tracing::debug!(port = %self.port_ref(), "user supplied unifier is {unifier:?}");
                unifier
            }
            None => {
                tracing::debug!(port = %self.port_ref(), "using default unifier");
                Box::new(DefaultUnifier::default())
            }
        }
    }

    /// The unifier sub-operator for this port, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DuplicatePortName`] if a user-supplied unifier
    /// declares conflicting ports.
    pub fn unifier_meta(&mut self) -> Result<&mut OperatorMeta, PlanError> {
        let meta = match self.unifier.take() {
            Some(meta) => meta,
            None => {
                let name = format!("{}.{}#unifier", self.operator, self.name);
                Box::new(OperatorMeta::new(name, self.new_unifier_operator())?)
            }
        };
        Ok(&mut **self.unifier.insert(meta))
    }

    /// The unifier sub-operator, if it has been created.
    #[must_use]
    pub fn unifier(&self) -> Option<&OperatorMeta> {
        self.unifier.as_deref()
    }

    /// The sliding unifier for this port, created on first use.
    ///
    /// The slider wraps a fresh unifier instance and inherits the unifier's
    /// attributes, with its application window count set to
    /// `sliding_app_window_count`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DuplicatePortName`] if a user-supplied unifier
    /// declares conflicting ports.
    pub fn sliding_unifier_meta(
        &mut self,
        number_of_buckets: u32,
        sliding_app_window_count: u32,
        number_of_sliding_windows: u32,
    ) -> Result<&mut OperatorMeta, PlanError> {
        let meta = match self.slider.take() {
            Some(meta) => meta,
            None => {
                let unifier_attributes = self.unifier_meta()?.attributes().clone();
                let slider = Slider::new(
                    self.new_unifier_operator(),
                    number_of_buckets,
                    number_of_sliding_windows,
                );
                let name = format!("{}.{}#slider", self.operator, self.name);
                let mut meta =
                    OperatorMeta::with_attributes(name, Box::new(slider), unifier_attributes)?;
                meta.attributes_mut()
                    .put(&context::APPLICATION_WINDOW_COUNT, sliding_app_window_count);
                Box::new(meta)
            }
        };
        Ok(&mut **self.slider.insert(meta))
    }

    /// The sliding unifier, if it has been created.
    #[must_use]
    pub fn slider(&self) -> Option<&OperatorMeta> {
        self.slider.as_deref()
    }
}
