//! Event delivery.
//!
//! Three channels reach an instance:
//! - `dispatch` events, raised by handler bodies or host code, run the
//!   instance's own dispatch handlers and then bubble to the `childon*`
//!   handler of the element the instance is attached under
//! - `mutation` events, raised after a primitive property changes
//! - DOM events, delivered by the host to a live element carrying `domon*`
//!
//! Bubbling follows an explicit capability: the parent hands its child a
//! `ChildEventSink` at attach time, and the child never inspects the tree.

use markup5ever_rcdom::Handle;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::descriptor::{HandlerSpec, HandlerStep};
use crate::error::{OomlError, Result};
use crate::instance::{Instance, InstanceInner};
use crate::value::Value;

/// Mutation event raised after a primitive property write
pub const PROPERTY_VALUE_CHANGE: &str = "propertyvaluechange";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventClass {
    Dispatch,
    Mutation,
}

impl EventClass {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "dispatch" => Ok(Self::Dispatch),
            "mutation" => Ok(Self::Mutation),
            other => Err(OomlError::reference(format!(
                "\"{}\" is not an event class",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub struct DispatchEvent {
    pub name: String,
    pub data: Value,
    prevented: Cell<bool>,
}

impl DispatchEvent {
    pub fn new(name: &str, data: Value) -> Self {
        Self {
            name: name.to_string(),
            data,
            prevented: Cell::new(false),
        }
    }

    /// Stop the event from bubbling to the parent
    pub fn prevent_default(&self) {
        self.prevented.set(true);
    }

    pub fn is_prevented(&self) -> bool {
        self.prevented.get()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub property: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Dispatch(&'a DispatchEvent),
    Mutation(&'a MutationEvent),
}

pub type EventHandler = Rc<dyn Fn(&Instance, &Event<'_>) -> Result<()>>;

/// Handlers registered through `Instance::on`
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    dispatch: BTreeMap<String, Vec<EventHandler>>,
    mutation: BTreeMap<String, Vec<EventHandler>>,
}

impl HandlerRegistry {
    pub fn register(&mut self, class: EventClass, name: &str, handler: EventHandler) {
        let table = match class {
            EventClass::Dispatch => &mut self.dispatch,
            EventClass::Mutation => &mut self.mutation,
        };
        table
            .entry(name.to_lowercase())
            .or_default()
            .push(handler);
    }

    /// Snapshot, so handlers may register further handlers while running
    pub fn handlers(&self, class: EventClass, name: &str) -> Vec<EventHandler> {
        let table = match class {
            EventClass::Dispatch => &self.dispatch,
            EventClass::Mutation => &self.mutation,
        };
        table.get(name).cloned().unwrap_or_default()
    }
}

/// What a method or handler step sees while it runs
pub struct HandlerContext<'a> {
    pub instance: &'a Instance,
    /// The live element the handler is declared on, if any
    pub node: Option<&'a Handle>,
    pub payload: &'a Value,
}

impl<'a> HandlerContext<'a> {
    /// Dispatch an event from the running instance
    pub fn dispatch(&self, name: &str, data: Value) -> Result<()> {
        self.instance.dispatch(name, data)
    }
}

/// Run a compiled handler body. A method step returning `false` prevents
/// the default action, so the steps after it do not run.
pub(crate) fn run_handler(
    instance: &Instance,
    spec: &HandlerSpec,
    node: Option<&Handle>,
    payload: &Value,
) -> Result<()> {
    for step in &spec.steps {
        match step {
            HandlerStep::CallMethod(name) => {
                let result = instance.call_on_node(name, node, payload)?;
                if result == Value::Bool(false) {
                    tracing::trace!("\"{}\" returned false; skipping the rest of the handler", name);
                    break;
                }
            }
            HandlerStep::Dispatch(event) => instance.dispatch(event, payload.clone())?,
        }
    }
    Ok(())
}

/// The `childon*` handlers of the element a child is attached under
#[derive(Clone)]
pub(crate) struct ChildEventSink {
    owner: Weak<InstanceInner>,
    node: Handle,
    handlers: Rc<BTreeMap<String, HandlerSpec>>,
}

impl ChildEventSink {
    pub fn new(
        owner: Weak<InstanceInner>,
        node: Handle,
        handlers: Rc<BTreeMap<String, HandlerSpec>>,
    ) -> Self {
        Self {
            owner,
            node,
            handlers,
        }
    }

    /// Deliver a bubbled event. Silently ignored when the element has no
    /// handler for it or its owner is gone.
    pub fn deliver(&self, event: &str, data: &Value) -> Result<()> {
        let Some(spec) = self.handlers.get(event) else {
            return Ok(());
        };
        let Some(owner) = self.owner.upgrade() else {
            return Ok(());
        };
        run_handler(&Instance::from_inner(owner), spec, Some(&self.node), data)
    }
}
