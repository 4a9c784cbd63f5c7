//! Instances: the live objects a class constructs.
//!
//! An instance owns its live view, the current value of every declared
//! property and attribute, its registered event handlers and its attachment
//! record. All state is mutated through the methods here and in `accessor`
//! and `attachment`; nothing outside the crate reaches the store directly.

use markup5ever_rcdom::Handle;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::cell::{OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::attachment::{Attachment, AttachmentRecord};
use crate::binder::{self, BoundView, PropertySite};
use crate::class::OomlClass;
use crate::dom;
use crate::error::{OomlError, Result};
use crate::events::{run_handler, DispatchEvent, Event, EventClass, EventHandler, HandlerContext, HandlerRegistry};
use crate::namespace::Namespace;
use crate::scheduler::WriteScheduler;
use crate::value::Value;

pub struct InstanceInner {
    pub(crate) class: OomlClass,
    pub(crate) view: OnceCell<BoundView>,
    /// Index-aligned with the class's properties
    pub(crate) values: RefCell<Vec<Value>>,
    /// Index-aligned with the class's attributes
    pub(crate) attribute_values: RefCell<Vec<Value>>,
    pub(crate) attachment: RefCell<Option<AttachmentRecord>>,
    pub(crate) handlers: RefCell<HandlerRegistry>,
}

/// Children become free with their parent. This runs before the view is
/// dropped, because dropping an rcdom node empties every descendant.
impl Drop for InstanceInner {
    fn drop(&mut self) {
        let this: *const InstanceInner = self;
        for value in self.values.get_mut().iter() {
            match value {
                Value::Instance(child) => child.free_if_held_by(|kind| {
                    matches!(kind, Attachment::SingleSlot { owner, .. } if std::ptr::eq(owner.as_ptr(), this))
                }),
                Value::Collection(collection) => collection.free_items(),
                _ => {}
            }
        }
    }
}

#[derive(Clone)]
pub struct Instance(pub(crate) Rc<InstanceInner>);

impl Instance {
    /// Allocate an instance and bind its view. Properties hold placeholder
    /// values until the class writes the initial state.
    pub(crate) fn create(class: &OomlClass) -> Result<Self> {
        let descriptor = class.descriptor();
        let instance = Self(Rc::new(InstanceInner {
            class: class.clone(),
            view: OnceCell::new(),
            values: RefCell::new(vec![Value::Null; descriptor.properties.len()]),
            attribute_values: RefCell::new(vec![Value::Null; descriptor.attributes.len()]),
            attachment: RefCell::new(None),
            handlers: RefCell::new(HandlerRegistry::default()),
        }));

        let view = binder::bind(descriptor, instance.downgrade())?;
        {
            let mut values = instance.0.values.borrow_mut();
            for (value, site) in values.iter_mut().zip(&view.sites) {
                if let PropertySite::Sequence(collection) = site {
                    *value = Value::Collection(collection.clone());
                }
            }
        }
        if instance.0.view.set(view).is_err() {
            return Err(OomlError::logic("instance view bound twice"));
        }

        tracing::trace!("bound a new \"{}\" instance", class.name());
        Ok(instance)
    }

    pub(crate) fn from_inner(inner: Rc<InstanceInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<InstanceInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn view(&self) -> Result<&BoundView> {
        self.0
            .view
            .get()
            .ok_or_else(|| OomlError::logic("instance used before its view was bound"))
    }

    pub(crate) fn scheduler(&self) -> &Rc<WriteScheduler> {
        self.0.class.scheduler()
    }

    pub(crate) fn property_index(&self, name: &str) -> Result<usize> {
        self.0.class.descriptor().property_index(name).ok_or_else(|| {
            OomlError::reference(format!(
                "The property \"{}\" does not exist on \"{}\"",
                name,
                self.0.class.name()
            ))
        })
    }

    pub(crate) fn attribute_index(&self, name: &str) -> Result<usize> {
        self.0.class.descriptor().attribute_index(name).ok_or_else(|| {
            OomlError::reference(format!(
                "The attribute \"{}\" does not exist on \"{}\"",
                name,
                self.0.class.name()
            ))
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn class(&self) -> &OomlClass {
        &self.0.class
    }

    pub fn namespace(&self) -> Option<Namespace> {
        self.0.class.namespace()
    }

    /// Root element of the live view
    pub fn root(&self) -> Result<Handle> {
        Ok(self.view()?.root.clone())
    }

    pub fn outer_html(&self) -> Result<String> {
        Ok(dom::outer_html(&self.view()?.root))
    }

    /// A node exposed with `ooml-expose`
    pub fn exposed(&self, key: &str) -> Option<Handle> {
        self.0.view.get().and_then(|v| v.exposed.get(key).cloned())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Properties and attributes
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn get(&self, name: &str) -> Result<Value> {
        let index = self.property_index(name)?;
        Ok(self.0.values.borrow()[index].clone())
    }

    pub fn attribute(&self, name: &str) -> Result<Value> {
        let index = self.attribute_index(name)?;
        Ok(self.0.attribute_values.borrow()[index].clone())
    }

    pub fn attributes(&self) -> BTreeMap<String, Value> {
        let values = self.0.attribute_values.borrow();
        self.0
            .class
            .descriptor()
            .attributes
            .iter()
            .zip(values.iter())
            .map(|(a, v)| (a.name.clone(), v.clone()))
            .collect()
    }

    /// Write several attributes. Every name is checked before any write.
    pub fn set_attributes(&self, values: BTreeMap<String, Value>) -> Result<()> {
        for name in values.keys() {
            self.attribute_index(name)?;
        }
        for (name, value) in values {
            self.set_attribute(&name, value)?;
        }
        Ok(())
    }

    /// Bulk assignment from a plain object. Every key is checked before any
    /// write.
    pub fn assign(&self, source: Value) -> Result<()> {
        let Value::Object(map) = source else {
            return Err(OomlError::type_error(format!(
                "Cannot assign from {}; expected an object",
                source.type_name()
            )));
        };
        for name in map.keys() {
            self.property_index(name)?;
        }
        for (name, value) in map {
            self.set(&name, value)?;
        }
        Ok(())
    }

    /// Current values in declaration order
    pub fn values(&self) -> Vec<Value> {
        self.0.values.borrow().clone()
    }

    /// Project to plain JSON data
    pub fn to_object(&self) -> JsonValue {
        let names = self.0.class.property_names();
        let values = self.values();
        let mut out = JsonMap::new();
        for (name, value) in names.into_iter().zip(values.iter()) {
            out.insert(name, value.to_json());
        }
        JsonValue::Object(out)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.to_object())
            .map_err(|e| OomlError::logic(format!("failed to serialize instance: {}", e)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register a dispatch or mutation handler
    pub fn on<F>(&self, class: EventClass, name: &str, handler: F) -> &Self
    where
        F: Fn(&Instance, &Event<'_>) -> Result<()> + 'static,
    {
        let handler: EventHandler = Rc::new(handler);
        self.0.handlers.borrow_mut().register(class, name, handler);
        self
    }

    /// Invoke a class method
    pub fn call(&self, method: &str, payload: Value) -> Result<Value> {
        self.call_on_node(method, None, &payload)
    }

    pub(crate) fn call_on_node(
        &self,
        method: &str,
        node: Option<&Handle>,
        payload: &Value,
    ) -> Result<Value> {
        let found = self.0.class.descriptor().methods.get(method).cloned();
        let method_fn = found.ok_or_else(|| {
            OomlError::reference(format!(
                "The method \"{}\" does not exist on \"{}\"",
                method,
                self.0.class.name()
            ))
        })?;
        method_fn(&HandlerContext {
            instance: self,
            node,
            payload,
        })
    }

    /// Run this instance's dispatch handlers, then bubble to the element it
    /// is attached under unless a handler prevented it
    pub fn dispatch(&self, name: &str, data: Value) -> Result<()> {
        let name = name.to_lowercase();
        let event = DispatchEvent::new(&name, data);

        let handlers = self.0.handlers.borrow().handlers(EventClass::Dispatch, &name);
        for handler in handlers {
            handler(self, &Event::Dispatch(&event))?;
        }
        if event.is_prevented() {
            return Ok(());
        }

        let sink = self.0.attachment.borrow().as_ref().map(|r| r.sink.clone());
        if let Some(sink) = sink {
            sink.deliver(&name, &event.data)?;
        }
        Ok(())
    }

    /// Deliver a host DOM event to a live element of this instance. Returns
    /// whether a `domon*` handler ran.
    pub fn handle_dom_event(&self, node: &Handle, event: &str, payload: Value) -> Result<bool> {
        let event = event.to_lowercase();
        let spec = self
            .view()?
            .dom_handlers
            .iter()
            .find(|site| Rc::ptr_eq(&site.node, node))
            .and_then(|site| site.handlers.get(&event).cloned());
        match spec {
            Some(spec) => {
                run_handler(self, &spec, Some(node), &payload)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deliver a host DOM event to an exposed node
    pub fn trigger(&self, key: &str, event: &str, payload: Value) -> Result<bool> {
        let node = self.exposed(key).ok_or_else(|| {
            OomlError::reference(format!("No node is exposed with the key \"{}\"", key))
        })?;
        self.handle_dom_event(&node, event, payload)
    }

    pub(crate) fn fire_mutation(&self, property: &str, old_value: Value, new_value: Value) -> Result<()> {
        let handlers = self
            .0
            .handlers
            .borrow()
            .handlers(EventClass::Mutation, crate::events::PROPERTY_VALUE_CHANGE);
        if handlers.is_empty() {
            return Ok(());
        }
        let event = crate::events::MutationEvent {
            property: property.to_string(),
            old_value,
            new_value,
        };
        for handler in handlers {
            handler(self, &Event::Mutation(&event))?;
        }
        Ok(())
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({})", self.0.class.name())
    }
}
