//! Property and attribute accessors.
//!
//! Reads return the stored value; all work happens on write. A primitive
//! write is type checked, rendered to output text, written into every bound
//! node, stored, announced as a mutation event and finally pushed to the
//! bound properties that depend on it.

use crate::attachment::Attachment;
use crate::binder::PropertySite;
use crate::descriptor::{ElementType, PropertyDescriptor, PropertyKind, SubstitutionSource};
use crate::dom;
use crate::error::{OomlError, Result};
use crate::instance::Instance;
use crate::types::{describe_types, value_matches, PrimitiveType};
use crate::value::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE CHECKS
// ═══════════════════════════════════════════════════════════════════════════════

fn check_primitive(name: &str, types: Option<&[PrimitiveType]>, value: &Value) -> Result<()> {
    if !value.is_primitive() {
        return Err(OomlError::type_error(format!(
            "Cannot set \"{}\"; {} is not a primitive value",
            name,
            value.type_name()
        )));
    }
    if let Some(types) = types {
        if !value_matches(types, value) {
            return Err(OomlError::type_error(format!(
                "Cannot set \"{}\"; expected type to be one of: {}",
                name,
                describe_types(types)
            )));
        }
    }
    Ok(())
}

/// Turn a value written to an element slot into an instance. Plain objects
/// construct a new instance of the element class.
pub(crate) fn coerce_element(element: &ElementType, value: Value) -> Result<Instance> {
    match value {
        Value::Instance(instance) => {
            if element.accepts(&instance) {
                Ok(instance)
            } else {
                Err(OomlError::type_error(format!(
                    "Expected an instance of \"{}\", got \"{}\"",
                    element.name(),
                    instance.class().name()
                )))
            }
        }
        Value::Object(_) => match element {
            ElementType::Class(class) => class.construct(Some(value)),
            ElementType::AnyInstance => Err(OomlError::type_error(
                "A plain object cannot be converted into an unspecified element class",
            )),
        },
        other => Err(OomlError::type_error(format!(
            "Invalid value provided to element property; got {}",
            other.type_name()
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WRITES
// ═══════════════════════════════════════════════════════════════════════════════

impl Instance {
    /// Write a property
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let index = self.property_index(name)?;
        let class = self.class().clone();
        let property = &class.descriptor().properties[index];

        match &property.kind {
            PropertyKind::Primitive { types } => {
                check_primitive(name, types.as_deref(), &value)?;
                self.write_primitive(index, property, value)?;
                self.propagate(name)
            }
            PropertyKind::Instance { element } => self.set_element(index, property, element, value),
            PropertyKind::Array { .. } => self.set_sequence(index, value),
        }
    }

    /// Write an attribute. The output is mirrored to `data-<name>` on the
    /// root element.
    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let index = self.attribute_index(name)?;
        let class = self.class().clone();
        let attribute = &class.descriptor().attributes[index];
        check_primitive(name, attribute.types.as_deref(), &value)?;

        let text = value.to_output_text();
        let view = self.view()?;
        view.attribute_nodes[index].write(
            &SubstitutionSource::Attribute(name.to_string()),
            &text,
            self.scheduler(),
        );
        dom::set_attribute(&view.root, &dom::attr_name(&format!("data-{}", name)), &text);

        self.0.attribute_values.borrow_mut()[index] = value;
        tracing::trace!("attribute \"{}\" = {:?}", name, text);
        Ok(())
    }

    /// Steps 3-5 of a primitive write: render, store, announce
    fn write_primitive(&self, index: usize, property: &PropertyDescriptor, value: Value) -> Result<()> {
        let text = value.to_output_text();
        if let PropertySite::Nodes(nodes) = &self.view()?.sites[index] {
            nodes.write(
                &SubstitutionSource::Property(property.name.clone()),
                &text,
                self.scheduler(),
            );
        }

        let old_value = std::mem::replace(&mut self.0.values.borrow_mut()[index], value.clone());
        tracing::trace!("property \"{}\" = {:?}", property.name, text);
        self.fire_mutation(&property.name, old_value, value)
    }

    /// Recompute a bound property and everything downstream of it
    pub(crate) fn recompute_binding(&self, name: &str) -> Result<()> {
        self.write_binding(name)?;
        self.propagate(name)
    }

    fn write_binding(&self, name: &str) -> Result<()> {
        let index = self.property_index(name)?;
        let class = self.class().clone();
        let property = &class.descriptor().properties[index];
        let Some(binding) = &property.binding else {
            return Err(OomlError::logic(format!("\"{}\" has no binding", name)));
        };

        let text = {
            let values = self.0.values.borrow();
            let descriptor = class.descriptor();
            binding.template.render(|source| {
                descriptor
                    .property_index(source.name())
                    .and_then(|i| values.get(i))
                    .map(Value::to_output_text)
                    .unwrap_or_default()
            })
        };
        self.write_primitive(index, property, Value::String(text))
    }

    /// Recompute every binding downstream of `changed`, each once and only
    /// after the bindings it reads
    fn propagate(&self, changed: &str) -> Result<()> {
        let class = self.class().clone();
        for dependent in class.affected_bindings(changed) {
            tracing::trace!("recomputing \"{}\" after \"{}\" changed", dependent, changed);
            self.write_binding(dependent)?;
        }
        Ok(())
    }

    /// The new value is attached before the old one is released, so a failed
    /// attach leaves the slot untouched
    fn set_element(
        &self,
        index: usize,
        property: &PropertyDescriptor,
        element: &ElementType,
        value: Value,
    ) -> Result<()> {
        let new = match value {
            Value::Null => None,
            other => Some(coerce_element(element, other)?),
        };
        let current = self.0.values.borrow()[index].as_instance().cloned();
        if new.is_some() && new == current {
            return Ok(());
        }

        let (anchor, sink) = match &self.view()?.sites[index] {
            PropertySite::Slot { anchor, sink } => (anchor.clone(), sink.clone()),
            _ => {
                return Err(OomlError::logic(format!(
                    "\"{}\" is not bound to an element slot",
                    property.name
                )))
            }
        };

        if let Some(child) = &new {
            child.attach_after(
                &anchor,
                Attachment::SingleSlot {
                    owner: self.downgrade(),
                    property: property.name.clone(),
                },
                sink,
            )?;
        }
        if let Some(old) = &current {
            old.release()?;
        }

        self.0.values.borrow_mut()[index] = new.map(Value::Instance).unwrap_or(Value::Null);
        Ok(())
    }

    fn set_sequence(&self, index: usize, value: Value) -> Result<()> {
        let collection = match &self.view()?.sites[index] {
            PropertySite::Sequence(collection) => collection.clone(),
            _ => return Err(OomlError::logic("array property has no collection")),
        };
        match value {
            Value::Array(items) => collection.initialize(items).map(|_| ()),
            Value::Collection(other) if other == collection => Ok(()),
            Value::Collection(other) => collection
                .initialize(other.iter().map(Value::Instance).collect())
                .map(|_| ()),
            other => Err(OomlError::type_error(format!(
                "Non-array provided to element array substitution property; got {}",
                other.type_name()
            ))),
        }
    }
}
