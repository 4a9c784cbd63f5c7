//! Ordered child collections (array substitutions).
//!
//! A collection owns an ordered sequence of attached instances whose roots
//! sit in the live tree right after the collection's marker node, in
//! sequence order. Every structural edit goes through `splice`, which
//! validates the whole edit before touching the tree.

use markup5ever_rcdom::Handle;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::accessor::coerce_element;
use crate::attachment::Attachment;
use crate::descriptor::ElementType;
use crate::dom;
use crate::error::{OomlError, Result};
use crate::events::ChildEventSink;
use crate::instance::{Instance, InstanceInner};
use crate::value::Value;

/// Largest indentation `to_json` accepts
pub const MAX_JSON_INDENTATION: usize = 10;

pub struct CollectionInner {
    element: ElementType,
    anchor: Handle,
    owner: Weak<InstanceInner>,
    property: String,
    sink: ChildEventSink,
    items: RefCell<Vec<Instance>>,
}

impl CollectionInner {
    /// Free every item, leaving the collection empty
    fn free_items(&self) {
        let items = match self.items.try_borrow_mut() {
            Ok(mut items) => std::mem::take(&mut *items),
            Err(_) => return,
        };
        let this: *const CollectionInner = self;
        for child in items {
            child.free_if_held_by(|kind| {
                matches!(kind, Attachment::SequenceSlot { sequence } if std::ptr::eq(sequence.as_ptr(), this))
            });
        }
    }
}

impl Drop for CollectionInner {
    fn drop(&mut self) {
        self.free_items();
    }
}

#[derive(Clone)]
pub struct Collection(Rc<CollectionInner>);

impl Collection {
    pub(crate) fn new(
        element: ElementType,
        anchor: Handle,
        owner: Weak<InstanceInner>,
        property: &str,
        sink: ChildEventSink,
    ) -> Self {
        Self(Rc::new(CollectionInner {
            element,
            anchor,
            owner,
            property: property.to_string(),
            sink,
            items: RefCell::new(Vec::new()),
        }))
    }

    pub(crate) fn from_inner(inner: Rc<CollectionInner>) -> Self {
        Self(inner)
    }

    /// Free every item without going through `splice`; used when the owner
    /// goes away
    pub(crate) fn free_items(&self) {
        self.0.free_items();
    }

    pub fn element_type(&self) -> &ElementType {
        &self.0.element
    }

    /// The instance owning this collection, while it is alive
    pub fn owner(&self) -> Option<Instance> {
        self.0.owner.upgrade().map(Instance::from_inner)
    }

    pub fn property(&self) -> &str {
        &self.0.property
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Instance> {
        self.0.items.borrow().get(index).cloned()
    }

    pub fn index_of(&self, instance: &Instance) -> Option<usize> {
        self.0.items.borrow().iter().position(|i| i == instance)
    }

    /// Snapshot iterator; edits made while iterating are not observed
    pub fn iter(&self) -> std::vec::IntoIter<Instance> {
        self.0.items.borrow().clone().into_iter()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Structural edits
    // ═══════════════════════════════════════════════════════════════════════════

    /// Remove `delete_count` items at `start` and insert `values` there.
    /// Returns the removed instances, now free.
    ///
    /// `start` and `delete_count` are clamped to the current length. Every
    /// inserted value is converted and checked before anything changes: it
    /// must be free, or be one of the instances this call removes.
    pub fn splice(&self, start: usize, delete_count: usize, values: Vec<Value>) -> Result<Vec<Instance>> {
        let len = self.len();
        let start = start.min(len);
        let end = start + delete_count.min(len - start);

        let mut inserted = Vec::with_capacity(values.len());
        for value in values {
            inserted.push(coerce_element(&self.0.element, value)?);
        }

        let removed: Vec<Instance> = self.0.items.borrow()[start..end].to_vec();

        for (i, instance) in inserted.iter().enumerate() {
            if inserted[..i].contains(instance) {
                return Err(OomlError::reference(format!(
                    "The same \"{}\" instance appears twice in one collection",
                    instance.class().name()
                )));
            }
            if instance.is_attached() && !removed.contains(instance) {
                return Err(OomlError::reference(format!(
                    "This \"{}\" instance is already in use",
                    instance.class().name()
                )));
            }
            if dom::is_inclusive_ancestor(&instance.root()?, &self.0.anchor) {
                return Err(OomlError::reference(format!(
                    "A \"{}\" instance cannot be attached inside itself",
                    instance.class().name()
                )));
            }
        }

        for instance in &removed {
            instance.release()?;
        }
        self.0
            .items
            .borrow_mut()
            .splice(start..end, inserted.iter().cloned());

        let mut previous = match start {
            0 => self.0.anchor.clone(),
            _ => self.0.items.borrow()[start - 1].root()?,
        };
        for instance in &inserted {
            instance.attach_after(
                &previous,
                Attachment::SequenceSlot {
                    sequence: Rc::downgrade(&self.0),
                },
                self.0.sink.clone(),
            )?;
            previous = instance.root()?;
        }

        tracing::trace!(
            "collection \"{}\": removed {}, inserted {} at {}",
            self.0.property,
            removed.len(),
            inserted.len(),
            start
        );
        Ok(removed)
    }

    /// Replace the whole sequence
    pub fn initialize(&self, values: Vec<Value>) -> Result<Vec<Instance>> {
        self.splice(0, self.len(), values)
    }

    /// Append; returns the new length
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        self.splice(self.len(), 0, vec![value.into()])?;
        Ok(self.len())
    }

    pub fn pop(&self) -> Result<Option<Instance>> {
        match self.len() {
            0 => Ok(None),
            len => Ok(self.splice(len - 1, 1, Vec::new())?.pop()),
        }
    }

    pub fn shift(&self) -> Result<Option<Instance>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(self.splice(0, 1, Vec::new())?.pop())
    }

    /// Prepend; returns the new length
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize> {
        self.splice(0, 0, vec![value.into()])?;
        Ok(self.len())
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        if index > self.len() {
            return Err(OomlError::range(format!(
                "Cannot insert at {}; the collection has {} item(s)",
                index,
                self.len()
            )));
        }
        self.splice(index, 0, vec![value.into()]).map(|_| ())
    }

    pub fn remove(&self, index: usize) -> Result<Instance> {
        if index >= self.len() {
            return Err(OomlError::range(format!(
                "Cannot remove {}; the collection has {} item(s)",
                index,
                self.len()
            )));
        }
        self.splice(index, 1, Vec::new())?
            .pop()
            .ok_or_else(|| OomlError::logic("splice removed nothing"))
    }

    /// Move the item at `from` so it ends up at `to`
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        let len = self.len();
        if from >= len || to >= len {
            return Err(OomlError::range(format!(
                "Cannot move {} to {}; the collection has {} item(s)",
                from, to, len
            )));
        }
        if from == to {
            return Ok(());
        }
        let instance = self.remove(from)?;
        self.splice(to, 0, vec![Value::Instance(instance)]).map(|_| ())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Projection
    // ═══════════════════════════════════════════════════════════════════════════

    /// Plain data for the items in `start..end`, both clamped
    pub fn to_array(&self, start: Option<usize>, end: Option<usize>) -> Vec<JsonValue> {
        let items = self.0.items.borrow();
        let end = end.unwrap_or(items.len()).min(items.len());
        let start = start.unwrap_or(0).min(end);
        items[start..end].iter().map(Instance::to_object).collect()
    }

    /// JSON text of `to_array`. Indentation 0 is compact; anything above
    /// `MAX_JSON_INDENTATION` is a Range error.
    pub fn to_json(&self, start: Option<usize>, end: Option<usize>, indentation: usize) -> Result<String> {
        if indentation > MAX_JSON_INDENTATION {
            return Err(OomlError::range(format!(
                "Invalid indentation value {}; expected 0 to {}",
                indentation, MAX_JSON_INDENTATION
            )));
        }

        let array = JsonValue::Array(self.to_array(start, end));
        if indentation == 0 {
            return serde_json::to_string(&array)
                .map_err(|e| OomlError::logic(format!("failed to serialize collection: {}", e)));
        }

        let indent = vec![b' '; indentation];
        let mut out = Vec::new();
        let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(&indent));
        array
            .serialize(&mut serializer)
            .map_err(|e| OomlError::logic(format!("failed to serialize collection: {}", e)))?;
        String::from_utf8(out).map_err(|e| OomlError::logic(e.to_string()))
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("property", &self.0.property)
            .field("element", &self.0.element)
            .field("items", &self.0.items.borrow())
            .finish()
    }
}
