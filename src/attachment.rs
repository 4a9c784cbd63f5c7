//! Attachment state machine.
//!
//! An instance is either free or attached to exactly one parent slot. The
//! record says which kind of slot holds it, so the public `detach` can go
//! back through that slot and keep the parent's own state consistent.

use markup5ever_rcdom::Handle;
use std::rc::Weak;

use crate::collection::{Collection, CollectionInner};
use crate::descriptor::PropertyKind;
use crate::dom;
use crate::error::{OomlError, Result};
use crate::events::ChildEventSink;
use crate::instance::{Instance, InstanceInner};
use crate::value::Value;

/// Which parent slot holds an attached instance
#[derive(Clone)]
pub enum Attachment {
    /// A position in an array property's collection
    SequenceSlot { sequence: Weak<CollectionInner> },
    /// A single-element property
    SingleSlot {
        owner: Weak<InstanceInner>,
        property: String,
    },
}

pub(crate) struct AttachmentRecord {
    pub kind: Attachment,
    /// Delivers bubbled dispatch events to the parent element
    pub sink: ChildEventSink,
}

impl Instance {
    pub fn is_attached(&self) -> bool {
        self.0.attachment.borrow().is_some()
    }

    pub fn attachment(&self) -> Option<Attachment> {
        self.0.attachment.borrow().as_ref().map(|r| r.kind.clone())
    }

    /// Insert this instance's root right after `anchor` and record the slot
    pub(crate) fn attach_after(
        &self,
        anchor: &Handle,
        kind: Attachment,
        sink: ChildEventSink,
    ) -> Result<()> {
        if self.is_attached() {
            return Err(OomlError::reference(format!(
                "This \"{}\" instance is already in use",
                self.class().name()
            )));
        }
        let root = self.root()?;
        if dom::is_inclusive_ancestor(&root, anchor) {
            return Err(OomlError::reference(format!(
                "A \"{}\" instance cannot be attached inside itself",
                self.class().name()
            )));
        }

        dom::insert_after(anchor, root)?;
        *self.0.attachment.borrow_mut() = Some(AttachmentRecord { kind, sink });
        tracing::debug!("attached a \"{}\" instance", self.class().name());
        Ok(())
    }

    /// Remove this instance's root from the tree and clear the record. The
    /// slot that held it is updated by the caller.
    pub(crate) fn release(&self) -> Result<()> {
        let record = self.0.attachment.borrow_mut().take();
        if record.is_none() {
            return Err(OomlError::logic(format!(
                "released a \"{}\" instance that was not attached",
                self.class().name()
            )));
        }
        dom::remove_from_parent(&self.root()?);
        tracing::debug!("detached a \"{}\" instance", self.class().name());
        Ok(())
    }

    /// Clear the record when the slot holding this instance is being dropped.
    /// Records pointing anywhere else are left alone.
    pub(crate) fn free_if_held_by(&self, held: impl Fn(&Attachment) -> bool) {
        let Ok(mut record) = self.0.attachment.try_borrow_mut() else {
            return;
        };
        if !record.as_ref().is_some_and(|r| held(&r.kind)) {
            return;
        }
        *record = None;
        drop(record);
        if let Some(view) = self.0.view.get() {
            dom::remove_from_parent(&view.root);
        }
        tracing::debug!(
            "freed a \"{}\" instance whose parent was dropped",
            self.class().name()
        );
    }

    /// Free every child in this instance's element slots and collections
    pub(crate) fn release_children(&self) {
        for (index, value) in self.values().into_iter().enumerate() {
            match value {
                Value::Instance(child) => {
                    if let Err(err) = child.release() {
                        tracing::warn!("could not release a child: {}", err);
                    }
                    self.0.values.borrow_mut()[index] = Value::Null;
                }
                Value::Collection(collection) => {
                    if let Err(err) = collection.initialize(Vec::new()) {
                        tracing::warn!("could not empty a collection: {}", err);
                    }
                }
                _ => {}
            }
        }
    }

    /// Detach from whichever slot holds this instance, leaving it free
    pub fn detach(&self) -> Result<&Self> {
        let kind = self.attachment().ok_or_else(|| {
            OomlError::reference(format!(
                "This \"{}\" instance is not in use",
                self.class().name()
            ))
        })?;

        match kind {
            Attachment::SequenceSlot { sequence } => {
                let collection = sequence
                    .upgrade()
                    .map(Collection::from_inner)
                    .ok_or_else(|| OomlError::logic("attached to a collection that no longer exists"))?;
                let index = collection.index_of(self).ok_or_else(|| {
                    OomlError::logic("instance could not be found in its collection")
                })?;
                collection.splice(index, 1, Vec::new())?;
            }
            Attachment::SingleSlot { owner, property } => {
                let owner = owner
                    .upgrade()
                    .map(Instance::from_inner)
                    .ok_or_else(|| OomlError::logic("attached to an instance that no longer exists"))?;
                owner.set(&property, Value::Null)?;
            }
        }
        Ok(self)
    }

    /// Attach to `property` of `parent`: assigns single-element properties
    /// and appends to array properties
    pub fn attach(&self, parent: &Instance, property: &str) -> Result<()> {
        let index = parent.property_index(property)?;
        let class = parent.class().clone();
        match &class.descriptor().properties[index].kind {
            PropertyKind::Instance { .. } => {
                if self.is_attached() {
                    return Err(OomlError::reference(format!(
                        "This \"{}\" instance is already in use",
                        self.class().name()
                    )));
                }
                parent.set(property, self.clone())
            }
            PropertyKind::Array { .. } => {
                let collection = parent
                    .get(property)?
                    .as_collection()
                    .cloned()
                    .ok_or_else(|| OomlError::logic("array property holds no collection"))?;
                collection.push(self.clone()).map(|_| ())
            }
            PropertyKind::Primitive { .. } => Err(OomlError::type_error(format!(
                "\"{}\" is not an element property",
                property
            ))),
        }
    }
}
