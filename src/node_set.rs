//! Bound view nodes.
//!
//! A `NodeSet` collects every live node that renders one property or
//! attribute. It is a multiset: the same node may be bound to the same
//! source more than once.

use html5ever::QualName;
use markup5ever_rcdom::{Handle, WeakHandle};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::descriptor::{FormatTemplate, SubstitutionSource};
use crate::dom;
use crate::scheduler::WriteScheduler;

/// A live attribute whose value is a format template with parameter slots
#[derive(Debug)]
pub struct AttributeBinding {
    owner: WeakHandle,
    name: QualName,
    parts: RefCell<Vec<String>>,
    slots: BTreeMap<SubstitutionSource, Vec<usize>>,
    pending: Cell<bool>,
}

impl AttributeBinding {
    pub fn new(owner: &Handle, name: QualName, format: &FormatTemplate) -> Rc<Self> {
        Rc::new(Self {
            owner: Rc::downgrade(owner),
            name,
            parts: RefCell::new(format.parts.clone()),
            slots: format.slots.clone(),
            pending: Cell::new(false),
        })
    }

    pub fn name(&self) -> &QualName {
        &self.name
    }

    /// The sources referenced by this attribute's format
    pub fn sources(&self) -> impl Iterator<Item = &SubstitutionSource> {
        self.slots.keys()
    }

    /// Fill every slot `source` occupies, leaving other parameters intact
    pub fn fill(&self, source: &SubstitutionSource, text: &str) {
        if let Some(indices) = self.slots.get(source) {
            let mut parts = self.parts.borrow_mut();
            for &i in indices {
                if let Some(part) = parts.get_mut(i) {
                    *part = text.to_string();
                }
            }
        }
    }

    pub fn joined(&self) -> String {
        self.parts.borrow().concat()
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.get()
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        self.pending.set(pending);
    }

    /// Write the joined text to the owning element. Returns false when the
    /// element no longer exists.
    pub fn write(&self) -> bool {
        match self.owner.upgrade() {
            Some(owner) => {
                dom::set_attribute(&owner, &self.name, &self.joined());
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BoundNode {
    /// A text node rendering one value whole
    Text(Handle),
    /// A formatted attribute
    Attribute(Rc<AttributeBinding>),
}

impl BoundNode {
    fn same_node(&self, other: &BoundNode) -> bool {
        match (self, other) {
            (BoundNode::Text(a), BoundNode::Text(b)) => Rc::ptr_eq(a, b),
            (BoundNode::Attribute(a), BoundNode::Attribute(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: Vec<BoundNode>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: BoundNode) {
        self.nodes.push(node);
    }

    /// Remove one occurrence of `node`. Returns whether anything was removed.
    pub fn remove(&mut self, node: &BoundNode) -> bool {
        match self.nodes.iter().position(|n| n.same_node(node)) {
            Some(i) => {
                self.nodes.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundNode> {
        self.nodes.iter()
    }

    /// Render `text` for `source` into every node. Text nodes are written
    /// immediately; formatted attributes are queued on the scheduler.
    pub fn write(&self, source: &SubstitutionSource, text: &str, scheduler: &WriteScheduler) {
        for node in &self.nodes {
            match node {
                BoundNode::Text(handle) => dom::set_text(handle, text),
                BoundNode::Attribute(binding) => {
                    binding.fill(source, text);
                    scheduler.mark_dirty(binding);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{attr_name, create_element, create_text, get_attribute, html_name};

    fn format(parts: &[&str], slots: &[(SubstitutionSource, Vec<usize>)]) -> FormatTemplate {
        FormatTemplate {
            parts: parts.iter().map(|s| s.to_string()).collect(),
            slots: slots.iter().cloned().collect(),
        }
    }

    #[test]
    fn test_multiset_semantics() {
        let text = create_text("");
        let mut set = NodeSet::new();
        set.add(BoundNode::Text(text.clone()));
        set.add(BoundNode::Text(text.clone()));
        assert_eq!(set.len(), 2);
        assert!(set.remove(&BoundNode::Text(text.clone())));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&BoundNode::Text(text.clone())));
        assert!(!set.remove(&BoundNode::Text(text)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_fill_preserves_other_parameters() {
        let el = create_element(html_name("a"));
        let first = SubstitutionSource::Property("first".to_string());
        let last = SubstitutionSource::Property("last".to_string());
        let binding = AttributeBinding::new(
            &el,
            attr_name("title"),
            &format(
                &["", " ", ""],
                &[(first.clone(), vec![0]), (last.clone(), vec![2])],
            ),
        );
        binding.fill(&first, "Ada");
        binding.fill(&last, "Lovelace");
        binding.fill(&first, "Augusta");
        assert_eq!(binding.joined(), "Augusta Lovelace");
        assert!(binding.write());
        assert_eq!(get_attribute(&el, "title").as_deref(), Some("Augusta Lovelace"));
    }

    #[test]
    fn test_write_after_owner_dropped_is_noop() {
        let el = create_element(html_name("a"));
        let binding = AttributeBinding::new(&el, attr_name("href"), &format(&["x"], &[]));
        drop(el);
        assert!(!binding.write());
    }
}
