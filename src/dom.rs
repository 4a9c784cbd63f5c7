//! Live node tree helpers.
//!
//! Live trees reuse `markup5ever_rcdom` nodes, the same node type html5ever
//! produces when parsing templates, so a parsed host document and the view
//! trees of instances can be spliced into each other directly.

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::{Attribute, LocalName, Namespace, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, SerializableHandle};
use std::cell::RefCell;
use std::rc::Rc;
use tendril::StrTendril;

use crate::error::{OomlError, Result};

pub const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Qualified name for an HTML element or an unprefixed attribute
pub fn html_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(HTML_NS), LocalName::from(local))
}

pub fn attr_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(""), LocalName::from(local))
}

pub fn create_element(name: QualName) -> Handle {
    Node::new(NodeData::Element {
        name,
        attrs: RefCell::new(Vec::new()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

pub fn create_comment(text: &str) -> Handle {
    Node::new(NodeData::Comment {
        contents: StrTendril::from(text),
    })
}

pub fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

pub fn has_parent(node: &Handle) -> bool {
    parent_of(node).is_some()
}

fn index_in_parent(parent: &Handle, node: &Handle) -> Option<usize> {
    parent
        .children
        .borrow()
        .iter()
        .position(|child| Rc::ptr_eq(child, node))
}

pub fn append(parent: &Handle, child: Handle) {
    remove_from_parent(&child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

/// Insert `node` as the next sibling of `anchor`
pub fn insert_after(anchor: &Handle, node: Handle) -> Result<()> {
    let parent = parent_of(anchor)
        .ok_or_else(|| OomlError::logic("insertion anchor is not part of a live tree"))?;
    remove_from_parent(&node);
    let index = index_in_parent(&parent, anchor)
        .ok_or_else(|| OomlError::logic("insertion anchor is missing from its parent"))?;
    node.parent.set(Some(Rc::downgrade(&parent)));
    parent.children.borrow_mut().insert(index + 1, node);
    Ok(())
}

/// Insert `node` as the previous sibling of `reference`
pub fn insert_before(reference: &Handle, node: Handle) -> Result<()> {
    let parent = parent_of(reference)
        .ok_or_else(|| OomlError::logic("reference node is not part of a live tree"))?;
    remove_from_parent(&node);
    let index = index_in_parent(&parent, reference)
        .ok_or_else(|| OomlError::logic("reference node is missing from its parent"))?;
    node.parent.set(Some(Rc::downgrade(&parent)));
    parent.children.borrow_mut().insert(index, node);
    Ok(())
}

/// Whether `ancestor` is `node` or one of its ancestors
pub fn is_inclusive_ancestor(ancestor: &Handle, node: &Handle) -> bool {
    let mut current = Some(node.clone());
    while let Some(n) = current {
        if Rc::ptr_eq(&n, ancestor) {
            return true;
        }
        current = parent_of(&n);
    }
    false
}

pub fn remove_from_parent(node: &Handle) {
    if let Some(parent) = parent_of(node) {
        if let Some(index) = index_in_parent(&parent, node) {
            parent.children.borrow_mut().remove(index);
        }
    }
    node.parent.set(None);
}

pub fn set_text(node: &Handle, text: &str) {
    if let NodeData::Text { contents } = &node.data {
        *contents.borrow_mut() = StrTendril::from(text);
    }
}

pub fn element_name(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

pub fn get_attribute(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == name)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

/// Set or replace an attribute. No-op for non-element nodes.
pub fn set_attribute(node: &Handle, name: &QualName, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        if let Some(existing) = attrs.iter_mut().find(|a| a.name.local == name.local) {
            existing.value = StrTendril::from(value);
        } else {
            attrs.push(Attribute {
                name: name.clone(),
                value: StrTendril::from(value),
            });
        }
    }
}

pub fn remove_attribute(node: &Handle, name: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        attrs.borrow_mut().retain(|a| &*a.name.local != name);
    }
}

/// Concatenated text of every descendant text node
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        _ => {
            for child in node.children.borrow().iter() {
                collect_text(child, out);
            }
        }
    }
}

/// Serialize a node, including itself, to HTML
pub fn outer_html(node: &Handle) -> String {
    let mut bytes = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::IncludeNode,
        ..Default::default()
    };
    if serialize(&mut bytes, &SerializableHandle::from(node.clone()), opts).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Children of a node, or of its template contents for `<template>` elements
pub fn content_children(node: &Handle) -> Vec<Handle> {
    if let NodeData::Element {
        template_contents, ..
    } = &node.data
    {
        if let Some(contents) = template_contents.borrow().as_ref() {
            return contents.children.borrow().clone();
        }
    }
    node.children.borrow().clone()
}

/// Depth-first, document-order walk collecting elements matching `pred`.
/// Descends into template contents.
pub fn find_elements(root: &Handle, pred: &dyn Fn(&Handle) -> bool) -> Vec<Handle> {
    let mut found = Vec::new();
    walk_elements(root, pred, &mut found);
    found
}

fn walk_elements(node: &Handle, pred: &dyn Fn(&Handle) -> bool, found: &mut Vec<Handle>) {
    if matches!(node.data, NodeData::Element { .. }) && pred(node) {
        found.push(node.clone());
    }
    for child in content_children(node) {
        walk_elements(&child, pred, found);
    }
}
