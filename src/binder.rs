//! Instance Binder
//!
//! Clones a class's view shape into a live node tree for one instance and
//! records where every property and attribute is rendered.

use markup5ever_rcdom::Handle;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::collection::Collection;
use crate::descriptor::{
    ClassDescriptor, ElementShape, HandlerSpec, PropertyKind, SubstitutionSource, ViewNode,
};
use crate::dom;
use crate::error::{OomlError, Result};
use crate::events::ChildEventSink;
use crate::instance::InstanceInner;
use crate::node_set::{AttributeBinding, BoundNode, NodeSet};

/// Where one property is rendered
pub(crate) enum PropertySite {
    /// Text nodes and formatted attributes
    Nodes(NodeSet),
    /// Insertion point of a single-element substitution
    Slot { anchor: Handle, sink: ChildEventSink },
    /// Array substitution
    Sequence(Collection),
}

/// A live element carrying `domon*` handlers
pub(crate) struct DomHandlerSite {
    pub node: Handle,
    pub handlers: BTreeMap<String, HandlerSpec>,
}

pub(crate) struct BoundView {
    pub root: Handle,
    /// Index-aligned with the descriptor's properties
    pub sites: Vec<PropertySite>,
    /// Index-aligned with the descriptor's attributes
    pub attribute_nodes: Vec<NodeSet>,
    pub exposed: BTreeMap<String, Handle>,
    pub dom_handlers: Vec<DomHandlerSite>,
}

struct Binder<'a> {
    descriptor: &'a ClassDescriptor,
    owner: Weak<InstanceInner>,
    property_nodes: Vec<NodeSet>,
    attribute_nodes: Vec<NodeSet>,
    anchors: BTreeMap<String, (Handle, ChildEventSink)>,
    exposed: BTreeMap<String, Handle>,
    dom_handlers: Vec<DomHandlerSite>,
}

/// Build the live view of a new instance
pub(crate) fn bind(descriptor: &ClassDescriptor, owner: Weak<InstanceInner>) -> Result<BoundView> {
    let Some(ViewNode::Element(root_shape)) = &descriptor.view else {
        return Err(OomlError::logic(format!(
            "class \"{}\" has no root element to bind",
            descriptor.name
        )));
    };

    let mut binder = Binder {
        descriptor,
        owner,
        property_nodes: vec![NodeSet::new(); descriptor.properties.len()],
        attribute_nodes: vec![NodeSet::new(); descriptor.attributes.len()],
        anchors: BTreeMap::new(),
        exposed: BTreeMap::new(),
        dom_handlers: Vec::new(),
    };

    let root = binder.build_element(root_shape)?;

    let mut sites = Vec::with_capacity(descriptor.properties.len());
    let mut property_nodes = std::mem::take(&mut binder.property_nodes).into_iter();
    for property in &descriptor.properties {
        let nodes = property_nodes.next().unwrap_or_default();
        let site = match &property.kind {
            PropertyKind::Primitive { .. } => PropertySite::Nodes(nodes),
            PropertyKind::Instance { .. } | PropertyKind::Array { .. } => {
                let (anchor, sink) = binder.anchors.remove(&property.name).ok_or_else(|| {
                    OomlError::logic(format!(
                        "no insertion point was bound for \"{}\"",
                        property.name
                    ))
                })?;
                match &property.kind {
                    PropertyKind::Array { element } => PropertySite::Sequence(Collection::new(
                        element.clone(),
                        anchor,
                        binder.owner.clone(),
                        &property.name,
                        sink,
                    )),
                    _ => PropertySite::Slot { anchor, sink },
                }
            }
        };
        sites.push(site);
    }

    Ok(BoundView {
        root,
        sites,
        attribute_nodes: binder.attribute_nodes,
        exposed: binder.exposed,
        dom_handlers: binder.dom_handlers,
    })
}

impl<'a> Binder<'a> {
    fn nodes_for(&mut self, source: &SubstitutionSource) -> Result<&mut NodeSet> {
        let (index, table) = match source {
            SubstitutionSource::Property(name) => (
                self.descriptor.property_index(name),
                &mut self.property_nodes,
            ),
            SubstitutionSource::Attribute(name) => (
                self.descriptor.attribute_index(name),
                &mut self.attribute_nodes,
            ),
        };
        index
            .and_then(move |i| table.get_mut(i))
            .ok_or_else(|| OomlError::logic(format!("\"{}\" is bound but not declared", source.name())))
    }

    fn build_element(&mut self, shape: &ElementShape) -> Result<Handle> {
        let element = dom::create_element(shape.name.clone());

        for attribute in &shape.attributes {
            match &attribute.format {
                None => dom::set_attribute(&element, &attribute.name, &attribute.value),
                Some(format) => {
                    let binding = AttributeBinding::new(&element, attribute.name.clone(), format);
                    binding.write();
                    for source in format.sources() {
                        self.nodes_for(source)?
                            .add(BoundNode::Attribute(Rc::clone(&binding)));
                    }
                }
            }
        }

        if !shape.dom_handlers.is_empty() {
            self.dom_handlers.push(DomHandlerSite {
                node: element.clone(),
                handlers: shape.dom_handlers.clone(),
            });
        }
        if let Some(key) = &shape.expose_key {
            self.exposed.insert(key.clone(), element.clone());
        }

        let child_handlers = Rc::new(shape.child_handlers.clone());

        for child in &shape.children {
            match child {
                ViewNode::Element(child_shape) => {
                    let live = self.build_element(child_shape)?;
                    dom::append(&element, live);
                }
                ViewNode::Text(text) => {
                    let live = dom::create_text(&text.value);
                    if let Some(source) = &text.source {
                        self.nodes_for(source)?.add(BoundNode::Text(live.clone()));
                    }
                    dom::append(&element, live);
                }
                ViewNode::Marker(marker) => {
                    let live = dom::create_comment(&marker.value);
                    if let Some(property) = &marker.property {
                        let sink = ChildEventSink::new(
                            self.owner.clone(),
                            element.clone(),
                            Rc::clone(&child_handlers),
                        );
                        self.anchors.insert(property.clone(), (live.clone(), sink));
                    }
                    dom::append(&element, live);
                }
                // An unfilled extension point renders nothing
                ViewNode::ExtensionPoint => {}
            }
        }

        Ok(element)
    }
}
