//! Template Parser
//!
//! Turns a `<template ooml-class="...">` element into a `ClassDescriptor`.
//! The template's node tree is walked once. Text is scanned for
//! substitutions, attributes for format parameters and event handler bodies,
//! and every substitution site registers or validates a property.
//!
//! Substitution grammar:
//! - `{{ [type|type...] this.[attributes.]name }}` renders a primitive value
//! - `{ for Class of this.name }` renders an ordered collection of instances
//! - `{ Class this.name }` renders a single instance

use html5ever::parse_document as html5ever_parse_document;
use html5ever::tendril::TendrilSink;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::class::{ConstructorFn, Method, OomlClass};
use crate::descriptor::{
    AttributeDescriptor, AttributeShape, ClassDescriptor, DynamicBinding, ElementShape,
    ElementType, FormatTemplate, HandlerSpec, HandlerStep, MarkerShape, PropertyDescriptor,
    PropertyKind, SubstitutionSource, TextShape, ViewNode,
};
use crate::dom;
use crate::error::{OomlError, Result};
use crate::types::{default_for_types, parse_type_declaration, value_matches, PrimitiveType};
use crate::value::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// GRAMMAR
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// Inside `{{ ... }}`: optional type declaration, then the bound name
    static ref TEXT_SUBSTITUTION_RE: Regex =
        Regex::new(r"^(?:([a-zA-Z]+(?:\|[a-zA-Z]+)*)\s+)?(?:this\.)?(attributes\.)?(\S+)$").unwrap();

    /// Inside `{ ... }`: array or single element substitution
    static ref ELEMENT_SUBSTITUTION_RE: Regex = Regex::new(
        r"^(?:for\s+((?:[a-zA-Z]+\.)*[a-zA-Z]+)\s+of|((?:[a-zA-Z]+\.)*[a-zA-Z]+))\s+this\.([a-zA-Z0-9_]+)$"
    )
    .unwrap();

    static ref CLASS_HEADER_RE: Regex =
        Regex::new(r"^([a-zA-Z][a-zA-Z0-9]*)(?:\s+extends\s+((?:[a-zA-Z]+\.)*[a-zA-Z][a-zA-Z0-9]*))?$").unwrap();

    static ref STRICT_PROPERTY_NAME_RE: Regex = Regex::new(r"^[a-z][a-zA-Z0-9]*$").unwrap();
    static ref LOOSE_PROPERTY_NAME_RE: Regex = Regex::new(r"^[a-zA-Z_$][a-zA-Z0-9_$]*$").unwrap();
    static ref ATTRIBUTE_NAME_RE: Regex = Regex::new(r"^[a-z][a-z0-9-]*$").unwrap();
    static ref EXPOSE_KEY_RE: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").unwrap();

    /// Handler steps
    static ref DISPATCH_STEP_RE: Regex = Regex::new(
        r#"^dispatch\(\s*(?:"([a-zA-Z][a-zA-Z0-9_-]*)"|'([a-zA-Z][a-zA-Z0-9_-]*)')\s*(?:,\s*(?:event|data)\s*)?\)$"#
    )
    .unwrap();
    static ref METHOD_STEP_RE: Regex =
        Regex::new(r"^(?:this\.)?([a-zA-Z_$][a-zA-Z0-9_$]*)(?:\(\s*(?:event|data)?\s*\))?$").unwrap();

    /// Member names every instance already has
    static ref RESERVED_NAMES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("attributes");
        s.insert("on");
        s.insert("detach");
        s.insert("attach");
        s.insert("assign");
        s.insert("namespace");
        s.insert("constructor");
        s.insert("toObject");
        s.insert("toJSON");
        s.insert("dispatch");
        s.insert("prototype");
        s
    };
}

pub const EXTENSION_POINT_TAG: &str = "ooml-extension-point";
pub const PROPERTY_DECLARATION_TAG: &str = "ooml-property";
pub const ATTRIBUTE_DECLARATION_TAG: &str = "ooml-attribute";
pub const EXPOSE_ATTRIBUTE: &str = "ooml-expose";

pub fn is_valid_property_name(name: &str, strict: bool) -> bool {
    let shape_ok = if strict {
        STRICT_PROPERTY_NAME_RE.is_match(name)
    } else {
        LOOSE_PROPERTY_NAME_RE.is_match(name)
    };
    shape_ok && !name.starts_with("__") && !RESERVED_NAMES.contains(name)
}

pub fn is_valid_attribute_name(name: &str) -> bool {
    ATTRIBUTE_NAME_RE.is_match(name)
}

fn is_element_sentinel(name: &str) -> bool {
    name == "Element" || name == "OOML.Element"
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS SOURCES
// ═══════════════════════════════════════════════════════════════════════════════

/// Looks up classes referenced by name from a template
pub trait ClassResolver {
    fn resolve_class(&self, name: &str) -> Result<OomlClass>;
}

impl ClassResolver for BTreeMap<String, OomlClass> {
    fn resolve_class(&self, name: &str) -> Result<OomlClass> {
        self.get(name)
            .cloned()
            .ok_or_else(|| OomlError::reference(format!("The class \"{}\" does not exist", name)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub name: String,
    pub is_abstract: bool,
    pub extends: Option<String>,
}

/// A class template plus the host-supplied behavior for it
pub struct ClassDefinition {
    pub header: ClassHeader,
    pub template: Handle,
    pub methods: BTreeMap<String, Method>,
    pub constructor: Option<ConstructorFn>,
}

impl ClassDefinition {
    pub fn from_template(template: Handle) -> Result<Self> {
        Ok(Self {
            header: read_class_header(&template)?,
            template,
            methods: BTreeMap::new(),
            constructor: None,
        })
    }
}

/// Read `ooml-class="Name [extends Parent]"` or `ooml-abstract-class`
pub fn read_class_header(template: &Handle) -> Result<ClassHeader> {
    let concrete = dom::get_attribute(template, "ooml-class");
    let abstract_ = dom::get_attribute(template, "ooml-abstract-class");

    let (declaration, is_abstract) = match (concrete, abstract_) {
        (Some(d), None) => (d, false),
        (None, Some(d)) => (d, true),
        (Some(_), Some(_)) => {
            return Err(OomlError::syntax(
                "A class template cannot be both concrete and abstract",
            ))
        }
        (None, None) => return Err(OomlError::syntax("Template is not a class declaration")),
    };

    let declaration = declaration.trim();
    let caps = CLASS_HEADER_RE
        .captures(declaration)
        .ok_or_else(|| OomlError::syntax(format!("Invalid class declaration \"{}\"", declaration)))?;

    let name = caps[1].to_string();
    if is_element_sentinel(&name) {
        return Err(OomlError::syntax(format!("\"{}\" is a reserved class name", name)));
    }

    Ok(ClassHeader {
        name,
        is_abstract,
        extends: caps.get(2).map(|m| m.as_str().to_string()),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse an HTML document or fragment with html5ever
pub fn parse_document(html: &str) -> Result<Handle> {
    let dom = html5ever_parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .map_err(|e| OomlError::syntax(format!("Failed to parse HTML: {}", e)))?;
    Ok(dom.document)
}

/// Every class template in document order
pub fn find_class_templates(document: &Handle) -> Vec<Handle> {
    dom::find_elements(document, &|node| {
        dom::element_name(node).as_deref() == Some("template")
            && (dom::get_attribute(node, "ooml-class").is_some()
                || dom::get_attribute(node, "ooml-abstract-class").is_some())
    })
}

/// Class names a template depends on: its parent and every element type
pub fn referenced_class_names(header: &ClassHeader, template: &Handle) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    if let Some(parent) = &header.extends {
        names.insert(parent.clone());
    }
    collect_referenced_names(template, &mut names);
    names
}

fn collect_referenced_names(node: &Handle, names: &mut BTreeSet<String>) {
    for child in dom::content_children(node) {
        match &child.data {
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                let mut rest = text.as_str();
                while let Some(open) = rest.find('{') {
                    rest = &rest[open + 1..];
                    let Some(close) = rest.find('}') else { break };
                    if let Some(caps) = ELEMENT_SUBSTITUTION_RE.captures(rest[..close].trim()) {
                        if let Some(class) = caps.get(1).or_else(|| caps.get(2)) {
                            if !is_element_sentinel(class.as_str()) {
                                names.insert(class.as_str().to_string());
                            }
                        }
                    }
                    rest = &rest[close + 1..];
                }
            }
            NodeData::Element { .. } => collect_referenced_names(&child, names),
            _ => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE PARSER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct TemplateParser<'a> {
    resolver: &'a dyn ClassResolver,
    strict_property_names: bool,
}

/// Mutable state for one walk of a class template
struct ParseState {
    properties: Vec<PropertyDescriptor>,
    attributes: Vec<AttributeDescriptor>,
    methods: BTreeMap<String, Method>,
    /// Properties whose default was written by the author
    explicit_defaults: HashSet<String>,
    /// Properties declared by this class, as opposed to inherited
    own_declarations: HashSet<String>,
    expose_keys: Vec<String>,
    extension_point: Option<Vec<usize>>,
}

impl ParseState {
    fn property_mut(&mut self, name: &str) -> Option<&mut PropertyDescriptor> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }
}

impl<'a> TemplateParser<'a> {
    pub fn new(resolver: &'a dyn ClassResolver, strict_property_names: bool) -> Self {
        Self {
            resolver,
            strict_property_names,
        }
    }

    /// Parse a class definition against its (already compiled) parent
    pub fn parse(
        &self,
        definition: ClassDefinition,
        parent: Option<&OomlClass>,
    ) -> Result<ClassDescriptor> {
        let ClassDefinition {
            header,
            template,
            methods: own_methods,
            constructor,
        } = definition;

        let parent_descriptor = parent.map(OomlClass::descriptor);

        let mut state = ParseState {
            properties: parent_descriptor
                .map(|d| d.properties.clone())
                .unwrap_or_default(),
            attributes: parent_descriptor
                .map(|d| d.attributes.clone())
                .unwrap_or_default(),
            methods: parent_descriptor
                .map(|d| d.methods.clone())
                .unwrap_or_default(),
            explicit_defaults: HashSet::new(),
            own_declarations: HashSet::new(),
            expose_keys: parent_descriptor
                .map(|d| d.expose_keys.clone())
                .unwrap_or_default(),
            extension_point: None,
        };

        for (name, method) in own_methods {
            if RESERVED_NAMES.contains(name.as_str()) {
                return Err(OomlError::syntax(format!(
                    "\"{}\" is a reserved name and cannot be a method",
                    name
                )));
            }
            state.methods.insert(name, method);
        }

        // Declarations first, so substitutions can be validated against them
        let mut view_root: Option<Handle> = None;
        let mut property_decls = Vec::new();
        let mut attribute_decls = Vec::new();

        for child in dom::content_children(&template) {
            match &child.data {
                NodeData::Element { .. } => match dom::element_name(&child).as_deref() {
                    Some(PROPERTY_DECLARATION_TAG) => property_decls.push(child.clone()),
                    Some(ATTRIBUTE_DECLARATION_TAG) => attribute_decls.push(child.clone()),
                    _ => {
                        if view_root.is_some() {
                            return Err(OomlError::syntax(format!(
                                "The class \"{}\" has more than one root element",
                                header.name
                            )));
                        }
                        view_root = Some(child.clone());
                    }
                },
                NodeData::Text { contents } => {
                    if !contents.borrow().trim().is_empty() {
                        return Err(OomlError::syntax(format!(
                            "Unexpected text outside the root element of \"{}\"",
                            header.name
                        )));
                    }
                }
                _ => {}
            }
        }

        for decl in &attribute_decls {
            self.declare_attribute(&mut state, decl)?;
        }
        for decl in &property_decls {
            self.declare_property(&mut state, decl)?;
        }

        let own_view = match &view_root {
            Some(root) => {
                let mut nodes = self.parse_node(&mut state, root, &mut Vec::new())?;
                nodes.pop()
            }
            None => None,
        };

        let (view, extension_point) =
            compose_view(parent_descriptor, own_view, state.extension_point.take())?;

        finish_properties(&mut state)?;

        tracing::debug!(
            "parsed class \"{}\": {} properties, {} attributes",
            header.name,
            state.properties.len(),
            state.attributes.len()
        );

        Ok(ClassDescriptor {
            name: header.name,
            is_abstract: header.is_abstract,
            parent: parent.cloned(),
            constructor,
            properties: state.properties,
            attributes: state.attributes,
            methods: state.methods,
            view,
            extension_point,
            expose_keys: state.expose_keys,
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Declarations
    // ───────────────────────────────────────────────────────────────────────────

    fn declare_attribute(&self, state: &mut ParseState, decl: &Handle) -> Result<()> {
        let name = dom::get_attribute(decl, "name")
            .ok_or_else(|| OomlError::syntax("An attribute declaration is missing its name"))?;
        if !is_valid_attribute_name(&name) {
            return Err(OomlError::syntax(format!(
                "\"{}\" is not a valid attribute name",
                name
            )));
        }
        if state.attributes.iter().any(|a| a.name == name) {
            return Err(OomlError::syntax(format!(
                "The attribute \"{}\" has already been declared",
                name
            )));
        }

        let types = dom::get_attribute(decl, "type")
            .map(|t| parse_type_declaration(&t))
            .transpose()?;
        let default = match parse_default(decl)? {
            Some(value) => {
                check_primitive_default(&name, &value, types.as_deref())?;
                value
            }
            None => default_for_types(types.as_deref()),
        };

        state.attributes.push(AttributeDescriptor {
            name,
            types,
            default,
        });
        Ok(())
    }

    fn declare_property(&self, state: &mut ParseState, decl: &Handle) -> Result<()> {
        let name = dom::get_attribute(decl, "name")
            .ok_or_else(|| OomlError::syntax("A property declaration is missing its name"))?;
        if !is_valid_property_name(&name, self.strict_property_names) {
            return Err(OomlError::syntax(format!(
                "\"{}\" is not a valid property name",
                name
            )));
        }
        if state.own_declarations.contains(&name) {
            return Err(OomlError::syntax(format!(
                "The property \"{}\" has already been declared",
                name
            )));
        }
        if state.methods.contains_key(&name) {
            return Err(OomlError::syntax(format!(
                "\"{}\" already exists as a method",
                name
            )));
        }

        let types = dom::get_attribute(decl, "type")
            .map(|t| parse_type_declaration(&t))
            .transpose()?;
        let default = parse_default(decl)?;
        let passthrough = dom::get_attribute(decl, "passthrough");
        if passthrough.as_deref() == Some("") {
            return Err(OomlError::syntax(format!(
                "The passthrough key for \"{}\" is empty",
                name
            )));
        }
        let binding = dom::get_attribute(decl, "binding")
            .map(|source| parse_binding(&name, &source))
            .transpose()?;

        match state.property_mut(&name) {
            Some(inherited) => {
                // Redeclaring an inherited property overrides its default
                if !inherited.kind.is_primitive() {
                    return Err(OomlError::syntax(format!(
                        "The inherited property \"{}\" is an element substitution and cannot be redeclared",
                        name
                    )));
                }
                if types.is_some() {
                    inherited.kind = PropertyKind::Primitive {
                        types: types.clone(),
                    };
                }
                if let Some(value) = &default {
                    inherited.default = value.clone();
                }
                if binding.is_some() {
                    inherited.binding = binding;
                }
                if passthrough.is_some() {
                    inherited.passthrough = passthrough;
                }
            }
            None => {
                let mut property = PropertyDescriptor::primitive(&name, types);
                if let Some(value) = &default {
                    property.default = value.clone();
                }
                property.binding = binding;
                property.passthrough = passthrough;
                state.properties.push(property);
            }
        }

        if default.is_some() {
            state.explicit_defaults.insert(name.clone());
        }
        state.own_declarations.insert(name);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // View
    // ───────────────────────────────────────────────────────────────────────────

    /// Parse one template node. `path` holds the child indices leading to it.
    fn parse_node(
        &self,
        state: &mut ParseState,
        node: &Handle,
        path: &mut Vec<usize>,
    ) -> Result<Vec<ViewNode>> {
        match &node.data {
            NodeData::Element { name, attrs, .. } => {
                let tag = name.local.to_string();

                if tag == EXTENSION_POINT_TAG {
                    if state.extension_point.is_some() {
                        return Err(OomlError::syntax(
                            "A class view may only have one extension point",
                        ));
                    }
                    state.extension_point = Some(path.clone());
                    return Ok(vec![ViewNode::ExtensionPoint]);
                }
                if tag == PROPERTY_DECLARATION_TAG || tag == ATTRIBUTE_DECLARATION_TAG {
                    return Err(OomlError::syntax(format!(
                        "<{}> must be a direct child of the class template",
                        tag
                    )));
                }

                let mut shape = ElementShape {
                    name: name.clone(),
                    attributes: Vec::new(),
                    dom_handlers: BTreeMap::new(),
                    child_handlers: BTreeMap::new(),
                    expose_key: None,
                    children: Vec::new(),
                };

                let mut seen = HashSet::new();
                for attr in attrs.borrow().iter() {
                    let attr_name = attr.name.local.to_lowercase();
                    let value = attr.value.to_string();

                    if !seen.insert(attr_name.clone()) {
                        return Err(OomlError::syntax(format!(
                            "Duplicate attribute \"{}\"",
                            attr_name
                        )));
                    }

                    if let Some(event) = attr_name.strip_prefix("childon") {
                        let spec = self.compile_handler(state, &attr_name, event, &value)?;
                        if shape.child_handlers.insert(event.to_string(), spec).is_some() {
                            return Err(OomlError::syntax(format!(
                                "Another child \"{}\" event handler already exists",
                                event
                            )));
                        }
                    } else if let Some(event) = attr_name.strip_prefix("domon") {
                        let spec = self.compile_handler(state, &attr_name, event, &value)?;
                        if shape.dom_handlers.insert(event.to_string(), spec).is_some() {
                            return Err(OomlError::syntax(format!(
                                "Another DOM \"{}\" event handler already exists",
                                event
                            )));
                        }
                    } else if attr_name.starts_with("on") {
                        return Err(OomlError::syntax(format!(
                            "Native DOM event handlers are not allowed (\"{}\")",
                            attr_name
                        )));
                    } else if attr_name == EXPOSE_ATTRIBUTE {
                        let key = value.trim().to_string();
                        if !EXPOSE_KEY_RE.is_match(&key) {
                            return Err(OomlError::syntax(format!(
                                "\"{}\" is not a valid expose key",
                                key
                            )));
                        }
                        if state.expose_keys.contains(&key) {
                            return Err(OomlError::syntax(format!(
                                "A node is already exposed with the key \"{}\"",
                                key
                            )));
                        }
                        state.expose_keys.push(key.clone());
                        shape.expose_key = Some(key);
                    } else {
                        let out_name = if attr_name == "ooml-style" {
                            dom::attr_name("style")
                        } else {
                            attr.name.clone()
                        };
                        let format = if value.contains("{{") {
                            Some(self.parse_format(state, &value)?)
                        } else {
                            None
                        };
                        shape.attributes.push(AttributeShape {
                            name: out_name,
                            value,
                            format,
                        });
                    }
                }

                for child in node.children.borrow().iter() {
                    path.push(shape.children.len());
                    let parsed = self.parse_node(state, child, path);
                    path.pop();
                    shape.children.extend(parsed?);
                }

                Ok(vec![ViewNode::Element(shape)])
            }

            // Whitespace is kept; only the template's own children skip it
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                self.parse_text(state, &text)
            }

            NodeData::Comment { contents } => Ok(vec![ViewNode::Marker(MarkerShape {
                value: contents.to_string(),
                property: None,
            })]),

            _ => Ok(Vec::new()),
        }
    }

    /// Split text into static text, text substitutions and element markers
    fn parse_text(&self, state: &mut ParseState, text: &str) -> Result<Vec<ViewNode>> {
        let mut nodes = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                nodes.push(ViewNode::Text(TextShape {
                    value: rest[..open].to_string(),
                    source: None,
                }));
            }
            rest = &rest[open..];

            // The shortest valid substitution is "{ X this.y }", so a closing
            // brace nearer than 3 characters cannot close one
            let close = match rest.find('}') {
                Some(i) if i >= 3 => i,
                _ => return Err(OomlError::syntax("Matching closing brace not found")),
            };
            let code = &rest[1..close];

            if let Some(inner) = code.strip_prefix('{') {
                if !rest[close + 1..].starts_with('}') {
                    return Err(OomlError::syntax(
                        "Unexpected end of input; expected closing text parameter braces",
                    ));
                }
                let source = self.register_text_substitution(state, inner)?;
                nodes.push(ViewNode::Text(TextShape {
                    value: String::new(),
                    source: Some(source),
                }));
                rest = &rest[close + 2..];
            } else {
                let property = self.register_element_substitution(state, code)?;
                nodes.push(ViewNode::Marker(MarkerShape {
                    value: String::new(),
                    property: Some(property),
                }));
                rest = &rest[close + 1..];
            }
        }

        if !rest.is_empty() {
            nodes.push(ViewNode::Text(TextShape {
                value: rest.to_string(),
                source: None,
            }));
        }

        Ok(nodes)
    }

    /// Parse an attribute value containing `{{ ... }}` parameters
    fn parse_format(&self, state: &mut ParseState, value: &str) -> Result<FormatTemplate> {
        let mut format = FormatTemplate::default();
        let mut rest = value;

        loop {
            let Some(open) = rest.find("{{") else {
                if !rest.is_empty() {
                    format.parts.push(rest.to_string());
                }
                break;
            };
            if open > 0 {
                format.parts.push(rest[..open].to_string());
            }
            rest = &rest[open + 2..];

            let close = rest.find("}}").ok_or_else(|| {
                OomlError::syntax("Unexpected end of input; expected closing text parameter braces")
            })?;
            let source = self.register_text_substitution(state, &rest[..close])?;
            format
                .slots
                .entry(source)
                .or_default()
                .push(format.parts.len());
            format.parts.push(String::new());
            rest = &rest[close + 2..];
        }

        Ok(format)
    }

    fn register_text_substitution(
        &self,
        state: &mut ParseState,
        code: &str,
    ) -> Result<SubstitutionSource> {
        let (declared, source) = parse_substitution_code(code)?;

        match &source {
            SubstitutionSource::Attribute(name) => {
                if !is_valid_attribute_name(name) {
                    return Err(OomlError::syntax(format!(
                        "\"{}\" is not a valid attribute name",
                        name
                    )));
                }
                let attribute = state
                    .attributes
                    .iter()
                    .find(|a| &a.name == name)
                    .ok_or_else(|| {
                        OomlError::reference(format!("The attribute \"{}\" does not exist", name))
                    })?;
                if let Some(declared) = declared {
                    let declared = parse_type_declaration(&declared)?;
                    if !same_type_set(attribute.types.as_deref(), &declared) {
                        return Err(OomlError::syntax(format!(
                            "Invalid type declaration for the attribute substitution \"{}\"",
                            name
                        )));
                    }
                }
            }

            SubstitutionSource::Property(name) => {
                if !is_valid_property_name(name, self.strict_property_names) {
                    return Err(OomlError::syntax(format!(
                        "\"{}\" is not a valid property name",
                        name
                    )));
                }
                if state.methods.contains_key(name) {
                    return Err(OomlError::syntax(format!(
                        "\"{}\" already exists as a method",
                        name
                    )));
                }
                let declared = declared.map(|d| parse_type_declaration(&d)).transpose()?;

                match state.property_mut(name) {
                    Some(existing) => {
                        let PropertyKind::Primitive { types } = &mut existing.kind else {
                            return Err(OomlError::syntax(format!(
                                "The property \"{}\" already exists as an element substitution",
                                name
                            )));
                        };
                        if let Some(declared) = declared {
                            match types {
                                Some(existing_types) => {
                                    if !same_type_set(Some(existing_types), &declared) {
                                        return Err(OomlError::syntax(format!(
                                            "The types for the property \"{}\" have already been declared",
                                            name
                                        )));
                                    }
                                }
                                None => *types = Some(declared),
                            }
                        }
                        existing.has_view_site = true;
                    }
                    None => {
                        let mut property = PropertyDescriptor::primitive(name, declared);
                        property.has_view_site = true;
                        state.properties.push(property);
                    }
                }
            }
        }

        Ok(source)
    }

    /// Register `{ Class this.prop }` or `{ for Class of this.prop }`
    fn register_element_substitution(&self, state: &mut ParseState, code: &str) -> Result<String> {
        let caps = ELEMENT_SUBSTITUTION_RE
            .captures(code.trim())
            .ok_or_else(|| OomlError::syntax(format!("Invalid element substitution at \"{}\"", code)))?;

        let is_array = caps.get(1).is_some();
        let class_name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let name = caps[3].to_string();

        if !is_valid_property_name(&name, self.strict_property_names) {
            return Err(OomlError::syntax(format!(
                "\"{}\" is not a valid property name",
                name
            )));
        }
        if state.methods.contains_key(&name) {
            return Err(OomlError::syntax(format!(
                "\"{}\" already exists as a method",
                name
            )));
        }

        let element = if is_element_sentinel(class_name) {
            ElementType::AnyInstance
        } else {
            ElementType::Class(self.resolver.resolve_class(class_name)?)
        };
        let kind = if is_array {
            PropertyKind::Array { element }
        } else {
            PropertyKind::Instance { element }
        };

        match state.property_mut(&name) {
            Some(existing) => {
                if existing.has_view_site {
                    return Err(OomlError::syntax(format!(
                        "The property \"{}\" is already defined",
                        name
                    )));
                }
                if existing.kind.types().is_some() {
                    return Err(OomlError::syntax(format!(
                        "The property \"{}\" has a primitive type declaration and cannot be an element substitution",
                        name
                    )));
                }
                existing.kind = kind;
                existing.has_view_site = true;
            }
            None => {
                state.properties.push(PropertyDescriptor {
                    name: name.clone(),
                    kind,
                    default: Value::Null,
                    binding: None,
                    passthrough: None,
                    has_view_site: true,
                });
            }
        }

        Ok(name)
    }

    fn compile_handler(
        &self,
        state: &ParseState,
        attr_name: &str,
        event: &str,
        body: &str,
    ) -> Result<HandlerSpec> {
        if event.is_empty() {
            return Err(OomlError::syntax(format!(
                "The handler attribute \"{}\" has no event name",
                attr_name
            )));
        }
        compile_handler_body(body, &state.methods)
    }
}

/// Split `[types] this.[attributes.]name` into its parts
fn parse_substitution_code(code: &str) -> Result<(Option<String>, SubstitutionSource)> {
    let caps = TEXT_SUBSTITUTION_RE
        .captures(code.trim())
        .ok_or_else(|| OomlError::syntax(format!("Invalid property declaration at \"{}\"", code)))?;

    let declared = caps.get(1).map(|m| m.as_str().to_string());
    let name = caps[3].to_string();
    let source = if caps.get(2).is_some() {
        SubstitutionSource::Attribute(name)
    } else {
        SubstitutionSource::Property(name)
    };
    Ok((declared, source))
}

/// Compile a handler body into steps
pub fn compile_handler_body(body: &str, methods: &BTreeMap<String, Method>) -> Result<HandlerSpec> {
    let mut steps = Vec::new();

    for statement in body.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(caps) = DISPATCH_STEP_RE.captures(statement) {
            let event = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_default();
            steps.push(HandlerStep::Dispatch(event));
        } else if let Some(caps) = METHOD_STEP_RE.captures(statement) {
            let method = caps[1].to_string();
            if !methods.contains_key(&method) {
                return Err(OomlError::syntax(format!(
                    "The handler \"{}\" calls \"{}\", which is not a method",
                    body.trim(),
                    method
                )));
            }
            steps.push(HandlerStep::CallMethod(method));
        } else {
            return Err(OomlError::syntax(format!(
                "Invalid handler statement \"{}\"",
                statement
            )));
        }
    }

    if steps.is_empty() {
        return Err(OomlError::syntax("Event handler body is empty"));
    }

    Ok(HandlerSpec {
        source: body.trim().to_string(),
        steps,
    })
}

fn parse_default(decl: &Handle) -> Result<Option<Value>> {
    let text = dom::text_content(decl);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<serde_json::Value>(text)
        .map(|json| Some(Value::from(json)))
        .map_err(|e| OomlError::syntax(format!("Invalid default value \"{}\": {}", text, e)))
}

/// A dynamic binding may only reference properties
fn parse_binding(name: &str, source: &str) -> Result<DynamicBinding> {
    let mut template = FormatTemplate::default();
    let mut rest = source;

    loop {
        let Some(open) = rest.find("{{") else {
            if !rest.is_empty() {
                template.parts.push(rest.to_string());
            }
            break;
        };
        if open > 0 {
            template.parts.push(rest[..open].to_string());
        }
        rest = &rest[open + 2..];
        let close = rest.find("}}").ok_or_else(|| {
            OomlError::syntax(format!("Unterminated parameter in the binding of \"{}\"", name))
        })?;
        let (declared, param) = parse_substitution_code(&rest[..close])?;
        if declared.is_some() || !matches!(param, SubstitutionSource::Property(_)) {
            return Err(OomlError::syntax(format!(
                "The binding of \"{}\" may only reference untyped properties",
                name
            )));
        }
        template
            .slots
            .entry(param)
            .or_default()
            .push(template.parts.len());
        template.parts.push(String::new());
        rest = &rest[close + 2..];
    }

    let dependencies = template.property_names();
    if dependencies.is_empty() {
        return Err(OomlError::syntax(format!(
            "The binding of \"{}\" does not reference any property",
            name
        )));
    }

    Ok(DynamicBinding {
        template,
        dependencies,
    })
}

fn same_type_set(existing: Option<&[PrimitiveType]>, declared: &[PrimitiveType]) -> bool {
    match existing {
        Some(existing) => {
            let a: BTreeSet<_> = existing.iter().collect();
            let b: BTreeSet<_> = declared.iter().collect();
            a == b
        }
        None => false,
    }
}

fn check_primitive_default(name: &str, value: &Value, types: Option<&[PrimitiveType]>) -> Result<()> {
    if !value.is_primitive() {
        return Err(OomlError::syntax(format!(
            "The default value of \"{}\" is not a primitive value",
            name
        )));
    }
    if let Some(types) = types {
        if !value_matches(types, value) {
            return Err(OomlError::syntax(format!(
                "The default value of \"{}\" does not match its declared types",
                name
            )));
        }
    }
    Ok(())
}

/// Validate defaults, bindings and passthrough keys once every site is known
fn finish_properties(state: &mut ParseState) -> Result<()> {
    let names: HashSet<String> = state.properties.iter().map(|p| p.name.clone()).collect();
    let primitive_names: HashSet<String> = state
        .properties
        .iter()
        .filter(|p| p.kind.is_primitive())
        .map(|p| p.name.clone())
        .collect();

    for property in state.properties.iter_mut() {
        let name = property.name.clone();

        if state.methods.contains_key(&name) {
            return Err(OomlError::syntax(format!(
                "\"{}\" is both a property and a method",
                name
            )));
        }

        match &property.kind {
            PropertyKind::Primitive { types } => {
                if property.passthrough.is_some() {
                    return Err(OomlError::syntax(format!(
                        "The passthrough property \"{}\" must be an element substitution",
                        name
                    )));
                }
                if state.explicit_defaults.contains(&name) {
                    check_primitive_default(&name, &property.default, types.as_deref())?;
                } else if state.own_declarations.contains(&name) || !property.default.is_primitive()
                {
                    property.default = default_for_types(types.as_deref());
                } else if let Some(types) = types {
                    if !value_matches(types, &property.default) {
                        property.default = default_for_types(Some(types));
                    }
                }
            }
            PropertyKind::Instance { .. } => {
                if !matches!(property.default, Value::Null | Value::Object(_)) {
                    return Err(OomlError::syntax(format!(
                        "The default value of the element property \"{}\" must be null or an object",
                        name
                    )));
                }
                if property.binding.is_some() {
                    return Err(OomlError::syntax(format!(
                        "The element property \"{}\" cannot have a dynamic binding",
                        name
                    )));
                }
            }
            PropertyKind::Array { .. } => {
                match &property.default {
                    Value::Null => property.default = Value::Array(Vec::new()),
                    Value::Array(items) => {
                        if !items.iter().all(|i| matches!(i, Value::Object(_))) {
                            return Err(OomlError::syntax(format!(
                                "The default value of the array property \"{}\" must contain only objects",
                                name
                            )));
                        }
                    }
                    _ => {
                        return Err(OomlError::syntax(format!(
                            "The default value of the array property \"{}\" must be an array",
                            name
                        )))
                    }
                }
                if property.binding.is_some() || property.passthrough.is_some() {
                    return Err(OomlError::syntax(format!(
                        "The array property \"{}\" cannot have a binding or passthrough key",
                        name
                    )));
                }
            }
        }

        if let Some(binding) = &property.binding {
            if let Some(types) = property.kind.types() {
                if !types.contains(&PrimitiveType::String) {
                    return Err(OomlError::syntax(format!(
                        "The bound property \"{}\" must accept strings",
                        name
                    )));
                }
            }
            for dependency in &binding.dependencies {
                if dependency == &name {
                    return Err(OomlError::syntax(format!(
                        "The binding of \"{}\" depends on itself",
                        name
                    )));
                }
                if !names.contains(dependency) {
                    return Err(OomlError::reference(format!(
                        "The binding of \"{}\" references the unknown property \"{}\"",
                        name, dependency
                    )));
                }
                if !primitive_names.contains(dependency) {
                    return Err(OomlError::syntax(format!(
                        "The binding of \"{}\" references the element property \"{}\"",
                        name, dependency
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Combine an own view with the parent's view
fn compose_view(
    parent: Option<&ClassDescriptor>,
    own_view: Option<ViewNode>,
    own_extension: Option<Vec<usize>>,
) -> Result<(Option<ViewNode>, Option<Vec<usize>>)> {
    let parent_view = parent.and_then(|p| p.view.clone());
    let parent_extension = parent.and_then(|p| p.extension_point.clone());

    match (parent_view, own_view) {
        (None, own) => Ok((own, own_extension)),
        (Some(inherited), None) => Ok((Some(inherited), parent_extension)),
        (Some(mut inherited), Some(own)) => {
            let Some(at) = parent_extension else {
                return Err(OomlError::syntax(
                    "The parent class view has no extension point for this class's view",
                ));
            };
            if !inherited.replace_at(&at, own) {
                return Err(OomlError::logic("extension point path does not resolve"));
            }
            let extension = own_extension.map(|own_path| {
                let mut path = at.clone();
                path.extend(own_path);
                path
            });
            Ok((Some(inherited), extension))
        }
    }
}
