//! Namespace Loader
//!
//! A namespace owns the classes compiled from one or more host documents
//! and the objects those documents instantiate. Loading a document:
//!
//! 1. parses it with html5ever
//! 2. compiles every `<template ooml-class>` once its parent and element
//!    classes exist, so templates may appear in any order
//! 3. replaces each `<x ooml-instantiate="Class name">` marker with the
//!    root of a new instance, copying the marker's other attributes over
//!
//! Methods, constructors and abstract factories are host code; they are
//! supplied per class through `ClassBindings`.

use markup5ever_rcdom::{Handle, NodeData};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::{Rc, Weak};

use crate::class::{AbstractFactory, CompileOptions, ConstructorFn, Method, OomlClass, SuperConstructor};
use crate::config::NamespaceSettings;
use crate::discovery;
use crate::dom;
use crate::error::{OomlError, Result};
use crate::events::HandlerContext;
use crate::instance::Instance;
use crate::parse::{
    find_class_templates, parse_document, read_class_header, referenced_class_names, ClassDefinition,
    ClassHeader, ClassResolver, TemplateParser,
};
use crate::scheduler::WriteScheduler;
use crate::value::Value;

pub const INSTANTIATE_ATTRIBUTE: &str = "ooml-instantiate";

type NamespaceFactory = Rc<dyn Fn(&Namespace, Option<&Value>) -> Result<Instance>>;

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default, Clone)]
struct ClassBehavior {
    methods: BTreeMap<String, Method>,
    constructor: Option<ConstructorFn>,
    factory: Option<NamespaceFactory>,
}

/// Host-supplied behavior, keyed by class name
#[derive(Default, Clone)]
pub struct ClassBindings {
    classes: BTreeMap<String, ClassBehavior>,
}

impl ClassBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F>(mut self, class: &str, name: &str, method: F) -> Self
    where
        F: Fn(&HandlerContext<'_>) -> Result<Value> + 'static,
    {
        self.classes
            .entry(class.to_string())
            .or_default()
            .methods
            .insert(name.to_string(), Rc::new(method));
        self
    }

    pub fn constructor<F>(mut self, class: &str, constructor: F) -> Self
    where
        F: Fn(&Instance, &SuperConstructor<'_>) -> Result<()> + 'static,
    {
        self.classes.entry(class.to_string()).or_default().constructor = Some(Rc::new(constructor));
        self
    }

    /// Factory used when an abstract class is constructed
    pub fn factory<F>(mut self, class: &str, factory: F) -> Self
    where
        F: Fn(&Namespace, Option<&Value>) -> Result<Instance> + 'static,
    {
        self.classes.entry(class.to_string()).or_default().factory = Some(Rc::new(factory));
        self
    }

    fn behavior(&self, class: &str) -> ClassBehavior {
        self.classes.get(class).cloned().unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMESPACE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct NamespaceInner {
    settings: NamespaceSettings,
    scheduler: Rc<WriteScheduler>,
    imports: RefCell<BTreeMap<String, OomlClass>>,
    classes: RefCell<BTreeMap<String, OomlClass>>,
    objects: RefCell<BTreeMap<String, Instance>>,
    documents: RefCell<Vec<Handle>>,
}

impl ClassResolver for NamespaceInner {
    fn resolve_class(&self, name: &str) -> Result<OomlClass> {
        if let Some(class) = self.classes.borrow().get(name) {
            return Ok(class.clone());
        }
        self.imports
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| OomlError::reference(format!("The class \"{}\" does not exist", name)))
    }
}

#[derive(Clone)]
pub struct Namespace(Rc<NamespaceInner>);

/// A class template found in a document, not yet compiled
struct PendingClass {
    header: ClassHeader,
    template: Handle,
    requires: BTreeSet<String>,
}

impl Namespace {
    pub fn new(settings: NamespaceSettings) -> Self {
        let scheduler = Rc::new(WriteScheduler::new(settings.write_delay()));
        Self::with_scheduler(settings, scheduler)
    }

    pub fn with_scheduler(settings: NamespaceSettings, scheduler: Rc<WriteScheduler>) -> Self {
        Self(Rc::new(NamespaceInner {
            settings,
            scheduler,
            imports: RefCell::new(BTreeMap::new()),
            classes: RefCell::new(BTreeMap::new()),
            objects: RefCell::new(BTreeMap::new()),
            documents: RefCell::new(Vec::new()),
        }))
    }

    /// Make classes from elsewhere resolvable by name
    pub fn with_imports(self, imports: BTreeMap<String, OomlClass>) -> Self {
        self.0.imports.borrow_mut().extend(imports);
        self
    }

    pub(crate) fn from_inner(inner: Rc<NamespaceInner>) -> Self {
        Self(inner)
    }

    pub fn settings(&self) -> &NamespaceSettings {
        &self.0.settings
    }

    pub fn scheduler(&self) -> &Rc<WriteScheduler> {
        &self.0.scheduler
    }

    pub fn class(&self, name: &str) -> Result<OomlClass> {
        self.0.resolve_class(name)
    }

    pub fn class_names(&self) -> Vec<String> {
        self.0.classes.borrow().keys().cloned().collect()
    }

    pub fn object(&self, name: &str) -> Option<Instance> {
        self.0.objects.borrow().get(name).cloned()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.0.objects.borrow().keys().cloned().collect()
    }

    /// Host documents loaded so far, with instances spliced in
    pub fn documents(&self) -> Vec<Handle> {
        self.0.documents.borrow().clone()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Loading
    // ───────────────────────────────────────────────────────────────────────────

    pub fn load_document(&self, html: &str, bindings: &ClassBindings) -> Result<Handle> {
        let mut documents = self.load_sources(&[html], bindings)?;
        documents
            .pop()
            .ok_or_else(|| OomlError::logic("no document was loaded"))
    }

    /// Load every `.ooml` file under `dir`. Classes may reference classes
    /// from any of the files.
    pub fn load_dir(&self, dir: &Path, bindings: &ClassBindings) -> Result<Vec<Handle>> {
        let files = discovery::discover_templates(dir)?;
        let sources: Vec<&str> = files.iter().map(|f| f.source.as_str()).collect();
        self.load_sources(&sources, bindings)
    }

    fn load_sources(&self, sources: &[&str], bindings: &ClassBindings) -> Result<Vec<Handle>> {
        let documents = sources
            .iter()
            .map(|source| parse_document(source))
            .collect::<Result<Vec<_>>>()?;

        let mut pending = Vec::new();
        let mut seen = BTreeSet::new();
        for document in &documents {
            for template in find_class_templates(document) {
                let header = read_class_header(&template)?;
                if self.0.classes.borrow().contains_key(&header.name) || !seen.insert(header.name.clone()) {
                    return Err(OomlError::syntax(format!(
                        "A class already exists with the name \"{}\"",
                        header.name
                    )));
                }
                let requires = referenced_class_names(&header, &template);
                pending.push(PendingClass {
                    header,
                    template,
                    requires,
                });
            }
        }

        self.compile_pending(pending, bindings)?;

        for document in &documents {
            self.instantiate_markers(document)?;
        }
        self.0.documents.borrow_mut().extend(documents.iter().cloned());
        Ok(documents)
    }

    /// Compile in dependency order: a class waits until everything it
    /// references has been compiled
    fn compile_pending(&self, mut pending: Vec<PendingClass>, bindings: &ClassBindings) -> Result<()> {
        let pending_names: BTreeSet<String> = pending.iter().map(|p| p.header.name.clone()).collect();
        for class in &pending {
            for required in &class.requires {
                if !pending_names.contains(required) {
                    // Must already be known
                    self.0.resolve_class(required)?;
                }
            }
        }

        while !pending.is_empty() {
            let ready = pending.iter().position(|p| {
                p.requires
                    .iter()
                    .all(|r| self.0.resolve_class(r).is_ok())
            });
            let Some(index) = ready else {
                let names: Vec<&str> = pending.iter().map(|p| p.header.name.as_str()).collect();
                return Err(OomlError::syntax(format!(
                    "Circular class references between: {}",
                    names.join(", ")
                )));
            };
            let next = pending.remove(index);
            let class = self.compile_class(next, bindings)?;
            self.0
                .classes
                .borrow_mut()
                .insert(class.name().to_string(), class);
        }
        Ok(())
    }

    fn compile_class(&self, pending: PendingClass, bindings: &ClassBindings) -> Result<OomlClass> {
        let behavior = bindings.behavior(&pending.header.name);
        let parent = pending
            .header
            .extends
            .as_deref()
            .map(|name| self.0.resolve_class(name))
            .transpose()?;

        let definition = ClassDefinition {
            header: pending.header,
            template: pending.template,
            methods: behavior.methods,
            constructor: behavior.constructor,
        };

        let parser = TemplateParser::new(self.0.as_ref(), self.0.settings.strict_property_names);
        let descriptor = parser.parse(definition, parent.as_ref())?;

        let factory = behavior.factory.map(|factory| -> AbstractFactory {
            let namespace = Rc::downgrade(&self.0);
            Rc::new(move |init: Option<&Value>| {
                let namespace = namespace
                    .upgrade()
                    .map(Namespace::from_inner)
                    .ok_or_else(|| OomlError::logic("namespace dropped while constructing"))?;
                factory(&namespace, init)
            })
        });

        OomlClass::compile(
            descriptor,
            CompileOptions {
                scheduler: Rc::clone(&self.0.scheduler),
                factory,
                namespace: self.downgrade(),
            },
        )
    }

    fn downgrade(&self) -> Weak<NamespaceInner> {
        Rc::downgrade(&self.0)
    }

    /// Replace every instantiation marker in `document` with a new instance
    fn instantiate_markers(&self, document: &Handle) -> Result<()> {
        let markers = dom::find_elements(document, &|node| {
            dom::get_attribute(node, INSTANTIATE_ATTRIBUTE).is_some()
                && dom::is_inclusive_ancestor(document, node)
        });

        for marker in markers {
            let declaration = dom::get_attribute(&marker, INSTANTIATE_ATTRIBUTE).unwrap_or_default();
            let parts: Vec<&str> = declaration.split_whitespace().collect();
            let [class_name, object_name] = parts.as_slice() else {
                return Err(OomlError::syntax(format!(
                    "Invalid instantiation \"{}\"; expected \"Class name\"",
                    declaration
                )));
            };
            if self.0.objects.borrow().contains_key(*object_name) {
                return Err(OomlError::syntax(format!(
                    "An object already exists with the name \"{}\"",
                    object_name
                )));
            }

            let class = self.0.resolve_class(class_name)?;
            let init_source = dom::text_content(&marker);
            let instance = if init_source.trim().is_empty() {
                class.construct(None)?
            } else {
                class.construct_from_json(init_source.trim())?
            };

            let root = instance.root()?;
            if let NodeData::Element { attrs, .. } = &marker.data {
                for attr in attrs.borrow().iter() {
                    if &*attr.name.local != INSTANTIATE_ATTRIBUTE {
                        dom::set_attribute(&root, &attr.name, &attr.value);
                    }
                }
            }
            dom::insert_after(&marker, root)?;
            dom::remove_from_parent(&marker);

            tracing::debug!("instantiated \"{}\" as \"{}\"", class_name, object_name);
            self.0
                .objects
                .borrow_mut()
                .insert(object_name.to_string(), instance);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("classes", &self.class_names())
            .field("objects", &self.object_names())
            .finish()
    }
}
