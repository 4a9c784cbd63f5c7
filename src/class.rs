//! Class Compiler
//!
//! Turns a parsed `ClassDescriptor` into an `OomlClass`: a constructible
//! class with a precomputed ancestor constructor chain, a dependency map for
//! dynamic bindings, and the static metadata hosts query (property names,
//! predefined property and attribute defaults, root tag).
//!
//! Everything inherited is resolved here, once. Constructing an instance
//! never walks the ancestor list again except for `is_a` checks.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::descriptor::{ClassDescriptor, PropertyDescriptor};
use crate::error::{OomlError, Result};
use crate::events::HandlerContext;
use crate::instance::Instance;
use crate::namespace::{Namespace, NamespaceInner};
use crate::scheduler::WriteScheduler;
use crate::value::Value;

/// A class method, invoked by handler bodies and `Instance::call`
pub type Method = Rc<dyn Fn(&HandlerContext<'_>) -> Result<Value>>;

/// An author-supplied constructor. It receives the next link of the
/// ancestor chain and decides whether to run it.
pub type ConstructorFn = Rc<dyn Fn(&Instance, &SuperConstructor<'_>) -> Result<()>>;

/// Produces a concrete instance on behalf of an abstract class
pub type AbstractFactory = Rc<dyn Fn(Option<&Value>) -> Result<Instance>>;

/// The remaining ancestor constructors, closest ancestor last
pub struct SuperConstructor<'a> {
    chain: &'a [ConstructorFn],
}

impl<'a> SuperConstructor<'a> {
    /// Run the closest ancestor constructor, if there is one
    pub fn call(&self, instance: &Instance) -> Result<()> {
        match self.chain.split_last() {
            Some((closest, rest)) => closest(instance, &SuperConstructor { chain: rest }),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// Compile-time collaborators of a class
#[derive(Clone)]
pub struct CompileOptions {
    pub scheduler: Rc<WriteScheduler>,
    pub factory: Option<AbstractFactory>,
    pub(crate) namespace: Weak<NamespaceInner>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            scheduler: WriteScheduler::shared(),
            factory: None,
            namespace: Weak::new(),
        }
    }
}

impl CompileOptions {
    pub fn with_scheduler(scheduler: Rc<WriteScheduler>) -> Self {
        Self {
            scheduler,
            ..Self::default()
        }
    }
}

struct ClassInner {
    descriptor: ClassDescriptor,
    /// Root-first; the last entry is the closest constructor
    constructors: Vec<ConstructorFn>,
    /// Property name -> bound properties computed from it
    dependents: BTreeMap<String, Vec<String>>,
    /// Bound properties, each after every binding it reads
    binding_order: Vec<String>,
    namespace: Weak<NamespaceInner>,
    scheduler: Rc<WriteScheduler>,
    factory: Option<AbstractFactory>,
}

#[derive(Clone)]
pub struct OomlClass(Rc<ClassInner>);

impl OomlClass {
    pub fn compile(descriptor: ClassDescriptor, options: CompileOptions) -> Result<Self> {
        if !descriptor.is_abstract && descriptor.view.is_none() {
            return Err(OomlError::syntax(format!(
                "The class \"{}\" has no view",
                descriptor.name
            )));
        }
        if !descriptor.is_abstract && options.factory.is_some() {
            return Err(OomlError::syntax(format!(
                "Only abstract classes take a factory, but \"{}\" is concrete",
                descriptor.name
            )));
        }

        let DependencyGraph {
            dependents,
            binding_order,
        } = dependency_graph(&descriptor.properties)?;

        let mut constructors = descriptor
            .parent
            .as_ref()
            .map(|p| p.0.constructors.clone())
            .unwrap_or_default();
        if let Some(own) = &descriptor.constructor {
            constructors.push(Rc::clone(own));
        }

        tracing::debug!(
            "compiled class \"{}\" ({} constructor(s) in chain, {} bound properties)",
            descriptor.name,
            constructors.len(),
            descriptor
                .properties
                .iter()
                .filter(|p| p.binding.is_some())
                .count()
        );

        Ok(Self(Rc::new(ClassInner {
            descriptor,
            constructors,
            dependents,
            binding_order,
            namespace: options.namespace,
            scheduler: options.scheduler,
            factory: options.factory,
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.descriptor.name
    }

    pub fn is_abstract(&self) -> bool {
        self.0.descriptor.is_abstract
    }

    pub fn descriptor(&self) -> &ClassDescriptor {
        &self.0.descriptor
    }

    pub fn parent(&self) -> Option<&OomlClass> {
        self.0.descriptor.parent.as_ref()
    }

    /// Whether this class is `other` or inherits from it
    pub fn is_a(&self, other: &OomlClass) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class == other {
                return true;
            }
            current = class.parent();
        }
        false
    }

    /// Declared property names, inherited first
    pub fn property_names(&self) -> Vec<String> {
        self.0.descriptor.property_names()
    }

    pub fn predefined_properties(&self) -> BTreeMap<String, Value> {
        self.0
            .descriptor
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }

    pub fn predefined_attributes(&self) -> BTreeMap<String, Value> {
        self.0
            .descriptor
            .attributes
            .iter()
            .map(|a| (a.name.clone(), a.default.clone()))
            .collect()
    }

    /// This class's own author-supplied constructor
    pub fn constructor(&self) -> Option<ConstructorFn> {
        self.0.descriptor.constructor.clone()
    }

    pub fn root_tag(&self) -> Option<String> {
        self.0.descriptor.root_tag()
    }

    pub fn namespace(&self) -> Option<Namespace> {
        self.0.namespace.upgrade().map(Namespace::from_inner)
    }

    pub(crate) fn scheduler(&self) -> &Rc<WriteScheduler> {
        &self.0.scheduler
    }

    /// Bound properties to recompute when `property` changes, direct ones
    /// only
    pub(crate) fn dependents(&self, property: &str) -> &[String] {
        self.0
            .dependents
            .get(property)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every bound property downstream of `property`, in an order where each
    /// comes after the bindings it reads
    pub(crate) fn affected_bindings(&self, property: &str) -> Vec<&str> {
        let mut reached = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(property).iter().map(String::as_str).collect();
        while let Some(next) = stack.pop() {
            if reached.insert(next) {
                stack.extend(self.dependents(next).iter().map(String::as_str));
            }
        }
        if reached.is_empty() {
            return Vec::new();
        }
        self.0
            .binding_order
            .iter()
            .map(String::as_str)
            .filter(|name| reached.contains(name))
            .collect()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Construction
    // ───────────────────────────────────────────────────────────────────────────

    /// Construct an instance from an optional initial-state object.
    ///
    /// Abstract classes delegate to their factory.
    pub fn construct(&self, init: Option<Value>) -> Result<Instance> {
        if self.is_abstract() {
            return match &self.0.factory {
                Some(factory) => self.construct_with(factory, init),
                None => Err(OomlError::type_error(format!(
                    "Unable to construct new instance; \"{}\" is an abstract class",
                    self.name()
                ))),
            };
        }
        self.construct_concrete(init)
    }

    /// Construct through `factory`, which must yield a member of this class
    /// family
    pub fn construct_with(&self, factory: &AbstractFactory, init: Option<Value>) -> Result<Instance> {
        let instance = factory(init.as_ref())?;
        if !instance.class().is_a(self) {
            return Err(OomlError::type_error(format!(
                "The factory for \"{}\" returned an instance of the unrelated class \"{}\"",
                self.name(),
                instance.class().name()
            )));
        }
        Ok(instance)
    }

    pub fn construct_from_json(&self, json: &str) -> Result<Instance> {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| OomlError::syntax(format!("Invalid initial state: {}", e)))?;
        self.construct(Some(Value::from(parsed)))
    }

    fn construct_concrete(&self, init: Option<Value>) -> Result<Instance> {
        let init = match init {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(OomlError::type_error(format!(
                    "The initial state for \"{}\" must be an object, not {}",
                    self.name(),
                    other.type_name()
                )))
            }
        };

        let descriptor = self.descriptor();
        if let Some(unknown) = init.keys().find(|k| descriptor.property(k).is_none()) {
            return Err(OomlError::reference(format!(
                "The property \"{}\" does not exist on \"{}\"",
                unknown,
                self.name()
            )));
        }

        // The view must exist before any write reaches it
        let instance = Instance::create(self)?;

        // A failed call has no effect: children it attached become free again
        if let Err(err) = self.initialize(&instance, &init) {
            instance.release_children();
            self.0.scheduler.flush_now();
            return Err(err);
        }

        self.0.scheduler.flush_now();
        Ok(instance)
    }

    fn initialize(&self, instance: &Instance, init: &BTreeMap<String, Value>) -> Result<()> {
        let descriptor = self.descriptor();
        for attribute in &descriptor.attributes {
            instance.set_attribute(&attribute.name, attribute.default.clone())?;
        }

        for property in &descriptor.properties {
            let value = match init.get(&property.name) {
                Some(given) => initial_value(property, given)?,
                None => property.default.clone(),
            };
            instance.set(&property.name, value)?;
        }

        // Bound properties nobody supplied follow their dependencies
        for name in &self.0.binding_order {
            if !init.contains_key(name) {
                instance.recompute_binding(name)?;
            }
        }

        SuperConstructor {
            chain: &self.0.constructors,
        }
        .call(instance)
    }
}

/// The value a caller-supplied init entry turns into. Passthrough properties
/// merge it into a fresh copy of the default object under their key.
fn initial_value(property: &PropertyDescriptor, given: &Value) -> Result<Value> {
    let Some(key) = &property.passthrough else {
        return Ok(given.clone());
    };
    let base = match &property.default {
        Value::Null => Value::Object(BTreeMap::new()),
        other => other.clone(),
    };
    let mut extra = BTreeMap::new();
    extra.insert(key.clone(), given.clone());
    base.merged_with(&Value::Object(extra)).ok_or_else(|| {
        OomlError::logic(format!(
            "passthrough default of \"{}\" is not an object",
            property.name
        ))
    })
}

#[derive(Debug)]
struct DependencyGraph {
    dependents: BTreeMap<String, Vec<String>>,
    binding_order: Vec<String>,
}

/// Map each property to the bound properties reading it and order the bound
/// properties topologically, rejecting cycles
fn dependency_graph(properties: &[PropertyDescriptor]) -> Result<DependencyGraph> {
    let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
    // Bound property -> number of bound properties it reads
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    for property in properties {
        if let Some(binding) = &property.binding {
            pending.insert(&property.name, 0);
            for dependency in binding.dependencies.iter().collect::<BTreeSet<_>>() {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(property.name.clone());
            }
        }
    }
    for property in properties {
        if let Some(binding) = &property.binding {
            let reads = binding
                .dependencies
                .iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter(|d| pending.contains_key(d.as_str()))
                .count();
            pending.insert(&property.name, reads);
        }
    }

    // Kahn's algorithm, seeded in declaration order
    let mut ready: VecDeque<&str> = properties
        .iter()
        .map(|p| p.name.as_str())
        .filter(|name| pending.get(name) == Some(&0))
        .collect();
    let mut binding_order = Vec::with_capacity(pending.len());
    while let Some(name) = ready.pop_front() {
        binding_order.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent.as_str());
                }
            }
        }
    }

    if binding_order.len() < pending.len() {
        let stuck = properties
            .iter()
            .find(|p| pending.get(p.name.as_str()).is_some_and(|count| *count > 0))
            .map(|p| p.name.clone())
            .unwrap_or_default();
        return Err(OomlError::syntax(format!(
            "The binding of \"{}\" depends on itself through other bindings",
            stuck
        )));
    }

    Ok(DependencyGraph {
        dependents,
        binding_order,
    })
}

impl PartialEq for OomlClass {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for OomlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OomlClass({})", self.name())
    }
}
