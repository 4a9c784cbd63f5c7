//! Class descriptors: the immutable, compile-time description of a class.
//!
//! A descriptor is produced once by the template parser and shared by every
//! instance of the class. Nothing in it is mutated after parsing.

use html5ever::QualName;
use std::collections::BTreeMap;
use std::fmt;

use crate::class::{ConstructorFn, Method, OomlClass};
use crate::instance::Instance;
use crate::types::PrimitiveType;
use crate::value::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSTITUTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// What a bound node renders
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubstitutionSource {
    Property(String),
    Attribute(String),
}

impl SubstitutionSource {
    pub fn name(&self) -> &str {
        match self {
            Self::Property(name) | Self::Attribute(name) => name,
        }
    }
}

/// Literal fragments interleaved with parameter slots.
///
/// Slots are empty strings in `parts`; `slots` maps each parameter to the
/// indices it fills.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatTemplate {
    pub parts: Vec<String>,
    pub slots: BTreeMap<SubstitutionSource, Vec<usize>>,
}

impl FormatTemplate {
    pub fn sources(&self) -> impl Iterator<Item = &SubstitutionSource> {
        self.slots.keys()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.slots
            .keys()
            .filter_map(|s| match s {
                SubstitutionSource::Property(name) => Some(name.clone()),
                SubstitutionSource::Attribute(_) => None,
            })
            .collect()
    }

    /// Render with every slot filled from `lookup`
    pub fn render(&self, lookup: impl Fn(&SubstitutionSource) -> String) -> String {
        let mut parts = self.parts.clone();
        for (source, indices) in &self.slots {
            let text = lookup(source);
            for &i in indices {
                if let Some(part) = parts.get_mut(i) {
                    part.clone_from(&text);
                }
            }
        }
        parts.concat()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTIES AND ATTRIBUTES
// ═══════════════════════════════════════════════════════════════════════════════

/// Element type of an element or array substitution
#[derive(Clone)]
pub enum ElementType {
    /// Any instance of any class (`Element` / `OOML.Element`)
    AnyInstance,
    Class(OomlClass),
}

impl ElementType {
    pub fn name(&self) -> String {
        match self {
            Self::AnyInstance => "Element".to_string(),
            Self::Class(class) => class.name().to_string(),
        }
    }

    pub fn accepts(&self, instance: &Instance) -> bool {
        match self {
            Self::AnyInstance => true,
            Self::Class(class) => instance.class().is_a(class),
        }
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementType({})", self.name())
    }
}

#[derive(Debug, Clone)]
pub enum PropertyKind {
    /// Text or attribute substitution; `None` accepts any primitive
    Primitive { types: Option<Vec<PrimitiveType>> },
    /// `{ Class this.prop }`
    Instance { element: ElementType },
    /// `{ for Class of this.prop }`
    Array { element: ElementType },
}

impl PropertyKind {
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive { .. })
    }

    pub fn types(&self) -> Option<&[PrimitiveType]> {
        match self {
            Self::Primitive { types } => types.as_deref(),
            _ => None,
        }
    }
}

/// A property whose value is computed from other properties
#[derive(Debug, Clone)]
pub struct DynamicBinding {
    pub template: FormatTemplate,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    /// Always valid for `kind`
    pub default: Value,
    pub binding: Option<DynamicBinding>,
    /// Key under which an initial value is merged into the default object
    pub passthrough: Option<String>,
    /// Whether an element or array substitution site already exists
    pub(crate) has_view_site: bool,
}

impl PropertyDescriptor {
    pub fn primitive(name: &str, types: Option<Vec<PrimitiveType>>) -> Self {
        let default = crate::types::default_for_types(types.as_deref());
        Self {
            name: name.to_string(),
            kind: PropertyKind::Primitive { types },
            default,
            binding: None,
            passthrough: None,
            has_view_site: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub name: String,
    pub types: Option<Vec<PrimitiveType>>,
    pub default: Value,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerStep {
    /// Invoke a class method with the event payload
    CallMethod(String),
    /// Dispatch the payload to the parent under an event name
    Dispatch(String),
}

/// A compiled `domon*` / `childon*` handler body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpec {
    pub source: String,
    pub steps: Vec<HandlerStep>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW SHAPE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum ViewNode {
    Element(ElementShape),
    Text(TextShape),
    Marker(MarkerShape),
    /// Where a subclass view is composed in
    ExtensionPoint,
}

#[derive(Debug, Clone)]
pub struct ElementShape {
    pub name: QualName,
    pub attributes: Vec<AttributeShape>,
    pub dom_handlers: BTreeMap<String, HandlerSpec>,
    pub child_handlers: BTreeMap<String, HandlerSpec>,
    pub expose_key: Option<String>,
    pub children: Vec<ViewNode>,
}

#[derive(Debug, Clone)]
pub struct AttributeShape {
    pub name: QualName,
    pub value: String,
    pub format: Option<FormatTemplate>,
}

#[derive(Debug, Clone)]
pub struct TextShape {
    pub value: String,
    pub source: Option<SubstitutionSource>,
}

#[derive(Debug, Clone)]
pub struct MarkerShape {
    pub value: String,
    pub property: Option<String>,
}

impl ViewNode {
    pub fn tag_name(&self) -> Option<String> {
        match self {
            Self::Element(el) => Some(el.name.local.to_string()),
            _ => None,
        }
    }

    /// Replace the node at `path` (child indices from this node)
    pub(crate) fn replace_at(&mut self, path: &[usize], replacement: ViewNode) -> bool {
        match path.split_first() {
            None => {
                *self = replacement;
                true
            }
            Some((&first, rest)) => match self {
                Self::Element(el) => match el.children.get_mut(first) {
                    Some(child) => child.replace_at(rest, replacement),
                    None => false,
                },
                _ => false,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS DESCRIPTOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ClassDescriptor {
    pub name: String,
    pub is_abstract: bool,
    pub parent: Option<OomlClass>,
    /// The author-supplied constructor of this class alone
    pub constructor: Option<ConstructorFn>,
    /// Inherited properties first, in declaration order
    pub properties: Vec<PropertyDescriptor>,
    pub attributes: Vec<AttributeDescriptor>,
    /// Own and inherited methods
    pub methods: BTreeMap<String, Method>,
    pub view: Option<ViewNode>,
    pub extension_point: Option<Vec<usize>>,
    pub expose_keys: Vec<String>,
}

impl ClassDescriptor {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn property_names(&self) -> Vec<String> {
        self.properties.iter().map(|p| p.name.clone()).collect()
    }

    pub fn root_tag(&self) -> Option<String> {
        self.view.as_ref().and_then(ViewNode::tag_name)
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("is_abstract", &self.is_abstract)
            .field("parent", &self.parent.as_ref().map(|p| p.name().to_string()))
            .field("properties", &self.properties)
            .field("attributes", &self.attributes)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("view", &self.view)
            .field("extension_point", &self.extension_point)
            .finish()
    }
}
