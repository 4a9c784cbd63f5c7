//! # ooml
//!
//! Compiles HTML-like class templates into classes whose instances are live
//! view objects. Assigning a property synchronously rewrites every node of
//! the instance's view that renders it.
//!
//! ## Pipeline
//!
//! 1. **Parse**: a `<template ooml-class>` element becomes a
//!    `ClassDescriptor` (`parse`)
//! 2. **Compile**: a descriptor plus its parent becomes an `OomlClass`
//!    (`class`)
//! 3. **Bind**: each construction clones the view shape into a live node
//!    tree and records where every property renders (`binder`)
//! 4. **Run**: property writes are type checked, rendered and propagated to
//!    dependent bindings (`accessor`); nested instances move between free
//!    and attached (`attachment`, `collection`)
//!
//! Formatted attributes are written through a debounced queue
//! (`scheduler`). Everything is single-threaded.
//!
//! ## Template Grammar
//!
//! - `{{ [type|type] this.[attributes.]name }}`: primitive substitution
//! - `{ for Class of this.name }`: ordered collection of instances
//! - `{ Class this.name }`: single instance
//! - `domon<event>` / `childon<event>`: declarative handlers
//! - `ooml-expose="key"`: expose a node for lookup

mod accessor;
pub mod attachment;
mod binder;
pub mod class;
pub mod collection;
pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod dom;
pub mod error;
pub mod events;
pub mod instance;
pub mod namespace;
pub mod node_set;
pub mod parse;
pub mod scheduler;
pub mod types;
pub mod value;

#[cfg(test)]
mod runtime_tests;

pub use attachment::Attachment;
pub use class::{AbstractFactory, CompileOptions, ConstructorFn, Method, OomlClass, SuperConstructor};
pub use collection::Collection;
pub use config::NamespaceSettings;
pub use descriptor::{ClassDescriptor, ElementType, PropertyDescriptor, PropertyKind};
pub use error::{ErrorKind, OomlError, Result};
pub use events::{DispatchEvent, Event, EventClass, HandlerContext, MutationEvent};
pub use instance::Instance;
pub use namespace::{ClassBindings, Namespace};
pub use parse::{ClassDefinition, ClassResolver, TemplateParser};
pub use scheduler::WriteScheduler;
pub use types::PrimitiveType;
pub use value::Value;
