//! Type descriptions and overload resolution
//!
//! `TypeDesc` is an explicit value describing a remote type (primitive,
//! class, interface or array) together with its supertype links, so
//! assignability and overload selection are pure functions that can be
//! tested without a live connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::common::{Error, Result};
use crate::vm::value::Value;
use crate::vm::MethodInfo;

pub const OBJECT_CLASS: &str = "java.lang.Object";
pub const STRING_CLASS: &str = "java.lang.String";
pub const CLONEABLE_INTERFACE: &str = "java.lang.Cloneable";

/// Primitive type kinds. Boolean is a primitive but is never
/// intermixable with the numeric ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(Self::Boolean),
            "byte" => Some(Self::Byte),
            "char" => Some(Self::Char),
            "short" => Some(Self::Short),
            "int" => Some(Self::Int),
            "long" => Some(Self::Long),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            _ => None,
        }
    }
}

/// Description of a remote type.
#[derive(Debug, PartialEq, Eq)]
pub enum TypeDesc {
    Primitive(PrimitiveType),
    Class {
        name: String,
        superclass: Option<Arc<TypeDesc>>,
        interfaces: Vec<Arc<TypeDesc>>,
    },
    Interface {
        name: String,
        superinterfaces: Vec<Arc<TypeDesc>>,
    },
    Array { component: Arc<TypeDesc> },
}

impl TypeDesc {
    pub fn primitive(kind: PrimitiveType) -> Arc<Self> {
        Arc::new(Self::Primitive(kind))
    }

    pub fn class(
        name: impl Into<String>,
        superclass: Option<Arc<TypeDesc>>,
        interfaces: Vec<Arc<TypeDesc>>,
    ) -> Arc<Self> {
        Arc::new(Self::Class { name: name.into(), superclass, interfaces })
    }

    pub fn interface(name: impl Into<String>, superinterfaces: Vec<Arc<TypeDesc>>) -> Arc<Self> {
        Arc::new(Self::Interface { name: name.into(), superinterfaces })
    }

    pub fn array(component: Arc<TypeDesc>) -> Arc<Self> {
        Arc::new(Self::Array { component })
    }

    /// Fully-qualified name; arrays render with `[]` suffixes.
    pub fn name(&self) -> String {
        match self {
            Self::Primitive(p) => p.name().to_string(),
            Self::Class { name, .. } | Self::Interface { name, .. } => name.clone(),
            Self::Array { component } => format!("{}[]", component.name()),
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveType::Boolean))
    }

    /// Whether a value of this type can be passed where `to` is expected.
    ///
    /// Primitive widening is modelled coarsely (any numeric primitive to
    /// any other), boolean only matches boolean, and reference widening
    /// walks the superclass/interface chains. Array assignability: a
    /// primitive-component array requires an identical component type; a
    /// reference-component array requires assignable components; the only
    /// non-array assignees are `Cloneable` and `Object`.
    pub fn is_assignable_to(&self, to: &TypeDesc) -> bool {
        if self == to {
            return true;
        }

        // If one is boolean, so must be the other.
        if self.is_boolean() {
            return to.is_boolean();
        }
        if to.is_boolean() {
            return false;
        }

        // Other primitives intermix only with each other.
        if self.is_primitive() {
            return to.is_primitive();
        }
        if to.is_primitive() {
            return false;
        }

        match self {
            Self::Array { component } => array_assignable(component, to),
            Self::Class { superclass, interfaces, .. } => {
                if let Some(superclass) = superclass {
                    if superclass.is_assignable_to(to) {
                        return true;
                    }
                }
                interfaces.iter().any(|i| i.is_assignable_to(to))
            }
            Self::Interface { superinterfaces, .. } => {
                superinterfaces.iter().any(|i| i.is_assignable_to(to))
            }
            Self::Primitive(_) => false,
        }
    }
}

fn array_assignable(component: &Arc<TypeDesc>, to: &TypeDesc) -> bool {
    match to {
        TypeDesc::Array { component: to_component } => {
            component_assignable(component, to_component)
        }
        // Only valid interface assignee is Cloneable, only valid class
        // assignee is Object.
        TypeDesc::Interface { name, .. } => name == CLONEABLE_INTERFACE,
        TypeDesc::Class { name, .. } => name == OBJECT_CLASS,
        TypeDesc::Primitive(_) => false,
    }
}

fn component_assignable(from: &TypeDesc, to: &TypeDesc) -> bool {
    // Primitive component arrays require identical component types.
    if from.is_primitive() {
        return from == to;
    }
    if to.is_primitive() {
        return false;
    }
    from.is_assignable_to(to)
}

/// How a candidate method's parameter list relates to a set of argument
/// values: every pair identical, every pair at least assignable, or at
/// least one pair incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMatch {
    Same,
    Assignable,
    Different,
}

/// Classify one candidate's parameter types against the argument values.
///
/// A null argument matches any non-primitive parameter exactly and never
/// matches a primitive one.
pub fn arguments_match(
    param_types: &[Arc<TypeDesc>],
    args: &[Value],
    types: &TypeRegistry,
) -> ArgMatch {
    if param_types.len() != args.len() {
        return ArgMatch::Different;
    }

    let mut result = ArgMatch::Same;
    for (param, arg) in param_types.iter().zip(args) {
        if matches!(arg, Value::Null) {
            if param.is_primitive() {
                return ArgMatch::Different;
            }
            continue;
        }
        let arg_type = match arg.type_desc(types) {
            Some(t) => t,
            None => return ArgMatch::Different,
        };
        if *arg_type != **param {
            if arg_type.is_assignable_to(param) {
                result = ArgMatch::Assignable;
            } else {
                return ArgMatch::Different;
            }
        }
    }
    result
}

/// Choose one method out of same-named candidates for the given argument
/// values.
///
/// A lone candidate is used unconditionally; the invocation itself will
/// produce a better error than we could guess at here. Otherwise an exact
/// match wins immediately, a single assignable candidate wins, several
/// assignable candidates are ambiguous, and none is a no-match error.
pub fn select_overload<'a>(
    candidates: &[&'a MethodInfo],
    args: &[Value],
    types: &TypeRegistry,
) -> Result<&'a MethodInfo> {
    let name = candidates
        .first()
        .map(|m| m.name.clone())
        .unwrap_or_default();
    if candidates.is_empty() {
        return Err(Error::NoMatchingMethod { method: name });
    }
    if candidates.len() == 1 {
        return Ok(candidates[0]);
    }

    let mut assignable: Option<&'a MethodInfo> = None;
    let mut assignable_count = 0;
    for &candidate in candidates {
        let param_types: Vec<Arc<TypeDesc>> = candidate
            .arg_type_names
            .iter()
            .map(|n| types.lookup(n))
            .collect();
        match arguments_match(&param_types, args, types) {
            ArgMatch::Same => return Ok(candidate),
            ArgMatch::Different => continue,
            ArgMatch::Assignable => {
                assignable = Some(candidate);
                assignable_count += 1;
            }
        }
    }

    match (assignable, assignable_count) {
        (Some(m), 1) => Ok(m),
        (Some(_), _) => Err(Error::AmbiguousInvocation { method: name }),
        (None, _) => Err(Error::NoMatchingMethod { method: name }),
    }
}

/// Session-owned cache of type descriptions by name.
///
/// Replaces any process-wide static: each session carries its own
/// registry, seeded with the well-known types assignability needs.
/// Lookups synthesize a plain `Object`-rooted class description for
/// names the target has not described yet, which keeps overload
/// resolution total.
pub struct TypeRegistry {
    inner: Mutex<HashMap<String, Arc<TypeDesc>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let registry = Self { inner: Mutex::new(HashMap::new()) };
        let object = TypeDesc::class(OBJECT_CLASS, None, Vec::new());
        let cloneable = TypeDesc::interface(CLONEABLE_INTERFACE, Vec::new());
        let string = TypeDesc::class(STRING_CLASS, Some(object.clone()), Vec::new());
        registry.insert(object);
        registry.insert(cloneable);
        registry.insert(string);
        registry
    }

    /// Register a type description under its own name.
    pub fn insert(&self, ty: Arc<TypeDesc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(ty.name(), ty);
    }

    pub fn get(&self, name: &str) -> Option<Arc<TypeDesc>> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    pub fn object(&self) -> Arc<TypeDesc> {
        self.lookup(OBJECT_CLASS)
    }

    pub fn string(&self) -> Arc<TypeDesc> {
        self.lookup(STRING_CLASS)
    }

    /// Resolve a type name, synthesizing a description when unknown.
    pub fn lookup(&self, name: &str) -> Arc<TypeDesc> {
        let name = name.trim();
        if let Some(component) = name.strip_suffix("[]") {
            return TypeDesc::array(self.lookup(component));
        }
        if let Some(p) = PrimitiveType::from_name(name) {
            return TypeDesc::primitive(p);
        }
        if let Some(known) = self.get(name) {
            return known;
        }
        let object = self
            .get(OBJECT_CLASS)
            .unwrap_or_else(|| TypeDesc::class(OBJECT_CLASS, None, Vec::new()));
        let synthesized = TypeDesc::class(name, Some(object), Vec::new());
        self.insert(synthesized.clone());
        synthesized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Location;

    fn method(name: &str, arg_type_names: &[&str]) -> MethodInfo {
        MethodInfo {
            name: name.to_string(),
            arg_type_names: arg_type_names.iter().map(|s| s.to_string()).collect(),
            is_varargs: false,
            is_static: false,
            location: Location { class_name: "T".into(), method_name: Some(name.into()), line: 1 },
        }
    }

    #[test]
    fn boolean_only_assignable_to_boolean() {
        let boolean = TypeDesc::primitive(PrimitiveType::Boolean);
        let int = TypeDesc::primitive(PrimitiveType::Int);
        assert!(boolean.is_assignable_to(&boolean));
        assert!(!boolean.is_assignable_to(&int));
        assert!(!int.is_assignable_to(&boolean));
        assert!(int.is_assignable_to(&TypeDesc::Primitive(PrimitiveType::Long)));
    }

    #[test]
    fn reference_widening_walks_supertypes() {
        let object = TypeDesc::class(OBJECT_CLASS, None, Vec::new());
        let listish = TypeDesc::interface("java.util.List", Vec::new());
        let base = TypeDesc::class("app.Base", Some(object.clone()), vec![listish.clone()]);
        let derived = TypeDesc::class("app.Derived", Some(base.clone()), Vec::new());

        assert!(derived.is_assignable_to(&base));
        assert!(derived.is_assignable_to(&object));
        assert!(derived.is_assignable_to(&listish));
        assert!(!base.is_assignable_to(&derived));
        assert!(!object.is_assignable_to(&base));
    }

    #[test]
    fn array_covariance_rules() {
        let registry = TypeRegistry::new();
        let object = registry.object();
        let string = registry.string();
        let int = TypeDesc::primitive(PrimitiveType::Int);
        let long = TypeDesc::primitive(PrimitiveType::Long);

        let string_array = TypeDesc::array(string);
        let object_array = TypeDesc::array(object.clone());
        let int_array = TypeDesc::array(int);
        let long_array = TypeDesc::array(long);
        let cloneable = registry.lookup(CLONEABLE_INTERFACE);

        assert!(string_array.is_assignable_to(&object_array));
        assert!(!object_array.is_assignable_to(&string_array));
        assert!(!int_array.is_assignable_to(&long_array));
        assert!(int_array.is_assignable_to(&object));
        assert!(int_array.is_assignable_to(&cloneable));
        assert!(!int_array.is_assignable_to(&registry.lookup("java.util.List")));
    }

    #[test]
    fn exact_overload_beats_assignable() {
        let registry = TypeRegistry::new();
        let f_int = method("f", &["int"]);
        let f_long = method("f", &["long"]);
        let chosen = select_overload(&[&f_int, &f_long], &[Value::Int(3)], &registry).unwrap();
        assert_eq!(chosen.arg_type_names, vec!["int"]);
    }

    #[test]
    fn single_assignable_candidate_wins() {
        let registry = TypeRegistry::new();
        let f_long = method("f", &["long"]);
        let g_str = method("f", &["java.lang.String"]);
        let chosen =
            select_overload(&[&f_long, &g_str], &[Value::Int(3)], &registry).unwrap();
        assert_eq!(chosen.arg_type_names, vec!["long"]);
    }

    #[test]
    fn two_assignable_candidates_are_ambiguous() {
        let registry = TypeRegistry::new();
        let f_long = method("f", &["long"]);
        let f_double = method("f", &["double"]);
        let err = select_overload(&[&f_long, &f_double], &[Value::Int(3)], &registry)
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousInvocation { .. }));
    }

    #[test]
    fn no_candidate_matches() {
        let registry = TypeRegistry::new();
        let f_int = method("f", &["int"]);
        let f_long = method("f", &["long"]);
        let err = select_overload(&[&f_int, &f_long], &[Value::Boolean(true)], &registry)
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchingMethod { .. }));
    }

    #[test]
    fn null_matches_reference_parameters_only() {
        let registry = TypeRegistry::new();
        let f_int = method("f", &["int"]);
        let f_str = method("f", &["java.lang.String"]);
        let chosen = select_overload(&[&f_int, &f_str], &[Value::Null], &registry).unwrap();
        assert_eq!(chosen.arg_type_names, vec!["java.lang.String"]);
    }

    #[test]
    fn registry_synthesizes_unknown_names() {
        let registry = TypeRegistry::new();
        let t = registry.lookup("com.example.Widget");
        assert_eq!(t.name(), "com.example.Widget");
        assert!(t.is_assignable_to(&registry.object()));
        let arr = registry.lookup("int[][]");
        assert_eq!(arr.name(), "int[][]");
    }
}
