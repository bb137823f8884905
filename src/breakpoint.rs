//! Breakpoint declarations and resolution
//!
//! A declaration names a place in source terms (class + line, method,
//! field, exception class). Because the class may not be loaded yet,
//! each request carries a resolution state: Deferred until a matching
//! class prepares, then Resolved (bound to an installed event request)
//! or Erroneous (the declaration can never bind). Resolution is
//! monotonic; a Resolved or Erroneous request never becomes Deferred
//! again.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::common::ResolveError;
use crate::vm::{ClassInfo, ClassKind, MethodInfo, RequestId, RequestSpec};

/// What the user asked to break on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Declaration {
    Line { class_name: String, line: u32 },
    Method {
        class_name: String,
        method: String,
        /// None defers to the sole method of that name; an overloaded
        /// name without argument types is erroneous.
        arg_types: Option<Vec<String>>,
    },
    Exception {
        class_name: String,
        notify_caught: bool,
        notify_uncaught: bool,
    },
    FieldAccess { class_name: String, field: String },
    FieldModify { class_name: String, field: String },
}

impl Declaration {
    pub fn class_name(&self) -> &str {
        match self {
            Self::Line { class_name, .. }
            | Self::Method { class_name, .. }
            | Self::Exception { class_name, .. }
            | Self::FieldAccess { class_name, .. }
            | Self::FieldModify { class_name, .. } => class_name,
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line { class_name, line } => write!(f, "{class_name}:{line}"),
            Self::Method { class_name, method, arg_types } => match arg_types {
                Some(types) => write!(f, "{class_name}.{method}({})", types.join(", ")),
                None => write!(f, "{class_name}.{method}"),
            },
            Self::Exception { class_name, .. } => write!(f, "catch {class_name}"),
            Self::FieldAccess { class_name, field } => write!(f, "access {class_name}.{field}"),
            Self::FieldModify { class_name, field } => write!(f, "modify {class_name}.{field}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Deferred,
    Resolved,
    Erroneous,
}

#[derive(Debug, Clone)]
enum ResolutionState {
    Deferred,
    Resolved(RequestId),
    Erroneous(ResolveError),
}

/// A declared breakpoint and its resolution state.
pub struct BreakpointRequest {
    pub declaration: Declaration,
    state: Mutex<ResolutionState>,
}

impl BreakpointRequest {
    pub fn new(declaration: Declaration) -> Self {
        Self { declaration, state: Mutex::new(ResolutionState::Deferred) }
    }

    pub fn status(&self) -> Status {
        match *self.state.lock().unwrap() {
            ResolutionState::Deferred => Status::Deferred,
            ResolutionState::Resolved(_) => Status::Resolved,
            ResolutionState::Erroneous(_) => Status::Erroneous,
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.status() == Status::Deferred
    }

    pub fn is_resolved(&self) -> bool {
        self.status() == Status::Resolved
    }

    pub fn is_erroneous(&self) -> bool {
        self.status() == Status::Erroneous
    }

    /// The installed event request, when resolved.
    pub fn request_id(&self) -> Option<RequestId> {
        match *self.state.lock().unwrap() {
            ResolutionState::Resolved(id) => Some(id),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<ResolveError> {
        match &*self.state.lock().unwrap() {
            ResolutionState::Erroneous(e) => Some(e.clone()),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error().map(|e| e.to_string())
    }

    /// Transition Deferred -> Resolved. Returns false (and changes
    /// nothing) when the request already left the Deferred state.
    pub fn mark_resolved(&self, id: RequestId) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            ResolutionState::Deferred => {
                *state = ResolutionState::Resolved(id);
                true
            }
            _ => false,
        }
    }

    /// Transition Deferred -> Erroneous. Returns false when the request
    /// already left the Deferred state.
    pub fn mark_erroneous(&self, error: ResolveError) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            ResolutionState::Deferred => {
                *state = ResolutionState::Erroneous(error);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for BreakpointRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakpointRequest")
            .field("declaration", &self.declaration)
            .field("status", &self.status())
            .finish()
    }
}

/// Whether a loaded class matches a declaration's class name.
///
/// The declared name matches the class itself and its nested classes:
/// the loaded name must start with the declared name and continue, if
/// at all, at a `$` boundary. `Foo` matches `Foo` and `Foo$Inner` but
/// not `FooBar`. Classes from a sandboxed loader never match.
pub fn class_matches(declaration: &Declaration, class: &ClassInfo) -> bool {
    if class.sandboxed_loader {
        return false;
    }
    let declared = declaration.class_name();
    match class.name.strip_prefix(declared) {
        Some("") => true,
        Some(rest) => rest.starts_with('$'),
        None => false,
    }
}

/// Bind a declaration against a prepared class, producing the event
/// request to install or the reason it can never bind.
///
/// `loaded` is the full set of loaded classes, used to expand
/// unqualified argument type names.
pub fn resolve_spec(
    declaration: &Declaration,
    class: &ClassInfo,
    loaded: &[ClassInfo],
) -> Result<RequestSpec, ResolveError> {
    if class.kind != ClassKind::Class {
        return Err(ResolveError::UnsupportedKind { class_name: class.name.clone() });
    }

    match declaration {
        Declaration::Line { line, .. } => {
            let locations = class.locations_of_line(*line);
            match locations.iter().find(|l| l.method_name.is_some()).or(locations.first()) {
                Some(location) => {
                    Ok(RequestSpec::Breakpoint { location: (*location).clone() })
                }
                None => Err(ResolveError::LineNotFound {
                    class_name: class.name.clone(),
                    line: *line,
                }),
            }
        }
        Declaration::Method { method, arg_types, .. } => {
            if !is_valid_method_name(method) {
                return Err(ResolveError::MalformedMemberName(method.clone()));
            }
            let found = find_matching_method(class, method, arg_types.as_deref(), loaded)?;
            Ok(RequestSpec::Breakpoint { location: found.location.clone() })
        }
        Declaration::Exception { class_name, notify_caught, notify_uncaught } => {
            Ok(RequestSpec::Exception {
                class_name: Some(class_name.clone()),
                notify_caught: *notify_caught,
                notify_uncaught: *notify_uncaught,
            })
        }
        Declaration::FieldAccess { field, .. } => match class.field_by_name(field) {
            Some(_) => Ok(RequestSpec::AccessWatchpoint {
                class_name: class.name.clone(),
                field: field.clone(),
            }),
            None => Err(ResolveError::NoSuchField {
                class_name: class.name.clone(),
                field: field.clone(),
            }),
        },
        Declaration::FieldModify { field, .. } => match class.field_by_name(field) {
            Some(_) => Ok(RequestSpec::ModificationWatchpoint {
                class_name: class.name.clone(),
                field: field.clone(),
            }),
            None => Err(ResolveError::NoSuchField {
                class_name: class.name.clone(),
                field: field.clone(),
            }),
        },
    }
}

/// A method breakpoint name is a plain identifier or one of the two
/// special initializer names.
pub fn is_valid_method_name(name: &str) -> bool {
    if name == "<init>" || name == "<clinit>" {
        return true;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn find_matching_method<'a>(
    class: &'a ClassInfo,
    method: &str,
    arg_types: Option<&[String]>,
    loaded: &[ClassInfo],
) -> Result<&'a MethodInfo, ResolveError> {
    let candidates: Vec<&MethodInfo> =
        class.methods.iter().filter(|m| m.name == method).collect();

    match arg_types {
        Some(arg_types) => {
            let normalized: Vec<String> = arg_types
                .iter()
                .map(|t| normalize_arg_type_name(t, loaded))
                .collect::<Result<_, _>>()?;
            candidates
                .into_iter()
                .find(|m| compare_arg_types(m, &normalized))
                .ok_or_else(|| ResolveError::NoSuchMethod {
                    class_name: class.name.clone(),
                    method: method.to_string(),
                })
        }
        None => match candidates.len() {
            0 => Err(ResolveError::NoSuchMethod {
                class_name: class.name.clone(),
                method: method.to_string(),
            }),
            1 => Ok(candidates[0]),
            _ => Err(ResolveError::AmbiguousMethod { method: method.to_string() }),
        },
    }
}

/// Canonicalize a declared argument type name.
///
/// Trims whitespace, preserves `[]` and `...` suffixes, and expands an
/// unqualified class name by searching the loaded classes for an exact
/// or `.Name` suffix match. An unknown unqualified name stays as
/// written; the later comparison will simply not match it.
pub fn normalize_arg_type_name(
    name: &str,
    loaded: &[ClassInfo],
) -> Result<String, ResolveError> {
    let name = name.trim();

    // Peel the array / varargs suffix off the base name.
    let mut base = name;
    let mut suffix = String::new();
    if let Some(b) = base.strip_suffix("...") {
        base = b.trim_end();
        suffix = "...".to_string();
    }
    while let Some(b) = base.strip_suffix("[]") {
        base = b.trim_end();
        suffix.insert_str(0, "[]");
    }

    if base.is_empty()
        || !base
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
    {
        return Err(ResolveError::MalformedMemberName(name.to_string()));
    }

    // Primitives and qualified names pass through.
    if base.contains('.') || is_primitive_name(base) {
        return Ok(format!("{base}{suffix}"));
    }

    // Expand an unqualified class name against the loaded classes.
    let dotted = format!(".{base}");
    for class in loaded {
        if class.name == base || class.name.ends_with(&dotted) {
            return Ok(format!("{}{}", class.name, suffix));
        }
    }
    Ok(format!("{base}{suffix}"))
}

fn is_primitive_name(name: &str) -> bool {
    matches!(
        name,
        "boolean" | "byte" | "char" | "short" | "int" | "long" | "float" | "double"
    )
}

/// Whether a method's declared parameter types equal the normalized
/// names, treating a trailing `T...` and `T[]` as the same type when
/// the method really is varargs.
pub fn compare_arg_types(method: &MethodInfo, names: &[String]) -> bool {
    if method.arg_type_names.len() != names.len() {
        return false;
    }
    let last = names.len().wrapping_sub(1);
    method.arg_type_names.iter().zip(names).enumerate().all(|(i, (declared, given))| {
        if declared == given {
            return true;
        }
        // Trailing position may pair an array with an ellipsis.
        if i == last && method.is_varargs {
            let declared_base = declared.strip_suffix("[]").or_else(|| declared.strip_suffix("..."));
            let given_base = given.strip_suffix("[]").or_else(|| given.strip_suffix("..."));
            if let (Some(a), Some(b)) = (declared_base, given_base) {
                return a == b;
            }
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{FieldInfo, Location};

    fn class(name: &str) -> ClassInfo {
        ClassInfo {
            name: name.to_string(),
            kind: ClassKind::Class,
            sandboxed_loader: false,
            methods: Vec::new(),
            fields: Vec::new(),
            line_locations: Vec::new(),
        }
    }

    fn method(name: &str, arg_type_names: &[&str], is_varargs: bool) -> MethodInfo {
        MethodInfo {
            name: name.to_string(),
            arg_type_names: arg_type_names.iter().map(|s| s.to_string()).collect(),
            is_varargs,
            is_static: false,
            location: Location {
                class_name: "app.Foo".into(),
                method_name: Some(name.into()),
                line: 10,
            },
        }
    }

    fn line_decl(class_name: &str, line: u32) -> Declaration {
        Declaration::Line { class_name: class_name.into(), line }
    }

    #[test]
    fn class_name_matches_at_dollar_boundary() {
        let decl = line_decl("app.Foo", 10);
        assert!(class_matches(&decl, &class("app.Foo")));
        assert!(class_matches(&decl, &class("app.Foo$Inner")));
        assert!(class_matches(&decl, &class("app.Foo$Inner$Deeper")));
        assert!(!class_matches(&decl, &class("app.FooBar")));
        assert!(!class_matches(&decl, &class("app.Fo")));
    }

    #[test]
    fn sandboxed_classes_never_match() {
        let decl = line_decl("app.Foo", 10);
        let mut c = class("app.Foo");
        c.sandboxed_loader = true;
        assert!(!class_matches(&decl, &c));
    }

    #[test]
    fn resolution_is_monotonic() {
        let bp = BreakpointRequest::new(line_decl("app.Foo", 10));
        assert!(bp.is_deferred());
        assert!(bp.mark_resolved(RequestId(7)));
        assert!(bp.is_resolved());
        assert_eq!(bp.request_id(), Some(RequestId(7)));
        assert!(!bp.mark_erroneous(ResolveError::LineNotFound {
            class_name: "app.Foo".into(),
            line: 10,
        }));
        assert!(bp.is_resolved());
        assert!(!bp.mark_resolved(RequestId(8)));
        assert_eq!(bp.request_id(), Some(RequestId(7)));
    }

    #[test]
    fn line_resolution_requires_code_at_line() {
        let mut c = class("app.Foo");
        c.line_locations.push(Location {
            class_name: "app.Foo".into(),
            method_name: Some("run".into()),
            line: 10,
        });
        assert!(resolve_spec(&line_decl("app.Foo", 10), &c, &[]).is_ok());
        let err = resolve_spec(&line_decl("app.Foo", 11), &c, &[]).unwrap_err();
        assert!(matches!(err, ResolveError::LineNotFound { line: 11, .. }));
    }

    #[test]
    fn interfaces_cannot_hold_breakpoints() {
        let mut c = class("app.Iface");
        c.kind = ClassKind::Interface;
        let err = resolve_spec(&line_decl("app.Iface", 5), &c, &[]).unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedKind { .. }));
    }

    #[test]
    fn method_without_args_requires_unique_name() {
        let mut c = class("app.Foo");
        c.methods.push(method("run", &[], false));
        c.methods.push(method("work", &["int"], false));
        c.methods.push(method("work", &["long"], false));

        let decl = Declaration::Method {
            class_name: "app.Foo".into(),
            method: "run".into(),
            arg_types: None,
        };
        assert!(resolve_spec(&decl, &c, &[]).is_ok());

        let overloaded = Declaration::Method {
            class_name: "app.Foo".into(),
            method: "work".into(),
            arg_types: None,
        };
        assert!(matches!(
            resolve_spec(&overloaded, &c, &[]).unwrap_err(),
            ResolveError::AmbiguousMethod { .. }
        ));

        let missing = Declaration::Method {
            class_name: "app.Foo".into(),
            method: "absent".into(),
            arg_types: None,
        };
        assert!(matches!(
            resolve_spec(&missing, &c, &[]).unwrap_err(),
            ResolveError::NoSuchMethod { .. }
        ));
    }

    #[test]
    fn malformed_method_names_are_rejected() {
        let c = class("app.Foo");
        for bad in ["", "1run", "ru n", "run()"] {
            let decl = Declaration::Method {
                class_name: "app.Foo".into(),
                method: bad.into(),
                arg_types: None,
            };
            assert!(matches!(
                resolve_spec(&decl, &c, &[]).unwrap_err(),
                ResolveError::MalformedMemberName(_)
            ));
        }
        assert!(is_valid_method_name("<init>"));
        assert!(is_valid_method_name("<clinit>"));
        assert!(!is_valid_method_name("<other>"));
    }

    #[test]
    fn unqualified_arg_types_expand_against_loaded_classes() {
        let loaded = vec![class("java.lang.String"), class("app.Widget")];
        assert_eq!(
            normalize_arg_type_name("String", &loaded).unwrap(),
            "java.lang.String"
        );
        assert_eq!(
            normalize_arg_type_name(" Widget[] ", &loaded).unwrap(),
            "app.Widget[]"
        );
        assert_eq!(normalize_arg_type_name("int", &loaded).unwrap(), "int");
        assert_eq!(
            normalize_arg_type_name("String...", &loaded).unwrap(),
            "java.lang.String..."
        );
        assert_eq!(normalize_arg_type_name("Unknown", &loaded).unwrap(), "Unknown");
        assert!(normalize_arg_type_name("ba d", &loaded).is_err());
    }

    #[test]
    fn trailing_varargs_pairs_with_array() {
        let m = method("log", &["java.lang.String", "java.lang.Object[]"], true);
        assert!(compare_arg_types(
            &m,
            &["java.lang.String".to_string(), "java.lang.Object...".to_string()]
        ));
        assert!(compare_arg_types(
            &m,
            &["java.lang.String".to_string(), "java.lang.Object[]".to_string()]
        ));

        let plain = method("log", &["java.lang.String", "java.lang.Object[]"], false);
        assert!(!compare_arg_types(
            &plain,
            &["java.lang.String".to_string(), "java.lang.Object...".to_string()]
        ));
    }

    #[test]
    fn field_declarations_resolve_against_fields() {
        let mut c = class("app.Foo");
        c.fields.push(FieldInfo { name: "count".into(), type_name: "int".into() });
        let access = Declaration::FieldAccess {
            class_name: "app.Foo".into(),
            field: "count".into(),
        };
        assert!(matches!(
            resolve_spec(&access, &c, &[]).unwrap(),
            RequestSpec::AccessWatchpoint { .. }
        ));
        let missing = Declaration::FieldModify {
            class_name: "app.Foo".into(),
            field: "absent".into(),
        };
        assert!(matches!(
            resolve_spec(&missing, &c, &[]).unwrap_err(),
            ResolveError::NoSuchField { .. }
        ));
    }

    #[test]
    fn declaration_serde_round_trip() {
        let decl = Declaration::Line { class_name: "app.Foo".into(), line: 42 };
        let json = serde_json::to_string(&decl).unwrap();
        assert!(json.contains("\"kind\":\"line\""));
        let back: Declaration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decl);
    }
}
