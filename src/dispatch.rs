//! Action dispatch: an explicit registry of typed handler descriptors.
//!
//! Every action name maps to a closed set of [`HandlerDescriptor`]s declared
//! once at start-up.  A descriptor is either an *aggregate* (one handler that
//! takes the whole parameter bundle) or an *overload* (one of several
//! signatures told apart by their parameter names).  Handler classes form a
//! single-inheritance hierarchy; resolution walks the lineage of the acting
//! class, most derived first.
//!
//! ## Resolution
//!
//! 1. No descriptor for the name anywhere in the lineage → `InvalidAction`.
//! 2. Aggregate and overloads both present → `AmbiguousAction` (mixing),
//!    whatever parameters were supplied.
//! 3. Aggregate only → required parameters must be present
//!    (`MissingArguments`); unknown names and mistyped values are
//!    `InvalidArgument`.
//! 4. Overloads → a signature matches when every required name is supplied
//!    and every supplied name is declared.  No match → `MissingArguments`.
//!    Several matches → the most derived class wins; several matches within
//!    that class → `AmbiguousAction` (same class).
//!
//! A subclass signature with the same parameter-name set shadows the base
//! signature; a subclass aggregate shadows a base aggregate.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;
use serde_json::{Map, Value};

use crate::error::{ActionError, RegistryError};
use crate::protocol::{reserved, ErrorCode};

// ---------------------------------------------------------------------------
// Parameter declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    /// A non-negative number with no fractional part; `2` and `2.0` alike.
    Int,
    Float,
    String,
    /// `{x, y, z}` with all three components.
    Vec3,
    /// `{x?, y?, z?}`.
    PartialVec3,
    /// A yaw in degrees, or a full `{x, y, z}` rotation.
    Rotation,
    FloatList,
    StringList,
    BoolList,
    Any,
}

impl ParamType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Bool => value.is_boolean(),
            ParamType::Int => whole_number(value).is_some(),
            ParamType::Float => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Vec3 => is_vector(value, true),
            ParamType::PartialVec3 => is_vector(value, false),
            ParamType::Rotation => value.is_number() || is_vector(value, false),
            ParamType::FloatList => value
                .as_array()
                .is_some_and(|a| a.iter().all(Value::is_number)),
            ParamType::StringList => value
                .as_array()
                .is_some_and(|a| a.iter().all(Value::is_string)),
            ParamType::BoolList => value
                .as_array()
                .is_some_and(|a| a.iter().all(Value::is_boolean)),
            ParamType::Any => true,
        }
    }
}

/// The value of an `Int` parameter.
pub fn whole_number(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
        .map(|f| f as u64)
}

fn is_vector(value: &Value, complete: bool) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    let known = map
        .iter()
        .all(|(k, v)| matches!(k.as_str(), "x" | "y" | "z") && v.is_number());
    known && (!complete || map.len() == 3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Takes the whole named-parameter bundle.
    Aggregate,
    /// One of several signatures distinguished by parameter names.
    Overload,
}

#[derive(Debug, Clone)]
pub struct HandlerDescriptor<H> {
    pub action: &'static str,
    pub class: &'static str,
    pub kind: HandlerKind,
    pub params: Vec<ParamSpec>,
    /// Whether a successful call invalidates cached object state.
    pub mutates: bool,
    pub handler: H,
}

impl<H> HandlerDescriptor<H> {
    fn names(&self) -> BTreeSet<&'static str> {
        self.params.iter().map(|p| p.name).collect()
    }

    fn required(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().filter(|p| p.required).map(|p| p.name)
    }

    fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    fn accepts_names(&self, supplied: &Map<String, Value>) -> bool {
        self.required().all(|r| supplied.contains_key(r))
            && supplied.keys().all(|k| self.param(k).is_some())
    }

    fn type_check(&self, supplied: &Map<String, Value>) -> Result<(), ActionError> {
        for (name, value) in supplied {
            if let Some(spec) = self.param(name) {
                if !spec.ty.accepts(value) {
                    return Err(ActionError::invalid_argument(self.action, name));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct ActionRegistry<H> {
    parents: HashMap<&'static str, Option<&'static str>>,
    descriptors: Vec<HandlerDescriptor<H>>,
    by_action: BTreeMap<&'static str, Vec<usize>>,
}

pub struct RegistryBuilder<H> {
    parents: HashMap<&'static str, Option<&'static str>>,
    descriptors: Vec<HandlerDescriptor<H>>,
    errors: Vec<RegistryError>,
}

impl<H> RegistryBuilder<H> {
    /// Declare a handler class.  The parent must already be declared.
    pub fn class(mut self, name: &'static str, parent: Option<&'static str>) -> Self {
        if let Some(p) = parent {
            if !self.parents.contains_key(p) {
                self.errors.push(RegistryError::UnknownParent {
                    class: name.into(),
                    parent: p.into(),
                });
            }
        }
        self.parents.insert(name, parent);
        self
    }

    pub fn overload(
        self,
        class: &'static str,
        action: &'static str,
        params: &[ParamSpec],
        mutates: bool,
        handler: H,
    ) -> Self {
        self.register(class, action, HandlerKind::Overload, params, mutates, handler)
    }

    pub fn aggregate(
        self,
        class: &'static str,
        action: &'static str,
        params: &[ParamSpec],
        mutates: bool,
        handler: H,
    ) -> Self {
        self.register(class, action, HandlerKind::Aggregate, params, mutates, handler)
    }

    fn register(
        mut self,
        class: &'static str,
        action: &'static str,
        kind: HandlerKind,
        params: &[ParamSpec],
        mutates: bool,
        handler: H,
    ) -> Self {
        if !self.parents.contains_key(class) {
            self.errors.push(RegistryError::UnknownClass(class.into()));
        }
        let mut seen = BTreeSet::new();
        for p in params {
            if reserved::is_reserved(p.name) {
                self.errors.push(RegistryError::ReservedParameter(p.name.into()));
            }
            if !seen.insert(p.name) {
                self.errors.push(RegistryError::DuplicateParameter {
                    action: action.into(),
                    param: p.name.into(),
                });
            }
        }
        let clash = self.descriptors.iter().any(|d| {
            d.class == class
                && d.action == action
                && d.kind == kind
                && (kind == HandlerKind::Aggregate || d.names() == seen)
        });
        if clash {
            self.errors.push(RegistryError::DuplicateSignature {
                action: action.into(),
                class: class.into(),
            });
        }
        self.descriptors.push(HandlerDescriptor {
            action,
            class,
            kind,
            params: params.to_vec(),
            mutates,
            handler,
        });
        self
    }

    pub fn build(self) -> Result<ActionRegistry<H>, RegistryError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        let mut by_action: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
        for (i, d) in self.descriptors.iter().enumerate() {
            by_action.entry(d.action).or_default().push(i);
        }
        Ok(ActionRegistry {
            parents: self.parents,
            descriptors: self.descriptors,
            by_action,
        })
    }
}

impl<H> ActionRegistry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            parents: HashMap::new(),
            descriptors: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.parents.contains_key(class)
    }

    /// `class` followed by its ancestors.
    pub fn lineage(&self, class: &str) -> Vec<&'static str> {
        let mut out = Vec::new();
        let mut cur = self.parents.get_key_value(class).map(|(k, _)| *k);
        while let Some(c) = cur {
            out.push(c);
            cur = self.parents.get(c).copied().flatten();
        }
        out
    }

    pub fn action_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_action.keys().copied()
    }

    /// Descriptors visible from `class` for `action`, after shadowing.
    /// Returned with the lineage depth of their class (0 = `class` itself).
    pub fn candidates(&self, class: &str, action: &str) -> Vec<(usize, &HandlerDescriptor<H>)> {
        let lineage = self.lineage(class);
        let Some(indices) = self.by_action.get(action) else {
            return Vec::new();
        };
        let mut out: Vec<(usize, &HandlerDescriptor<H>)> = Vec::new();
        for (depth, c) in lineage.iter().enumerate() {
            for d in indices.iter().map(|&i| &self.descriptors[i]) {
                if d.class != *c {
                    continue;
                }
                let shadowed = out.iter().any(|(od, o)| {
                    *od < depth
                        && o.kind == d.kind
                        && (d.kind == HandlerKind::Aggregate || o.names() == d.names())
                });
                if !shadowed {
                    out.push((depth, d));
                }
            }
        }
        out
    }

    /// Resolve `action` with `params` against `class`.
    pub fn resolve(
        &self,
        class: &str,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<&HandlerDescriptor<H>, ActionError> {
        if !self.has_class(class) {
            return Err(ActionError::invalid_argument(action, reserved::TYPE_NAME));
        }
        let candidates = self.candidates(class, action);
        if candidates.is_empty() {
            debug!("dispatch: {} is not an action of {}", action, class);
            return Err(ActionError::invalid_action(action));
        }

        let has_aggregate = candidates.iter().any(|(_, d)| d.kind == HandlerKind::Aggregate);
        let has_overload = candidates.iter().any(|(_, d)| d.kind == HandlerKind::Overload);
        if has_aggregate && has_overload {
            return Err(ambiguous(
                action,
                "Mixing a ParamBundle method with overloaded methods is not permitted",
            ));
        }

        if has_aggregate {
            let (_, d) = candidates[0];
            let missing: Vec<&str> = d.required().filter(|r| !params.contains_key(*r)).collect();
            if !missing.is_empty() {
                return Err(missing_arguments(action, &missing));
            }
            if let Some(extra) = params.keys().find(|k| d.param(k).is_none()) {
                return Err(ActionError::invalid_argument(action, extra));
            }
            d.type_check(params)?;
            return Ok(d);
        }

        let matches: Vec<_> = candidates
            .iter()
            .filter(|(_, d)| d.accepts_names(params))
            .collect();
        let Some(best_depth) = matches.iter().map(|(depth, _)| *depth).min() else {
            let missing = fewest_missing(&candidates, params);
            return Err(missing_arguments(action, &missing));
        };
        let best: Vec<_> = matches
            .into_iter()
            .filter(|(depth, _)| *depth == best_depth)
            .collect();
        if best.len() > 1 {
            return Err(ambiguous(action, "Signature match found in the same class"));
        }
        let (_, d) = *best[0];
        d.type_check(params)?;
        Ok(d)
    }

    /// Action names that can never be dispatched unambiguously from `class`.
    pub fn find_ambiguous(&self, class: &str) -> Vec<String> {
        let mut out = BTreeSet::new();
        for action in self.by_action.keys() {
            let candidates = self.candidates(class, action);
            let aggregate = candidates.iter().any(|(_, d)| d.kind == HandlerKind::Aggregate);
            let overload = candidates.iter().any(|(_, d)| d.kind == HandlerKind::Overload);
            if aggregate && overload {
                out.insert(action.to_string());
                continue;
            }
            let collide = candidates.iter().enumerate().any(|(i, (da, a))| {
                candidates[i + 1..].iter().any(|(db, b)| {
                    da == db && a.kind == HandlerKind::Overload && overlap(*a, *b)
                })
            });
            if collide {
                out.insert(action.to_string());
            }
        }
        out.into_iter().collect()
    }

    /// Actions where a signature in `class`'s lineage shadows an ancestor's
    /// signature with the same names but different declared types.
    pub fn find_conflicts(&self, class: &str) -> BTreeMap<String, Vec<String>> {
        let lineage = self.lineage(class);
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (action, indices) in &self.by_action {
            let in_lineage: Vec<&HandlerDescriptor<H>> = indices
                .iter()
                .map(|&i| &self.descriptors[i])
                .filter(|d| lineage.contains(&d.class))
                .collect();
            let mut differing = BTreeSet::new();
            for (i, a) in in_lineage.iter().enumerate() {
                for b in &in_lineage[i + 1..] {
                    if a.class == b.class || a.kind != b.kind || a.names() != b.names() {
                        continue;
                    }
                    for p in &a.params {
                        if b.param(p.name).is_some_and(|q| q.ty != p.ty) {
                            differing.insert(p.name.to_string());
                        }
                    }
                }
            }
            if !differing.is_empty() {
                out.insert(action.to_string(), differing.into_iter().collect());
            }
        }
        out
    }
}

/// True when some parameter set satisfies both signatures.
fn overlap<H>(a: &HandlerDescriptor<H>, b: &HandlerDescriptor<H>) -> bool {
    let common: BTreeSet<_> = a.names().intersection(&b.names()).copied().collect();
    a.required().chain(b.required()).all(|r| common.contains(r))
}

fn fewest_missing<'a, H>(
    candidates: &[(usize, &'a HandlerDescriptor<H>)],
    params: &Map<String, Value>,
) -> Vec<&'static str> {
    candidates
        .iter()
        .map(|(_, d)| {
            d.required()
                .filter(|r| !params.contains_key(*r))
                .collect::<Vec<_>>()
        })
        .min_by_key(Vec::len)
        .unwrap_or_default()
}

fn ambiguous(action: &str, reason: &str) -> ActionError {
    ActionError::new(
        ErrorCode::AmbiguousAction,
        format!("Ambiguous action: {action} {reason}"),
    )
}

fn missing_arguments(action: &str, missing: &[&str]) -> ActionError {
    let message = if missing.is_empty() {
        format!("action: {action} has no signature matching the supplied arguments")
    } else {
        format!(
            "action: {action} is missing the following arguments: {}",
            missing.join(", ")
        )
    };
    ActionError::new(ErrorCode::MissingArguments, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn registry() -> ActionRegistry<&'static str> {
        use ParamType::*;
        ActionRegistry::builder()
            .class("Base", None)
            .class("Child", Some("Base"))
            .overload("Base", "Move", &[], false, "move()")
            .overload(
                "Base",
                "Move",
                &[ParamSpec::required("distance", Float)],
                false,
                "move(distance)",
            )
            .overload(
                "Child",
                "Move",
                &[ParamSpec::required("distance", Int)],
                false,
                "child move(distance)",
            )
            .build()
            .unwrap()
    }

    #[test]
    fn subclass_shadows_same_name_set() {
        let reg = registry();
        let d = reg
            .resolve("Child", "Move", &params(json!({"distance": 2})))
            .unwrap();
        assert_eq!(d.handler, "child move(distance)");
        let d = reg
            .resolve("Base", "Move", &params(json!({"distance": 2.5})))
            .unwrap();
        assert_eq!(d.handler, "move(distance)");
    }

    #[test]
    fn shadowing_signature_type_checks() {
        let err = registry()
            .resolve("Child", "Move", &params(json!({"distance": 2.5})))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.message, "action: Move has an invalid argument: distance");
    }

    #[test]
    fn conflicts_report_differing_types() {
        let conflicts = registry().find_conflicts("Child");
        assert_eq!(conflicts["Move"], vec!["distance".to_string()]);
        assert!(registry().find_conflicts("Base").is_empty());
    }

    #[test]
    fn undeclared_parent_is_rejected() {
        let err = ActionRegistry::<()>::builder()
            .class("Child", Some("Base"))
            .build()
            .err();
        assert_eq!(
            err,
            Some(RegistryError::UnknownParent {
                class: "Child".into(),
                parent: "Base".into()
            })
        );
    }

    #[test]
    fn reserved_names_cannot_be_parameters() {
        let err = ActionRegistry::builder()
            .class("Base", None)
            .overload(
                "Base",
                "Pass",
                &[ParamSpec::optional("sequenceId", ParamType::Int)],
                false,
                (),
            )
            .build()
            .err();
        assert_eq!(err, Some(RegistryError::ReservedParameter("sequenceId".into())));
    }

    #[test]
    fn rotation_accepts_number_or_vector() {
        assert!(ParamType::Rotation.accepts(&json!(90)));
        assert!(ParamType::Rotation.accepts(&json!({"y": 90})));
        assert!(!ParamType::Rotation.accepts(&json!("90")));
        assert!(!ParamType::Vec3.accepts(&json!({"x": 1, "y": 2})));
        assert!(ParamType::PartialVec3.accepts(&json!({"x": 1})));
    }

    #[test]
    fn int_is_a_non_negative_whole_number() {
        assert_eq!(whole_number(&json!(64)), Some(64));
        assert_eq!(whole_number(&json!(64.0)), Some(64));
        assert_eq!(whole_number(&json!(-1)), None);
        assert_eq!(whole_number(&json!(1.5)), None);
        assert!(!ParamType::Int.accepts(&json!(-1)));
        assert!(!ParamType::Int.accepts(&json!("2")));
    }
}
