//! Node parameters: a closed sum type over the fixed parameter kinds (§4.2),
//! grounded on `NodeInstance::GetParameterValue<T>` in `original_source`
//! (`std::variant`-backed, "reading the wrong type yields the default").

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
    Enum(u32),
}

/// Type tag mirroring `ParamValue`'s variants, used by `ParamDef` to state
/// the expected type independent of any default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    UInt,
    Float,
    Double,
    Bool,
    String,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Enum,
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::UInt(_) => ParamKind::UInt,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::Double(_) => ParamKind::Double,
            ParamValue::Bool(_) => ParamKind::Bool,
            ParamValue::String(_) => ParamKind::String,
            ParamValue::Vec2(_) => ParamKind::Vec2,
            ParamValue::Vec3(_) => ParamKind::Vec3,
            ParamValue::Vec4(_) => ParamKind::Vec4,
            ParamValue::Mat4(_) => ParamKind::Mat4,
            ParamValue::Enum(_) => ParamKind::Enum,
        }
    }
}

/// A parameter's schema entry: its expected kind, whether it is required,
/// and the default value substituted on a type mismatch or when unset
/// (§4.2: "Reading a parameter of the wrong type yields the supplied
/// default").
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: ParamValue,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, required: bool, default: ParamValue) -> Self {
        ParamDef {
            name: name.into(),
            kind: default.kind(),
            required,
            default,
        }
    }
}

/// Instance-level parameter storage (§3 "Node: Parameters").
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    values: HashMap<String, ParamValue>,
}

impl ParamTable {
    pub fn new() -> Self {
        ParamTable::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    /// Returns `default` if the parameter is unset, or if it is set with a
    /// different `ParamKind` than `default`'s.
    pub fn get_or(&self, name: &str, default: &ParamValue) -> ParamValue {
        match self.values.get(name) {
            Some(v) if v.kind() == default.kind() => v.clone(),
            _ => default.clone(),
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Checks every required parameter in `schema` is present; returns the
    /// names of any that are missing (§4.2: "A required parameter left
    /// unset is a Compile-time error").
    pub fn missing_required<'a>(&self, schema: &'a [ParamDef]) -> Vec<&'a str> {
        schema
            .iter()
            .filter(|def| def.required && !self.is_set(&def.name))
            .map(|def| def.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_type_read_yields_default() {
        let mut table = ParamTable::new();
        table.set("resolution", ParamValue::String("1080p".into()));
        let default = ParamValue::UInt(512);
        assert_eq!(table.get_or("resolution", &default), default);
    }

    #[test]
    fn missing_required_param_is_detected() {
        let schema = vec![
            ParamDef::new("gpu_index", true, ParamValue::UInt(0)),
            ParamDef::new("label", false, ParamValue::String(String::new())),
        ];
        let table = ParamTable::new();
        assert_eq!(table.missing_required(&schema), vec!["gpu_index"]);
    }
}
