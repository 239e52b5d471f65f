//! Typed contract built from parsed IDL declarations.
//!
//! A [`Contract`] indexes the structs, enums and interfaces of one IDL
//! source and validates call parameters and results against them. It is
//! immutable once built.

mod loader;

pub use loader::{compile_file, load_or_compile};

use crate::error::{Result, ShimError};
use crate::idl::{self, Declaration, MetaDecl};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Int,
    Float,
    String,
    Bool,
}

impl NativeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeType::Int => "int",
            NativeType::Float => "float",
            NativeType::String => "string",
            NativeType::Bool => "bool",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(NativeType::Int),
            "float" => Some(NativeType::Float),
            "string" => Some(NativeType::String),
            "bool" => Some(NativeType::Bool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Native(NativeType),
    /// A struct or enum declared in the contract.
    Named(String),
}

/// Type of a struct field, function parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub name: Option<String>,
    pub kind: TypeKind,
    pub is_array: bool,
    pub optional: bool,
}

impl Type {
    fn new(name: Option<&str>, type_name: &str, is_array: bool, optional: bool) -> Self {
        let kind = match NativeType::from_name(type_name) {
            Some(native) => TypeKind::Native(native),
            None => TypeKind::Named(type_name.to_string()),
        };
        Self {
            name: name.map(str::to_string),
            kind,
            is_array,
            optional,
        }
    }

    pub fn type_name(&self) -> &str {
        match &self.kind {
            TypeKind::Native(native) => native.as_str(),
            TypeKind::Named(name) => name,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array {
            write!(f, "[]")?;
        }
        write!(f, "{}", self.type_name())?;
        if self.optional {
            write!(f, " [optional]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    pub name: String,
    pub extends: Option<String>,
    /// Own fields in declaration order, each with `name` set.
    pub fields: Vec<Type>,
    pub comment: String,
}

impl Struct {
    /// Own field with the given name, ignoring ancestors.
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|f| f.name.as_deref() == Some(name))
    }

    /// Own fields followed by those of every ancestor.
    pub fn all_fields<'c>(&'c self, contract: &'c Contract) -> Vec<&'c Type> {
        contract.chain(self).flat_map(|s| s.fields.iter()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enum {
    pub name: String,
    pub values: Vec<String>,
    pub comment: String,
}

impl Enum {
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub interface: String,
    pub params: Vec<Type>,
    /// `None` for functions without a return value.
    pub returns: Option<Type>,
    pub comment: String,
}

impl Function {
    /// `Interface.function`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.interface, self.name)
    }

    /// Human readable signature, e.g. `add(x int, y int) int`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.name.as_deref().unwrap_or("_"), p))
            .collect();
        match &self.returns {
            Some(ret) => format!("{}({}) {}", self.name, params.join(", "), ret),
            None => format!("{}({})", self.name, params.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub name: String,
    pub functions: Vec<Function>,
    pub comment: String,
}

impl Interface {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A struct, enum or interface looked up by name.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Struct(&'a Struct),
    Enum(&'a Enum),
    Interface(&'a Interface),
}

/// Indexed, immutable view of one parsed IDL source.
#[derive(Debug, Clone)]
pub struct Contract {
    declarations: Vec<Declaration>,
    structs: HashMap<String, Struct>,
    enums: HashMap<String, Enum>,
    interfaces: HashMap<String, Interface>,
    meta: Option<MetaDecl>,
}

impl Contract {
    pub fn from_declarations(declarations: Vec<Declaration>) -> Self {
        let mut structs = HashMap::new();
        let mut enums = HashMap::new();
        let mut interfaces = HashMap::new();
        let mut meta = None;

        for decl in &declarations {
            match decl {
                Declaration::Struct(s) => {
                    let fields = s
                        .fields
                        .iter()
                        .map(|f| Type::new(Some(&f.name), &f.type_name, f.is_array, f.optional))
                        .collect();
                    structs.insert(
                        s.name.clone(),
                        Struct {
                            name: s.name.clone(),
                            extends: (!s.extends.is_empty()).then(|| s.extends.clone()),
                            fields,
                            comment: s.comment.clone(),
                        },
                    );
                }
                Declaration::Enum(e) => {
                    enums.insert(
                        e.name.clone(),
                        Enum {
                            name: e.name.clone(),
                            values: e.values.iter().map(|v| v.value.clone()).collect(),
                            comment: e.comment.clone(),
                        },
                    );
                }
                Declaration::Interface(i) => {
                    let functions = i
                        .functions
                        .iter()
                        .map(|f| Function {
                            name: f.name.clone(),
                            interface: i.name.clone(),
                            params: f
                                .params
                                .iter()
                                .map(|p| Type::new(Some(&p.name), &p.type_name, p.is_array, p.optional))
                                .collect(),
                            returns: f
                                .returns
                                .as_ref()
                                .map(|r| Type::new(None, &r.type_name, r.is_array, r.optional)),
                            comment: f.comment.clone(),
                        })
                        .collect();
                    interfaces.insert(
                        i.name.clone(),
                        Interface {
                            name: i.name.clone(),
                            functions,
                            comment: i.comment.clone(),
                        },
                    );
                }
                Declaration::Meta(m) => meta = Some(m.clone()),
                Declaration::Comment { .. } => {}
            }
        }

        Self {
            declarations,
            structs,
            enums,
            interfaces,
            meta,
        }
    }

    /// Parse and validate IDL text into a contract.
    pub fn from_idl(text: &str) -> Result<Self> {
        Ok(Self::from_declarations(idl::parse(text, None, true)?))
    }

    /// The declaration list this contract was built from.
    pub fn idl(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn meta(&self) -> Option<&MetaDecl> {
        self.meta.as_ref()
    }

    /// Interface names in declaration order.
    pub fn interface_names(&self) -> Vec<&str> {
        self.declarations
            .iter()
            .filter_map(|d| match d {
                Declaration::Interface(i) => Some(i.name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<Entity<'_>> {
        if let Some(s) = self.structs.get(name) {
            Ok(Entity::Struct(s))
        } else if let Some(e) = self.enums.get(name) {
            Ok(Entity::Enum(e))
        } else if let Some(i) = self.interfaces.get(name) {
            Ok(Entity::Interface(i))
        } else {
            Err(ShimError::UnknownEntity {
                name: name.to_string(),
            })
        }
    }

    pub fn struct_type(&self, name: &str) -> Result<&Struct> {
        self.structs.get(name).ok_or_else(|| ShimError::UnknownEntity {
            name: name.to_string(),
        })
    }

    pub fn interface(&self, name: &str) -> Result<&Interface> {
        self.interfaces.get(name).ok_or_else(|| ShimError::UnknownEntity {
            name: name.to_string(),
        })
    }

    /// Resolve `interface.function`, failing with `MethodNotFound`.
    pub fn function(&self, iface_name: &str, func_name: &str) -> Result<&Function> {
        let iface = self.interfaces.get(iface_name).ok_or_else(|| {
            ShimError::method_not_found(format!("Unknown interface: '{}'", iface_name))
        })?;
        iface.function(func_name).ok_or_else(|| {
            ShimError::method_not_found(format!("{}: Unknown function: '{}'", iface_name, func_name))
        })
    }

    /// Check a value against a type.
    pub fn validate_value(&self, ty: &Type, value: &Value) -> Result<()> {
        self.check_value(ty, value, ty.is_array)
            .map_err(|message| ShimError::InvalidParams { message })
    }

    pub fn validate_request(&self, iface_name: &str, func_name: &str, params: &[Value]) -> Result<()> {
        let function = self.function(iface_name, func_name)?;

        if function.params.len() != params.len() {
            return Err(ShimError::InvalidParams {
                message: format!(
                    "Function '{}' expects {} param(s). {} given.",
                    function.full_name(),
                    function.params.len(),
                    params.len()
                ),
            });
        }

        for (expected, param) in function.params.iter().zip(params) {
            self.check_value(expected, param, expected.is_array)
                .map_err(|msg| ShimError::InvalidParams {
                    message: format!(
                        "Function '{}' invalid param '{}'. {}",
                        function.full_name(),
                        expected.name.as_deref().unwrap_or_default(),
                        msg
                    ),
                })?;
        }
        Ok(())
    }

    pub fn validate_response(&self, iface_name: &str, func_name: &str, result: &Value) -> Result<()> {
        let function = self.function(iface_name, func_name)?;

        let checked = match &function.returns {
            Some(ret) => self.check_value(ret, result, ret.is_array),
            None if result.is_null() => Ok(()),
            None => Err("function has no return value".to_string()),
        };

        checked.map_err(|msg| ShimError::InvalidResponse {
            message: format!(
                "Function '{}' invalid response: '{}'. {}",
                function.full_name(),
                result,
                msg
            ),
        })
    }

    /// A struct followed by its ancestors, stopping at unknown or repeated names.
    fn chain<'c>(&'c self, s: &'c Struct) -> impl Iterator<Item = &'c Struct> + 'c {
        let mut seen = HashSet::new();
        let mut next = Some(s);
        std::iter::from_fn(move || {
            let cur = next.take()?;
            if !seen.insert(cur.name.as_str()) {
                return None;
            }
            next = cur.extends.as_deref().and_then(|p| self.structs.get(p));
            Some(cur)
        })
    }

    fn check_value(&self, ty: &Type, value: &Value, is_array: bool) -> std::result::Result<(), String> {
        if value.is_null() {
            return if ty.optional {
                Ok(())
            } else {
                Err("Value cannot be null".to_string())
            };
        }

        if is_array {
            let items = value.as_array().ok_or_else(|| type_err(value, "list"))?;
            for item in items {
                self.check_value(ty, item, false)?;
            }
            return Ok(());
        }

        match &ty.kind {
            TypeKind::Native(NativeType::Int) => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(type_err(value, "int"))
                }
            }
            TypeKind::Native(NativeType::Float) => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(type_err(value, "float"))
                }
            }
            TypeKind::Native(NativeType::Bool) => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(type_err(value, "bool"))
                }
            }
            TypeKind::Native(NativeType::String) => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(type_err(value, "string"))
                }
            }
            TypeKind::Named(name) => match self.get(name) {
                Ok(Entity::Struct(s)) => self.check_struct(s, value),
                Ok(Entity::Enum(e)) => check_enum(e, value),
                Ok(Entity::Interface(i)) => {
                    Err(format!("interface {} cannot be used as a type", i.name))
                }
                Err(e) => Err(e.to_string()),
            },
        }
    }

    fn check_struct(&self, s: &Struct, value: &Value) -> std::result::Result<(), String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("{} is not an object", value))?;

        for (key, v) in obj {
            let field = self
                .chain(s)
                .find_map(|ancestor| ancestor.field(key))
                .ok_or_else(|| format!("field '{}' not found in struct {}", key, s.name))?;
            self.check_value(field, v, field.is_array)
                .map_err(|msg| format!("field '{}': {}", key, msg))?;
        }

        for field in s.all_fields(self) {
            let name = field.name.as_deref().unwrap_or_default();
            if !field.optional && !obj.contains_key(name) {
                return Err(format!("field '{}' missing from: {}", name, value));
            }
        }
        Ok(())
    }
}

fn check_enum(e: &Enum, value: &Value) -> std::result::Result<(), String> {
    match value.as_str() {
        Some(v) if e.contains(v) => Ok(()),
        _ => Err(format!("'{}' is not in enum: {:?}", value, e.values)),
    }
}

fn type_err(value: &Value, expected: &str) -> String {
    let actual = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    };
    format!("'{}' is of type {}, expected {}", value, actual, expected)
}
