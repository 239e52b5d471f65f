//! Declarations produced by the IDL parser.
//!
//! These types are also the on-disk format of a compiled contract: a JSON
//! array of objects tagged by `type`. Field names are stable so that
//! worker-side readers of `.api.json` keep working.

use serde::{Deserialize, Serialize};

/// Type names understood without a declaration.
pub const NATIVE_TYPES: [&str; 4] = ["int", "float", "string", "bool"];

pub fn is_native(type_name: &str) -> bool {
    NATIVE_TYPES.contains(&type_name)
}

/// A single top-level entry of a parsed IDL file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Declaration {
    Struct(StructDecl),
    Enum(EnumDecl),
    Interface(InterfaceDecl),
    Comment { value: String },
    Meta(MetaDecl),
}

impl Declaration {
    /// Name of a struct, enum or interface declaration.
    pub fn name(&self) -> Option<&str> {
        match self {
            Declaration::Struct(s) => Some(&s.name),
            Declaration::Enum(e) => Some(&e.name),
            Declaration::Interface(i) => Some(&i.name),
            Declaration::Comment { .. } | Declaration::Meta(_) => None,
        }
    }

    /// Human readable kind, as used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Declaration::Struct(_) => "struct",
            Declaration::Enum(_) => "enum",
            Declaration::Interface(_) => "interface",
            Declaration::Comment { .. } => "comment",
            Declaration::Meta(_) => "meta",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    /// Parent struct name, empty when the struct extends nothing.
    #[serde(default)]
    pub extends: String,
    #[serde(default)]
    pub comment: String,
    pub fields: Vec<FieldDecl>,
}

impl StructDecl {
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_array: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub values: Vec<EnumValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub functions: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub params: Vec<ParamDecl>,
    /// Absent for functions declared without a return type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<ReturnDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_array: bool,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_array: bool,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDecl {
    #[serde(alias = "barrister_version")]
    pub schema_version: String,
    /// Milliseconds since the Unix epoch.
    pub date_generated: i64,
    pub checksum: String,
}
