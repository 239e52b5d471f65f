//! IDL compiler.
//!
//! Turns IDL source text into a flat list of [`Declaration`]s:
//!
//! ```text
//! // Adds numbers
//! interface Default {
//!     add(x int, y int) int
//! }
//! ```
//!
//! A successful parse ends with a synthetic `meta` declaration carrying
//! the schema version, the generation time and a structural checksum.

pub mod ast;
pub mod checksum;
pub mod lexer;
pub mod parser;

pub use ast::{
    Declaration, EnumDecl, EnumValue, FieldDecl, FunctionDecl, InterfaceDecl, MetaDecl, ParamDecl,
    ReturnDecl, StructDecl,
};
pub use checksum::checksum;
pub use parser::{parse_with, ParseOptions, ScanOutcome, SymbolTable};

use crate::config::IdlConfig;
use crate::error::{Result, ShimError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configurable entry point to the IDL compiler.
#[derive(Debug, Clone)]
pub struct IdlParser {
    options: ParseOptions,
    add_meta: bool,
}

impl Default for IdlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IdlParser {
    pub fn new() -> Self {
        Self {
            options: ParseOptions::default(),
            add_meta: true,
        }
    }

    /// Name the file being parsed; imports resolve relative to its directory.
    pub fn with_source(mut self, path: impl AsRef<Path>) -> Self {
        self.options.source = Some(path.as_ref().to_path_buf());
        self
    }

    /// Add a directory searched for imports.
    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.search_path.push(dir.into());
        self
    }

    /// Skip the trailing `meta` declaration.
    pub fn without_meta(mut self) -> Self {
        self.add_meta = false;
        self
    }

    /// Parse IDL text, failing with every error found.
    pub fn parse(&self, text: &str, validate: bool) -> Result<Vec<Declaration>> {
        let outcome = parse_with(text, &self.options, validate);

        if !outcome.errors.is_empty() {
            warn!("IDL parse failed with {} error(s)", outcome.errors.len());
            return Err(ShimError::IdlParse {
                errors: outcome.errors,
            });
        }

        let mut declarations = outcome.declarations;
        if self.add_meta {
            let meta = MetaDecl {
                schema_version: IdlConfig::SCHEMA_VERSION.to_string(),
                date_generated: chrono::Utc::now().timestamp_millis(),
                checksum: checksum(&declarations),
            };
            debug!("IDL checksum {}", meta.checksum);
            declarations.push(Declaration::Meta(meta));
        }
        Ok(declarations)
    }

    /// Read and parse an IDL file.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Vec<Declaration>> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ShimError::io_with_path(e, path))?;
        self.clone().with_source(path).parse(&text, true)
    }
}

/// Parse IDL text with default options.
pub fn parse(text: &str, source_name: Option<&Path>, validate: bool) -> Result<Vec<Declaration>> {
    let parser = match source_name {
        Some(path) => IdlParser::new().with_source(path),
        None => IdlParser::new(),
    };
    parser.parse(text, validate)
}
