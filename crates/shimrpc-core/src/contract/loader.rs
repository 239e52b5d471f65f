//! Compiled contract files.
//!
//! The compiled form of `api.idl` is a JSON array of declarations written
//! next to it (`.api.json`). It is reused as long as it is at least as new
//! as the IDL source.

use super::Contract;
use crate::error::{Result, ShimError};
use crate::idl::{Declaration, IdlParser};
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};

impl Contract {
    /// Load a compiled contract file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ShimError::io_with_path(e, path))?;
        let declarations: Vec<Declaration> = serde_json::from_str(&text)?;
        debug!("Loaded {} declarations from {}", declarations.len(), path.display());
        Ok(Self::from_declarations(declarations))
    }
}

/// Parse `idl_path` and write the compiled contract to `compiled_path`.
pub fn compile_file(idl_path: impl AsRef<Path>, compiled_path: impl AsRef<Path>) -> Result<Contract> {
    let idl_path = idl_path.as_ref();
    let compiled_path = compiled_path.as_ref();

    let declarations = IdlParser::new().parse_file(idl_path)?;
    let json = serde_json::to_string(&declarations)?;
    fs::write(compiled_path, json).map_err(|e| ShimError::io_with_path(e, compiled_path))?;

    info!(
        "Compiled {} into {}",
        idl_path.display(),
        compiled_path.display()
    );
    Ok(Contract::from_declarations(declarations))
}

/// Reuse the compiled contract unless the IDL file is newer.
pub fn load_or_compile(idl_path: impl AsRef<Path>, compiled_path: impl AsRef<Path>) -> Result<Contract> {
    let idl_path = idl_path.as_ref();
    let compiled_path = compiled_path.as_ref();

    let compiled_time = modified(compiled_path);
    let idl_time = modified(idl_path);

    let fresh = match (compiled_time, idl_time) {
        (Some(compiled), Some(idl)) => compiled >= idl,
        (Some(_), None) => true,
        (None, _) => false,
    };

    if fresh {
        debug!("Using cached contract {}", compiled_path.display());
        Contract::from_file(compiled_path)
    } else {
        compile_file(idl_path, compiled_path)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
