//! Two-pass IDL parser.
//!
//! The first pass collects every declared type name into a [`SymbolTable`]
//! so forward references resolve. The second pass re-scans the same text
//! with the first pass's table and reports semantic errors: undefined
//! types, bad `extends` targets, shadowed parent fields, struct cycles,
//! interfaces used as types, duplicates. Every error of the validating
//! pass is collected; nothing stops at the first problem.

use super::ast::{
    is_native, Declaration, EnumDecl, EnumValue, FieldDecl, FunctionDecl, InterfaceDecl,
    ParamDecl, ReturnDecl, StructDecl,
};
use super::checksum::canonical_line;
use super::lexer::{Action, Callback, LexState, Lexer, Token};
use crate::config::IdlConfig;
use crate::error::IdlError;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Declared type names of one parse, mapped to their declarations.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    types: HashMap<String, Declaration>,
}

impl SymbolTable {
    pub fn get(&self, name: &str) -> Option<&Declaration> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn insert(&mut self, decl: Declaration) {
        if let Some(name) = decl.name() {
            self.types.insert(name.to_string(), decl);
        }
    }

    /// Problem with using `type_name` as a field, param or return type.
    fn check_type(&self, type_name: &str) -> Option<String> {
        if is_native(type_name) {
            return None;
        }
        match self.get(type_name) {
            None => Some(format!("undefined type: {}", type_name)),
            Some(Declaration::Interface(i)) => {
                Some(format!("interface {} cannot be used as a type", i.name))
            }
            Some(_) => None,
        }
    }

    /// Field names declared by every ancestor of a struct.
    fn parent_fields(&self, extends: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut visited = HashSet::new();
        let mut parent = extends;

        while !parent.is_empty() && visited.insert(parent.to_string()) {
            let Some(Declaration::Struct(p)) = self.get(parent) else {
                break;
            };
            names.extend(p.fields.iter().map(|f| f.name.clone()));
            parent = &p.extends;
        }
        names
    }

    /// Types a struct value cannot exist without.
    ///
    /// Array and optional struct fields are skipped since they can be
    /// empty or null, so they never make a struct infinitely large.
    fn struct_field_types(&self, s: &StructDecl, types: &mut Vec<String>) {
        for f in &s.fields {
            if types.contains(&f.type_name) {
                continue;
            }
            match self.get(&f.type_name) {
                Some(Declaration::Struct(t)) => {
                    if !f.is_array && !f.optional {
                        types.push(f.type_name.clone());
                        self.struct_field_types(t, types);
                    }
                }
                Some(_) => types.push(f.type_name.clone()),
                None => {}
            }
        }

        if !s.extends.is_empty() && !types.contains(&s.extends) {
            if let Some(Declaration::Struct(t)) = self.get(&s.extends) {
                types.push(s.extends.clone());
                self.struct_field_types(t, types);
            }
        }
    }
}

/// Where imports are looked up, and which files are already being parsed.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub source: Option<PathBuf>,
    pub search_path: Vec<PathBuf>,
    import_stack: Vec<PathBuf>,
}

impl ParseOptions {
    fn canonical_source(&self) -> Option<PathBuf> {
        self.source.as_ref().and_then(|p| fs::canonicalize(p).ok())
    }

    fn for_import(&self, path: PathBuf) -> Self {
        let mut import_stack = self.import_stack.clone();
        if let Some(current) = self.canonical_source() {
            import_stack.push(current);
        }
        Self {
            source: Some(path),
            search_path: self.search_path.clone(),
            import_stack,
        }
    }

    fn resolve_import(&self, fname: &str) -> Option<PathBuf> {
        let candidate = Path::new(fname);
        if candidate.is_absolute() {
            return fs::canonicalize(candidate).ok();
        }

        let mut dirs = Vec::new();
        if let Some(dir) = self.source.as_ref().and_then(|p| p.parent()) {
            dirs.push(dir.to_path_buf());
        }
        if let Some(paths) = std::env::var_os(IdlConfig::SEARCH_PATH_ENV) {
            dirs.extend(std::env::split_paths(&paths));
        }
        dirs.extend(self.search_path.iter().cloned());

        dirs.iter()
            .map(|dir| dir.join(candidate))
            .find(|path| path.is_file())
            .and_then(|path| fs::canonicalize(path).ok())
    }
}

/// Result of scanning one IDL text.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub declarations: Vec<Declaration>,
    pub errors: Vec<IdlError>,
    pub symbols: SymbolTable,
}

/// Declarations and errors of one imported file.
#[derive(Debug, Clone)]
struct Imported {
    declarations: Vec<Declaration>,
    errors: Vec<IdlError>,
}

/// Imports already parsed during one top-level parse, by canonical path.
type ImportCache = RefCell<HashMap<PathBuf, Imported>>;

/// Scan `text`, then, when `validate` is set, re-scan it against the first
/// pass's symbol table.
pub fn parse_with(text: &str, options: &ParseOptions, validate: bool) -> ScanOutcome {
    let imports = ImportCache::default();
    parse_cached(text, options, validate, &imports)
}

fn parse_cached(
    text: &str,
    options: &ParseOptions,
    validate: bool,
    imports: &ImportCache,
) -> ScanOutcome {
    let first = Scanner::new(text, options, None, imports).run();
    if !validate {
        return first;
    }
    Scanner::new(text, options, Some(&first.symbols), imports).run()
}

/// Declaration block currently being filled.
enum Block {
    Struct(StructDecl),
    Enum(EnumDecl),
    Interface(InterfaceDecl),
}

/// Type that a following `[option]` applies to.
#[derive(Clone, Copy)]
enum OptsTarget {
    Field,
    Return,
}

struct Scanner<'a> {
    text: &'a str,
    options: &'a ParseOptions,
    first_pass: Option<&'a SymbolTable>,
    imports: &'a ImportCache,

    state: LexState,
    prev_state: LexState,
    next_state: LexState,
    line: usize,

    parsed: Vec<Declaration>,
    errors: Vec<IdlError>,
    symbols: SymbolTable,
    imported: HashSet<PathBuf>,
    namespace: Option<String>,
    comment: Option<Vec<String>>,

    cur: Option<Block>,
    field_name: Option<String>,
    function: Option<FunctionDecl>,
    param_name: Option<String>,
    opts_target: Option<OptsTarget>,
}

impl<'a> Scanner<'a> {
    fn new(
        text: &'a str,
        options: &'a ParseOptions,
        first_pass: Option<&'a SymbolTable>,
        imports: &'a ImportCache,
    ) -> Self {
        Self {
            text,
            options,
            first_pass,
            imports,
            state: LexState::TopLevel,
            prev_state: LexState::TopLevel,
            next_state: LexState::TopLevel,
            line: 1,
            parsed: Vec::new(),
            errors: Vec::new(),
            symbols: SymbolTable::default(),
            imported: HashSet::new(),
            namespace: None,
            comment: None,
            cur: None,
            field_name: None,
            function: None,
            param_name: None,
            opts_target: None,
        }
    }

    fn run(mut self) -> ScanOutcome {
        let mut lexer = Lexer::new(self.text);

        while let Some(token) = lexer.next_token(self.state) {
            match token {
                Token::Matched { text, line, action } => {
                    self.line = line;
                    self.apply(action, text);
                }
                Token::Unrecognized { ch, line } => {
                    self.line = line;
                    let message = format!("Unexpected character {:?} in {}", ch, self.state.name());
                    self.add_error(message);
                }
            }
        }

        self.line = lexer.line();
        self.eof();

        debug!(
            "Scanned {} declarations with {} errors (validating: {})",
            self.parsed.len(),
            self.errors.len(),
            self.first_pass.is_some()
        );

        ScanOutcome {
            declarations: self.parsed,
            errors: self.errors,
            symbols: self.symbols,
        }
    }

    fn apply(&mut self, action: Action, text: &str) {
        match action {
            Action::Ignore => {}
            Action::Begin(state) => self.state = state,
            Action::Fail(message) => self.add_error(message),
            Action::Call(callback) => self.dispatch(callback, text),
        }
    }

    fn dispatch(&mut self, callback: Callback, text: &str) {
        match callback {
            Callback::CommentBlock => self.add_comment_block(),
            Callback::Namespace => self.set_namespace(text),
            Callback::Import => self.add_import(text),
            Callback::EndOfLine => self.state = LexState::TopLevel,
            Callback::BeginStruct => self.begin_struct(text),
            Callback::BeginEnum => self.begin_enum(text),
            Callback::BeginInterface => self.begin_interface(text),
            Callback::StartBlock => self.start_block(),
            Callback::EndExtends => self.end_extends(text),
            Callback::EndBlock => self.end_block(),
            Callback::BeginField => {
                self.field_name = Some(text.to_string());
                self.state = LexState::Field;
            }
            Callback::EndField => self.end_field(text),
            Callback::BeginFunction => self.begin_function(text),
            Callback::BeginParam => {
                self.param_name = Some(text.to_string());
                self.state = LexState::Param;
            }
            Callback::EndParam => self.end_param(text),
            Callback::ParamOpts => self.param_opts(text),
            Callback::EndReturn => self.end_return(text),
            Callback::EndTypeOpts => self.end_type_opts(text),
            Callback::EndValue => self.end_value(text),
            Callback::StartComment => self.start_comment(),
            Callback::AppendComment => {
                if let Some(comment) = self.comment.as_mut() {
                    comment.push(text.trim_end_matches('\r').to_string());
                }
            }
            Callback::EndComment => self.state = self.prev_state,
        }
    }

    fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(IdlError::new(self.line, message));
    }

    fn prefix_namespace(&self, ident: &str) -> String {
        match &self.namespace {
            Some(ns) if !ident.contains('.') && !is_native(ident) => format!("{}.{}", ns, ident),
            _ => ident.to_string(),
        }
    }

    fn take_comment(&mut self) -> String {
        self.comment.take().map(|c| c.concat()).unwrap_or_default()
    }

    fn validate_type_vs_first_pass(&mut self, type_name: &str) {
        if let Some(err) = self.first_pass.and_then(|fp| fp.check_type(type_name)) {
            self.add_error(err);
        }
    }

    // Top level

    fn add_comment_block(&mut self) {
        let comment = self.take_comment();
        if !comment.is_empty() {
            self.parsed.push(Declaration::Comment { value: comment });
        }
    }

    fn set_namespace(&mut self, text: &str) {
        if self.namespace.is_some() {
            self.add_error("Cannot redeclare namespace");
        } else if self.parsed.iter().any(|d| d.name().is_some()) {
            self.add_error("namespace must precede all struct/enum/interface definitions");
        }
        let ns = text.trim()["namespace".len()..].trim();
        self.namespace = Some(ns.to_string());
        self.state = LexState::EndOfLine;
    }

    fn add_import(&mut self, text: &str) {
        let fname = text.split('"').nth(1).unwrap_or_default().to_string();
        self.import_file(&fname);
        self.state = LexState::EndOfLine;
    }

    fn import_file(&mut self, fname: &str) {
        let Some(path) = self.options.resolve_import(fname) else {
            self.add_error(format!("Cannot find import file: {}", fname));
            return;
        };

        if self.options.import_stack.contains(&path)
            || self.options.canonical_source().as_ref() == Some(&path)
        {
            self.add_error(format!("Circular import: {}", path.display()));
            return;
        }
        if !self.imported.insert(path.clone()) {
            return;
        }

        let cached = self.imports.borrow().get(&path).cloned();
        let outcome = match cached {
            Some(outcome) => outcome,
            None => {
                let text = match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        self.add_error(format!(
                            "Cannot read import file {}: {}",
                            path.display(),
                            e
                        ));
                        return;
                    }
                };

                debug!("Importing IDL file {}", path.display());
                let scanned = parse_cached(
                    &text,
                    &self.options.for_import(path.clone()),
                    true,
                    self.imports,
                );
                let outcome = Imported {
                    declarations: scanned.declarations,
                    errors: scanned.errors,
                };
                self.imports
                    .borrow_mut()
                    .insert(path.clone(), outcome.clone());
                outcome
            }
        };

        for err in outcome.errors {
            self.add_error(format!("{}: line {}: {}", path.display(), err.line, err.message));
        }

        for decl in outcome.declarations {
            if !matches!(decl, Declaration::Struct(_) | Declaration::Enum(_)) {
                continue;
            }
            let name = decl.name().unwrap_or_default().to_string();
            match self.symbols.get(&name) {
                Some(existing) => {
                    if canonical_line(existing) != canonical_line(&decl) {
                        self.add_error(format!(
                            "Include {} redefined type: {}",
                            path.display(),
                            name
                        ));
                    }
                }
                None => {
                    self.symbols.insert(decl.clone());
                    self.parsed.push(decl);
                }
            }
        }
    }

    fn eof(&mut self) {
        if self.state == LexState::Comment && self.prev_state == LexState::TopLevel {
            self.add_comment_block();
        }
        if self.cur.is_some() {
            self.add_error("Unexpected end of file");
        }
    }

    // Declaration blocks

    fn check_dupe_name(&mut self, name: &str) {
        if self.symbols.contains(name) {
            self.add_error(format!("type {} already defined", name));
        }
    }

    fn begin_struct(&mut self, text: &str) {
        let name = self.prefix_namespace(text);
        self.check_dupe_name(&name);
        let comment = self.take_comment();
        self.cur = Some(Block::Struct(StructDecl {
            name,
            comment,
            ..Default::default()
        }));
        self.state = LexState::StartBlock;
    }

    fn begin_enum(&mut self, text: &str) {
        let name = self.prefix_namespace(text);
        self.check_dupe_name(&name);
        let comment = self.take_comment();
        self.cur = Some(Block::Enum(EnumDecl {
            name,
            comment,
            values: Vec::new(),
        }));
        self.state = LexState::StartBlock;
    }

    fn begin_interface(&mut self, text: &str) {
        self.check_dupe_name(text);
        let comment = self.take_comment();
        self.cur = Some(Block::Interface(InterfaceDecl {
            name: text.to_string(),
            comment,
            functions: Vec::new(),
        }));
        self.state = LexState::StartBlock;
    }

    fn start_block(&mut self) {
        let next = match &self.cur {
            Some(Block::Struct(_)) => Some(LexState::Fields),
            Some(Block::Enum(_)) => Some(LexState::Values),
            Some(Block::Interface(_)) => Some(LexState::Functions),
            None => None,
        };

        match next {
            Some(LexState::Functions) if self.namespace.is_some() => {
                self.add_error("namespace cannot be used in files with interfaces");
            }
            None => self.add_error("Unexpected '{'"),
            _ => {}
        }
        self.state = next.unwrap_or(LexState::TopLevel);
    }

    fn end_extends(&mut self, text: &str) {
        let extends = self.prefix_namespace(text);
        let name = match self.cur.as_mut() {
            Some(Block::Struct(s)) => {
                s.extends = extends.clone();
                Some(s.name.clone())
            }
            _ => None,
        };
        let Some(name) = name else {
            self.add_error("extends is only supported for struct types");
            return;
        };

        let Some(fp) = self.first_pass else {
            return;
        };
        if is_native(&extends) {
            self.add_error(format!("{} cannot extend {}", name, extends));
            return;
        }
        match fp.get(&extends) {
            Some(Declaration::Struct(_)) => {}
            Some(other) => {
                let kind = other.kind();
                self.add_error(format!("{} cannot extend {} {}", name, kind, extends));
            }
            None => self.add_error(format!("{} extends unknown type {}", name, extends)),
        }
    }

    fn end_block(&mut self) {
        self.state = LexState::TopLevel;
        self.opts_target = None;

        let Some(block) = self.cur.take() else {
            self.add_error("Unexpected '}'");
            return;
        };

        let decl = match block {
            Block::Struct(s) => {
                self.check_struct_cycles(&s);
                if s.fields.is_empty() {
                    self.add_error(format!("{} must have at least one field", s.name));
                    None
                } else {
                    Some(Declaration::Struct(s))
                }
            }
            Block::Enum(e) => {
                if e.values.is_empty() {
                    self.add_error(format!("{} must have at least one value", e.name));
                    None
                } else {
                    Some(Declaration::Enum(e))
                }
            }
            Block::Interface(i) => {
                if i.functions.is_empty() {
                    self.add_error(format!("{} must have at least one function", i.name));
                    None
                } else {
                    Some(Declaration::Interface(i))
                }
            }
        };

        if let Some(decl) = decl {
            self.symbols.insert(decl.clone());
            self.parsed.push(decl);
        }
    }

    fn check_struct_cycles(&mut self, s: &StructDecl) {
        if let Some(fp) = self.first_pass {
            let mut types = Vec::new();
            fp.struct_field_types(s, &mut types);
            if types.contains(&s.name) {
                self.add_error(format!("cycle detected in struct: {}", s.name));
            }
        }
    }

    // Struct fields

    fn end_field(&mut self, text: &str) {
        let (is_array, raw) = split_array(text);
        let type_name = self.prefix_namespace(raw);
        self.validate_type_vs_first_pass(&type_name);

        let field = FieldDecl {
            name: self.field_name.take().unwrap_or_default(),
            type_name,
            is_array,
            optional: false,
            comment: self.take_comment(),
        };

        self.opts_target = None;
        self.next_state = LexState::Fields;
        self.state = LexState::TypeOpts;

        let Some(Block::Struct(s)) = self.cur.as_mut() else {
            return;
        };
        let struct_name = s.name.clone();
        let extends = s.extends.clone();

        if s.field(&field.name).is_some() {
            let message = format!("{} cannot redefine field {}", struct_name, field.name);
            self.add_error(message);
            return;
        }
        let field_name = field.name.clone();
        s.fields.push(field);
        self.opts_target = Some(OptsTarget::Field);

        if let Some(fp) = self.first_pass {
            if fp.parent_fields(&extends).contains(&field_name) {
                self.add_error(format!(
                    "{} cannot redefine parent field {}",
                    struct_name, field_name
                ));
            }
        }
    }

    fn end_type_opts(&mut self, text: &str) {
        match parse_type_option(text) {
            Ok(true) => self.mark_optional(),
            Ok(false) => {}
            Err(message) => self.add_error(message),
        }
        self.opts_target = None;
        self.state = self.next_state;
    }

    fn mark_optional(&mut self) {
        match (self.opts_target, self.cur.as_mut()) {
            (Some(OptsTarget::Field), Some(Block::Struct(s))) => {
                if let Some(field) = s.fields.last_mut() {
                    field.optional = true;
                }
            }
            (Some(OptsTarget::Return), Some(Block::Interface(i))) => {
                if let Some(ret) = i.functions.last_mut().and_then(|f| f.returns.as_mut()) {
                    ret.optional = true;
                }
            }
            _ => {}
        }
    }

    // Interface functions

    fn begin_function(&mut self, text: &str) {
        self.function = Some(FunctionDecl {
            name: text.to_string(),
            comment: self.take_comment(),
            params: Vec::new(),
            returns: None,
        });
        self.state = LexState::FunctionStart;
    }

    fn end_param(&mut self, text: &str) {
        let (is_array, raw) = split_array(text);
        let type_name = self.prefix_namespace(raw);
        self.validate_type_vs_first_pass(&type_name);

        let param = ParamDecl {
            name: self.param_name.take().unwrap_or_default(),
            type_name,
            is_array,
            optional: false,
        };
        if let Some(function) = self.function.as_mut() {
            function.params.push(param);
        }
        self.state = LexState::EndParam;
    }

    fn param_opts(&mut self, text: &str) {
        match parse_type_option(text) {
            Ok(true) => {
                if let Some(param) = self.function.as_mut().and_then(|f| f.params.last_mut()) {
                    param.optional = true;
                }
            }
            Ok(false) => {}
            Err(message) => self.add_error(message),
        }
    }

    fn end_return(&mut self, text: &str) {
        if text == "\n" || text == "\r\n" {
            self.finish_function();
            self.state = LexState::Functions;
            return;
        }

        let (is_array, raw) = split_array(text);
        let type_name = self.prefix_namespace(raw);
        self.validate_type_vs_first_pass(&type_name);

        if let Some(function) = self.function.as_mut() {
            function.returns = Some(ReturnDecl {
                type_name,
                is_array,
                optional: false,
            });
        }
        let added = self.finish_function();
        self.opts_target = added.then_some(OptsTarget::Return);
        self.next_state = LexState::Functions;
        self.state = LexState::TypeOpts;
    }

    fn finish_function(&mut self) -> bool {
        let Some(function) = self.function.take() else {
            return false;
        };
        let Some(Block::Interface(iface)) = self.cur.as_mut() else {
            return false;
        };
        if iface.functions.iter().any(|f| f.name == function.name) {
            let message = format!("{} cannot redefine function {}", iface.name, function.name);
            self.add_error(message);
            return false;
        }
        iface.functions.push(function);
        true
    }

    // Enum values

    fn end_value(&mut self, text: &str) {
        let comment = self.take_comment();
        let Some(Block::Enum(e)) = self.cur.as_mut() else {
            return;
        };
        if e.values.iter().any(|v| v.value == text) {
            let message = format!("{} cannot redefine value {}", e.name, text);
            self.add_error(message);
            return;
        }
        e.values.push(EnumValue {
            value: text.to_string(),
            comment,
        });
    }

    // Comments

    fn start_comment(&mut self) {
        match self.comment.as_mut() {
            Some(comment) => comment.push("\n".to_string()),
            None => self.comment = Some(Vec::new()),
        }
        self.prev_state = self.state;
        self.state = LexState::Comment;
    }
}

fn split_array(text: &str) -> (bool, &str) {
    match text.strip_prefix("[]") {
        Some(rest) => (true, rest),
        None => (false, text),
    }
}

/// `Ok(true)` for `[optional]`, `Ok(false)` for no option.
fn parse_type_option(text: &str) -> Result<bool, String> {
    let text = text.trim();
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text)
        .trim();

    match inner {
        "" => Ok(false),
        "optional" => Ok(true),
        other => Err(format!("Invalid type option: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> ScanOutcome {
        parse_with(text, &ParseOptions::default(), true)
    }

    fn messages(outcome: &ScanOutcome) -> Vec<String> {
        outcome.errors.iter().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn test_parses_struct_enum_interface() {
        let outcome = scan(
            "struct Person {\n  name string\n  tags []string [optional]\n}\n\n\
             enum Color {\n  red\n  blue\n}\n\n\
             interface Default {\n  add(x int, y int) int\n  ping()\n}\n",
        );
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(outcome.declarations.len(), 3);

        let Declaration::Struct(person) = &outcome.declarations[0] else {
            panic!("expected struct");
        };
        assert_eq!(person.fields[1].type_name, "string");
        assert!(person.fields[1].is_array);
        assert!(person.fields[1].optional);

        let Declaration::Interface(iface) = &outcome.declarations[2] else {
            panic!("expected interface");
        };
        assert_eq!(iface.functions[0].params.len(), 2);
        assert_eq!(iface.functions[0].returns.as_ref().unwrap().type_name, "int");
        assert!(iface.functions[1].returns.is_none());
    }

    #[test]
    fn test_forward_reference_resolves() {
        let outcome = scan("struct A {\n  b B\n}\n\nstruct B {\n  x int\n}\n");
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    }

    #[test]
    fn test_undefined_type_reported_with_line() {
        let outcome = scan("struct A {\n  x int\n  b Missing\n}\n");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].line, 3);
        assert_eq!(outcome.errors[0].message, "undefined type: Missing");
    }

    #[test]
    fn test_comments_attach_to_following_declaration() {
        let outcome = scan(
            "// standalone\n\n// A person\nstruct P {\n  // full name\n  name string\n}\n",
        );
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(
            outcome.declarations[0],
            Declaration::Comment {
                value: "standalone".into()
            }
        );
        let Declaration::Struct(p) = &outcome.declarations[1] else {
            panic!("expected struct");
        };
        assert_eq!(p.comment, "A person");
        assert_eq!(p.fields[0].comment, "full name");
    }

    #[test]
    fn test_multiline_comment_joined_with_newline() {
        let outcome = scan("// one\n// two\nenum E {\n  a\n}\n");
        let Declaration::Enum(e) = &outcome.declarations[0] else {
            panic!("expected enum");
        };
        assert_eq!(e.comment, "one\ntwo");
    }

    #[test]
    fn test_namespace_prefixes_types() {
        let outcome = scan("namespace acme\n\nenum Kind {\n  a\n}\n\nstruct Item {\n  kind Kind\n  n int\n}\n");
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let Declaration::Struct(item) = &outcome.declarations[1] else {
            panic!("expected struct");
        };
        assert_eq!(item.name, "acme.Item");
        assert_eq!(item.fields[0].type_name, "acme.Kind");
        assert_eq!(item.fields[1].type_name, "int");
    }

    #[test]
    fn test_namespace_rejected_with_interfaces() {
        let outcome = scan("namespace acme\n\ninterface Svc {\n  ping()\n}\n");
        assert_eq!(
            messages(&outcome),
            vec!["namespace cannot be used in files with interfaces"]
        );
    }

    #[test]
    fn test_duplicate_type_and_members() {
        let outcome = scan(
            "enum E {\n  a\n  a\n}\n\nenum E {\n  b\n}\n\nstruct S {\n  x int\n  x string\n}\n",
        );
        let msgs = messages(&outcome);
        assert!(msgs.contains(&"E cannot redefine value a".to_string()));
        assert!(msgs.contains(&"type E already defined".to_string()));
        assert!(msgs.contains(&"S cannot redefine field x".to_string()));
    }

    #[test]
    fn test_extends_rules() {
        let outcome = scan(
            "enum E {\n  a\n}\n\nstruct A extends E {\n  x int\n}\n\n\
             struct B extends int {\n  x int\n}\n\nstruct C extends Nope {\n  x int\n}\n",
        );
        assert_eq!(
            messages(&outcome),
            vec![
                "A cannot extend enum E",
                "B cannot extend int",
                "C extends unknown type Nope"
            ]
        );
    }

    #[test]
    fn test_extends_on_enum_rejected() {
        let outcome = scan("struct A {\n  x int\n}\n\nenum E extends A {\n  a\n}\n");
        assert!(messages(&outcome).contains(&"extends is only supported for struct types".to_string()));
    }

    #[test]
    fn test_interface_cannot_be_a_type() {
        let outcome = scan("interface Svc {\n  get() int\n}\n\nstruct S {\n  svc Svc\n}\n");
        assert_eq!(messages(&outcome), vec!["interface Svc cannot be used as a type"]);
    }

    #[test]
    fn test_empty_block_rejected() {
        let outcome = scan("struct Empty {\n}\n");
        assert_eq!(messages(&outcome), vec!["Empty must have at least one field"]);
    }

    #[test]
    fn test_invalid_type_option() {
        let outcome = scan("struct S {\n  x int [required]\n}\n");
        assert_eq!(messages(&outcome), vec!["Invalid type option: required"]);
    }

    #[test]
    fn test_optional_param_and_return() {
        let outcome = scan("interface Svc {\n  find(id int, q string [optional]) string [optional]\n}\n");
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let Declaration::Interface(iface) = &outcome.declarations[0] else {
            panic!("expected interface");
        };
        let find = &iface.functions[0];
        assert!(!find.params[0].optional);
        assert!(find.params[1].optional);
        assert!(find.returns.as_ref().unwrap().optional);
    }

    #[test]
    fn test_unexpected_end_of_file() {
        let outcome = scan("struct S {\n  x int\n");
        assert_eq!(messages(&outcome), vec!["Unexpected end of file"]);
    }

    #[test]
    fn test_scanning_continues_after_syntax_error() {
        let outcome = scan("struct A {\n  x int\n}\n\n!\nstruct B {\n  y Missing\n}\n");
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.errors[0].line, 5);
        assert!(outcome.errors[0].message.starts_with("Unexpected character '!'"));
        assert_eq!(outcome.errors[1].message, "undefined type: Missing");
    }

    #[test]
    fn test_missing_import_reported() {
        let outcome = scan("import \"nope.idl\"\n");
        assert_eq!(messages(&outcome), vec!["Cannot find import file: nope.idl"]);
    }

    #[test]
    fn test_shared_imports_parsed_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("d.idl"), "enum Level {\n  low\n  high\n}\n").unwrap();
        fs::write(
            dir.join("c.idl"),
            "import \"d.idl\"\n\nstruct Reading {\n  level Level\n}\n",
        )
        .unwrap();
        fs::write(
            dir.join("b.idl"),
            "import \"c.idl\"\nimport \"d.idl\"\n\nstruct Sensor {\n  last Reading\n}\n",
        )
        .unwrap();
        let text = "import \"b.idl\"\nimport \"c.idl\"\n\n\
                    interface Default {\n  read(s Sensor) Reading\n}\n";
        let options = ParseOptions {
            source: Some(dir.join("a.idl")),
            ..ParseOptions::default()
        };

        let imports = ImportCache::default();
        let outcome = parse_cached(text, &options, true, &imports);
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);

        let names: Vec<&str> = outcome.declarations.iter().filter_map(|d| d.name()).collect();
        assert_eq!(names, vec!["Level", "Reading", "Sensor", "Default"]);

        let cached = imports.borrow();
        assert_eq!(cached.len(), 3);
        let reading = fs::canonicalize(dir.join("c.idl")).unwrap();
        assert_eq!(cached[&reading].declarations.len(), 2);
    }

    #[test]
    fn test_first_pass_only_skips_semantic_checks() {
        let outcome = parse_with("struct A {\n  b Missing\n}\n", &ParseOptions::default(), false);
        assert!(outcome.errors.is_empty());
        assert!(outcome.symbols.contains("A"));
    }

    #[test]
    fn test_parse_type_option() {
        assert_eq!(parse_type_option("\n"), Ok(false));
        assert_eq!(parse_type_option("[ optional ]"), Ok(true));
        assert!(parse_type_option("[x]").is_err());
    }
}
