//! Table-driven scanner for the IDL.
//!
//! Every scanning state owns an ordered list of `(pattern, action)` rules.
//! At each position the longest matching rule wins, ties going to the rule
//! listed first. The lexer itself holds no parse state: the caller passes
//! the current state in and applies the returned action.

use regex::Regex;
use std::sync::LazyLock;

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?").unwrap()
});

static ARRAY_IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\][A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?").unwrap()
});

static TYPE_OPTS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[[^{}\]\n]*\]").unwrap());

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^namespace[ \t]*[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?").unwrap()
});

static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^import[ \t]*"[^"\r\n]*""#).unwrap());

/// Named scanning states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexState {
    TopLevel,
    EndOfLine,
    StructStart,
    EnumStart,
    InterfaceStart,
    StartBlock,
    Extends,
    Fields,
    Field,
    Functions,
    FunctionStart,
    Params,
    Param,
    EndParam,
    FunctionReturn,
    TypeOpts,
    Values,
    Comment,
}

impl LexState {
    pub fn name(&self) -> &'static str {
        match self {
            LexState::TopLevel => "top-level",
            LexState::EndOfLine => "end-of-line",
            LexState::StructStart => "struct-start",
            LexState::EnumStart => "enum-start",
            LexState::InterfaceStart => "interface-start",
            LexState::StartBlock => "start-block",
            LexState::Extends => "extends",
            LexState::Fields => "fields",
            LexState::Field => "field",
            LexState::Functions => "functions",
            LexState::FunctionStart => "function-start",
            LexState::Params => "params",
            LexState::Param => "param",
            LexState::EndParam => "end-param",
            LexState::FunctionReturn => "function-return",
            LexState::TypeOpts => "type-opts",
            LexState::Values => "values",
            LexState::Comment => "comment",
        }
    }

    fn rules(&self) -> &'static [Rule] {
        match self {
            LexState::TopLevel => TOP_LEVEL,
            LexState::EndOfLine => END_OF_LINE,
            LexState::StructStart => STRUCT_START,
            LexState::EnumStart => ENUM_START,
            LexState::InterfaceStart => INTERFACE_START,
            LexState::StartBlock => START_BLOCK,
            LexState::Extends => EXTENDS,
            LexState::Fields => FIELDS,
            LexState::Field => FIELD,
            LexState::Functions => FUNCTIONS,
            LexState::FunctionStart => FUNCTION_START,
            LexState::Params => PARAMS,
            LexState::Param => PARAM,
            LexState::EndParam => END_PARAM,
            LexState::FunctionReturn => FUNCTION_RETURN,
            LexState::TypeOpts => TYPE_OPTS,
            LexState::Values => VALUES,
            LexState::Comment => COMMENT,
        }
    }
}

/// Lexical patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Literal(&'static str),
    /// One of space, tab, CR or LF.
    Space,
    /// `Name` or `ns.Name`.
    Ident,
    /// `[]Name`.
    ArrayIdent,
    /// `[...]` type options.
    TypeOpts,
    Namespace,
    Import,
    /// Everything up to, not including, the next newline.
    RestOfLine,
    AnyChar,
}

impl Pattern {
    /// Length in bytes of the match at the start of `rest`.
    pub fn match_len(&self, rest: &str) -> Option<usize> {
        let len = match self {
            Pattern::Literal(lit) => rest.starts_with(lit).then_some(lit.len()),
            Pattern::Space => rest
                .chars()
                .next()
                .filter(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
                .map(|_| 1),
            Pattern::Ident => IDENT_RE.find(rest).map(|m| m.end()),
            Pattern::ArrayIdent => ARRAY_IDENT_RE.find(rest).map(|m| m.end()),
            Pattern::TypeOpts => TYPE_OPTS_RE.find(rest).map(|m| m.end()),
            Pattern::Namespace => NAMESPACE_RE.find(rest).map(|m| m.end()),
            Pattern::Import => IMPORT_RE.find(rest).map(|m| m.end()),
            Pattern::RestOfLine => Some(rest.find('\n').unwrap_or(rest.len())),
            Pattern::AnyChar => rest.chars().next().map(char::len_utf8),
        };
        len.filter(|n| *n > 0)
    }
}

/// Parser hooks a rule can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    CommentBlock,
    Namespace,
    Import,
    EndOfLine,
    BeginStruct,
    BeginEnum,
    BeginInterface,
    StartBlock,
    EndExtends,
    EndBlock,
    BeginField,
    EndField,
    BeginFunction,
    BeginParam,
    EndParam,
    ParamOpts,
    EndReturn,
    EndTypeOpts,
    EndValue,
    StartComment,
    AppendComment,
    EndComment,
}

/// What to do with a matched token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ignore,
    Begin(LexState),
    Call(Callback),
    Fail(&'static str),
}

pub type Rule = (Pattern, Action);

use Action::{Begin, Call, Fail, Ignore};
use Pattern::{AnyChar, ArrayIdent, Ident, Literal, RestOfLine, Space};

const TOP_LEVEL: &[Rule] = &[
    (Literal("\n"), Call(Callback::CommentBlock)),
    (Space, Ignore),
    (Pattern::Namespace, Call(Callback::Namespace)),
    (Pattern::Import, Call(Callback::Import)),
    (Literal("struct "), Begin(LexState::StructStart)),
    (Literal("enum "), Begin(LexState::EnumStart)),
    (Literal("interface "), Begin(LexState::InterfaceStart)),
    (Literal("// "), Call(Callback::StartComment)),
    (Literal("//"), Call(Callback::StartComment)),
];

const END_OF_LINE: &[Rule] = &[
    (Literal("\r\n"), Call(Callback::EndOfLine)),
    (Literal("\n"), Call(Callback::EndOfLine)),
    (Space, Ignore),
    (AnyChar, Fail("Illegal character - expected end of line")),
];

const STRUCT_START: &[Rule] = &[
    (Ident, Call(Callback::BeginStruct)),
    (Space, Ignore),
    (AnyChar, Fail("Missing identifier")),
];

const ENUM_START: &[Rule] = &[
    (Ident, Call(Callback::BeginEnum)),
    (Space, Ignore),
    (AnyChar, Fail("Missing identifier")),
];

const INTERFACE_START: &[Rule] = &[
    (Ident, Call(Callback::BeginInterface)),
    (Space, Ignore),
    (AnyChar, Fail("Missing identifier")),
];

const START_BLOCK: &[Rule] = &[
    (Space, Ignore),
    (Literal("extends"), Begin(LexState::Extends)),
    (Literal("{"), Call(Callback::StartBlock)),
];

const EXTENDS: &[Rule] = &[
    (Space, Ignore),
    (Ident, Call(Callback::EndExtends)),
    (Literal("{"), Call(Callback::StartBlock)),
];

const FIELDS: &[Rule] = &[
    (Ident, Call(Callback::BeginField)),
    (Space, Ignore),
    (Literal("// "), Call(Callback::StartComment)),
    (Literal("//"), Call(Callback::StartComment)),
    (Literal("{"), Fail("Unexpected '{' in struct body")),
    (Literal("}"), Call(Callback::EndBlock)),
];

const FIELD: &[Rule] = &[
    (Ident, Call(Callback::EndField)),
    (ArrayIdent, Call(Callback::EndField)),
    (Literal("\n"), Fail("Missing field type")),
    (Space, Ignore),
    (Literal("{"), Fail("Unexpected '{' in field")),
    (Literal("}"), Fail("Missing field type")),
];

const FUNCTIONS: &[Rule] = &[
    (Ident, Call(Callback::BeginFunction)),
    (Space, Ignore),
    (Literal("// "), Call(Callback::StartComment)),
    (Literal("//"), Call(Callback::StartComment)),
    (Literal("{"), Fail("Unexpected '{' in interface body")),
    (Literal("}"), Call(Callback::EndBlock)),
];

const FUNCTION_START: &[Rule] = &[
    (Literal("("), Begin(LexState::Params)),
    (Literal("\n"), Fail("Missing parameter list")),
    (Space, Ignore),
];

const PARAMS: &[Rule] = &[
    (Ident, Call(Callback::BeginParam)),
    (Space, Ignore),
    (Literal(")"), Begin(LexState::FunctionReturn)),
];

const PARAM: &[Rule] = &[
    (Ident, Call(Callback::EndParam)),
    (ArrayIdent, Call(Callback::EndParam)),
    (Space, Ignore),
];

const END_PARAM: &[Rule] = &[
    (Space, Ignore),
    (Literal(","), Begin(LexState::Params)),
    (Literal(")"), Begin(LexState::FunctionReturn)),
    (Pattern::TypeOpts, Call(Callback::ParamOpts)),
];

const FUNCTION_RETURN: &[Rule] = &[
    (Literal("\r\n"), Call(Callback::EndReturn)),
    (Literal("\n"), Call(Callback::EndReturn)),
    (Space, Ignore),
    (Ident, Call(Callback::EndReturn)),
    (ArrayIdent, Call(Callback::EndReturn)),
];

const TYPE_OPTS: &[Rule] = &[
    (Pattern::TypeOpts, Call(Callback::EndTypeOpts)),
    (Literal("\n"), Call(Callback::EndTypeOpts)),
    (Literal("}"), Call(Callback::EndBlock)),
    (Space, Ignore),
    (Literal("{"), Fail("Unexpected '{' after type")),
];

const VALUES: &[Rule] = &[
    (Ident, Call(Callback::EndValue)),
    (Space, Ignore),
    (Literal("// "), Call(Callback::StartComment)),
    (Literal("//"), Call(Callback::StartComment)),
    (Literal("{"), Fail("Unexpected '{' in enum body")),
    (Literal("}"), Call(Callback::EndBlock)),
];

const COMMENT: &[Rule] = &[
    (Literal("\n"), Call(Callback::EndComment)),
    (RestOfLine, Call(Callback::AppendComment)),
];

/// One scanning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Matched {
        text: &'a str,
        line: usize,
        action: Action,
    },
    /// No rule of the current state matched this character.
    Unrecognized { ch: char, line: usize },
}

/// Position-tracking scanner over IDL source text.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
        }
    }

    /// Current line number, starting at 1.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Scan the next token using the rules of `state`, `None` at end of input.
    ///
    /// An unrecognized character is consumed so scanning can continue.
    pub fn next_token(&mut self, state: LexState) -> Option<Token<'a>> {
        let rest = &self.input[self.pos..];
        let ch = rest.chars().next()?;
        let line = self.line;

        let mut best: Option<(usize, Action)> = None;
        for (pattern, action) in state.rules() {
            if let Some(len) = pattern.match_len(rest) {
                if best.map_or(true, |(best_len, _)| len > best_len) {
                    best = Some((len, *action));
                }
            }
        }

        match best {
            Some((len, action)) => {
                let text = &rest[..len];
                self.advance(text);
                Some(Token::Matched { text, line, action })
            }
            None => {
                self.advance(&rest[..ch.len_utf8()]);
                Some(Token::Unrecognized { ch, line })
            }
        }
    }

    fn advance(&mut self, text: &str) {
        self.pos += text.len();
        self.line += text.matches('\n').count();
    }
}
