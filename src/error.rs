//! The shared error taxonomy used across every pipeline stage and the CPU.
//!
//! Each enum corresponds to one failure domain from the specification: a
//! lexer failure never leaks into a `MemoryError`, and so on. All variants
//! carry enough context (a name, an address, a byte count) to produce a
//! human-readable message without the caller needing to reconstruct it.

use derive_more::{Display, Error, From};

/// Failures while turning source text into a token stream.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum LexError {
    #[display(fmt = "{line}:{column}: unterminated string literal")]
    UnterminatedString { line: u32, column: u32 },
    #[display(fmt = "{line}:{column}: unknown character {character:?}")]
    UnknownCharacter {
        line: u32,
        column: u32,
        character: char,
    },
}

/// Failures while turning a token stream into an AST.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ParseError {
    #[display(fmt = "{line}:{column}: unexpected token, expected {expected}")]
    UnexpectedToken {
        line: u32,
        column: u32,
        expected: String,
    },
    #[display(fmt = "{line}:{column}: malformed expression")]
    MalformedExpression { line: u32, column: u32 },
    #[display(fmt = "{line}:{column}: missing end of line")]
    MissingEol { line: u32, column: u32 },
    #[display(fmt = "{line}:{column}: expected an identifier, found keyword {keyword}")]
    KeywordAsIdentifier {
        line: u32,
        column: u32,
        keyword: String,
    },
}

/// Failures discovered while checking the AST against the opcode table.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum SemanticError {
    #[display(fmt = "{line}:{column}: undefined symbol `{name}`")]
    UndefinedSymbol { line: u32, column: u32, name: String },
    #[display(fmt = "{line}:{column}: duplicate label `{name}`")]
    DuplicateLabel { line: u32, column: u32, name: String },
    #[display(fmt = "{line}:{column}: `{mnemonic}` expects {expected} operands, found {found}")]
    ArityMismatch {
        line: u32,
        column: u32,
        mnemonic: String,
        expected: usize,
        found: usize,
    },
    #[display(fmt = "{line}:{column}: operand {index} of `{mnemonic}` has the wrong kind")]
    OperandKindMismatch {
        line: u32,
        column: u32,
        mnemonic: String,
        index: usize,
    },
    #[display(fmt = "{line}:{column}: immediate value {value} does not fit in {width} bits")]
    ImmediateTooWide {
        line: u32,
        column: u32,
        value: i64,
        width: u32,
    },
    #[display(fmt = "{line}:{column}: register `{name}` is not valid for this operation")]
    InvalidRegisterWidth {
        line: u32,
        column: u32,
        name: String,
    },
}

/// Failures discovered while resolving addresses.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ResolveError {
    #[display(fmt = "unresolved address for symbol `{name}`")]
    UnresolvedSymbol { name: String },
    #[display(fmt = "`DA` block references unresolved label `{name}`")]
    UnresolvedDataAddress { name: String },
    #[display(fmt = "duplicate symbol `{name}`")]
    DuplicateSymbol { name: String },
}

/// Failures while decoding a binary image.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ImageError {
    #[display(fmt = "image truncated: needed {needed} more byte(s), found {available}")]
    TruncatedImage { needed: usize, available: usize },
    #[display(
        fmt = "unsupported header version {major}.{minor}.{revision}, expected 1.0.0"
    )]
    UnsupportedHeaderVersion {
        major: u8,
        minor: u8,
        revision: u16,
    },
    #[display(fmt = "wrong machine: expected `Pendragon`, found `{found}`")]
    WrongMachine { found: String },
    #[display(
        fmt = "wrong machine version {major}.{minor}.{revision}, expected 1.0.0"
    )]
    WrongMachineVersion {
        major: u8,
        minor: u8,
        revision: u16,
    },
}

/// Failures from the paged virtual memory unit.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum MemoryError {
    #[display(fmt = "operation not permitted in the current mode")]
    ModeViolation,
    #[display(fmt = "write rejected: context or accessor is read-only")]
    ReadOnlyViolation,
    #[display(fmt = "address {address:#x} is out of bounds for a context of size {size:#x}")]
    OutOfBounds { address: u64, size: u64 },
    #[display(fmt = "virtual address space exhausted: requested {requested:#x} bytes")]
    Exhausted { requested: u64 },
}

/// Failures from the frame-disciplined data stack.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum StackError {
    #[display(fmt = "stack overflow: capacity {capacity} exceeded")]
    Overflow { capacity: usize },
    #[display(fmt = "stack underflow: cannot pop below the current frame")]
    Underflow,
    #[display(fmt = "return stack underflow: no active call to return from")]
    ReturnStackUnderflow,
}

/// Failures raised during fetch-decode-execute.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ExecError {
    #[display(fmt = "unknown opcode {opcode:#04x} at address {address:#06x}")]
    UnknownOpcode { opcode: u8, address: u16 },
    #[display(fmt = "unknown syscall number {number:#06x}")]
    UnknownSyscall { number: u16 },
    #[display(fmt = "division by zero")]
    DivisionByZero,
}

/// Any error the memory unit, stack, or CPU can surface during execution.
///
/// The VM aborts on the first such error (spec §7): unlike the assembler's
/// accumulated `Diagnostics`, there is no "keep going and collect more"
/// mode once the machine is actually running.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum RuntimeError {
    Memory(MemoryError),
    Stack(StackError),
    Exec(ExecError),
    Image(ImageError),
}

/// One diagnostic produced by an assembler pass.
///
/// `Display`s as `<line>:<col>: <message>` per spec §6; the caller
/// (external to this crate) prepends the source file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// An accumulated, ordered list of diagnostics from one or more passes.
///
/// The assembler pipeline never throws on the first `LexError`/
/// `ParseError`/`SemanticError`/`ResolveError`; every recoverable one is
/// pushed here and the pass continues (spec §4.4, §9).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: u32, column: u32, message: impl Into<String>) {
        self.0.push(Diagnostic::new(line, column, message));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
