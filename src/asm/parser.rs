//! The parser (spec §4.4.2): tokens in, an AST plus a symbol-table stub
//! out. Labels are inserted into the stub with an unresolved address; the
//! resolver (§4.4.5) fills addresses in later.

use crate::asm::lexer::{Keyword, RegisterToken, Token, TokenKind};
use crate::asm::symtab::{SymbolKind, SymbolTable};
use crate::error::Diagnostics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteItem {
    Byte(u8),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Define {
    Db(Vec<ByteItem>),
    Dw(Vec<i64>),
    Da(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub label: String,
    pub define: Define,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataItem {
    PageDirective(String),
    Definition(Definition),
}

/// A resolved-or-not symbol reference: `IDENT`, `IDENT[expr]`, or
/// `(IDENT (+ NUMBER|REGISTER)*)`, all collapsed to one representation —
/// a name, a constant offset, and an optional register index (spec
/// §4.5, "Addressing modes").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub name: String,
    pub const_offset: i64,
    pub register: Option<RegisterToken>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(RegisterToken),
    Immediate(i64),
    Str(String),
    Symbol(SymbolRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeItem {
    PageDirective(String),
    Label { name: String, line: u32, column: u32 },
    Instruction(Instruction),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub data: Vec<DataItem>,
    pub code: Vec<CodeItem>,
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parses the whole token stream, returning the AST, the initial
    /// symbol-table stub, and any parse diagnostics.
    pub fn parse(tokens: &'a [Token]) -> (Program, SymbolTable, Diagnostics) {
        let mut parser = Self::new(tokens);
        let mut program = Program::default();
        let mut symbols = SymbolTable::new();
        let mut diagnostics = Diagnostics::new();

        while !parser.at_eof() {
            parser.skip_blank_lines();
            if parser.at_eof() {
                break;
            }
            match parser.peek_kind() {
                TokenKind::Keyword(Keyword::Data) => {
                    parser.advance();
                    parser.expect_eol(&mut diagnostics);
                    parser.parse_data_section(&mut program, &mut symbols, &mut diagnostics);
                }
                TokenKind::Keyword(Keyword::Code) => {
                    parser.advance();
                    parser.expect_eol(&mut diagnostics);
                    parser.parse_code_section(&mut program, &mut symbols, &mut diagnostics);
                }
                TokenKind::Error(_) => {
                    parser.advance();
                }
                _ => {
                    let token = parser.current();
                    diagnostics.push(
                        token.line,
                        token.column,
                        "expected `DATA` or `CODE` section",
                    );
                    parser.advance();
                }
            }
        }

        (program, symbols, diagnostics)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn skip_blank_lines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Eol) {
            self.advance();
        }
    }

    fn expect_eol(&mut self, diagnostics: &mut Diagnostics) {
        match self.peek_kind() {
            TokenKind::Eol | TokenKind::Eof => {
                self.advance();
            }
            _ => {
                let token = self.current();
                diagnostics.push(token.line, token.column, "missing end of line");
            }
        }
    }

    fn is_section_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Keyword(Keyword::Data) | TokenKind::Keyword(Keyword::Code)
        ) || self.at_eof()
    }

    fn parse_data_section(
        &mut self,
        program: &mut Program,
        symbols: &mut SymbolTable,
        diagnostics: &mut Diagnostics,
    ) {
        loop {
            self.skip_blank_lines();
            if self.is_section_start() {
                return;
            }
            if let TokenKind::Keyword(Keyword::Page) = self.peek_kind() {
                self.advance();
                if let TokenKind::Ident(name) = self.peek_kind().clone() {
                    self.advance();
                    self.expect_eol(diagnostics);
                    program.data.push(DataItem::PageDirective(name));
                } else {
                    let token = self.current();
                    diagnostics.push(token.line, token.column, "expected page name after `PAGE`");
                    self.advance();
                }
                continue;
            }
            let Some(definition) = self.parse_definition(diagnostics) else {
                return;
            };
            symbols.insert(&definition.label, SymbolKind::Data, definition.line, definition.column, diagnostics);
            program.data.push(DataItem::Definition(definition));
        }
    }

    fn parse_definition(&mut self, diagnostics: &mut Diagnostics) -> Option<Definition> {
        let (name, line, column) = match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let token = self.current().clone();
                self.advance();
                (name, token.line, token.column)
            }
            TokenKind::Keyword(_) => {
                let token = self.current().clone();
                diagnostics.push(token.line, token.column, "keyword used where an identifier was expected");
                self.advance();
                return None;
            }
            _ => {
                let token = self.current().clone();
                diagnostics.push(token.line, token.column, "expected a label definition");
                self.advance();
                return None;
            }
        };
        if !matches!(self.peek_kind(), TokenKind::Colon) {
            diagnostics.push(line, column, "expected `:` after label name");
            return None;
        }
        self.advance();
        let define = match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::Db) => {
                self.advance();
                Define::Db(self.parse_byte_list(diagnostics))
            }
            TokenKind::Keyword(Keyword::Dw) => {
                self.advance();
                Define::Dw(self.parse_number_list(diagnostics))
            }
            TokenKind::Keyword(Keyword::Da) => {
                self.advance();
                Define::Da(self.parse_label_list(diagnostics))
            }
            _ => {
                let token = self.current();
                diagnostics.push(token.line, token.column, "expected `DB`, `DW`, or `DA`");
                return None;
            }
        };
        self.expect_eol(diagnostics);
        Some(Definition {
            label: name,
            define,
            line,
            column,
        })
    }

    fn parse_byte_list(&mut self, diagnostics: &mut Diagnostics) -> Vec<ByteItem> {
        let mut items = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Number(value) => {
                    self.advance();
                    items.push(ByteItem::Byte((value & 0xFF) as u8));
                }
                TokenKind::Str(value) => {
                    self.advance();
                    items.push(ByteItem::Str(value));
                }
                _ => {
                    let token = self.current();
                    diagnostics.push(token.line, token.column, "expected a byte value or string");
                    break;
                }
            }
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        items
    }

    fn parse_number_list(&mut self, diagnostics: &mut Diagnostics) -> Vec<i64> {
        let mut items = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Number(value) => {
                    self.advance();
                    items.push(value);
                }
                _ => {
                    let token = self.current();
                    diagnostics.push(token.line, token.column, "expected a word value");
                    break;
                }
            }
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        items
    }

    fn parse_label_list(&mut self, diagnostics: &mut Diagnostics) -> Vec<String> {
        let mut items = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    items.push(name);
                }
                _ => {
                    let token = self.current();
                    diagnostics.push(token.line, token.column, "expected a label name");
                    break;
                }
            }
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        items
    }

    fn parse_code_section(
        &mut self,
        program: &mut Program,
        symbols: &mut SymbolTable,
        diagnostics: &mut Diagnostics,
    ) {
        loop {
            self.skip_blank_lines();
            if self.is_section_start() {
                return;
            }
            if let TokenKind::Keyword(Keyword::Page) = self.peek_kind() {
                self.advance();
                if let TokenKind::Ident(name) = self.peek_kind().clone() {
                    self.advance();
                    self.expect_eol(diagnostics);
                    program.code.push(CodeItem::PageDirective(name));
                } else {
                    let token = self.current();
                    diagnostics.push(token.line, token.column, "expected page name after `PAGE`");
                    self.advance();
                }
                continue;
            }

            // Disambiguate `label:` from `MNEMONIC operand, ...` by
            // looking one token ahead for a colon.
            if let TokenKind::Ident(name) = self.peek_kind().clone() {
                if matches!(self.peek_at(1), Some(TokenKind::Colon)) {
                    let token = self.current().clone();
                    self.advance();
                    self.advance();
                    self.expect_eol(diagnostics);
                    symbols.insert(&name, SymbolKind::Label, token.line, token.column, diagnostics);
                    program.code.push(CodeItem::Label {
                        name,
                        line: token.line,
                        column: token.column,
                    });
                    continue;
                }
            }

            if let Some(instruction) = self.parse_instruction(diagnostics) {
                program.code.push(CodeItem::Instruction(instruction));
            } else {
                return;
            }
        }
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn parse_instruction(&mut self, diagnostics: &mut Diagnostics) -> Option<Instruction> {
        let (mnemonic, line, column) = match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let token = self.current().clone();
                self.advance();
                (name, token.line, token.column)
            }
            TokenKind::Error(_) => {
                self.advance();
                return None;
            }
            _ => {
                let token = self.current().clone();
                diagnostics.push(token.line, token.column, "expected an instruction mnemonic");
                self.advance();
                return None;
            }
        };

        let mut operands = Vec::new();
        if !matches!(self.peek_kind(), TokenKind::Eol | TokenKind::Eof) {
            loop {
                match self.parse_operand(diagnostics) {
                    Some(operand) => operands.push(operand),
                    None => break,
                }
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_eol(diagnostics);
        Some(Instruction {
            mnemonic,
            operands,
            line,
            column,
        })
    }

    fn parse_operand(&mut self, diagnostics: &mut Diagnostics) -> Option<Operand> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Register(register) => {
                self.advance();
                Some(Operand::Register(register))
            }
            TokenKind::Number(value) => {
                self.advance();
                Some(Operand::Immediate(value))
            }
            TokenKind::Str(value) => {
                self.advance();
                Some(Operand::Str(value))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if matches!(self.peek_kind(), TokenKind::LBracket) {
                    self.advance();
                    let (const_offset, register) = self.parse_index_expr(diagnostics);
                    if matches!(self.peek_kind(), TokenKind::RBracket) {
                        self.advance();
                    } else {
                        diagnostics.push(token.line, token.column, "unterminated `[`");
                    }
                    Some(Operand::Symbol(SymbolRef {
                        name,
                        const_offset,
                        register,
                        line: token.line,
                        column: token.column,
                    }))
                } else {
                    Some(Operand::Symbol(SymbolRef {
                        name,
                        const_offset: 0,
                        register: None,
                        line: token.line,
                        column: token.column,
                    }))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let name = match self.peek_kind().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        name
                    }
                    _ => {
                        diagnostics.push(token.line, token.column, "expected a symbol inside `(...)`");
                        return None;
                    }
                };
                let mut const_offset = 0_i64;
                let mut register = None;
                while matches!(self.peek_kind(), TokenKind::Plus) {
                    self.advance();
                    match self.peek_kind().clone() {
                        TokenKind::Number(value) => {
                            self.advance();
                            const_offset += value;
                        }
                        TokenKind::Register(reg) => {
                            self.advance();
                            register = Some(reg);
                        }
                        _ => {
                            diagnostics.push(token.line, token.column, "expected a number or register after `+`");
                            break;
                        }
                    }
                }
                if matches!(self.peek_kind(), TokenKind::RParen) {
                    self.advance();
                } else {
                    diagnostics.push(token.line, token.column, "unterminated `(`");
                }
                Some(Operand::Symbol(SymbolRef {
                    name,
                    const_offset,
                    register,
                    line: token.line,
                    column: token.column,
                }))
            }
            TokenKind::Error(_) => {
                self.advance();
                None
            }
            _ => {
                diagnostics.push(token.line, token.column, "unexpected token in operand position");
                self.advance();
                None
            }
        }
    }

    /// Parses the contents of `[...]` sugar: a bare `NUMBER` or
    /// `REGISTER`, desugaring to the same representation as `(label +
    /// expr)`.
    fn parse_index_expr(&mut self, diagnostics: &mut Diagnostics) -> (i64, Option<RegisterToken>) {
        match self.peek_kind().clone() {
            TokenKind::Number(value) => {
                self.advance();
                (value, None)
            }
            TokenKind::Register(register) => {
                self.advance();
                (0, Some(register))
            }
            _ => {
                let token = self.current();
                diagnostics.push(token.line, token.column, "expected a number or register inside `[...]`");
                (0, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::{Lexer, Register};

    fn parse(source: &str) -> (Program, SymbolTable, Diagnostics) {
        let (tokens, lex_diagnostics) = Lexer::tokenize(source);
        assert!(lex_diagnostics.is_empty(), "{lex_diagnostics:?}");
        Parser::parse(&tokens)
    }

    #[test]
    fn parses_data_section_with_db_dw_da() {
        let (program, symbols, diagnostics) = parse(
            "DATA\nmsg: DB \"hi\", 0\ncount: DW 42\ntable: DA msg, count\nCODE\n",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(program.data.len(), 3);
        assert!(symbols.contains("msg"));
        assert!(symbols.contains("count"));
        assert!(symbols.contains("table"));
        match &program.data[0] {
            DataItem::Definition(def) => assert_eq!(
                def.define,
                Define::Db(vec![ByteItem::Str("hi".to_string()), ByteItem::Byte(0)])
            ),
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn parses_labels_and_instructions_in_code_section() {
        let (program, symbols, diagnostics) = parse("CODE\nstart:\nMOV AX, 1\nHALT\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert!(symbols.contains("start"));
        assert_eq!(program.code.len(), 3);
        match &program.code[1] {
            CodeItem::Instruction(instr) => {
                assert_eq!(instr.mnemonic, "MOV");
                assert_eq!(
                    instr.operands[0],
                    Operand::Register(RegisterToken {
                        register: Register::Ax,
                        half: None
                    })
                );
                assert_eq!(instr.operands[1], Operand::Immediate(1));
            }
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn bracket_sugar_desugars_like_paren_form() {
        let (program, _, diagnostics) = parse("CODE\nMOV AX, buf[4]\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        match &program.code[0] {
            CodeItem::Instruction(instr) => match &instr.operands[1] {
                Operand::Symbol(symbol) => {
                    assert_eq!(symbol.name, "buf");
                    assert_eq!(symbol.const_offset, 4);
                    assert_eq!(symbol.register, None);
                }
                other => panic!("unexpected operand {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn paren_form_accumulates_constant_and_register() {
        let (program, _, diagnostics) = parse("CODE\nMOV AX, (buf + 4 + BX)\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        match &program.code[0] {
            CodeItem::Instruction(instr) => match &instr.operands[1] {
                Operand::Symbol(symbol) => {
                    assert_eq!(symbol.name, "buf");
                    assert_eq!(symbol.const_offset, 4);
                    assert_eq!(
                        symbol.register,
                        Some(RegisterToken {
                            register: Register::Bx,
                            half: None
                        })
                    );
                }
                other => panic!("unexpected operand {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn page_directive_is_recorded_in_both_sections() {
        let (program, _, diagnostics) = parse("DATA\nPAGE one\nCODE\nPAGE two\nHALT\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(program.data[0], DataItem::PageDirective("one".to_string()));
        assert_eq!(program.code[0], CodeItem::PageDirective("two".to_string()));
    }

    #[test]
    fn duplicate_label_is_reported_but_parsing_continues() {
        let (program, _, diagnostics) = parse("CODE\na:\na:\nHALT\n");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(program.code.len(), 3);
    }
}
