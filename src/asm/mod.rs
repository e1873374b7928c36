//! The assembler pipeline (spec §4.4): lex → parse → semantic analysis →
//! code-graph construction → address resolution → binary emission.
//!
//! Every stage accumulates into one running [`Diagnostics`] list rather
//! than aborting on the first problem (spec §4.4, §9): a source file
//! with three undefined symbols gets three diagnostics in one run, not
//! one-at-a-time across three invocations.

pub mod codegraph;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod semantic;
pub mod symtab;

use crate::cpu::registers::RegisterCode;
use crate::error::Diagnostics;
use codegraph::{CodeGraph, CodeNode, EncodedOperand};

/// The fully assembled output: the binary segments ready for
/// [`crate::image::write`], plus every diagnostic collected along the
/// way. `data`/`code` are only meaningful when `diagnostics.is_empty()`
/// — the specification's policy is "no output on any failure" (§7).
pub struct Assembled {
    pub data: Vec<u8>,
    pub code: Vec<u8>,
    pub diagnostics: Diagnostics,
}

/// Runs the complete pipeline over `source`.
pub fn assemble(source: &str) -> Assembled {
    let mut diagnostics = Diagnostics::new();

    let (tokens, lex_diagnostics) = lexer::Lexer::tokenize(source);
    diagnostics.extend(lex_diagnostics);

    let (program, mut symbols, parse_diagnostics) = parser::Parser::parse(&tokens);
    diagnostics.extend(parse_diagnostics);

    diagnostics.extend(semantic::analyze(&program, &symbols));

    let (mut graph, codegraph_diagnostics) = codegraph::build(&program);
    diagnostics.extend(codegraph_diagnostics);

    diagnostics.extend(resolver::resolve(&mut graph, &mut symbols));

    if !diagnostics.is_empty() {
        return Assembled {
            data: Vec::new(),
            code: Vec::new(),
            diagnostics,
        };
    }

    Assembled {
        data: emit_data(&graph),
        code: emit_code(&graph),
        diagnostics,
    }
}

fn emit_data(graph: &CodeGraph) -> Vec<u8> {
    let mut out = Vec::new();
    for block in &graph.data_blocks {
        out.extend_from_slice(&block.payload);
    }
    out
}

fn register_byte(code: RegisterCode) -> u8 {
    code.to_byte()
}

fn emit_code(graph: &CodeGraph) -> Vec<u8> {
    let mut out = Vec::new();
    for node in &graph.code_nodes {
        let CodeNode::Instruction(instr) = node else {
            continue;
        };
        out.push(instr.opcode as u8);
        for operand in &instr.operands {
            match operand {
                EncodedOperand::Register(code) => out.push(register_byte(*code)),
                EncodedOperand::Immediate8(byte) => out.push(*byte),
                EncodedOperand::Immediate16(word) => out.extend_from_slice(&word.to_le_bytes()),
                EncodedOperand::Symbol { resolved, .. } => {
                    out.extend_from_slice(&resolved.unwrap_or(0).to_le_bytes());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_world_assembles_with_no_diagnostics() {
        let source = r#"
CODE
PUSHB '!'
PUSHB 'd'
PUSHB 'l'
PUSHB 'r'
PUSHB 'o'
PUSHB 'W'
PUSHB ' '
PUSHB ','
PUSHB 'o'
PUSHB 'l'
PUSHB 'l'
PUSHB 'e'
PUSHB 'H'
PUSHW 13
SYSCALL 0x0011
HALT
"#;
        let assembled = assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
        assert!(!assembled.code.is_empty());
    }

    #[test]
    fn countdown_loop_resolves_backward_jump() {
        let source = "CODE\nLD AX, 5\nloop:\nDEC AX\nJPNZ loop\nHALT\n";
        let assembled = assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
    }

    #[test]
    fn diagnostics_accumulate_across_passes_instead_of_stopping_at_first() {
        let source = "CODE\nJMP missing_one\nJMP missing_two\n";
        let assembled = assemble(source);
        assert_eq!(assembled.diagnostics.len(), 2);
        assert!(assembled.code.is_empty());
    }

    #[test]
    fn data_array_fixup_end_to_end() {
        let source = "DATA\na: DW 0\nb: DW 0\nc: DW 0\ntable: DA a, b, c\nCODE\nHALT\n";
        let assembled = assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
        // a, b, c at data addresses 0x0000, 0x0002, 0x0004.
        assert_eq!(&assembled.data[6..12], &[0x00, 0x00, 0x02, 0x00, 0x04, 0x00]);
    }
}
