//! Code-graph construction (spec §4.4.4): lowers the AST into data
//! blocks and code nodes, ready for the resolver to assign addresses.
//!
//! `PAGE name` directives are organizational only — the specification's
//! resolver pass (§4.4.5) lays out data and code purely by insertion
//! order and size, with no mention of pages shifting offsets, so a
//! directive here contributes nothing to either segment. It is kept in
//! the graph as a marker node so a future page-aware backend has
//! somewhere to hang behavior, but today it is inert.

use crate::asm::lexer::{Half, Register, RegisterToken};
use crate::asm::parser::{ByteItem, CodeItem, DataItem, Define, Operand, Program};
use crate::cpu::opcode::{self, Opcode};
use crate::cpu::registers::RegisterCode;
use crate::error::Diagnostics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub label: String,
    pub payload: Vec<u8>,
    /// `(byte offset into payload, referenced label)` pairs the resolver
    /// patches during the address-array fixup sub-pass. Only `DA` blocks
    /// populate this.
    pub address_refs: Vec<(usize, String)>,
    pub address: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedOperand {
    Register(RegisterCode),
    Immediate8(u8),
    Immediate16(u16),
    /// Unresolved until the resolver's operand-resolution sub-pass.
    Symbol {
        name: String,
        const_offset: i64,
        register: Option<RegisterCode>,
        resolved: Option<u16>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionNode {
    pub mnemonic: String,
    pub opcode: Opcode,
    pub operands: Vec<EncodedOperand>,
    pub size: usize,
    pub address: Option<u32>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeNode {
    Label {
        name: String,
        address: Option<u32>,
    },
    Instruction(InstructionNode),
    PageMarker(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeGraph {
    pub data_blocks: Vec<DataBlock>,
    pub code_nodes: Vec<CodeNode>,
}

fn register_code(token: RegisterToken) -> RegisterCode {
    match (token.register, token.half) {
        (Register::Ax, None) => RegisterCode::Ax,
        (Register::Bx, None) => RegisterCode::Bx,
        (Register::Cx, None) => RegisterCode::Cx,
        (Register::Dx, None) => RegisterCode::Dx,
        (Register::Ex, None) => RegisterCode::Ex,
        (Register::Ax, Some(Half::High)) => RegisterCode::Ah,
        (Register::Ax, Some(Half::Low)) => RegisterCode::Al,
        (Register::Bx, Some(Half::High)) => RegisterCode::Bh,
        (Register::Bx, Some(Half::Low)) => RegisterCode::Bl,
        (Register::Cx, Some(Half::High)) => RegisterCode::Ch,
        (Register::Cx, Some(Half::Low)) => RegisterCode::Cl,
        (Register::Dx, Some(Half::High)) => RegisterCode::Dh,
        (Register::Dx, Some(Half::Low)) => RegisterCode::Dl,
        (Register::Ex, Some(Half::High)) => RegisterCode::Eh,
        (Register::Ex, Some(Half::Low)) => RegisterCode::El,
    }
}

fn build_data_block(label: &str, define: &Define) -> DataBlock {
    match define {
        Define::Db(items) => {
            let mut payload = Vec::new();
            for item in items {
                match item {
                    ByteItem::Byte(byte) => payload.push(*byte),
                    ByteItem::Str(text) => payload.extend(text.bytes()),
                }
            }
            DataBlock {
                label: label.to_string(),
                payload,
                address_refs: Vec::new(),
                address: None,
            }
        }
        Define::Dw(words) => {
            let mut payload = Vec::with_capacity(words.len() * 2);
            for word in words {
                payload.extend_from_slice(&(*word as u16).to_le_bytes());
            }
            DataBlock {
                label: label.to_string(),
                payload,
                address_refs: Vec::new(),
                address: None,
            }
        }
        Define::Da(labels) => {
            let mut payload = vec![0_u8; labels.len() * 2];
            let address_refs = labels
                .iter()
                .enumerate()
                .map(|(index, name)| (index * 2, name.clone()))
                .collect();
            DataBlock {
                label: label.to_string(),
                payload,
                address_refs,
                address: None,
            }
        }
    }
}

fn build_instruction(
    mnemonic: &str,
    operands: &[Operand],
    line: u32,
    column: u32,
    diagnostics: &mut Diagnostics,
) -> Option<InstructionNode> {
    let descriptor = opcode::lookup(mnemonic)?;
    let mut encoded = Vec::with_capacity(operands.len());
    for operand in operands {
        encoded.push(match operand {
            Operand::Register(token) => EncodedOperand::Register(register_code(*token)),
            Operand::Immediate(value) => {
                if descriptor
                    .operands
                    .get(encoded.len())
                    .is_some_and(|slot| *slot == crate::cpu::opcode::OperandSlot::Immediate8)
                {
                    EncodedOperand::Immediate8((*value & 0xFF) as u8)
                } else {
                    EncodedOperand::Immediate16((*value & 0xFFFF) as u16)
                }
            }
            Operand::Str(text) => {
                let byte = text.bytes().next().unwrap_or(0);
                EncodedOperand::Immediate8(byte)
            }
            Operand::Symbol(symbol) => {
                if symbol.register.is_some() {
                    diagnostics.push(
                        symbol.line,
                        symbol.column,
                        format!(
                            "register-offset addressing `({}+ register)` is not yet lowered; use a constant offset",
                            symbol.name
                        ),
                    );
                }
                EncodedOperand::Symbol {
                    name: symbol.name.clone(),
                    const_offset: symbol.const_offset,
                    register: symbol.register.map(register_code),
                    resolved: None,
                }
            }
        });
    }

    if encoded.len() != descriptor.operands.len() {
        diagnostics.push(
            line,
            column,
            format!(
                "`{mnemonic}` expects {} operand(s), found {}",
                descriptor.operands.len(),
                encoded.len()
            ),
        );
    }

    Some(InstructionNode {
        mnemonic: mnemonic.to_string(),
        opcode: descriptor.opcode,
        operands: encoded,
        size: opcode::encoded_len(descriptor),
        address: None,
        line,
        column,
    })
}

/// Lowers a parsed program into a code graph. Assumes `program` already
/// passed semantic analysis — an instruction whose mnemonic is not in
/// the opcode table is silently skipped here (semantic analysis is
/// where that is reported).
pub fn build(program: &Program) -> (CodeGraph, Diagnostics) {
    let mut graph = CodeGraph::default();
    let mut diagnostics = Diagnostics::new();

    for item in &program.data {
        match item {
            DataItem::PageDirective(name) => graph.code_nodes.push(CodeNode::PageMarker(name.clone())),
            DataItem::Definition(def) => {
                graph.data_blocks.push(build_data_block(&def.label, &def.define));
            }
        }
    }

    for item in &program.code {
        match item {
            CodeItem::PageDirective(name) => graph.code_nodes.push(CodeNode::PageMarker(name.clone())),
            CodeItem::Label { name, .. } => graph.code_nodes.push(CodeNode::Label {
                name: name.clone(),
                address: None,
            }),
            CodeItem::Instruction(instr) => {
                if let Some(node) = build_instruction(
                    &instr.mnemonic,
                    &instr.operands,
                    instr.line,
                    instr.column,
                    &mut diagnostics,
                ) {
                    graph.code_nodes.push(CodeNode::Instruction(node));
                }
            }
        }
    }

    (graph, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::Lexer;
    use crate::asm::parser::Parser;

    fn build_source(source: &str) -> CodeGraph {
        let (tokens, _) = Lexer::tokenize(source);
        let (program, _, _) = Parser::parse(&tokens);
        build(&program).0
    }

    #[test]
    fn db_with_string_and_byte_concatenates_bytes() {
        let graph = build_source("DATA\nmsg: DB \"hi\", 0\nCODE\nHALT\n");
        assert_eq!(graph.data_blocks[0].payload, vec![b'h', b'i', 0]);
    }

    #[test]
    fn dw_encodes_little_endian_words() {
        let graph = build_source("DATA\nvals: DW 0x1234\nCODE\nHALT\n");
        assert_eq!(graph.data_blocks[0].payload, vec![0x34, 0x12]);
    }

    #[test]
    fn da_reserves_placeholder_slots_and_records_fixups() {
        let graph = build_source("DATA\na: DB 1\nb: DB 2\ntable: DA a, b\nCODE\nHALT\n");
        let table = &graph.data_blocks[2];
        assert_eq!(table.payload, vec![0, 0, 0, 0]);
        assert_eq!(
            table.address_refs,
            vec![(0, "a".to_string()), (2, "b".to_string())]
        );
    }

    #[test]
    fn instruction_size_matches_descriptor() {
        let graph = build_source("CODE\nLD AX, 5\nHALT\n");
        match &graph.code_nodes[0] {
            CodeNode::Instruction(node) => assert_eq!(node.size, 1 + 1 + 2),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn labels_are_zero_size_nodes() {
        let graph = build_source("CODE\nstart:\nHALT\n");
        assert!(matches!(graph.code_nodes[0], CodeNode::Label { .. }));
    }
}
