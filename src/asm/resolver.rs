//! The address resolver (spec §4.4.5): four sub-passes over an already
//! built code graph. Each is a small, independently testable method so
//! the "data addresses" rule and the "DA fixup" rule, say, can be
//! checked in isolation.

use crate::asm::codegraph::{CodeGraph, CodeNode, EncodedOperand};
use crate::asm::symtab::SymbolTable;
use crate::error::{Diagnostics, ResolveError};

/// Runs all four sub-passes in order, mutating `graph`'s addresses and
/// `symbols`' resolved addresses in place. Resolution is idempotent
/// (spec §8): running it again on an already-resolved graph recomputes
/// identical addresses, since every pass only depends on block/node
/// order and size, never on a prior run's output.
pub fn resolve(graph: &mut CodeGraph, symbols: &mut SymbolTable) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    assign_data_addresses(graph, symbols);
    fixup_address_arrays(graph, symbols, &mut diagnostics);
    assign_code_addresses(graph, symbols);
    resolve_operands(graph, symbols, &mut diagnostics);
    diagnostics
}

/// Sub-pass 1: data blocks are laid out back-to-back in insertion order,
/// starting at address 0.
fn assign_data_addresses(graph: &mut CodeGraph, symbols: &mut SymbolTable) {
    let mut cursor: u32 = 0;
    for block in &mut graph.data_blocks {
        block.address = Some(cursor);
        symbols.set_address(&block.label, cursor);
        cursor += block.payload.len() as u32;
    }
}

/// Sub-pass 2: every `DA` block's placeholder slots are patched with the
/// now-known data address of each label it references.
fn fixup_address_arrays(graph: &mut CodeGraph, symbols: &SymbolTable, diagnostics: &mut Diagnostics) {
    for block in &mut graph.data_blocks {
        for (offset, name) in &block.address_refs {
            match symbols.get(name).and_then(|symbol| symbol.address) {
                Some(address) => {
                    let bytes = (address as u16).to_le_bytes();
                    block.payload[*offset] = bytes[0];
                    block.payload[*offset + 1] = bytes[1];
                }
                None => diagnostics.push(
                    0,
                    0,
                    ResolveError::UnresolvedDataAddress { name: name.clone() }.to_string(),
                ),
            }
        }
    }
}

/// Sub-pass 3: code space is independent of data space and also starts
/// at 0. Labels take the address of the next instruction but do not
/// themselves advance the cursor; page markers are likewise zero-size.
fn assign_code_addresses(graph: &mut CodeGraph, symbols: &mut SymbolTable) {
    let mut cursor: u32 = 0;
    for node in &mut graph.code_nodes {
        match node {
            CodeNode::Label { name, address } => {
                *address = Some(cursor);
                symbols.set_address(name, cursor);
            }
            CodeNode::Instruction(instr) => {
                instr.address = Some(cursor);
                cursor += instr.size as u32;
            }
            CodeNode::PageMarker(_) => {}
        }
    }
}

/// Sub-pass 4: every `address`/`expression` operand is resolved to a
/// concrete 16-bit value — the symbol's address plus its constant
/// offset. A register-offset component (spec §4.5) is left on the
/// operand for the CPU/lowering stage to combine at execution time;
/// here only the base address is made concrete.
fn resolve_operands(graph: &mut CodeGraph, symbols: &SymbolTable, diagnostics: &mut Diagnostics) {
    for node in &mut graph.code_nodes {
        let CodeNode::Instruction(instr) = node else {
            continue;
        };
        for operand in &mut instr.operands {
            let EncodedOperand::Symbol {
                name,
                const_offset,
                resolved,
                ..
            } = operand
            else {
                continue;
            };
            match symbols.get(name).and_then(|symbol| symbol.address) {
                Some(address) => {
                    let value = (address as i64 + *const_offset) as u16;
                    *resolved = Some(value);
                }
                None => diagnostics.push(
                    instr.line,
                    instr.column,
                    ResolveError::UnresolvedSymbol { name: name.clone() }.to_string(),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::Lexer;
    use crate::asm::parser::Parser;

    fn resolved_graph(source: &str) -> (CodeGraph, SymbolTable, Diagnostics) {
        let (tokens, _) = Lexer::tokenize(source);
        let (program, mut symbols, _) = Parser::parse(&tokens);
        let (mut graph, _) = crate::asm::codegraph::build(&program);
        let diagnostics = resolve(&mut graph, &mut symbols);
        (graph, symbols, diagnostics)
    }

    #[test]
    fn data_blocks_are_addressed_back_to_back() {
        let (graph, _, diagnostics) = resolved_graph("DATA\na: DB 1, 2\nb: DW 9\nCODE\nHALT\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(graph.data_blocks[0].address, Some(0));
        assert_eq!(graph.data_blocks[1].address, Some(2));
    }

    #[test]
    fn data_array_fixup_patches_little_endian_addresses() {
        let (graph, _, diagnostics) = resolved_graph(
            "DATA\na: DW 0\nb: DW 0\nc: DW 0\ntable: DA a, b, c\nCODE\nHALT\n",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        // a, b, c each occupy 2 bytes at addresses 0x00, 0x02, 0x04.
        let table = graph
            .data_blocks
            .iter()
            .find(|block| block.label == "table")
            .unwrap();
        assert_eq!(table.payload, vec![0, 0, 2, 0, 4, 0]);
    }

    #[test]
    fn labels_do_not_advance_the_code_cursor() {
        let (graph, symbols, diagnostics) = resolved_graph("CODE\nstart:\nHALT\nend:\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert_eq!(symbols.get("start").unwrap().address, Some(0));
        assert_eq!(symbols.get("end").unwrap().address, Some(1));
    }

    #[test]
    fn operand_resolution_adds_constant_offset() {
        let (graph, _, diagnostics) = resolved_graph("DATA\nbuf: DB 1, 2, 3, 4, 5\nCODE\nJMP buf[2]\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        match &graph.code_nodes[0] {
            CodeNode::Instruction(instr) => match &instr.operands[0] {
                EncodedOperand::Symbol { resolved, .. } => assert_eq!(*resolved, Some(2)),
                other => panic!("unexpected operand {other:?}"),
            },
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn unresolved_symbol_is_reported_without_panicking() {
        // Semantic analysis would normally catch this first; the resolver
        // still must not panic if it runs on an un-checked graph.
        let (_, _, diagnostics) = resolved_graph("CODE\nJMP ghost\n");
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn resolution_is_idempotent() {
        let (tokens, _) = Lexer::tokenize("DATA\na: DB 1\nCODE\nJMP a\n");
        let (program, mut symbols, _) = Parser::parse(&tokens);
        let (mut graph, _) = crate::asm::codegraph::build(&program);
        resolve(&mut graph, &mut symbols);
        let first = graph.clone();
        resolve(&mut graph, &mut symbols);
        assert_eq!(graph, first);
    }
}
