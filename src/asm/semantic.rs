//! Semantic analysis (spec §4.4.3): symbol existence, arity, operand
//! kinds, and immediate/register width all checked against the opcode
//! descriptor table in [`crate::cpu::opcode`].
//!
//! Duplicate labels are caught earlier, at the point the parser inserts
//! each definition into the symbol-table stub (`SymbolTable::insert`
//! already reports a diagnostic on collision) — this pass does not
//! repeat that check.

use crate::asm::parser::{CodeItem, Define, Operand, Program};
use crate::asm::symtab::SymbolTable;
use crate::cpu::opcode::{self, OperandSlot};
use crate::error::{Diagnostics, SemanticError};

/// Walks every instruction and `DA` reference in `program`, reporting a
/// diagnostic for each semantic violation. Analysis never stops early:
/// every instruction is checked even after an earlier one fails.
pub fn analyze(program: &Program, symbols: &SymbolTable) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();

    for item in &program.data {
        if let crate::asm::parser::DataItem::Definition(def) = item {
            if let Define::Da(labels) = &def.define {
                for label in labels {
                    if !symbols.contains(label) {
                        report(
                            &mut diagnostics,
                            def.line,
                            def.column,
                            SemanticError::UndefinedSymbol {
                                line: def.line,
                                column: def.column,
                                name: label.clone(),
                            },
                        );
                    }
                }
            }
        }
    }

    for item in &program.code {
        if let CodeItem::Instruction(instr) = item {
            check_instruction(instr, symbols, &mut diagnostics);
        }
    }

    diagnostics
}

fn report(diagnostics: &mut Diagnostics, line: u32, column: u32, error: SemanticError) {
    diagnostics.push(line, column, error.to_string());
}

fn check_instruction(
    instr: &crate::asm::parser::Instruction,
    symbols: &SymbolTable,
    diagnostics: &mut Diagnostics,
) {
    let Some(descriptor) = opcode::lookup(&instr.mnemonic) else {
        diagnostics.push(
            instr.line,
            instr.column,
            format!("unknown instruction `{}`", instr.mnemonic),
        );
        return;
    };

    if instr.operands.len() != descriptor.operands.len() {
        report(
            diagnostics,
            instr.line,
            instr.column,
            SemanticError::ArityMismatch {
                line: instr.line,
                column: instr.column,
                mnemonic: instr.mnemonic.clone(),
                expected: descriptor.operands.len(),
                found: instr.operands.len(),
            },
        );
        return;
    }

    for (index, (operand, slot)) in instr.operands.iter().zip(descriptor.operands).enumerate() {
        check_operand(instr, operand, *slot, index, symbols, diagnostics);
    }
}

fn check_operand(
    instr: &crate::asm::parser::Instruction,
    operand: &Operand,
    slot: OperandSlot,
    index: usize,
    symbols: &SymbolTable,
    diagnostics: &mut Diagnostics,
) {
    match (operand, slot) {
        // Every opcode in the table accepts any register or half
        // interchangeably (the VM encodes the half as a distinct
        // register code, spec §4.5) — nothing further to check here.
        (Operand::Register(_), OperandSlot::Register) => {}
        (Operand::Immediate(value), OperandSlot::Immediate8) => {
            check_immediate_width(instr, *value, 8, diagnostics);
        }
        (Operand::Immediate(value), OperandSlot::Immediate16) => {
            check_immediate_width(instr, *value, 16, diagnostics);
        }
        (Operand::Str(text), OperandSlot::Immediate8) => {
            if text.chars().count() != 1 {
                report(
                    diagnostics,
                    instr.line,
                    instr.column,
                    SemanticError::OperandKindMismatch {
                        line: instr.line,
                        column: instr.column,
                        mnemonic: instr.mnemonic.clone(),
                        index,
                    },
                );
            }
        }
        (Operand::Symbol(symbol), OperandSlot::Address) => {
            if !symbols.contains(&symbol.name) {
                report(
                    diagnostics,
                    symbol.line,
                    symbol.column,
                    SemanticError::UndefinedSymbol {
                        line: symbol.line,
                        column: symbol.column,
                        name: symbol.name.clone(),
                    },
                );
            }
        }
        _ => {
            report(
                diagnostics,
                instr.line,
                instr.column,
                SemanticError::OperandKindMismatch {
                    line: instr.line,
                    column: instr.column,
                    mnemonic: instr.mnemonic.clone(),
                    index,
                },
            );
        }
    }
}

/// Rejects an immediate that doesn't fit the instruction variant's
/// declared width. A value that happens to fit in 8 bits still must be
/// used with a word-immediate opcode if that's what the source wrote
/// (spec §4.4.3: operand width follows the instruction variant, not the
/// value).
fn check_immediate_width(
    instr: &crate::asm::parser::Instruction,
    value: i64,
    width: u32,
    diagnostics: &mut Diagnostics,
) {
    let (low, high): (i64, i64) = if width == 8 {
        (-128, 255)
    } else {
        (-32768, 65535)
    };
    if value < low || value > high {
        diagnostics.push(
            instr.line,
            instr.column,
            SemanticError::ImmediateTooWide {
                line: instr.line,
                column: instr.column,
                value,
                width,
            }
            .to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::Lexer;
    use crate::asm::parser::Parser;

    fn analyze_source(source: &str) -> Diagnostics {
        let (tokens, _) = Lexer::tokenize(source);
        let (program, symbols, _) = Parser::parse(&tokens);
        analyze(&program, &symbols)
    }

    #[test]
    fn valid_program_has_no_diagnostics() {
        let diagnostics = analyze_source("CODE\nLD AX, 5\nHALT\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn undefined_symbol_is_reported() {
        let diagnostics = analyze_source("CODE\nJMP missing\n");
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let diagnostics = analyze_source("CODE\nHALT 1\n");
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn oversized_word_immediate_is_rejected() {
        let diagnostics = analyze_source("CODE\nADDI 70000\n");
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn byte_sized_value_does_not_downgrade_word_instruction() {
        // ADDI is declared word-width; a small value is still fine, it
        // is simply encoded in 2 bytes rather than shrinking the opcode.
        let diagnostics = analyze_source("CODE\nADDI 5\n");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn da_referencing_undefined_label_is_reported() {
        let diagnostics = analyze_source("DATA\ntable: DA missing\nCODE\nHALT\n");
        assert_eq!(diagnostics.len(), 1);
    }
}
