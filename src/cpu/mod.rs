//! The CPU / instruction unit (spec §4.5): fetch-decode-execute over an
//! assembled code segment, driving the ALU, registers, flags, the data
//! stack, and system calls.

pub mod alu;
pub mod opcode;
pub mod registers;

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use log::debug;
use num_traits::FromPrimitive;

use crate::error::{ExecError, RuntimeError, StackError};
use crate::memory::{AccessMode, ContextId, MemoryUnit, PagedAccessor, Protected, BLOCK_SIZE};
use crate::stack::Stack;
use opcode::{Descriptor, Opcode, OperandSlot, DESCRIPTORS};
use registers::{Flags, RegisterCode, RegisterFile};

pub const PRINT_LINE_FROM_STACK: u16 = 0x0011;
pub const PRINT_STRING_FROM_STACK: u16 = 0x0012;
pub const READ_LINE_TO_STACK: u16 = 0x0013;
pub const DEBUG_PRINT_WORD: u16 = 0x1500;

fn descriptor_for(opcode: Opcode) -> &'static Descriptor {
    DESCRIPTORS
        .iter()
        .find(|d| d.opcode == opcode)
        .expect("every Opcode variant has exactly one descriptor row")
}

/// A saved call-frame entry on the instruction unit's private return
/// stack (spec §3, "Call-frame record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CallRecord {
    return_address: u16,
    saved_fp: i64,
    has_return_value: bool,
}

type SyscallHandler = fn(&mut Cpu) -> Result<(), RuntimeError>;

/// The syscall dispatch table, keyed by syscall number (spec §4.5,
/// §6). Extensible at construction time via [`SyscallTable::register`],
/// per spec §6's "extensible via registration at VM construction".
pub struct SyscallTable(HashMap<u16, SyscallHandler>);

impl SyscallTable {
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        table.register(PRINT_LINE_FROM_STACK, syscall_print_line_from_stack);
        table.register(PRINT_STRING_FROM_STACK, syscall_print_string_from_stack);
        table.register(READ_LINE_TO_STACK, syscall_read_line_to_stack);
        table.register(DEBUG_PRINT_WORD, syscall_debug_print_word);
        table
    }

    pub fn register(&mut self, number: u16, handler: SyscallHandler) {
        self.0.insert(number, handler);
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Pops `count` characters pushed in reverse order (spec §4.5's "callers
/// push the payload (characters in reverse ...)" convention) and
/// returns them in forward reading order.
fn pop_reversed_chars(stack: &mut Stack, count: u16) -> Result<Vec<u8>, RuntimeError> {
    let mut bytes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        bytes.push(stack.pop_byte()?);
    }
    bytes.reverse();
    Ok(bytes)
}

fn syscall_print_line_from_stack(cpu: &mut Cpu) -> Result<(), RuntimeError> {
    let count = cpu.stack.pop_word()?;
    let bytes = pop_reversed_chars(&mut cpu.stack, count)?;
    cpu.output
        .write_all(&bytes)
        .and_then(|()| cpu.output.write_all(b"\n"))
        .map_err(io_error)?;
    Ok(())
}

fn syscall_print_string_from_stack(cpu: &mut Cpu) -> Result<(), RuntimeError> {
    let count = cpu.stack.pop_word()?;
    let bytes = pop_reversed_chars(&mut cpu.stack, count)?;
    cpu.output.write_all(&bytes).map_err(io_error)?;
    Ok(())
}

fn syscall_read_line_to_stack(cpu: &mut Cpu) -> Result<(), RuntimeError> {
    let max_len = cpu.stack.pop_word()?;
    let mut line = String::new();
    cpu.input.read_line(&mut line).map_err(io_error)?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    let bytes: Vec<u8> = trimmed.bytes().take(max_len as usize).collect();
    cpu.stack.push_word(bytes.len() as u16)?;
    for &byte in bytes.iter().rev() {
        cpu.stack.push_byte(byte)?;
    }
    Ok(())
}

fn syscall_debug_print_word(cpu: &mut Cpu) -> Result<(), RuntimeError> {
    let top = cpu.stack.sp().checked_sub(2).ok_or(StackError::Underflow)?;
    let value = cpu.stack.peek_word_from_base(top)?;
    writeln!(cpu.output, "{value}").map_err(io_error)?;
    Ok(())
}

fn io_error(error: io::Error) -> RuntimeError {
    debug!("syscall I/O error: {error}");
    RuntimeError::Exec(ExecError::UnknownSyscall { number: 0 })
}

/// The fetch-decode-execute core. Owns the code segment, the register
/// file, flags, the data stack, and the private return stack; console
/// I/O is injected so tests can capture output instead of touching the
/// real terminal.
pub struct Cpu {
    registers: RegisterFile,
    flags: Flags,
    ir: u16,
    halted: bool,
    code: Vec<u8>,
    stack: Stack,
    return_stack: Vec<CallRecord>,
    data: MemoryUnit<Protected>,
    data_context: ContextId,
    syscalls: SyscallTable,
    output: Box<dyn Write>,
    input: Box<dyn BufRead>,
}

impl Cpu {
    /// Builds a machine from an already-assembled code segment and the
    /// initial contents of the data segment (spec §4.1's image layout).
    /// The data segment becomes one paged [`MemoryUnit`] context, sized to
    /// at least one block so `PAGE`/`LDA`/`STA` never fault on an empty
    /// program.
    pub fn new(code: Vec<u8>, data: Vec<u8>, stack_capacity: usize) -> Result<Self, RuntimeError> {
        let mut memory = MemoryUnit::<crate::memory::Unprotected>::new();
        let context_size = (data.len() as u64).max(BLOCK_SIZE);
        let context = memory.create_context(context_size)?;
        let mut memory = memory.protect();
        {
            let mut accessor = memory.paged_accessor(context, AccessMode::ReadWrite)?;
            accessor.write_bytes(0, 0, &data)?;
        }

        Ok(Self {
            registers: RegisterFile::new(),
            flags: Flags::new(),
            ir: 0,
            halted: false,
            code,
            stack: Stack::new(stack_capacity),
            return_stack: Vec::new(),
            data: memory,
            data_context: context,
            syscalls: SyscallTable::with_defaults(),
            output: Box::new(io::stdout()),
            input: Box::new(io::BufReader::new(io::stdin())),
        })
    }

    fn data_accessor(&mut self, mode: AccessMode) -> Result<PagedAccessor<'_>, RuntimeError> {
        Ok(self.data.paged_accessor(self.data_context, mode)?)
    }

    pub fn with_io(mut self, output: Box<dyn Write>, input: Box<dyn BufRead>) -> Self {
        self.output = output;
        self.input = input;
        self
    }

    pub fn with_syscalls(mut self, syscalls: SyscallTable) -> Self {
        self.syscalls = syscalls;
        self
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn ir(&self) -> u16 {
        self.ir
    }

    /// Runs until HALT or a runtime error (spec §7: the VM aborts on the
    /// first runtime error with no retry).
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while !self.halted {
            self.step()?;
        }
        Ok(())
    }

    fn byte_at(&self, offset: u16) -> u8 {
        self.code.get(offset as usize).copied().unwrap_or(0)
    }

    fn word_at(&self, offset: u16) -> u16 {
        u16::from(self.byte_at(offset)) | (u16::from(self.byte_at(offset.wrapping_add(1))) << 8)
    }

    fn register_operand(&self, offset: u16) -> Result<RegisterCode, RuntimeError> {
        RegisterCode::from_byte(self.byte_at(offset)).ok_or(RuntimeError::Exec(ExecError::UnknownOpcode {
            opcode: self.byte_at(offset),
            address: offset,
        }))
    }

    /// Executes exactly one instruction.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        let start = self.ir;
        let raw_opcode = self.byte_at(start);
        let Some(opcode) = Opcode::from_u8(raw_opcode) else {
            return Err(RuntimeError::Exec(ExecError::UnknownOpcode {
                opcode: raw_opcode,
                address: start,
            }));
        };
        let descriptor = descriptor_for(opcode);
        let mut cursor = start + 1;
        let mut operand_offsets = Vec::with_capacity(descriptor.operands.len());
        for slot in descriptor.operands {
            operand_offsets.push(cursor);
            cursor += slot.encoded_len() as u16;
        }
        self.ir = cursor;

        self.execute(opcode, descriptor.operands, &operand_offsets)
    }

    fn operand_register(&self, offsets: &[u16], index: usize) -> Result<RegisterCode, RuntimeError> {
        self.register_operand(offsets[index])
    }

    fn execute(
        &mut self,
        opcode: Opcode,
        _slots: &[OperandSlot],
        offsets: &[u16],
    ) -> Result<(), RuntimeError> {
        match opcode {
            Opcode::Nop => {}
            Opcode::Halt => self.halted = true,
            Opcode::Jmp => self.ir = self.word_at(offsets[0]),
            Opcode::Jpz => self.branch_if(self.flags.zero(), offsets[0]),
            Opcode::Jpnz => self.branch_if(!self.flags.zero(), offsets[0]),
            Opcode::Jpc => self.branch_if(self.flags.carry(), offsets[0]),
            Opcode::Jpnc => self.branch_if(!self.flags.carry(), offsets[0]),
            Opcode::Jps => self.branch_if(self.flags.sign(), offsets[0]),
            Opcode::Jpns => self.branch_if(!self.flags.sign(), offsets[0]),
            Opcode::Jpo => self.branch_if(self.flags.overflow(), offsets[0]),
            Opcode::Jpno => self.branch_if(!self.flags.overflow(), offsets[0]),
            Opcode::Call => self.call(self.word_at(offsets[0]), true)?,
            Opcode::CallVoid => self.call(self.word_at(offsets[0]), false)?,
            Opcode::Ret => self.ret()?,

            Opcode::LdRegImm => {
                let register = self.operand_register(offsets, 0)?;
                let value = self.word_at(offsets[1]);
                self.registers.set(register, value);
            }
            Opcode::LdRegReg => {
                let dst = self.operand_register(offsets, 0)?;
                let src = self.operand_register(offsets, 1)?;
                let value = self.registers.get(src);
                self.registers.set(dst, value);
            }
            Opcode::Lda => {
                let register = self.operand_register(offsets, 0)?;
                let address = self.word_at(offsets[1]);
                let accessor = self.data_accessor(AccessMode::ReadOnly)?;
                let page = accessor.current_page();
                let value = accessor.read_word(page, address)?;
                self.registers.set(register, value);
            }
            Opcode::Sta => {
                let register = self.operand_register(offsets, 0)?;
                let address = self.word_at(offsets[1]);
                let value = self.registers.get(register);
                let mut accessor = self.data_accessor(AccessMode::ReadWrite)?;
                let page = accessor.current_page();
                accessor.write_word(page, address, value)?;
            }
            Opcode::Ldh => {
                let register = self.operand_register(offsets, 0)?;
                let value = self.byte_at(offsets[1]);
                let current = self.registers.get(register);
                self.registers.set(register, (current & 0x00FF) | (u16::from(value) << 8));
            }
            Opcode::Ldl => {
                let register = self.operand_register(offsets, 0)?;
                let value = self.byte_at(offsets[1]);
                let current = self.registers.get(register);
                self.registers.set(register, (current & 0xFF00) | u16::from(value));
            }
            Opcode::Swp => {
                let a = self.operand_register(offsets, 0)?;
                let b = self.operand_register(offsets, 1)?;
                let va = self.registers.get(a);
                let vb = self.registers.get(b);
                self.registers.set(a, vb);
                self.registers.set(b, va);
            }

            Opcode::Push => {
                let register = self.operand_register(offsets, 0)?;
                self.stack.push_word(self.registers.get(register))?;
            }
            Opcode::Pop => {
                let register = self.operand_register(offsets, 0)?;
                let value = self.stack.pop_word()?;
                self.registers.set(register, value);
            }
            Opcode::Pushb => self.stack.push_byte(self.byte_at(offsets[0]))?,
            Opcode::Pushw => self.stack.push_word(self.word_at(offsets[0]))?,
            Opcode::Peek => {
                let register = self.operand_register(offsets, 0)?;
                let top = self.stack.sp().checked_sub(2).ok_or(StackError::Underflow)?;
                let value = self.stack.peek_word_from_base(top)?;
                self.registers.set(register, value);
            }
            Opcode::Flsh => self.stack.flush(),

            Opcode::Add => self.alu_reg(offsets, alu::add)?,
            Opcode::AddImm => self.alu_imm16(offsets, alu::add)?,
            Opcode::Addb => self.alu_reg_byte(offsets, alu::add)?,
            Opcode::AddbImm => self.alu_imm8(offsets, alu::add)?,
            Opcode::Sub => self.alu_reg(offsets, alu::sub)?,
            Opcode::SubImm => self.alu_imm16(offsets, alu::sub)?,
            Opcode::Subb => self.alu_reg_byte(offsets, alu::sub)?,
            Opcode::SubbImm => self.alu_imm8(offsets, alu::sub)?,
            Opcode::Mul => self.alu_reg(offsets, alu::mul)?,
            Opcode::MulImm => self.alu_imm16(offsets, alu::mul)?,
            Opcode::Mulb => self.alu_reg_byte(offsets, alu::mul)?,
            Opcode::MulbImm => self.alu_imm8(offsets, alu::mul)?,
            Opcode::Div => self.alu_reg_fallible(offsets, alu::div)?,
            Opcode::DivImm => self.alu_imm16_fallible(offsets, alu::div)?,
            Opcode::Divb => self.alu_reg_byte_fallible(offsets, alu::div)?,
            Opcode::DivbImm => self.alu_imm8_fallible(offsets, alu::div)?,
            Opcode::Rem => self.alu_reg_fallible(offsets, alu::rem)?,
            Opcode::RemImm => self.alu_imm16_fallible(offsets, alu::rem)?,
            Opcode::Remb => self.alu_reg_byte_fallible(offsets, alu::rem)?,
            Opcode::RembImm => self.alu_imm8_fallible(offsets, alu::rem)?,

            Opcode::And => self.alu_reg(offsets, alu::and)?,
            Opcode::Or => self.alu_reg(offsets, alu::or)?,
            Opcode::Xor => self.alu_reg(offsets, alu::xor)?,
            Opcode::Not => {
                let register = self.operand_register(offsets, 0)?;
                let (result, flags) = alu::not(self.registers.get(register));
                self.registers.set(register, result);
                self.flags = flags;
            }
            Opcode::Andb => self.alu_reg_byte(offsets, alu::and)?,
            Opcode::Orb => self.alu_reg_byte(offsets, alu::or)?,
            Opcode::Xorb => self.alu_reg_byte(offsets, alu::xor)?,
            Opcode::Notb => {
                let register = self.operand_register(offsets, 0)?;
                let (result, flags) = alu::not(self.registers.get(register) & 0xFF);
                self.registers.set(register, result & 0xFF);
                self.flags = flags;
            }

            Opcode::Shl => self.alu_accumulator_shift(offsets, alu::shl)?,
            Opcode::Shr => self.alu_accumulator_shift(offsets, alu::shr)?,
            Opcode::Rol => self.alu_accumulator_shift(offsets, alu::rol)?,
            Opcode::Ror => self.alu_accumulator_shift(offsets, alu::ror)?,

            Opcode::Inc => {
                let register = self.operand_register(offsets, 0)?;
                let (result, flags) = alu::inc(self.registers.get(register));
                self.registers.set(register, result);
                self.flags = flags;
            }
            Opcode::Dec => {
                let register = self.operand_register(offsets, 0)?;
                let (result, flags) = alu::dec(self.registers.get(register));
                self.registers.set(register, result);
                self.flags = flags;
            }
            Opcode::Cmp => self.alu_compare(offsets, 0xFFFF)?,
            Opcode::Cph => self.alu_compare(offsets, 0xFF)?,
            Opcode::Cpl => self.alu_compare(offsets, 0xFF)?,

            Opcode::Page => {
                let page = self.word_at(offsets[0]);
                self.data_accessor(AccessMode::ReadWrite)?.set_page(page);
            }
            Opcode::Setf => self.flags = Flags::from_bits(self.byte_at(offsets[0])),

            Opcode::Syscall => {
                let number = self.word_at(offsets[0]);
                let handler = *self
                    .syscalls
                    .0
                    .get(&number)
                    .ok_or(RuntimeError::Exec(ExecError::UnknownSyscall { number }))?;
                handler(self)?;
            }
        }
        Ok(())
    }

    fn branch_if(&mut self, condition: bool, address_offset: u16) {
        if condition {
            self.ir = self.word_at(address_offset);
        }
    }

    fn alu_reg(&mut self, offsets: &[u16], op: fn(u16, u16) -> (u16, Flags)) -> Result<(), RuntimeError> {
        let register = self.operand_register(offsets, 0)?;
        let (result, flags) = op(self.registers.accumulator(), self.registers.get(register));
        self.registers.set_accumulator(result);
        self.flags = flags;
        Ok(())
    }

    fn alu_reg_byte(&mut self, offsets: &[u16], op: fn(u16, u16) -> (u16, Flags)) -> Result<(), RuntimeError> {
        let register = self.operand_register(offsets, 0)?;
        let a = self.registers.accumulator() & 0xFF;
        let b = self.registers.get(register) & 0xFF;
        let (result, flags) = op(a, b);
        self.registers.set_accumulator((self.registers.accumulator() & 0xFF00) | (result & 0xFF));
        self.flags = flags;
        Ok(())
    }

    fn alu_imm16(&mut self, offsets: &[u16], op: fn(u16, u16) -> (u16, Flags)) -> Result<(), RuntimeError> {
        let (result, flags) = op(self.registers.accumulator(), self.word_at(offsets[0]));
        self.registers.set_accumulator(result);
        self.flags = flags;
        Ok(())
    }

    fn alu_imm8(&mut self, offsets: &[u16], op: fn(u16, u16) -> (u16, Flags)) -> Result<(), RuntimeError> {
        let a = self.registers.accumulator() & 0xFF;
        let (result, flags) = op(a, u16::from(self.byte_at(offsets[0])));
        self.registers.set_accumulator((self.registers.accumulator() & 0xFF00) | (result & 0xFF));
        self.flags = flags;
        Ok(())
    }

    fn alu_reg_fallible(
        &mut self,
        offsets: &[u16],
        op: fn(u16, u16) -> Result<(u16, Flags), ExecError>,
    ) -> Result<(), RuntimeError> {
        let register = self.operand_register(offsets, 0)?;
        let (result, flags) = op(self.registers.accumulator(), self.registers.get(register))?;
        self.registers.set_accumulator(result);
        self.flags = flags;
        Ok(())
    }

    fn alu_reg_byte_fallible(
        &mut self,
        offsets: &[u16],
        op: fn(u16, u16) -> Result<(u16, Flags), ExecError>,
    ) -> Result<(), RuntimeError> {
        let register = self.operand_register(offsets, 0)?;
        let a = self.registers.accumulator() & 0xFF;
        let b = self.registers.get(register) & 0xFF;
        let (result, flags) = op(a, b)?;
        self.registers.set_accumulator((self.registers.accumulator() & 0xFF00) | (result & 0xFF));
        self.flags = flags;
        Ok(())
    }

    fn alu_imm16_fallible(
        &mut self,
        offsets: &[u16],
        op: fn(u16, u16) -> Result<(u16, Flags), ExecError>,
    ) -> Result<(), RuntimeError> {
        let (result, flags) = op(self.registers.accumulator(), self.word_at(offsets[0]))?;
        self.registers.set_accumulator(result);
        self.flags = flags;
        Ok(())
    }

    fn alu_imm8_fallible(
        &mut self,
        offsets: &[u16],
        op: fn(u16, u16) -> Result<(u16, Flags), ExecError>,
    ) -> Result<(), RuntimeError> {
        let a = self.registers.accumulator() & 0xFF;
        let (result, flags) = op(a, u16::from(self.byte_at(offsets[0])))?;
        self.registers.set_accumulator((self.registers.accumulator() & 0xFF00) | (result & 0xFF));
        self.flags = flags;
        Ok(())
    }

    fn alu_accumulator_shift(
        &mut self,
        offsets: &[u16],
        op: fn(u16, u32) -> (u16, Flags),
    ) -> Result<(), RuntimeError> {
        let count = u32::from(self.byte_at(offsets[0]));
        let (result, flags) = op(self.registers.accumulator(), count);
        self.registers.set_accumulator(result);
        self.flags = flags;
        Ok(())
    }

    fn alu_compare(&mut self, offsets: &[u16], mask: u16) -> Result<(), RuntimeError> {
        let register = self.operand_register(offsets, 0)?;
        let a = self.registers.accumulator() & mask;
        let b = self.registers.get(register) & mask;
        let (result, flags) = alu::cmp(a, b);
        self.registers.set_accumulator(result);
        self.flags = flags;
        Ok(())
    }

    /// `CALL`: pushes a return-stack record, jumps to `addr`, and pushes
    /// the frame's discipline flag byte (spec §4.5).
    fn call(&mut self, addr: u16, with_return_value: bool) -> Result<(), RuntimeError> {
        self.return_stack.push(CallRecord {
            return_address: self.ir,
            saved_fp: self.stack.fp(),
            has_return_value: with_return_value,
        });
        self.ir = addr;
        self.stack.push_byte(u8::from(with_return_value))?;
        self.stack.set_frame_to_top();
        Ok(())
    }

    /// `RET`: unwinds exactly one call frame (spec §4.5). The discipline
    /// byte is popped after `fp` is restored to the caller's, so that
    /// `flush()` only discards this frame's own locals and never the
    /// caller's previously pushed arguments — see DESIGN.md for why this
    /// ordering differs from a literal reading of the spec's numbered
    /// steps.
    fn ret(&mut self) -> Result<(), RuntimeError> {
        let record = self
            .return_stack
            .pop()
            .ok_or(RuntimeError::Stack(StackError::ReturnStackUnderflow))?;

        let has_return_value = self.stack.peek_byte_from_frame(0)? != 0;
        debug_assert_eq!(has_return_value, record.has_return_value);

        let return_value = if has_return_value {
            Some(self.stack.pop_word()?)
        } else {
            None
        };
        self.stack.flush();
        self.stack.set_frame_pointer(record.saved_fp);
        self.stack.pop_byte()?;
        if let Some(value) = return_value {
            self.stack.push_word(value)?;
        }
        self.ir = record.return_address;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;
    use std::io::Cursor;

    fn run_source(source: &str) -> Cpu {
        let assembled = asm::assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
        let mut cpu = Cpu::new(assembled.code, assembled.data, 1024)
            .unwrap()
            .with_io(Box::new(Vec::new()), Box::new(Cursor::new(Vec::new())));
        cpu.run().unwrap();
        cpu
    }

    #[test]
    fn countdown_loop_leaves_ax_zero_with_zero_flag() {
        let cpu = run_source("CODE\nLD AX, 5\nloop:\nDEC AX\nJPNZ loop\nHALT\n");
        assert_eq!(cpu.registers().get(RegisterCode::Ax), 0);
        assert!(cpu.flags().zero());
    }

    #[test]
    fn hello_world_syscall_prints_expected_bytes() {
        let source = r#"CODE
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
        let assembled = asm::assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
        let output: Box<Vec<u8>> = Box::new(Vec::new());
        let mut cpu = Cpu::new(assembled.code, assembled.data, 1024)
            .unwrap()
            .with_io(output, Box::new(Cursor::new(Vec::new())));
        cpu.run().unwrap();
    }

    #[test]
    fn call_with_return_value_restores_caller_stack() {
        let source = "DATA\nCODE\nPUSHW 0x1234\nPUSHW 0x5678\nCALL callee\nHALT\ncallee:\nPUSHW 0xABCD\nRET\n";
        let assembled = asm::assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
        let mut cpu = Cpu::new(assembled.code, assembled.data, 1024)
            .unwrap()
            .with_io(Box::new(Vec::new()), Box::new(Cursor::new(Vec::new())));

        // Step until just before HALT so we can inspect the stack after RET.
        while !cpu.is_halted() {
            cpu.step().unwrap();
        }

        // fp is back to -1 and the stack holds [0x1234, 0x5678, 0xABCD].
        assert_eq!(cpu.stack.fp(), -1);
        assert_eq!(cpu.stack.pop_word().unwrap(), 0xABCD);
        assert_eq!(cpu.stack.pop_word().unwrap(), 0x5678);
        assert_eq!(cpu.stack.pop_word().unwrap(), 0x1234);
        assert!(cpu.stack.is_empty());
    }

    #[test]
    fn nested_calls_restore_ir_and_empty_return_stack() {
        let source = "CODE\nCALLV inner\nHALT\ninner:\nCALLV innermost\nRET\ninnermost:\nRET\n";
        let assembled = asm::assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
        let mut cpu = Cpu::new(assembled.code, assembled.data, 1024)
            .unwrap()
            .with_io(Box::new(Vec::new()), Box::new(Cursor::new(Vec::new())));
        cpu.run().unwrap();
        assert!(cpu.return_stack.is_empty());
    }

    #[test]
    fn division_by_zero_aborts_with_runtime_error() {
        let source = "CODE\nLD AX, 1\nDIVI 0\nHALT\n";
        let assembled = asm::assemble(source);
        assert!(assembled.diagnostics.is_empty(), "{:?}", assembled.diagnostics);
        let mut cpu = Cpu::new(assembled.code, assembled.data, 1024)
            .unwrap()
            .with_io(Box::new(Vec::new()), Box::new(Cursor::new(Vec::new())));
        let err = cpu.run().unwrap_err();
        assert!(matches!(err, RuntimeError::Exec(ExecError::DivisionByZero)));
    }

    #[test]
    fn unknown_opcode_is_reported_with_address() {
        let mut cpu = Cpu::new(vec![0xFE], Vec::new(), 16)
            .unwrap()
            .with_io(Box::new(Vec::new()), Box::new(Cursor::new(Vec::new())));
        let err = cpu.run().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Exec(ExecError::UnknownOpcode { opcode: 0xFE, address: 0 })
        ));
    }

    #[test]
    fn sta_then_lda_round_trips_through_data_memory() {
        let source = "DATA\ncell: DW 0\nCODE\nLD AX, 0x2222\nSTA AX, cell\nLDA BX, cell\nHALT\n";
        let cpu = run_source(source);
        assert_eq!(cpu.registers().get(RegisterCode::Bx), 0x2222);
    }
}
