//! The opcode table (spec §4.4.3, §4.4.4, §4.5).
//!
//! One static descriptor per mnemonic, looked up by name during semantic
//! analysis and code-graph construction, and by numeric opcode during
//! fetch-decode. Concrete opcode numbers are this crate's own invention
//! (the specification only promises they are stable, spec §4.5), assigned
//! in family order.

use num_derive::{FromPrimitive, ToPrimitive};

/// The shape of one operand slot in an instruction's encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSlot {
    /// A register code byte.
    Register,
    /// A raw 8-bit immediate.
    Immediate8,
    /// A raw 16-bit immediate, little-endian.
    Immediate16,
    /// A resolved address or symbol+offset expression, emitted as a
    /// 16-bit little-endian value (spec §4.4.5, operand resolution).
    Address,
}

impl OperandSlot {
    pub fn encoded_len(self) -> usize {
        match self {
            Self::Register => 1,
            Self::Immediate8 => 1,
            Self::Immediate16 => 2,
            Self::Address => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Opcode {
    Nop = 0x00,
    Halt = 0x01,
    Jmp = 0x02,
    Jpz = 0x03,
    Jpnz = 0x04,
    Jpc = 0x05,
    Jpnc = 0x06,
    Jps = 0x07,
    Jpns = 0x08,
    Jpo = 0x09,
    Jpno = 0x0A,
    Call = 0x0B,
    CallVoid = 0x0C,
    Ret = 0x0D,

    LdRegImm = 0x10,
    LdRegReg = 0x11,
    Lda = 0x12,
    Ldh = 0x13,
    Ldl = 0x14,
    Swp = 0x15,
    Sta = 0x16,

    Push = 0x20,
    Pop = 0x21,
    Pushb = 0x22,
    Pushw = 0x23,
    Peek = 0x24,
    Flsh = 0x25,

    Add = 0x30,
    AddImm = 0x31,
    Addb = 0x32,
    AddbImm = 0x33,
    Sub = 0x34,
    SubImm = 0x35,
    Subb = 0x36,
    SubbImm = 0x37,
    Mul = 0x38,
    MulImm = 0x39,
    Mulb = 0x3A,
    MulbImm = 0x3B,
    Div = 0x3C,
    DivImm = 0x3D,
    Divb = 0x3E,
    DivbImm = 0x3F,
    Rem = 0x40,
    RemImm = 0x41,
    Remb = 0x42,
    RembImm = 0x43,

    And = 0x50,
    Or = 0x51,
    Xor = 0x52,
    Not = 0x53,
    Andb = 0x54,
    Orb = 0x55,
    Xorb = 0x56,
    Notb = 0x57,

    Shl = 0x60,
    Shr = 0x61,
    Rol = 0x62,
    Ror = 0x63,

    Inc = 0x70,
    Dec = 0x71,
    Cmp = 0x72,
    Cph = 0x73,
    Cpl = 0x74,

    Page = 0x80,
    Setf = 0x81,

    Syscall = 0x90,
}

/// One row of the opcode table: the mnemonic as written in source, the
/// numeric opcode, and the fixed operand-slot signature used both to
/// check arity/kinds (semantic analysis) and to compute encoded size
/// (code-graph construction).
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub mnemonic: &'static str,
    pub opcode: Opcode,
    pub operands: &'static [OperandSlot],
}

macro_rules! descriptor {
    ($mnemonic:literal, $opcode:expr, [$($slot:expr),* $(,)?]) => {
        Descriptor {
            mnemonic: $mnemonic,
            opcode: $opcode,
            operands: &[$($slot),*],
        }
    };
}

use OperandSlot::{Address, Immediate16, Immediate8, Register};

pub static DESCRIPTORS: &[Descriptor] = &[
    descriptor!("NOP", Opcode::Nop, []),
    descriptor!("HALT", Opcode::Halt, []),
    descriptor!("JMP", Opcode::Jmp, [Address]),
    descriptor!("JPZ", Opcode::Jpz, [Address]),
    descriptor!("JPNZ", Opcode::Jpnz, [Address]),
    descriptor!("JPC", Opcode::Jpc, [Address]),
    descriptor!("JPNC", Opcode::Jpnc, [Address]),
    descriptor!("JPS", Opcode::Jps, [Address]),
    descriptor!("JPNS", Opcode::Jpns, [Address]),
    descriptor!("JPO", Opcode::Jpo, [Address]),
    descriptor!("JPNO", Opcode::Jpno, [Address]),
    descriptor!("CALL", Opcode::Call, [Address]),
    descriptor!("CALLV", Opcode::CallVoid, [Address]),
    descriptor!("RET", Opcode::Ret, []),
    descriptor!("LD", Opcode::LdRegImm, [Register, Immediate16]),
    descriptor!("LDR", Opcode::LdRegReg, [Register, Register]),
    descriptor!("LDA", Opcode::Lda, [Register, Address]),
    descriptor!("LDH", Opcode::Ldh, [Register, Immediate8]),
    descriptor!("LDL", Opcode::Ldl, [Register, Immediate8]),
    descriptor!("SWP", Opcode::Swp, [Register, Register]),
    descriptor!("STA", Opcode::Sta, [Register, Address]),
    descriptor!("PUSH", Opcode::Push, [Register]),
    descriptor!("POP", Opcode::Pop, [Register]),
    descriptor!("PUSHB", Opcode::Pushb, [Immediate8]),
    descriptor!("PUSHW", Opcode::Pushw, [Immediate16]),
    descriptor!("PEEK", Opcode::Peek, [Register]),
    descriptor!("FLSH", Opcode::Flsh, []),
    descriptor!("ADD", Opcode::Add, [Register]),
    descriptor!("ADDI", Opcode::AddImm, [Immediate16]),
    descriptor!("ADDB", Opcode::Addb, [Register]),
    descriptor!("ADDBI", Opcode::AddbImm, [Immediate8]),
    descriptor!("SUB", Opcode::Sub, [Register]),
    descriptor!("SUBI", Opcode::SubImm, [Immediate16]),
    descriptor!("SUBB", Opcode::Subb, [Register]),
    descriptor!("SUBBI", Opcode::SubbImm, [Immediate8]),
    descriptor!("MUL", Opcode::Mul, [Register]),
    descriptor!("MULI", Opcode::MulImm, [Immediate16]),
    descriptor!("MULB", Opcode::Mulb, [Register]),
    descriptor!("MULBI", Opcode::MulbImm, [Immediate8]),
    descriptor!("DIV", Opcode::Div, [Register]),
    descriptor!("DIVI", Opcode::DivImm, [Immediate16]),
    descriptor!("DIVB", Opcode::Divb, [Register]),
    descriptor!("DIVBI", Opcode::DivbImm, [Immediate8]),
    descriptor!("REM", Opcode::Rem, [Register]),
    descriptor!("REMI", Opcode::RemImm, [Immediate16]),
    descriptor!("REMB", Opcode::Remb, [Register]),
    descriptor!("REMBI", Opcode::RembImm, [Immediate8]),
    descriptor!("AND", Opcode::And, [Register]),
    descriptor!("OR", Opcode::Or, [Register]),
    descriptor!("XOR", Opcode::Xor, [Register]),
    descriptor!("NOT", Opcode::Not, [Register]),
    descriptor!("ANDB", Opcode::Andb, [Register]),
    descriptor!("ORB", Opcode::Orb, [Register]),
    descriptor!("XORB", Opcode::Xorb, [Register]),
    descriptor!("NOTB", Opcode::Notb, [Register]),
    descriptor!("SHL", Opcode::Shl, [Immediate8]),
    descriptor!("SHR", Opcode::Shr, [Immediate8]),
    descriptor!("ROL", Opcode::Rol, [Immediate8]),
    descriptor!("ROR", Opcode::Ror, [Immediate8]),
    descriptor!("INC", Opcode::Inc, [Register]),
    descriptor!("DEC", Opcode::Dec, [Register]),
    descriptor!("CMP", Opcode::Cmp, [Register]),
    descriptor!("CPH", Opcode::Cph, [Register]),
    descriptor!("CPL", Opcode::Cpl, [Register]),
    descriptor!("PAGE", Opcode::Page, [Immediate16]),
    descriptor!("SETF", Opcode::Setf, [Immediate8]),
    descriptor!("SYSCALL", Opcode::Syscall, [Immediate16]),
];

pub fn lookup(mnemonic: &str) -> Option<&'static Descriptor> {
    let upper = mnemonic.to_ascii_uppercase();
    DESCRIPTORS.iter().find(|d| d.mnemonic == upper)
}

/// Total encoded length of an instruction using this descriptor: one
/// opcode byte plus each operand's declared width (spec §4.4.4).
pub fn encoded_len(descriptor: &Descriptor) -> usize {
    1 + descriptor
        .operands
        .iter()
        .map(|slot| slot.encoded_len())
        .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup("halt").is_some());
        assert!(lookup("HALT").is_some());
    }

    #[test]
    fn unknown_mnemonic_is_none() {
        assert!(lookup("FROBNICATE").is_none());
    }

    #[test]
    fn encoded_len_matches_operand_signature() {
        let descriptor = lookup("LD").unwrap();
        assert_eq!(encoded_len(descriptor), 1 + 1 + 2);
    }

    #[test]
    fn opcode_round_trips_through_from_primitive() {
        let descriptor = lookup("SYSCALL").unwrap();
        let byte = descriptor.opcode as u8;
        assert_eq!(Opcode::from_u8(byte), Some(Opcode::Syscall));
    }
}
