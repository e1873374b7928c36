//! The register file and flag set (spec §3, §4.5).
//!
//! Five 16-bit general-purpose registers, each split into high/low 8-bit
//! halves. AX doubles as the ALU's accumulator. Flags are a small bitset
//! shared by the ALU, INC/DEC, and every conditional branch — spec §5
//! calls this out explicitly as a single shared mutable resource, safe
//! without locking because execution is single-threaded.

use bitfield_struct::bitfield;

/// 1-based register codes used on the wire (spec §4.5): AX=1 .. EX=5.
/// High/low halves of the same register receive distinct codes so a
/// decoded byte identifies both the register and the half in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterCode {
    Ax = 1,
    Bx = 2,
    Cx = 3,
    Dx = 4,
    Ex = 5,
    Ah = 6,
    Al = 7,
    Bh = 8,
    Bl = 9,
    Ch = 10,
    Cl = 11,
    Dh = 12,
    Dl = 13,
    Eh = 14,
    El = 15,
}

impl RegisterCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Ax,
            2 => Self::Bx,
            3 => Self::Cx,
            4 => Self::Dx,
            5 => Self::Ex,
            6 => Self::Ah,
            7 => Self::Al,
            8 => Self::Bh,
            9 => Self::Bl,
            10 => Self::Ch,
            11 => Self::Cl,
            12 => Self::Dh,
            13 => Self::Dl,
            14 => Self::Eh,
            15 => Self::El,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn is_half(self) -> bool {
        self as u8 > 5
    }
}

/// ALU and branch condition flags (spec §3, §4.5). At minimum ZERO,
/// CARRY, SIGN, OVERFLOW, as the specification requires.
#[bitfield(u8)]
pub struct Flags {
    pub zero: bool,
    pub carry: bool,
    pub sign: bool,
    pub overflow: bool,
    #[bits(4)]
    __reserved: u8,
}

impl Flags {
    /// Recomputes ZERO and SIGN from a 16-bit result; leaves CARRY and
    /// OVERFLOW to the caller, since only the ALU operation itself knows
    /// whether they apply.
    pub fn set_zero_sign(&mut self, result: u16) {
        self.set_zero(result == 0);
        self.set_sign(result & 0x8000 != 0);
    }
}

/// The five general-purpose registers, addressable whole or by half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFile {
    ax: u16,
    bx: u16,
    cx: u16,
    dx: u16,
    ex: u16,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, code: RegisterCode) -> (&u16, bool, bool) {
        // (register, is_half, is_low)
        match code {
            RegisterCode::Ax | RegisterCode::Ah | RegisterCode::Al => {
                (&self.ax, code.is_half(), matches!(code, RegisterCode::Al))
            }
            RegisterCode::Bx | RegisterCode::Bh | RegisterCode::Bl => {
                (&self.bx, code.is_half(), matches!(code, RegisterCode::Bl))
            }
            RegisterCode::Cx | RegisterCode::Ch | RegisterCode::Cl => {
                (&self.cx, code.is_half(), matches!(code, RegisterCode::Cl))
            }
            RegisterCode::Dx | RegisterCode::Dh | RegisterCode::Dl => {
                (&self.dx, code.is_half(), matches!(code, RegisterCode::Dl))
            }
            RegisterCode::Ex | RegisterCode::Eh | RegisterCode::El => {
                (&self.ex, code.is_half(), matches!(code, RegisterCode::El))
            }
        }
    }

    pub fn get(&self, code: RegisterCode) -> u16 {
        let (whole, is_half, is_low) = self.slot(code);
        let whole = *whole;
        if !is_half {
            whole
        } else if is_low {
            whole & 0xFF
        } else {
            whole >> 8
        }
    }

    pub fn set(&mut self, code: RegisterCode, value: u16) {
        let whole = match code {
            RegisterCode::Ax | RegisterCode::Ah | RegisterCode::Al => &mut self.ax,
            RegisterCode::Bx | RegisterCode::Bh | RegisterCode::Bl => &mut self.bx,
            RegisterCode::Cx | RegisterCode::Ch | RegisterCode::Cl => &mut self.cx,
            RegisterCode::Dx | RegisterCode::Dh | RegisterCode::Dl => &mut self.dx,
            RegisterCode::Ex | RegisterCode::Eh | RegisterCode::El => &mut self.ex,
        };
        match code {
            RegisterCode::Ax | RegisterCode::Bx | RegisterCode::Cx | RegisterCode::Dx | RegisterCode::Ex => {
                *whole = value;
            }
            RegisterCode::Ah | RegisterCode::Bh | RegisterCode::Ch | RegisterCode::Dh | RegisterCode::Eh => {
                *whole = (*whole & 0x00FF) | ((value & 0xFF) << 8);
            }
            RegisterCode::Al | RegisterCode::Bl | RegisterCode::Cl | RegisterCode::Dl | RegisterCode::El => {
                *whole = (*whole & 0xFF00) | (value & 0xFF);
            }
        }
    }

    pub fn accumulator(&self) -> u16 {
        self.ax
    }

    pub fn set_accumulator(&mut self, value: u16) {
        self.ax = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_read_and_write_independently() {
        let mut file = RegisterFile::new();
        file.set(RegisterCode::Ax, 0x1234);
        assert_eq!(file.get(RegisterCode::Ah), 0x12);
        assert_eq!(file.get(RegisterCode::Al), 0x34);
        file.set(RegisterCode::Al, 0xFF);
        assert_eq!(file.get(RegisterCode::Ax), 0x12FF);
    }

    #[test]
    fn flags_set_zero_and_sign_from_result() {
        let mut flags = Flags::new();
        flags.set_zero_sign(0);
        assert!(flags.zero());
        flags.set_zero_sign(0x8000);
        assert!(flags.sign());
        assert!(!flags.zero());
    }

    #[test]
    fn register_code_round_trips_through_byte() {
        for code in [
            RegisterCode::Ax,
            RegisterCode::Bl,
            RegisterCode::Eh,
        ] {
            assert_eq!(RegisterCode::from_byte(code.to_byte()), Some(code));
        }
    }
}
