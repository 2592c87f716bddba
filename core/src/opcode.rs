use std::fmt;

use crate::state::Chip8Mode;

/// Raw 16-bit instruction word, fetched big-endian from memory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Opcode(pub u16);

impl Opcode {
    pub const fn from_be_bytes(bytes: [u8; 2]) -> Opcode {
        Opcode(u16::from_be_bytes(bytes))
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Nibble `N` counted from the least significant end (0..=3).
    pub const fn field<const N: u32>(self) -> u8 {
        ((self.0 >> (N * 4)) & 0xF) as u8
    }

    /// Opcode class, bits 12-15
    pub const fn class(self) -> u8 {
        self.field::<3>()
    }

    /// Register X, bits 8-11
    pub const fn x(self) -> u8 {
        self.field::<2>()
    }

    /// Register Y, bits 4-7
    pub const fn y(self) -> u8 {
        self.field::<1>()
    }

    /// Count or sub-opcode, bits 0-3
    pub const fn n(self) -> u8 {
        self.field::<0>()
    }

    /// Immediate, bits 0-7
    pub const fn byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Address operand, bits 0-11
    pub const fn addr(self) -> u16 {
        self.0 & 0x0FFF
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode(0x{:04x})", self.0)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Instruction class names, shared by both execution strategies.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Mnemonic {
    Cls,
    Ret,
    Jp,
    Call,
    SeImm,
    SneImm,
    SeReg,
    SneReg,
    Ld,
    AddImm,
    Mov,
    Or,
    And,
    Xor,
    Add,
    Sub,
    Shr,
    Subn,
    Shl,
    SetIndex,
    JpOffset,
    Rnd,
    Drw,
    Skp,
    Sknp,
    GetD,
    GetK,
    SetD,
    SetS,
    AddIndex,
    SetCh,
    Std,
    Str,
    Ldr,
    Scd,
    Scr,
    Scl,
    Exit,
    Low,
    High,
    Xdrw,
    SetHiCh,
    SaveFlags,
    LoadFlags,
    Guard,
    Illegal,
}

impl Mnemonic {
    pub fn name(self) -> &'static str {
        match self {
            Mnemonic::Cls => "CLS",
            Mnemonic::Ret => "RET",
            Mnemonic::Jp => "JP",
            Mnemonic::Call => "CALL",
            Mnemonic::SeImm | Mnemonic::SeReg => "SE",
            Mnemonic::SneImm | Mnemonic::SneReg => "SNE",
            Mnemonic::Ld | Mnemonic::Mov => "LD",
            Mnemonic::AddImm | Mnemonic::Add => "ADD",
            Mnemonic::Or => "OR",
            Mnemonic::And => "AND",
            Mnemonic::Xor => "XOR",
            Mnemonic::Sub => "SUB",
            Mnemonic::Shr => "SHR",
            Mnemonic::Subn => "SUBN",
            Mnemonic::Shl => "SHL",
            Mnemonic::SetIndex => "LD I",
            Mnemonic::JpOffset => "JP V0",
            Mnemonic::Rnd => "RND",
            Mnemonic::Drw => "DRW",
            Mnemonic::Skp => "SKP",
            Mnemonic::Sknp => "SKNP",
            Mnemonic::GetD => "LD DT>",
            Mnemonic::GetK => "LD K",
            Mnemonic::SetD => "LD >DT",
            Mnemonic::SetS => "LD >ST",
            Mnemonic::AddIndex => "ADD I",
            Mnemonic::SetCh => "LD F",
            Mnemonic::Std => "LD B",
            Mnemonic::Str => "LD [I]<",
            Mnemonic::Ldr => "LD >[I]",
            Mnemonic::Scd => "SCD",
            Mnemonic::Scr => "SCR",
            Mnemonic::Scl => "SCL",
            Mnemonic::Exit => "EXIT",
            Mnemonic::Low => "LOW",
            Mnemonic::High => "HIGH",
            Mnemonic::Xdrw => "XDRW",
            Mnemonic::SetHiCh => "LD HF",
            Mnemonic::SaveFlags => "LD R<",
            Mnemonic::LoadFlags => "LD >R",
            Mnemonic::Guard => "GUARD",
            Mnemonic::Illegal => "ILLEGAL",
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded instruction with its operands pulled out of the opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instruction {
    // 00E0
    Cls,
    // 00EE
    Ret,
    // 1NNN
    Jp(u16),
    // 2NNN
    Call(u16),
    // 3XNN
    SeImm(u8, u8),
    // 4XNN
    SneImm(u8, u8),
    // 5XY0
    SeReg(u8, u8),
    // 9XY0
    SneReg(u8, u8),
    // 6XNN
    Ld(u8, u8),
    // 7XNN
    AddImm(u8, u8),
    // 8XY0
    Mov(u8, u8),
    // 8XY1
    Or(u8, u8),
    // 8XY2
    And(u8, u8),
    // 8XY3
    Xor(u8, u8),
    // 8XY4
    Add(u8, u8),
    // 8XY5
    Sub(u8, u8),
    // 8XY6
    Shr(u8, u8),
    // 8XY7
    Subn(u8, u8),
    // 8XYE
    Shl(u8, u8),
    // ANNN
    SetIndex(u16),
    // BNNN, X kept for the BXNN quirk
    JpOffset(u8, u16),
    // CXNN
    Rnd(u8, u8),
    // DXYN
    Drw(u8, u8, u8),
    // EX9E
    Skp(u8),
    // EXA1
    Sknp(u8),
    // FX07
    GetD(u8),
    // FX0A
    GetK(u8),
    // FX15
    SetD(u8),
    // FX18
    SetS(u8),
    // FX1E
    AddIndex(u8),
    // FX29
    SetCh(u8),
    // FX33
    Std(u8),
    // FX55
    Str(u8),
    // FX65
    Ldr(u8),

    // 00CN (Super-CHIP)
    Scd(u8),
    // 00FB
    Scr,
    // 00FC
    Scl,
    // 00FD
    Exit,
    // 00FE
    Low,
    // 00FF
    High,
    // DXY0, 16x16 sprite
    Xdrw(u8, u8),
    // FX30
    SetHiCh(u8),
    // FX75, X <= 7
    SaveFlags(u8),
    // FX85, X <= 7
    LoadFlags(u8),

    // FFFF sentinel past the end of memory
    Guard,
    Illegal(Opcode),
}

impl Instruction {
    /// Classify `op` for the given instruction set.
    pub fn decode(op: Opcode, mode: Chip8Mode) -> Instruction {
        use Instruction::*;

        let schip = mode == Chip8Mode::SuperChip;
        let (x, y, n) = (op.x(), op.y(), op.n());

        match (op.class(), x, y, n) {
            (0x0, 0x0, 0xE, 0x0) => Cls,
            (0x0, 0x0, 0xE, 0xE) => Ret,
            (0x0, 0x0, 0xC, _) if schip => Scd(n),
            (0x0, 0x0, 0xF, 0xB) if schip => Scr,
            (0x0, 0x0, 0xF, 0xC) if schip => Scl,
            (0x0, 0x0, 0xF, 0xD) if schip => Exit,
            (0x0, 0x0, 0xF, 0xE) if schip => Low,
            (0x0, 0x0, 0xF, 0xF) if schip => High,
            (0x1, _, _, _) => Jp(op.addr()),
            (0x2, _, _, _) => Call(op.addr()),
            (0x3, _, _, _) => SeImm(x, op.byte()),
            (0x4, _, _, _) => SneImm(x, op.byte()),
            (0x5, _, _, 0x0) => SeReg(x, y),
            (0x6, _, _, _) => Ld(x, op.byte()),
            (0x7, _, _, _) => AddImm(x, op.byte()),
            (0x8, _, _, 0x0) => Mov(x, y),
            (0x8, _, _, 0x1) => Or(x, y),
            (0x8, _, _, 0x2) => And(x, y),
            (0x8, _, _, 0x3) => Xor(x, y),
            (0x8, _, _, 0x4) => Add(x, y),
            (0x8, _, _, 0x5) => Sub(x, y),
            (0x8, _, _, 0x6) => Shr(x, y),
            (0x8, _, _, 0x7) => Subn(x, y),
            (0x8, _, _, 0xE) => Shl(x, y),
            (0x9, _, _, 0x0) => SneReg(x, y),
            (0xA, _, _, _) => SetIndex(op.addr()),
            (0xB, _, _, _) => JpOffset(x, op.addr()),
            (0xC, _, _, _) => Rnd(x, op.byte()),
            (0xD, _, _, 0x0) if schip => Xdrw(x, y),
            (0xD, _, _, _) => Drw(x, y, n),
            (0xE, _, 0x9, 0xE) => Skp(x),
            (0xE, _, 0xA, 0x1) => Sknp(x),
            (0xF, 0xF, 0xF, 0xF) => Guard,
            (0xF, _, 0x0, 0x7) => GetD(x),
            (0xF, _, 0x0, 0xA) => GetK(x),
            (0xF, _, 0x1, 0x5) => SetD(x),
            (0xF, _, 0x1, 0x8) => SetS(x),
            (0xF, _, 0x1, 0xE) => AddIndex(x),
            (0xF, _, 0x2, 0x9) => SetCh(x),
            (0xF, _, 0x3, 0x0) if schip => SetHiCh(x),
            (0xF, _, 0x3, 0x3) => Std(x),
            (0xF, _, 0x5, 0x5) => Str(x),
            (0xF, _, 0x6, 0x5) => Ldr(x),
            (0xF, 0x0..=0x7, 0x7, 0x5) if schip => SaveFlags(x),
            (0xF, 0x0..=0x7, 0x8, 0x5) if schip => LoadFlags(x),
            _ => Illegal(op),
        }
    }

    pub fn mnemonic(&self) -> Mnemonic {
        use Instruction::*;

        match self {
            Cls => Mnemonic::Cls,
            Ret => Mnemonic::Ret,
            Jp(..) => Mnemonic::Jp,
            Call(..) => Mnemonic::Call,
            SeImm(..) => Mnemonic::SeImm,
            SneImm(..) => Mnemonic::SneImm,
            SeReg(..) => Mnemonic::SeReg,
            SneReg(..) => Mnemonic::SneReg,
            Ld(..) => Mnemonic::Ld,
            AddImm(..) => Mnemonic::AddImm,
            Mov(..) => Mnemonic::Mov,
            Or(..) => Mnemonic::Or,
            And(..) => Mnemonic::And,
            Xor(..) => Mnemonic::Xor,
            Add(..) => Mnemonic::Add,
            Sub(..) => Mnemonic::Sub,
            Shr(..) => Mnemonic::Shr,
            Subn(..) => Mnemonic::Subn,
            Shl(..) => Mnemonic::Shl,
            SetIndex(..) => Mnemonic::SetIndex,
            JpOffset(..) => Mnemonic::JpOffset,
            Rnd(..) => Mnemonic::Rnd,
            Drw(..) => Mnemonic::Drw,
            Skp(..) => Mnemonic::Skp,
            Sknp(..) => Mnemonic::Sknp,
            GetD(..) => Mnemonic::GetD,
            GetK(..) => Mnemonic::GetK,
            SetD(..) => Mnemonic::SetD,
            SetS(..) => Mnemonic::SetS,
            AddIndex(..) => Mnemonic::AddIndex,
            SetCh(..) => Mnemonic::SetCh,
            Std(..) => Mnemonic::Std,
            Str(..) => Mnemonic::Str,
            Ldr(..) => Mnemonic::Ldr,
            Scd(..) => Mnemonic::Scd,
            Scr => Mnemonic::Scr,
            Scl => Mnemonic::Scl,
            Exit => Mnemonic::Exit,
            Low => Mnemonic::Low,
            High => Mnemonic::High,
            Xdrw(..) => Mnemonic::Xdrw,
            SetHiCh(..) => Mnemonic::SetHiCh,
            SaveFlags(..) => Mnemonic::SaveFlags,
            LoadFlags(..) => Mnemonic::LoadFlags,
            Guard => Mnemonic::Guard,
            Illegal(..) => Mnemonic::Illegal,
        }
    }
}
