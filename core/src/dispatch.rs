//! Full-opcode dispatch table.
//!
//! Every one of the 65536 opcode values maps straight to a handler. The
//! table starts out illegal everywhere and is filled from a short list of
//! `(mask, pattern)` rules, where later rules overwrite earlier ones.

use crate::{
    display::Geometry,
    instructions::ExecResult,
    keypad::Keypad,
    opcode::{Mnemonic, Opcode},
    state::{Chip8Mode, MachineState},
};

pub(crate) type Handler = fn(&mut MachineState, Opcode, &dyn Keypad) -> ExecResult;

#[derive(Clone, Copy)]
pub struct Entry {
    pub mnemonic: Mnemonic,
    pub(crate) handler: Handler,
}

struct Rule {
    mask: u16,
    pattern: u16,
    entry: Entry,
}

const fn rule(mask: u16, pattern: u16, mnemonic: Mnemonic, handler: Handler) -> Rule {
    Rule {
        mask,
        pattern,
        entry: Entry { mnemonic, handler },
    }
}

const TABLE_SIZE: usize = 0x10000;

const ILLEGAL: Entry = Entry {
    mnemonic: Mnemonic::Illegal,
    handler: |s, op, _| s.illegal(op),
};

static CHIP8_RULES: &[Rule] = &[
    rule(0xFFFF, 0x00E0, Mnemonic::Cls, |s, _, _| s.clear_screen()),
    rule(0xFFFF, 0x00EE, Mnemonic::Ret, |s, _, _| s.ret()),
    rule(0xF000, 0x1000, Mnemonic::Jp, |s, op, _| s.jump(op.addr())),
    rule(0xF000, 0x2000, Mnemonic::Call, |s, op, _| s.call(op.addr())),
    rule(0xF000, 0x3000, Mnemonic::SeImm, |s, op, _| {
        s.skip_if(s.regs[op.x() as usize] == op.byte())
    }),
    rule(0xF000, 0x4000, Mnemonic::SneImm, |s, op, _| {
        s.skip_if(s.regs[op.x() as usize] != op.byte())
    }),
    rule(0xF00F, 0x5000, Mnemonic::SeReg, |s, op, _| {
        s.skip_if(s.regs[op.x() as usize] == s.regs[op.y() as usize])
    }),
    rule(0xF000, 0x6000, Mnemonic::Ld, |s, op, _| s.load_immediate(op.x(), op.byte())),
    rule(0xF000, 0x7000, Mnemonic::AddImm, |s, op, _| s.add_immediate(op.x(), op.byte())),
    rule(0xF00F, 0x8000, Mnemonic::Mov, |s, op, _| s.mov(op.x(), op.y())),
    rule(0xF00F, 0x8001, Mnemonic::Or, |s, op, _| s.or(op.x(), op.y())),
    rule(0xF00F, 0x8002, Mnemonic::And, |s, op, _| s.and(op.x(), op.y())),
    rule(0xF00F, 0x8003, Mnemonic::Xor, |s, op, _| s.xor(op.x(), op.y())),
    rule(0xF00F, 0x8004, Mnemonic::Add, |s, op, _| s.add(op.x(), op.y())),
    rule(0xF00F, 0x8005, Mnemonic::Sub, |s, op, _| s.sub(op.x(), op.y())),
    rule(0xF00F, 0x8006, Mnemonic::Shr, |s, op, _| s.shr(op.x(), op.y())),
    rule(0xF00F, 0x8007, Mnemonic::Subn, |s, op, _| s.subn(op.x(), op.y())),
    rule(0xF00F, 0x800E, Mnemonic::Shl, |s, op, _| s.shl(op.x(), op.y())),
    rule(0xF00F, 0x9000, Mnemonic::SneReg, |s, op, _| {
        s.skip_if(s.regs[op.x() as usize] != s.regs[op.y() as usize])
    }),
    rule(0xF000, 0xA000, Mnemonic::SetIndex, |s, op, _| s.set_index(op.addr())),
    rule(0xF000, 0xB000, Mnemonic::JpOffset, |s, op, _| s.jump_with_offset(op.x(), op.addr())),
    rule(0xF000, 0xC000, Mnemonic::Rnd, |s, op, _| s.random(op.x(), op.byte())),
    rule(0xF000, 0xD000, Mnemonic::Drw, |s, op, _| s.draw(op.x(), op.y(), op.n())),
    rule(0xF0FF, 0xE09E, Mnemonic::Skp, |s, op, keys| {
        s.skip_if(keys.is_key_down(s.regs[op.x() as usize] & 0xF))
    }),
    rule(0xF0FF, 0xE0A1, Mnemonic::Sknp, |s, op, keys| {
        s.skip_if(!keys.is_key_down(s.regs[op.x() as usize] & 0xF))
    }),
    rule(0xF0FF, 0xF007, Mnemonic::GetD, |s, op, _| s.get_delay(op.x())),
    rule(0xF0FF, 0xF00A, Mnemonic::GetK, |s, op, _| s.get_key(op.x())),
    rule(0xF0FF, 0xF015, Mnemonic::SetD, |s, op, _| s.set_delay(op.x())),
    rule(0xF0FF, 0xF018, Mnemonic::SetS, |s, op, _| s.set_sound(op.x())),
    rule(0xF0FF, 0xF01E, Mnemonic::AddIndex, |s, op, _| s.add_index(op.x())),
    rule(0xF0FF, 0xF029, Mnemonic::SetCh, |s, op, _| s.set_char(op.x())),
    rule(0xF0FF, 0xF033, Mnemonic::Std, |s, op, _| s.store_bcd(op.x())),
    rule(0xF0FF, 0xF055, Mnemonic::Str, |s, op, _| s.store(op.x())),
    rule(0xF0FF, 0xF065, Mnemonic::Ldr, |s, op, _| s.load(op.x())),
];

static SUPER_CHIP_RULES: &[Rule] = &[
    rule(0xFFF0, 0x00C0, Mnemonic::Scd, |s, op, _| s.scroll_down(op.n())),
    rule(0xFFFF, 0x00FB, Mnemonic::Scr, |s, _, _| s.scroll_right()),
    rule(0xFFFF, 0x00FC, Mnemonic::Scl, |s, _, _| s.scroll_left()),
    rule(0xFFFF, 0x00FD, Mnemonic::Exit, |s, _, _| s.exit()),
    rule(0xFFFF, 0x00FE, Mnemonic::Low, |s, _, _| s.set_geometry(Geometry::Standard)),
    rule(0xFFFF, 0x00FF, Mnemonic::High, |s, _, _| s.set_geometry(Geometry::Extended)),
    rule(0xF00F, 0xD000, Mnemonic::Xdrw, |s, op, _| s.draw_wide(op.x(), op.y())),
    rule(0xF0FF, 0xF030, Mnemonic::SetHiCh, |s, op, _| s.set_big_char(op.x())),
    // Bit 11 clear keeps X within V0..V7
    rule(0xF8FF, 0xF075, Mnemonic::SaveFlags, |s, op, _| s.save_flags(op.x())),
    rule(0xF8FF, 0xF085, Mnemonic::LoadFlags, |s, op, _| s.load_flags(op.x())),
];

static GUARD_RULE: Rule = rule(0xFFFF, 0xFFFF, Mnemonic::Guard, |s, _, _| s.guard());

pub struct DispatchTable {
    entries: Box<[Entry]>,
}

impl DispatchTable {
    pub fn new(mode: Chip8Mode) -> DispatchTable {
        let mut entries = vec![ILLEGAL; TABLE_SIZE].into_boxed_slice();

        let extensions: &[Rule] = match mode {
            Chip8Mode::Chip8 => &[],
            Chip8Mode::SuperChip => SUPER_CHIP_RULES,
        };

        for rule in CHIP8_RULES
            .iter()
            .chain(extensions)
            .chain(std::iter::once(&GUARD_RULE))
        {
            fill(&mut entries, rule);
        }

        DispatchTable { entries }
    }

    pub fn lookup(&self, op: Opcode) -> Entry {
        self.entries[op.raw() as usize]
    }
}

/// Bind every opcode matching the rule, walking only the don't-care bits.
fn fill(entries: &mut [Entry], rule: &Rule) {
    debug_assert_eq!(rule.pattern & !rule.mask, 0);

    let free = !rule.mask;
    let mut bits: u16 = 0;
    loop {
        entries[(rule.pattern | bits) as usize] = rule.entry;
        if bits == free {
            break;
        }
        // Next subset of the free bits
        bits = bits.wrapping_sub(free) & free;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Instruction;

    #[test]
    fn test_every_opcode_agrees_with_decoder() {
        for mode in [Chip8Mode::Chip8, Chip8Mode::SuperChip] {
            let table = DispatchTable::new(mode);

            for raw in 0..=u16::MAX {
                let op = Opcode(raw);
                assert_eq!(
                    table.lookup(op).mnemonic,
                    Instruction::decode(op, mode).mnemonic(),
                    "mnemonic mismatch for 0x{:04x} in {:?}",
                    raw,
                    mode
                );
            }
        }
    }

    #[test]
    fn test_fill_covers_every_match() {
        let mut entries = vec![ILLEGAL; TABLE_SIZE];
        let rule = rule(0xF0FF, 0xE09E, Mnemonic::Skp, |s, _, _| s.exit());

        fill(&mut entries, &rule);

        let bound: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.mnemonic == Mnemonic::Skp)
            .map(|(i, _)| i)
            .collect();
        let expected: Vec<usize> = (0..16).map(|x| 0xE09E | (x << 8)).collect();
        assert_eq!(bound, expected);
    }

    #[test]
    fn test_narrow_rule_overrides() {
        let table = DispatchTable::new(Chip8Mode::SuperChip);

        assert_eq!(table.lookup(Opcode(0xD125)).mnemonic, Mnemonic::Drw);
        assert_eq!(table.lookup(Opcode(0xD120)).mnemonic, Mnemonic::Xdrw);
        assert_eq!(table.lookup(Opcode(0xFFFF)).mnemonic, Mnemonic::Guard);
    }

    #[test]
    fn test_unmatched_defaults_to_illegal() {
        let table = DispatchTable::new(Chip8Mode::Chip8);

        for raw in [0x0000u16, 0x00FF, 0x5001, 0x800F, 0xE0FF, 0xF030, 0xF075] {
            assert_eq!(table.lookup(Opcode(raw)).mnemonic, Mnemonic::Illegal);
        }
    }
}
