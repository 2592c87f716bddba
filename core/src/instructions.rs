//! Instruction semantics shared by the interpreter and the dispatch table.
//!
//! Each method is one transaction against `MachineState`: it reads operands,
//! writes results (Vx before VF), then moves `pc`. A method that fails leaves
//! the state untouched.

use rand::RngCore;

use crate::{
    display::Geometry,
    error::Chip8Error,
    keypad::Keypad,
    opcode::{Instruction, Opcode},
    state::{
        MachineState, BIG_FONT_ADDR, BIG_FONT_GLYPH_SIZE, FONT_ADDR, FONT_GLYPH_SIZE,
        MEMORY_SIZE, STACK_DEPTH,
    },
};

/// What the execution loop has to do after an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Effect {
    Next,
    Redraw,
    /// Suspend until a key arrives for register X
    AwaitKey(u8),
    Exit,
}

pub(crate) type ExecResult = Result<Effect, Chip8Error>;

/// Columns moved by 00FB/00FC
const SCROLL_COLUMNS: usize = 4;

const VF: usize = 0xF;

impl MachineState {
    /// Run a decoded instruction, interpreter strategy.
    pub(crate) fn execute(&mut self, ins: Instruction, keypad: &dyn Keypad) -> ExecResult {
        use Instruction::*;

        match ins {
            Cls => self.clear_screen(),
            Ret => self.ret(),
            Jp(addr) => self.jump(addr),
            Call(addr) => self.call(addr),
            SeImm(x, kk) => self.skip_if(self.regs[x as usize] == kk),
            SneImm(x, kk) => self.skip_if(self.regs[x as usize] != kk),
            SeReg(x, y) => self.skip_if(self.regs[x as usize] == self.regs[y as usize]),
            SneReg(x, y) => self.skip_if(self.regs[x as usize] != self.regs[y as usize]),
            Ld(x, kk) => self.load_immediate(x, kk),
            AddImm(x, kk) => self.add_immediate(x, kk),
            Mov(x, y) => self.mov(x, y),
            Or(x, y) => self.or(x, y),
            And(x, y) => self.and(x, y),
            Xor(x, y) => self.xor(x, y),
            Add(x, y) => self.add(x, y),
            Sub(x, y) => self.sub(x, y),
            Shr(x, y) => self.shr(x, y),
            Subn(x, y) => self.subn(x, y),
            Shl(x, y) => self.shl(x, y),
            SetIndex(addr) => self.set_index(addr),
            JpOffset(x, addr) => self.jump_with_offset(x, addr),
            Rnd(x, kk) => self.random(x, kk),
            Drw(x, y, n) => self.draw(x, y, n),
            Xdrw(x, y) => self.draw_wide(x, y),
            Skp(x) => self.skip_if(keypad.is_key_down(self.regs[x as usize] & 0xF)),
            Sknp(x) => self.skip_if(!keypad.is_key_down(self.regs[x as usize] & 0xF)),
            GetD(x) => self.get_delay(x),
            GetK(x) => self.get_key(x),
            SetD(x) => self.set_delay(x),
            SetS(x) => self.set_sound(x),
            AddIndex(x) => self.add_index(x),
            SetCh(x) => self.set_char(x),
            SetHiCh(x) => self.set_big_char(x),
            Std(x) => self.store_bcd(x),
            Str(x) => self.store(x),
            Ldr(x) => self.load(x),
            Scd(n) => self.scroll_down(n),
            Scr => self.scroll_right(),
            Scl => self.scroll_left(),
            Exit => self.exit(),
            Low => self.set_geometry(Geometry::Standard),
            High => self.set_geometry(Geometry::Extended),
            SaveFlags(x) => self.save_flags(x),
            LoadFlags(x) => self.load_flags(x),
            Guard => self.guard(),
            Illegal(op) => self.illegal(op),
        }
    }

    fn next(&mut self) -> ExecResult {
        self.pc = self.pc.wrapping_add(2);
        Ok(Effect::Next)
    }

    fn redraw(&mut self) -> ExecResult {
        self.pc = self.pc.wrapping_add(2);
        Ok(Effect::Redraw)
    }

    pub(crate) fn skip_if(&mut self, condition: bool) -> ExecResult {
        let step = if condition { 4 } else { 2 };
        self.pc = self.pc.wrapping_add(step);
        Ok(Effect::Next)
    }

    // 00E0
    pub(crate) fn clear_screen(&mut self) -> ExecResult {
        self.display.clear();
        self.redraw()
    }

    // 00EE
    pub(crate) fn ret(&mut self) -> ExecResult {
        if self.sp == 0 {
            return Err(Chip8Error::StackUnderflow { pc: self.pc });
        }
        self.sp -= 1;
        self.pc = self.stack[self.sp as usize] & 0x0FFF;
        Ok(Effect::Next)
    }

    // 1NNN
    pub(crate) fn jump(&mut self, addr: u16) -> ExecResult {
        self.pc = addr & 0x0FFF;
        Ok(Effect::Next)
    }

    // 2NNN
    pub(crate) fn call(&mut self, addr: u16) -> ExecResult {
        if self.sp as usize >= STACK_DEPTH {
            return Err(Chip8Error::StackOverflow { pc: self.pc });
        }
        self.stack[self.sp as usize] = self.pc.wrapping_add(2);
        self.sp += 1;
        self.pc = addr & 0x0FFF;
        Ok(Effect::Next)
    }

    // 6XNN
    pub(crate) fn load_immediate(&mut self, x: u8, kk: u8) -> ExecResult {
        self.regs[x as usize] = kk;
        self.next()
    }

    // 7XNN, VF untouched
    pub(crate) fn add_immediate(&mut self, x: u8, kk: u8) -> ExecResult {
        self.regs[x as usize] = self.regs[x as usize].wrapping_add(kk);
        self.next()
    }

    // 8XY0
    pub(crate) fn mov(&mut self, x: u8, y: u8) -> ExecResult {
        self.regs[x as usize] = self.regs[y as usize];
        self.next()
    }

    // 8XY1
    pub(crate) fn or(&mut self, x: u8, y: u8) -> ExecResult {
        self.regs[x as usize] |= self.regs[y as usize];
        self.next()
    }

    // 8XY2
    pub(crate) fn and(&mut self, x: u8, y: u8) -> ExecResult {
        self.regs[x as usize] &= self.regs[y as usize];
        self.next()
    }

    // 8XY3
    pub(crate) fn xor(&mut self, x: u8, y: u8) -> ExecResult {
        self.regs[x as usize] ^= self.regs[y as usize];
        self.next()
    }

    // 8XY4
    pub(crate) fn add(&mut self, x: u8, y: u8) -> ExecResult {
        let (sum, carry) = self.regs[x as usize].overflowing_add(self.regs[y as usize]);
        self.regs[x as usize] = sum;
        self.regs[VF] = carry as u8;
        self.next()
    }

    // 8XY5, VF = 1 when no borrow
    pub(crate) fn sub(&mut self, x: u8, y: u8) -> ExecResult {
        let (diff, borrow) = self.regs[x as usize].overflowing_sub(self.regs[y as usize]);
        self.regs[x as usize] = diff;
        self.regs[VF] = (!borrow) as u8;
        self.next()
    }

    // 8XY7
    pub(crate) fn subn(&mut self, x: u8, y: u8) -> ExecResult {
        let (diff, borrow) = self.regs[y as usize].overflowing_sub(self.regs[x as usize]);
        self.regs[x as usize] = diff;
        self.regs[VF] = (!borrow) as u8;
        self.next()
    }

    fn shift_source(&self, x: u8, y: u8) -> u8 {
        if self.quirks.shift_uses_vy {
            self.regs[y as usize]
        } else {
            self.regs[x as usize]
        }
    }

    // 8XY6
    pub(crate) fn shr(&mut self, x: u8, y: u8) -> ExecResult {
        let value = self.shift_source(x, y);
        self.regs[x as usize] = value >> 1;
        self.regs[VF] = value & 0x01;
        self.next()
    }

    // 8XYE
    pub(crate) fn shl(&mut self, x: u8, y: u8) -> ExecResult {
        let value = self.shift_source(x, y);
        self.regs[x as usize] = value << 1;
        self.regs[VF] = (value & 0x80) >> 7;
        self.next()
    }

    // ANNN
    pub(crate) fn set_index(&mut self, addr: u16) -> ExecResult {
        self.index = addr;
        self.next()
    }

    // BNNN, or BXNN with the quirk
    pub(crate) fn jump_with_offset(&mut self, x: u8, addr: u16) -> ExecResult {
        let offset = if self.quirks.jump_uses_vx {
            self.regs[x as usize]
        } else {
            self.regs[0]
        };
        self.pc = addr.wrapping_add(offset as u16) & 0x0FFF;
        Ok(Effect::Next)
    }

    // CXNN
    pub(crate) fn random(&mut self, x: u8, kk: u8) -> ExecResult {
        let n = self.rng.next_u32() as u8;
        self.regs[x as usize] = n & kk;
        self.next()
    }

    fn sprite(&self, len: u16) -> Vec<u8> {
        (0..len)
            .map(|i| self.read_u8(self.index.wrapping_add(i)))
            .collect()
    }

    // DXYN
    pub(crate) fn draw(&mut self, x: u8, y: u8, n: u8) -> ExecResult {
        let sprite = self.sprite(n as u16);
        let (vx, vy) = (self.regs[x as usize], self.regs[y as usize]);
        let collision = self.display.draw(vx, vy, &sprite, false);
        self.regs[VF] = collision as u8;
        self.redraw()
    }

    // DXY0, 16x16
    pub(crate) fn draw_wide(&mut self, x: u8, y: u8) -> ExecResult {
        let sprite = self.sprite(32);
        let (vx, vy) = (self.regs[x as usize], self.regs[y as usize]);
        let collision = self.display.draw(vx, vy, &sprite, true);
        self.regs[VF] = collision as u8;
        self.redraw()
    }

    // FX07
    pub(crate) fn get_delay(&mut self, x: u8) -> ExecResult {
        self.regs[x as usize] = self.timers.delay();
        self.next()
    }

    // FX0A, pc stays put until the key is delivered
    pub(crate) fn get_key(&mut self, x: u8) -> ExecResult {
        Ok(Effect::AwaitKey(x))
    }

    pub(crate) fn deliver_key(&mut self, x: u8, key: u8) {
        self.regs[x as usize] = key & 0xF;
        self.pc = self.pc.wrapping_add(2);
    }

    // FX15
    pub(crate) fn set_delay(&mut self, x: u8) -> ExecResult {
        self.timers.set_delay(self.regs[x as usize]);
        self.next()
    }

    // FX18
    pub(crate) fn set_sound(&mut self, x: u8) -> ExecResult {
        self.timers.set_sound(self.regs[x as usize]);
        self.next()
    }

    // FX1E
    pub(crate) fn add_index(&mut self, x: u8) -> ExecResult {
        self.index = self.index.wrapping_add(self.regs[x as usize] as u16);
        if self.quirks.mask_index {
            self.index &= 0x0FFF;
        }
        self.next()
    }

    // FX29
    pub(crate) fn set_char(&mut self, x: u8) -> ExecResult {
        let glyph = (self.regs[x as usize] & 0xF) as u16;
        self.index = FONT_ADDR + glyph * FONT_GLYPH_SIZE;
        self.next()
    }

    // FX30
    pub(crate) fn set_big_char(&mut self, x: u8) -> ExecResult {
        let glyph = (self.regs[x as usize] & 0xF) as u16;
        self.index = BIG_FONT_ADDR + glyph * BIG_FONT_GLYPH_SIZE;
        self.next()
    }

    // FX33
    pub(crate) fn store_bcd(&mut self, x: u8) -> ExecResult {
        let value = self.regs[x as usize];
        let digits = [value / 100, (value / 10) % 10, value % 10];
        for (i, digit) in digits.into_iter().enumerate() {
            self.write_u8(self.index.wrapping_add(i as u16), digit);
        }
        self.next()
    }

    fn advance_index_after_copy(&mut self, x: u8) {
        if self.quirks.load_store_increment {
            self.index = self.index.wrapping_add(x as u16 + 1);
        }
    }

    // FX55
    pub(crate) fn store(&mut self, x: u8) -> ExecResult {
        for i in 0..=x {
            self.write_u8(self.index.wrapping_add(i as u16), self.regs[i as usize]);
        }
        self.advance_index_after_copy(x);
        self.next()
    }

    // FX65
    pub(crate) fn load(&mut self, x: u8) -> ExecResult {
        for i in 0..=x {
            self.regs[i as usize] = self.read_u8(self.index.wrapping_add(i as u16));
        }
        self.advance_index_after_copy(x);
        self.next()
    }

    // 00CN
    pub(crate) fn scroll_down(&mut self, n: u8) -> ExecResult {
        self.display.scroll_down(n as usize);
        self.redraw()
    }

    // 00FB
    pub(crate) fn scroll_right(&mut self) -> ExecResult {
        self.display.scroll_right(SCROLL_COLUMNS);
        self.redraw()
    }

    // 00FC
    pub(crate) fn scroll_left(&mut self) -> ExecResult {
        self.display.scroll_left(SCROLL_COLUMNS);
        self.redraw()
    }

    // 00FD
    pub(crate) fn exit(&mut self) -> ExecResult {
        Ok(Effect::Exit)
    }

    // 00FE / 00FF
    pub(crate) fn set_geometry(&mut self, geometry: Geometry) -> ExecResult {
        self.display.set_geometry(geometry);
        self.redraw()
    }

    // FX75
    pub(crate) fn save_flags(&mut self, x: u8) -> ExecResult {
        let n = x as usize + 1;
        self.rpl[..n].copy_from_slice(&self.regs[..n]);
        self.next()
    }

    // FX85
    pub(crate) fn load_flags(&mut self, x: u8) -> ExecResult {
        let n = x as usize + 1;
        self.regs[..n].copy_from_slice(&self.rpl[..n]);
        self.next()
    }

    // FFFF, only a flow guard when fetched past addressable memory
    pub(crate) fn guard(&mut self) -> ExecResult {
        if self.pc as usize >= MEMORY_SIZE {
            Err(Chip8Error::InstructionFlowGuard { pc: self.pc })
        } else {
            Err(Chip8Error::IllegalOpcode {
                opcode: 0xFFFF,
                pc: self.pc,
            })
        }
    }

    pub(crate) fn illegal(&mut self, op: Opcode) -> ExecResult {
        Err(Chip8Error::IllegalOpcode {
            opcode: op.raw(),
            pc: self.pc,
        })
    }
}
