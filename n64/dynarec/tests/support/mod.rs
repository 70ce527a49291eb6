#![allow(dead_code)]

use dynarec::{Core, DynarecConfig};
use vr4300::{CpuState, Interpreter, Mmu, Ram};

pub const BASE: u64 = 0xffff_ffff_8000_0000;
pub const RAM_SIZE: usize = 0x4000;

pub fn ram_with(offset: usize, program: &[u32]) -> Ram {
    let mut ram = Ram::new(RAM_SIZE);
    assert!(ram.load_words(offset, program));
    ram
}

pub fn core_with(program: &[u32], config: DynarecConfig) -> Core<Ram> {
    let mut core = Core::new(ram_with(0, program), config);
    core.state_mut().pc = BASE;
    core
}

/// Both engines over the same program and starting state
pub struct Lockstep {
    pub core: Core<Ram>,
    pub state: CpuState,
    pub ram: Ram,
    mmu: Mmu,
    interpreter: Interpreter,
}

impl Lockstep {
    pub fn new(program: &[u32], setup: impl Fn(&mut CpuState)) -> Lockstep {
        let mut core = core_with(program, DynarecConfig { code_cache_size: 1 << 20, ..Default::default() });
        setup(core.state_mut());
        let state = core.state().clone();
        Lockstep { core, state, ram: ram_with(0, program), mmu: Mmu::new(), interpreter: Interpreter::new() }
    }

    /// One dispatcher step, then as many interpreter steps as it retired
    pub fn step(&mut self) -> u64 {
        let cycles = self.core.step().unwrap_or_else(|e| panic!("{}\n{}", e, self.core.last_block_dump()));
        for _ in 0..cycles {
            self.interpreter.step(&mut self.state, &mut self.ram, &mut self.mmu).unwrap();
        }
        cycles
    }

    pub fn diverged(&self) -> Option<String> {
        if self.core.state() != &self.state {
            return Some(format!(
                "jit:\n{:x?}\ninterpreter:\n{:x?}\nlast block:\n{}",
                self.core.state(),
                self.state,
                self.core.last_block_dump()
            ));
        }
        if self.core.bus.bytes() != self.ram.bytes() {
            return Some(format!("memory differs\nlast block:\n{}", self.core.last_block_dump()));
        }
        None
    }
}
