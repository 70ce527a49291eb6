//! The steady state loop: resolve the PC, find or compile a block, run it.

use std::fmt::Write;

use tracing::{debug, info};
use vr4300::exception::{self, ExceptionDescriptor};
use vr4300::{memory, AccessKind, AddressTranslator, Bus, CpuState, Mmu};

use crate::backend::{self, CodeBuffer, ExecContext};
use crate::builder::{build_ir, SysConfig};
use crate::cache::{CodeCache, CodeRange};
use crate::config::DynarecConfig;
use crate::directory::{Directory, TranslationBlock};
use crate::error::{CompileError, DynarecError};
use crate::formatter::{form_block, TranslationUnit};
use crate::ir::IrContext;
use crate::optimizer::optimize;
use crate::regalloc::{allocate, Allocations};
use crate::CYCLES_PER_INSTR;

/// The surrounding system's scheduler, as far as idle loops care
pub trait EventClock {
    /// Cycles until something could change what an idle loop is waiting on
    fn cycles_until_next_event(&self) -> Option<u64>;
}

/// A system with nothing scheduled. Idle loops run normally.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl EventClock for NoEvents {
    fn cycles_until_next_event(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DynarecStats {
    pub blocks_compiled: u64,
    pub cache_flushes: u64,
    pub invalidations: u64,
    pub sysconfig_misses: u64,
    pub idle_loop_skips: u64,
    pub blocks_executed: u64,
}

/// Every write from compiled code goes through here so stores into translated pages drop them
struct InvalidatingBus<'a> {
    bus: &'a mut dyn Bus,
    directory: &'a mut Directory,
    stats: &'a mut DynarecStats,
}

impl Bus for InvalidatingBus<'_> {
    fn read(&mut self, address: u32, size: u8) -> u64 {
        self.bus.read(address, size)
    }

    fn write(&mut self, address: u32, size: u8, value: u64) {
        self.bus.write(address, size, value);
        if self.directory.invalidate(address) {
            self.stats.invalidations += 1;
        }
    }
}

/// What `last_block_dump` shows
struct LastCompile {
    unit: TranslationUnit,
    allocs: Allocations,
    code: CodeRange,
}

/// Compiler, code cache and directory. Owns no guest state.
pub struct Dynarec {
    config: DynarecConfig,
    cache: CodeCache,
    directory: Directory,
    ctx: IrContext,
    buf: CodeBuffer,
    spill: Vec<u64>,
    stats: DynarecStats,
    last: Option<LastCompile>,
}

impl Dynarec {
    pub fn new(config: DynarecConfig) -> Dynarec {
        Dynarec {
            cache: CodeCache::new(config.code_cache_size),
            directory: Directory::new(),
            ctx: IrContext::new(),
            buf: CodeBuffer::with_capacity(4096),
            spill: Vec::new(),
            stats: DynarecStats::default(),
            last: None,
            config,
        }
    }

    pub fn config(&self) -> &DynarecConfig {
        &self.config
    }

    pub fn stats(&self) -> DynarecStats {
        self.stats
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Guest memory at `phys` changed behind the compiled code's back
    pub fn invalidate(&mut self, phys: u32) {
        if self.directory.invalidate(phys) {
            self.stats.invalidations += 1;
        }
    }

    /// Drop every compiled block
    pub fn flush_all(&mut self) {
        info!(target: "JIT", "flushing code cache ({} of {} bytes used)", self.cache.used(), self.cache.capacity());
        self.cache.flush();
        self.directory.clear();
        self.stats.cache_flushes += 1;
    }

    /// Execute one block (or take one fetch exception) and report the cycles it took
    pub fn step(
        &mut self,
        state: &mut CpuState,
        bus: &mut dyn Bus,
        mmu: &mut dyn AddressTranslator,
        clock: &dyn EventClock,
    ) -> Result<u64, DynarecError> {
        let pc = state.pc;
        let phys = match memory::translate(mmu, &state.cop0, pc, AccessKind::Fetch, 4) {
            Ok(phys) => phys,
            Err(fault) => {
                exception::raise(state, &ExceptionDescriptor::from_fault(fault, pc, false));
                return Ok(CYCLES_PER_INSTR);
            }
        };

        let sysconfig = SysConfig::current(&state.cop0);
        let block = match self.directory.get(phys) {
            Some(block) if block.sysconfig == sysconfig && block.start_pc == pc => block,
            Some(block) => {
                if block.sysconfig != sysconfig {
                    debug!(target: "JIT", "{:#x} compiled under {:?}, now {:?}", pc, block.sysconfig, sysconfig);
                    self.stats.sysconfig_misses += 1;
                }
                self.compile(pc, phys, sysconfig, state, bus, mmu)?
            }
            None => self.compile(pc, phys, sysconfig, state, bus, mmu)?,
        };

        if block.idle_loop && self.config.idle_loop_detection {
            if let Some(cycles) = clock.cycles_until_next_event() {
                self.stats.idle_loop_skips += 1;
                return Ok(cycles + 1);
            }
        }

        let code = self.cache.get(block.code).ok_or(DynarecError::CorruptBlock { offset: 0 })?;
        let mut bus = InvalidatingBus { bus, directory: &mut self.directory, stats: &mut self.stats };
        let mut ctx = ExecContext { state, bus: &mut bus, mmu };
        let retired = backend::execute(code, &mut ctx, &mut self.spill)?;
        self.stats.blocks_executed += 1;
        Ok(retired as u64 * CYCLES_PER_INSTR)
    }

    fn compile(
        &mut self,
        pc: u64,
        phys: u32,
        sysconfig: SysConfig,
        state: &CpuState,
        bus: &mut dyn Bus,
        mmu: &mut dyn AddressTranslator,
    ) -> Result<TranslationBlock, CompileError> {
        self.last = None;
        let unit = form_block(pc, phys, bus, mmu, &state.cop0)?;
        build_ir(&mut self.ctx, &unit, sysconfig)?;
        optimize(&mut self.ctx);
        let allocs = allocate(&self.ctx, self.config.platform.platform())?;
        backend::encode_block(&self.ctx, &allocs, unit.len() as u32, &mut self.buf)?;

        let size = self.buf.len();
        if size > self.cache.capacity() {
            return Err(CompileError::BlockTooLarge { size, capacity: self.cache.capacity() });
        }
        let code = match self.cache.insert(self.buf.code()) {
            Some(code) => code,
            None => {
                self.flush_all();
                self.cache
                    .insert(self.buf.code())
                    .ok_or(CompileError::BlockTooLarge { size, capacity: self.cache.capacity() })?
            }
        };

        let block = TranslationBlock {
            code,
            start_pc: pc,
            len: unit.len() as u32,
            sysconfig,
            idle_loop: unit.is_idle_loop(),
        };
        self.directory.insert(phys, block, &unit.mask_updates);
        self.stats.blocks_compiled += 1;
        debug!(target: "JIT", "compiled {:#x} ({:#010x}): {} instructions, {} IR values, {} bytes", pc, phys, unit.len(), self.ctx.len(), size);

        self.last = Some(LastCompile { unit, allocs, code });
        if self.config.log_compilations {
            debug!(target: "JIT", "\n{}", self.last_block_dump());
        }
        Ok(block)
    }

    /// Guest instructions, IR with allocations, and host code of the last compiled block
    pub fn last_block_dump(&self) -> String {
        let Some(last) = &self.last else {
            return "no block compiled".to_string();
        };
        let mut out = String::from("guest:\n");
        for inst in &last.unit.instructions {
            let _ = writeln!(out, "  {:016x}  {:08x}  {}", inst.pc, inst.word(), inst.inst.disassemble(inst.pc));
        }
        if let Some(fault) = &last.unit.delay_slot_fault {
            let _ = writeln!(out, "  delay slot fetch faults: {:?}", fault.code);
        }

        out.push_str("ir:\n");
        for (id, value) in self.ctx.iter() {
            let _ = writeln!(out, "  {:>6} = {:<48} {}", id.to_string(), value.to_string(), last.allocs.get(id));
        }

        out.push_str("host:\n");
        match self.cache.get(last.code).map(backend::disassemble) {
            Some(Ok(listing)) => {
                for line in listing.lines() {
                    let _ = writeln!(out, "  {}", line);
                }
            }
            Some(Err(err)) => {
                let _ = writeln!(out, "  {}", err);
            }
            None => out.push_str("  (flushed)\n"),
        }
        out
    }
}

/// A CPU run by the recompiler.
///
/// The guest state lives in a box that is allocated here and never replaced, since compiled
/// blocks are built against it.
pub struct Core<B: Bus, T: AddressTranslator = Mmu, C: EventClock = NoEvents> {
    state: Box<CpuState>,
    pub bus: B,
    pub mmu: T,
    pub clock: C,
    dynarec: Dynarec,
}

impl<B: Bus> Core<B> {
    pub fn new(bus: B, config: DynarecConfig) -> Self {
        Core::with_parts(bus, Mmu::new(), NoEvents, config)
    }
}

impl<B: Bus, T: AddressTranslator, C: EventClock> Core<B, T, C> {
    pub fn with_parts(bus: B, mmu: T, clock: C, config: DynarecConfig) -> Self {
        Core { state: Box::new(CpuState::new()), bus, mmu, clock, dynarec: Dynarec::new(config) }
    }

    pub fn state(&self) -> &CpuState {
        &self.state
    }

    /// Edit the guest state in place. Blocks stay valid: they check the parts they depend on.
    pub fn state_mut(&mut self) -> &mut CpuState {
        &mut self.state
    }

    /// Replace the whole guest state, dropping every compiled block
    pub fn load_state(&mut self, state: &CpuState) {
        *self.state = state.clone();
        self.dynarec.flush_all();
    }

    pub fn step(&mut self) -> Result<u64, DynarecError> {
        self.dynarec.step(&mut self.state, &mut self.bus, &mut self.mmu, &self.clock)
    }

    /// For writes to guest memory that don't come from the CPU (DMA, the front end)
    pub fn invalidate(&mut self, phys: u32) {
        self.dynarec.invalidate(phys);
    }

    pub fn flush_all(&mut self) {
        self.dynarec.flush_all();
    }

    pub fn stats(&self) -> DynarecStats {
        self.dynarec.stats()
    }

    pub fn dynarec(&self) -> &Dynarec {
        &self.dynarec
    }

    pub fn last_block_dump(&self) -> String {
        self.dynarec.last_block_dump()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vr4300::{asm, Ram};

    const BASE: u64 = 0xffff_ffff_8000_0000;

    fn core(program: &[u32]) -> Core<Ram> {
        let mut ram = Ram::new(0x4000);
        ram.load_words(0, program);
        let mut core = Core::new(ram, DynarecConfig { code_cache_size: 1 << 16, ..Default::default() });
        core.state_mut().pc = BASE;
        core
    }

    #[test]
    fn blocks_are_compiled_once() {
        let mut core = core(&[asm::addiu(8, 8, 1), asm::j(BASE), asm::nop()]);
        assert_eq!(core.step().unwrap(), 3);
        assert_eq!(core.step().unwrap(), 3);
        assert_eq!(core.state().gpr[8], 2);
        assert_eq!(core.stats().blocks_compiled, 1);
        assert_eq!(core.stats().blocks_executed, 2);
    }

    #[test]
    fn fetch_faults_raise_without_compiling() {
        let mut core = core(&[]);
        core.state_mut().pc = 0x4000_0000;
        assert_eq!(core.step().unwrap(), CYCLES_PER_INSTR);
        assert_eq!(core.stats().blocks_compiled, 0);
        assert_eq!(core.state().pc, BASE);
    }

    #[test]
    fn same_page_through_another_mapping_recompiles() {
        let mut core = core(&[asm::jal(BASE + 0x10), asm::nop(), asm::nop(), asm::nop(), asm::jr(31), asm::nop()]);
        core.step().unwrap();
        assert_eq!(core.state().gpr[31], BASE + 8);
        // kseg1 reaches the same physical word
        core.state_mut().pc = 0xffff_ffff_a000_0000;
        core.step().unwrap();
        assert_eq!(core.state().gpr[31], 0xffff_ffff_a000_0008);
        assert_eq!(core.stats().blocks_compiled, 2);
        assert_eq!(core.stats().sysconfig_misses, 0);
    }

    #[test]
    fn dump_has_all_three_sections() {
        let mut core = core(&[asm::addiu(8, 8, 1), asm::syscall()]);
        core.step().unwrap();
        let dump = core.last_block_dump();
        assert!(dump.contains("ADDIU"));
        assert!(dump.contains("ir:"));
        assert!(dump.contains("host:"));
        assert!(dump.contains("end 2"));
    }

    #[test]
    fn load_state_flushes() {
        let mut core = core(&[asm::syscall()]);
        core.step().unwrap();
        let fresh = CpuState::new();
        core.load_state(&fresh);
        assert_eq!(core.stats().cache_flushes, 1);
        assert_eq!(core.dynarec().directory().resident_pages(), 0);
        assert_eq!(core.state(), &fresh);
    }
}
