mod support;

use dynarec::{CompileError, Core, DynarecConfig, DynarecError, EventClock, NoEvents};
use support::{core_with, Lockstep, BASE, RAM_SIZE};
use vr4300::cop0::{cause, status, CAUSE, EPC, STATUS};
use vr4300::{asm, Mmu, Ram};

#[test]
fn branch_likely_not_taken_nullifies_its_slot() {
    let mut core = core_with(
        &[asm::bnel(1, 2, 2), asm::addiu(8, 8, 1), asm::addiu(8, 8, 1), asm::syscall()],
        DynarecConfig::default(),
    );
    assert_eq!(core.step().unwrap(), 1);
    assert_eq!(core.state().pc, BASE + 8);
    assert_eq!(core.state().gpr[8], 0);

    core.step().unwrap();
    assert_eq!(core.state().gpr[8], 1);
}

#[test]
fn stores_into_running_code_drop_it() {
    let patch = asm::addiu(8, 0, 2);
    let program = [
        asm::addiu(8, 0, 1),
        asm::lui(29, 0x8000),
        asm::lui(9, (patch >> 16) as u16),
        asm::ori(9, 9, patch as u16),
        asm::sw(9, 29, 0),
        asm::j(BASE + 0x20),
        asm::nop(),
        asm::nop(),
        asm::syscall(),
    ];
    let mut core = core_with(&program, DynarecConfig::default());

    // The block that did the store still runs to its end
    assert_eq!(core.step().unwrap(), 7);
    assert_eq!(core.state().gpr[8], 1);
    assert_eq!(core.state().pc, BASE + 0x20);
    assert_eq!(core.stats().invalidations, 1);
    assert_eq!(core.dynarec().directory().get(0), None);

    core.state_mut().pc = BASE;
    core.step().unwrap();
    assert_eq!(core.state().gpr[8], 2);
    assert_eq!(core.stats().blocks_compiled, 2);
}

fn ping_pong(config: DynarecConfig) -> Core<Ram> {
    let mut ram = Ram::new(RAM_SIZE);
    assert!(ram.load_words(0, &[asm::addiu(8, 8, 1), asm::j(BASE + 0x100), asm::nop()]));
    assert!(ram.load_words(0x100, &[asm::addiu(9, 9, 1), asm::j(BASE), asm::nop()]));
    let mut core = Core::new(ram, config);
    core.state_mut().pc = BASE;
    core
}

#[test]
fn full_cache_flushes_and_keeps_going() {
    let mut sizing = ping_pong(DynarecConfig::default());
    sizing.step().unwrap();
    let first = sizing.dynarec().cache().used();
    sizing.step().unwrap();
    let second = sizing.dynarec().cache().used() - first;

    // Room for either block but never both
    let capacity = first.max(second) + first.min(second) / 2;
    let mut core = ping_pong(DynarecConfig { code_cache_size: capacity, ..Default::default() });
    for _ in 0..4 {
        assert_eq!(core.step().unwrap(), 3);
    }
    assert!(core.stats().cache_flushes >= 2);
    assert_eq!(core.stats().blocks_compiled, 4);
    assert_eq!(core.state().gpr[8], 2);
    assert_eq!(core.state().gpr[9], 2);
    assert_eq!(core.state().pc, BASE);
}

#[test]
fn block_larger_than_the_cache_is_an_error() {
    let mut core = ping_pong(DynarecConfig { code_cache_size: 8, ..Default::default() });
    assert!(matches!(
        core.step(),
        Err(DynarecError::Compile(CompileError::BlockTooLarge { capacity: 8, .. }))
    ));
}

#[test]
fn fpu_register_mode_change_recompiles() {
    let mut core = core_with(&[asm::mfc1(9, 1), asm::j(BASE), asm::nop()], DynarecConfig::default());
    core.state_mut().fgr[0] = 0x1111_1111_2222_2222;
    core.state_mut().fgr[1] = 0x3333_3333_4444_4444;

    core.step().unwrap();
    assert_eq!(core.state().gpr[9], 0x4444_4444);

    // Odd registers become the high half of their even pair
    core.state_mut().cop0.regs[STATUS] &= !status::FR;
    core.step().unwrap();
    assert_eq!(core.state().gpr[9], 0x1111_1111);
    assert_eq!(core.stats().sysconfig_misses, 1);
    assert_eq!(core.stats().blocks_compiled, 2);

    // Same mode again reuses what is there
    core.step().unwrap();
    assert_eq!(core.stats().blocks_compiled, 2);
}

struct EventIn(u64);

impl EventClock for EventIn {
    fn cycles_until_next_event(&self) -> Option<u64> {
        Some(self.0)
    }
}

fn idle<C: EventClock>(clock: C, idle_loop_detection: bool) -> Core<Ram, Mmu, C> {
    let mut ram = Ram::new(RAM_SIZE);
    assert!(ram.load_words(0, &[asm::beq(0, 0, -1), asm::nop()]));
    let config = DynarecConfig { idle_loop_detection, ..Default::default() };
    let mut core = Core::with_parts(ram, Mmu::new(), clock, config);
    core.state_mut().pc = BASE;
    core
}

#[test]
fn idle_loop_skips_to_the_next_event() {
    let mut core = idle(EventIn(100), true);
    assert_eq!(core.step().unwrap(), 101);
    assert_eq!(core.state().pc, BASE);
    assert_eq!(core.stats().idle_loop_skips, 1);
    assert_eq!(core.stats().blocks_executed, 0);
}

#[test]
fn idle_loop_runs_without_a_pending_event() {
    let mut core = idle(NoEvents, true);
    assert_eq!(core.step().unwrap(), 2);
    assert_eq!(core.state().pc, BASE);
    assert_eq!(core.stats().idle_loop_skips, 0);

    let mut core = idle(EventIn(100), false);
    assert_eq!(core.step().unwrap(), 2);
    assert_eq!(core.stats().idle_loop_skips, 0);
}

#[test]
fn delay_slot_on_the_next_page_is_tracked() {
    let mut ram = Ram::new(RAM_SIZE);
    assert!(ram.load_words(0xff8, &[asm::addiu(8, 8, 1), asm::j(BASE + 0x2000), asm::addiu(9, 0, 7)]));
    assert!(ram.load_words(0x2000, &[asm::syscall()]));
    let mut core = Core::new(ram, DynarecConfig::default());
    core.state_mut().pc = BASE + 0xff8;

    assert_eq!(core.step().unwrap(), 3);
    assert_eq!(core.state().gpr[8], 1);
    assert_eq!(core.state().gpr[9], 7);
    assert_eq!(core.state().pc, BASE + 0x2000);
    assert!(core.dynarec().directory().is_code(0x1000));

    // Rewritten behind the CPU's back, as a DMA would
    assert!(core.bus.load_words(0x1000, &[asm::addiu(9, 0, 9)]));
    core.invalidate(0x1000);
    assert_eq!(core.stats().invalidations, 1);
    assert_eq!(core.dynarec().directory().get(0xff8), None);

    core.state_mut().pc = BASE + 0xff8;
    core.step().unwrap();
    assert_eq!(core.state().gpr[9], 9);
    assert_eq!(core.stats().blocks_compiled, 2);
}

#[test]
fn guest_exceptions_vector_through_compiled_code() {
    let mut core = core_with(&[asm::addiu(8, 0, 1), asm::syscall(), asm::addiu(8, 0, 2)], DynarecConfig::default());
    assert_eq!(core.step().unwrap(), 2);
    assert_eq!(core.state().pc, BASE + 0x180);
    assert_eq!(core.state().gpr[8], 1);
    assert_eq!(core.state().cop0.regs[vr4300::cop0::EPC], BASE + 4);
    assert!(core.state().cop0.exl());
}

const VECTOR: u64 = BASE + 0x180;

/// Run both engines block by block until the recompiler stops at `pc`
fn lockstep_until(run: &mut Lockstep, pc: u64, limit: u64) {
    let mut retired = 0;
    while run.core.state().pc != pc {
        assert!(retired < limit, "no stop at {:#x} within {} instructions", pc, limit);
        retired += run.step();
        if let Some(report) = run.diverged() {
            panic!("diverged after {} instructions\n{}", retired, report);
        }
    }
}

#[test]
fn likely_links_still_link_when_not_taken() {
    let program = [
        asm::bgezall(1, 2),
        asm::addiu(8, 8, 1),
        asm::or(12, 31, 0),
        asm::bltzall(0, 2),
        asm::addiu(9, 9, 1),
        asm::syscall(),
    ];
    let mut run = Lockstep::new(&program, |state| state.gpr[1] = u64::MAX);
    lockstep_until(&mut run, VECTOR, 16);

    let state = run.core.state();
    assert_eq!(state.gpr[12], BASE + 8);
    assert_eq!(state.gpr[31], BASE + 20);
    assert_eq!(state.gpr[8], 0);
    assert_eq!(state.gpr[9], 0);
    assert_eq!(state.cop0.regs[EPC], BASE + 20);
}

#[test]
fn jalr_reads_its_target_before_linking_into_it() {
    let program = [
        asm::lui(31, 0x8000),
        asm::ori(31, 31, 0x14),
        asm::jalr(31, 31),
        asm::nop(),
        asm::addiu(8, 0, 1),
        asm::syscall(),
    ];
    let mut run = Lockstep::new(&program, |_| {});
    lockstep_until(&mut run, VECTOR, 16);

    let state = run.core.state();
    assert_eq!(state.gpr[31], BASE + 0x10);
    assert_eq!(state.gpr[8], 0);
    assert_eq!(state.cop0.regs[EPC], BASE + 0x14);
}

#[test]
fn trap_in_a_likely_delay_slot() {
    let program = [
        asm::bnel(0, 0, 2),
        asm::teq(0, 0),
        asm::beql(0, 0, 2),
        asm::teq(0, 0),
        asm::nop(),
        asm::syscall(),
    ];
    let mut run = Lockstep::new(&program, |_| {});
    lockstep_until(&mut run, VECTOR, 16);

    // Only the slot that wasn't nullified traps, reported at its branch
    let regs = run.core.state().cop0.regs;
    assert_eq!((regs[CAUSE] & cause::EXC_CODE) >> cause::EXC_CODE_SHIFT, 13);
    assert_ne!(regs[CAUSE] & cause::BD, 0);
    assert_eq!(regs[EPC], BASE + 8);
}

#[test]
fn division_by_zero_leaves_the_divider_result() {
    let program = [
        asm::addiu(8, 0, 7),
        asm::div(8, 0),
        asm::mflo(9),
        asm::mfhi(10),
        asm::addiu(11, 0, -7),
        asm::ddivu(11, 0),
        asm::mflo(12),
        asm::mfhi(13),
        asm::div(11, 0),
        asm::mflo(14),
        asm::syscall(),
    ];
    let mut run = Lockstep::new(&program, |_| {});
    lockstep_until(&mut run, VECTOR, 16);

    let gpr = run.core.state().gpr;
    assert_eq!(gpr[9], u64::MAX);
    assert_eq!(gpr[10], 7);
    assert_eq!(gpr[12], u64::MAX);
    assert_eq!(gpr[13], -7i64 as u64);
    assert_eq!(gpr[14], 1);
}

#[test]
fn tlb_write_maps_a_load_later_in_the_block() {
    // Virtual page pair at 0 onto physical 0x1000, valid dirty and global
    let entry_lo = (1 << 6) | 0b111;
    let program = [
        asm::lui(29, 0x8000),
        asm::addiu(8, 0, 0x55),
        asm::sw(8, 29, 0x1000),
        asm::mtc0(0, 0),
        asm::mtc0(0, 5),
        asm::mtc0(0, 10),
        asm::addiu(10, 0, entry_lo),
        asm::mtc0(10, 2),
        asm::mtc0(10, 3),
        asm::tlbwi(),
        asm::lw(11, 0, 0),
        asm::syscall(),
    ];
    let mut run = Lockstep::new(&program, |_| {});
    lockstep_until(&mut run, VECTOR, 16);

    assert_eq!(run.core.state().gpr[11], 0x55);
    assert_eq!(run.core.state().cop0.regs[EPC], BASE + 0x2c);
    assert_eq!(run.core.stats().blocks_compiled, 1);
}

#[test]
fn eret_returns_from_a_handler() {
    let mut program = vec![asm::nop(); 0x64];
    program[0] = asm::syscall();
    program[1] = asm::addiu(8, 8, 1);
    program[2] = asm::syscall();
    // Handler at the general exception vector steps over the faulting instruction
    program[0x60] = asm::mfc0(26, EPC as u32);
    program[0x61] = asm::addiu(26, 26, 4);
    program[0x62] = asm::mtc0(26, EPC as u32);
    program[0x63] = asm::eret();

    let mut run = Lockstep::new(&program, |_| {});
    lockstep_until(&mut run, BASE + 4, 16);
    let state = run.core.state();
    assert!(!state.cop0.exl());
    assert_eq!(state.gpr[26], BASE + 4);
    assert_eq!(state.cop0.regs[EPC], BASE + 4);

    lockstep_until(&mut run, VECTOR, 16);
    let state = run.core.state();
    assert!(state.cop0.exl());
    assert_eq!(state.gpr[8], 1);
    assert_eq!(state.cop0.regs[EPC], BASE + 8);
}
