use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use common::cli::GlobalOpts;
use dynarec::{Core, DynarecConfig, PlatformKind};
use tracing::{info, warn};
use vr4300::{CpuState, Interpreter, Mmu, Ram};

/// RDRAM with the expansion pak
const RAM_SIZE: usize = 8 * 1024 * 1024;
const KSEG0: u64 = 0xffff_ffff_8000_0000;

/// Run a raw big-endian VR4300 program image through the recompiler
#[derive(Debug, Parser)]
#[clap(name = "mu-jit", version)]
struct Cli {
    /// Raw image, loaded into RDRAM at --base
    image: PathBuf,

    /// Physical load address. Execution starts at its kseg0 alias.
    #[arg(long, default_value = "0", value_parser = parse_address)]
    base: u32,

    /// Stop after this many blocks
    #[arg(long, default_value_t = 1000)]
    steps: u64,

    /// Run the interpreter alongside and stop at the first block where they disagree
    #[arg(long)]
    compare: bool,

    /// Print the last compiled block's guest, IR and host listings at the end
    #[arg(long)]
    dump: bool,

    /// Host register description used for allocation
    #[arg(long, default_value_t = PlatformKind::X86_64)]
    platform: PlatformKind,

    /// Code cache size in bytes
    #[arg(long, default_value_t = DynarecConfig::default().code_cache_size)]
    cache_size: usize,

    #[arg(long)]
    no_idle_loops: bool,

    /// Log every block as it is compiled (needs -v)
    #[arg(long)]
    log_compilations: bool,

    #[clap(flatten)]
    global: GlobalOpts,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("bad address '{}': {}", s, e))
}

fn load_ram(image: &[u8], base: u32) -> Result<Ram> {
    let mut ram = Ram::new(RAM_SIZE);
    if !ram.load(base as usize, image) {
        bail!("{} byte image doesn't fit in RDRAM at {:#x}", image.len(), base);
    }
    Ok(ram)
}

/// The interpreter half of `--compare`
struct Reference {
    state: CpuState,
    ram: Ram,
    mmu: Mmu,
    interpreter: Interpreter,
}

impl Reference {
    fn run(&mut self, instructions: u64) -> Result<()> {
        for _ in 0..instructions {
            self.interpreter
                .step(&mut self.state, &mut self.ram, &mut self.mmu)
                .with_context(|| format!("interpreter stopped at {:#x}", self.state.pc))?;
        }
        Ok(())
    }

    fn divergence(&self, core: &Core<Ram>) -> Option<String> {
        let jit = core.state();
        if jit.pc != self.state.pc {
            return Some(format!("pc {:#x}, interpreter {:#x}", jit.pc, self.state.pc));
        }
        for (reg, (a, b)) in jit.gpr.iter().zip(&self.state.gpr).enumerate() {
            if a != b {
                return Some(format!("r{} {:#x}, interpreter {:#x}", reg, a, b));
            }
        }
        if jit != &self.state {
            return Some(format!("special registers differ\njit: {:x?}\ninterpreter: {:x?}", jit, self.state));
        }
        let mismatch = core.bus.bytes().iter().zip(self.ram.bytes()).position(|(a, b)| a != b);
        mismatch.map(|addr| format!("memory differs at {:#x}", addr))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    common::logging::init(cli.global.log_level())?;

    let image = std::fs::read(&cli.image).with_context(|| format!("reading {}", cli.image.display()))?;
    let ram = load_ram(&image, cli.base)?;
    let config = DynarecConfig {
        code_cache_size: cli.cache_size,
        platform: cli.platform,
        idle_loop_detection: !cli.no_idle_loops,
        log_compilations: cli.log_compilations,
    };
    info!("{} bytes at {:#x}, {} platform, {} byte code cache", image.len(), cli.base, config.platform, config.code_cache_size);

    let mut core = Core::new(ram, config);
    core.state_mut().pc = KSEG0 | cli.base as u64;

    // Nothing is ever scheduled here, so idle loops run and cycles equal instructions
    let mut reference = if cli.compare {
        Some(Reference {
            state: core.state().clone(),
            ram: load_ram(&image, cli.base)?,
            mmu: Mmu::new(),
            interpreter: Interpreter::new(),
        })
    } else {
        None
    };

    let mut cycles = 0;
    for step in 0..cli.steps {
        let taken = core
            .step()
            .with_context(|| format!("block {} at {:#x}\n{}", step, core.state().pc, core.last_block_dump()))?;
        cycles += taken;

        if let Some(reference) = &mut reference {
            reference.run(taken)?;
            if let Some(diff) = reference.divergence(&core) {
                warn!("diverged after block {}: {}", step, diff);
                bail!("recompiler and interpreter disagree: {}\n{}", diff, core.last_block_dump());
            }
        }
    }

    let stats = core.stats();
    println!("pc {:#x} after {} cycles", core.state().pc, cycles);
    println!("{:#?}", stats);
    if cli.dump {
        println!("{}", core.last_block_dump());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_parse_in_hex_or_decimal() {
        assert_eq!(parse_address("0x400"), Ok(0x400));
        assert_eq!(parse_address("1024"), Ok(1024));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn images_must_fit() {
        assert!(load_ram(&[0; 16], 0).is_ok());
        assert!(load_ram(&[0; 16], RAM_SIZE as u32 - 8).is_err());
    }

    #[test]
    fn flags_map_onto_the_config() {
        let cli = Cli::parse_from(["mu-jit", "boot.bin", "--base", "0x1000", "--platform", "aarch64", "--no-idle-loops"]);
        assert_eq!(cli.base, 0x1000);
        assert_eq!(cli.platform, PlatformKind::Aarch64);
        assert!(cli.no_idle_loops);
        assert!(!cli.compare);
    }
}
