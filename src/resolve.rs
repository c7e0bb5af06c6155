//! Symbol & Map Resolver (component A).
//!
//! Produces absolute runtime addresses for the watched variable and for
//! `main` by combining the ELF's own view of itself with the kernel's view
//! of the running process.

use std::path::Path;

use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};

use crate::config::Config;
use crate::error::ResolutionError;

/// Addresses resolved once at startup and treated as read-only thereafter.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTarget {
    pub variable_runtime_address: u64,
    pub variable_size: u64,
    pub main_runtime_address: u64,
    pub elf_virtual_base: u64,
    pub runtime_base: u64,
    pub aslr_shift: u64,
}

pub fn resolve(config: &Config) -> Result<ResolvedTarget, ResolutionError> {
    let file = std::fs::File::open(&config.executable_path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let obj = object::File::parse(&*mmap)?;

    let elf_virtual_base = obj
        .segments()
        .next()
        .map(|segment| segment.address())
        .ok_or(ResolutionError::MissingLoadSegment)?;

    let runtime_base = runtime_base(config.tracee_pid, &config.executable_path)?;
    let aslr_shift = runtime_base.wrapping_sub(elf_virtual_base);

    let (variable_elf_address, variable_size) =
        find_data_symbol(&obj, &config.variable_name)?;
    if !matches!(variable_size, 1 | 2 | 4 | 8) {
        return Err(ResolutionError::UnsupportedSize(
            config.variable_name.clone(),
            variable_size,
        ));
    }

    let main_elf_address = find_text_symbol(&obj, "main")?;

    log::debug!(
        "virtual_base=0x{:x} runtime_base=0x{:x} aslr_shift=0x{:x}",
        elf_virtual_base,
        runtime_base,
        aslr_shift
    );

    Ok(ResolvedTarget {
        variable_runtime_address: variable_elf_address.wrapping_add(aslr_shift),
        variable_size,
        main_runtime_address: main_elf_address.wrapping_add(aslr_shift),
        elf_virtual_base,
        runtime_base,
        aslr_shift,
    })
}

/// Finds a data symbol by its raw linker name, falling back to matching its
/// demangled source-level name, so `--var counter` resolves a C++ global
/// mangled as e.g. `_ZL7counter` as well as a plain C global.
fn find_data_symbol(obj: &object::File, variable_name: &str) -> Result<(u64, u64), ResolutionError> {
    for symbol in obj.symbols() {
        if symbol.name() == Ok(variable_name) {
            return Ok((symbol.address(), symbol.size()));
        }
    }

    for symbol in obj.symbols() {
        if let Ok(name) = symbol.name() {
            if demangle(name) == variable_name {
                return Ok((symbol.address(), symbol.size()));
            }
        }
    }

    Err(ResolutionError::SymbolNotFound(variable_name.to_string()))
}

fn find_text_symbol(obj: &object::File, name: &str) -> Result<u64, ResolutionError> {
    obj.symbols()
        .find(|symbol| symbol.kind() == SymbolKind::Text && symbol.name() == Ok(name))
        .map(|symbol| symbol.address())
        .ok_or_else(|| ResolutionError::SymbolNotFound(name.to_string()))
}

/// Attempts Rust, then Itanium C++, demangling; returns the name unchanged
/// if neither scheme recognizes it.
fn demangle(name: &str) -> String {
    if let Ok(sym) = rustc_demangle::try_demangle(name) {
        return sym.to_string();
    }

    if let Ok(sym) = cpp_demangle::Symbol::new(name) {
        if let Ok(demangled) = sym.demangle() {
            return demangled;
        }
    }

    name.to_string()
}

fn runtime_base(pid: nix::unistd::Pid, executable_path: &Path) -> Result<u64, ResolutionError> {
    let canonical =
        std::fs::canonicalize(executable_path).unwrap_or_else(|_| executable_path.to_path_buf());

    let maps = proc_maps::get_process_maps(pid.as_raw())
        .map_err(|e| ResolutionError::ProcMaps(e.to_string()))?;

    let candidates: Vec<(u64, bool)> = maps
        .iter()
        .filter(|map| map.filename().map(|f| f == canonical).unwrap_or(false))
        .map(|map| (map.start() as u64, map.is_exec()))
        .collect();

    pick_runtime_base(&candidates).ok_or_else(|| {
        ResolutionError::MissingMapping(executable_path.display().to_string(), pid.as_raw())
    })
}

/// Picks the low address to treat as the runtime base among mappings that
/// share the target's pathname, preferring the executable-permission mapping
/// (`r-xp`) over the source's original "first matching line" behavior, which
/// is ambiguous once a binary has separate read-only and executable segments.
fn pick_runtime_base(candidates: &[(u64, bool)]) -> Option<u64> {
    candidates
        .iter()
        .find(|(_, executable)| *executable)
        .or_else(|| candidates.first())
        .map(|(address, _)| *address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_executable_mapping() {
        let candidates = [(0x1000, false), (0x2000, true), (0x3000, false)];
        assert_eq!(pick_runtime_base(&candidates), Some(0x2000));
    }

    #[test]
    fn falls_back_to_first_mapping_when_none_executable() {
        let candidates = [(0x5000, false), (0x6000, false)];
        assert_eq!(pick_runtime_base(&candidates), Some(0x5000));
    }

    #[test]
    fn no_candidates_is_none() {
        assert_eq!(pick_runtime_base(&[]), None);
    }

    #[test]
    fn demangles_cpp_symbols() {
        assert_eq!(demangle("_Z7counteri"), "counter(int)");
    }

    #[test]
    fn leaves_unmangled_names_alone() {
        assert_eq!(demangle("counter"), "counter");
    }

    #[test]
    fn aslr_shift_applies_equally_to_variable_and_main() {
        // I-variant: (variable_runtime - main_runtime) == (variable_elf - main_elf)
        // for any shift, since the same shift is added to both.
        let variable_elf = 0x1_2340u64;
        let main_elf = 0x1_1000u64;
        let shift = 0x7f0000000000u64;

        let variable_runtime = variable_elf.wrapping_add(shift);
        let main_runtime = main_elf.wrapping_add(shift);

        assert_eq!(
            variable_runtime.wrapping_sub(main_runtime),
            variable_elf.wrapping_sub(main_elf)
        );
    }
}
