//! Debug-Register Codec (component B).
//!
//! Encodes and decodes the AArch64 hardware watchpoint control word, and
//! marshals the 16-slot debug-register image exchanged with the kernel via
//! `NT_ARM_HW_WATCH`.

use crate::error::WatchpointError;

/// `NT_ARM_HW_WATCH`, the register-set id for AArch64 hardware watchpoints.
/// Not exposed by `libc`, so defined here as the kernel's own headers do.
pub const NT_ARM_HW_WATCH: i32 = 0x404;

pub const HW_WATCH_SLOTS: usize = 16;

/// One `dbg_regs[]` entry as laid out by `struct user_hwdebug_state` in the
/// kernel's `<asm/ptrace.h>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugRegSlot {
    pub address: u64,
    pub control: u32,
    pub reserved: u32,
}

/// The full debug-register image: 16 slots, only the first ever populated by
/// this tracer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DebugRegImage {
    pub slots: [DebugRegSlot; HW_WATCH_SLOTS],
}

impl Default for DebugRegImage {
    fn default() -> Self {
        Self {
            slots: [DebugRegSlot::default(); HW_WATCH_SLOTS],
        }
    }
}

/// A single watchpoint, ready to be written into slot 0 of a [`DebugRegImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchpointDescriptor {
    pub address: u64,
    pub control_word: u32,
}

const ENABLE: u32 = 1;
const ACCESS_READ_WRITE: u32 = 3;

/// Maps a variable's byte width to the AArch64 `DBGWCR.LSC`/`BAS`-adjacent
/// size encoding used by this tracer's single-watchpoint control word.
fn size_encoding(size: u64) -> Result<u32, WatchpointError> {
    match size {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(3),
        8 => Ok(2),
        other => Err(WatchpointError::UnsupportedSize(other)),
    }
}

/// Builds the control word for a read+write watchpoint over `size` bytes at
/// `address`.
pub fn encode(address: u64, size: u64) -> Result<WatchpointDescriptor, WatchpointError> {
    let size_enc = size_encoding(size)?;
    let control_word = (size_enc << 5) | (ACCESS_READ_WRITE << 3) | ENABLE;

    Ok(WatchpointDescriptor {
        address,
        control_word,
    })
}

/// Places `descriptor` in slot 0 of a fresh image; slots 1..15 stay zeroed.
pub fn build_image(descriptor: &WatchpointDescriptor) -> DebugRegImage {
    let mut image = DebugRegImage::default();
    image.slots[0] = DebugRegSlot {
        address: descriptor.address,
        control: descriptor.control_word,
        reserved: 0,
    };
    image
}

/// A decoded slot, for diagnostics only.
#[derive(Debug, Clone, Copy)]
pub struct DecodedSlot {
    pub index: usize,
    pub address: u64,
    pub control: u32,
    pub enabled: bool,
}

/// Decodes the slots actually returned by the kernel (`len` bytes, as
/// reported by `get_debug_regs`), for diagnostic logging.
pub fn decode(image: &DebugRegImage, len: usize) -> Vec<DecodedSlot> {
    let slot_count = (len / std::mem::size_of::<DebugRegSlot>()).min(HW_WATCH_SLOTS);

    image.slots[..slot_count]
        .iter()
        .enumerate()
        .map(|(index, slot)| DecodedSlot {
            index,
            address: slot.address,
            control: slot.control,
            enabled: slot.control & ENABLE != 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_word_matches_formula_for_every_supported_size() {
        for &(size, expected_size_enc) in &[(1u64, 0u32), (2, 1), (4, 3), (8, 2)] {
            let descriptor = encode(0x1000, size).unwrap();
            let expected = (expected_size_enc << 5) | (ACCESS_READ_WRITE << 3) | ENABLE;
            assert_eq!(descriptor.control_word, expected);
        }
    }

    #[test]
    fn rejects_unsupported_sizes() {
        for size in [0u64, 3, 5, 7, 16] {
            assert!(matches!(
                encode(0x1000, size),
                Err(WatchpointError::UnsupportedSize(s)) if s == size
            ));
        }
    }

    #[test]
    fn build_image_only_populates_slot_zero() {
        let descriptor = encode(0xdead_beef, 4).unwrap();
        let image = build_image(&descriptor);

        assert_eq!(image.slots[0].address, 0xdead_beef);
        assert_eq!(image.slots[0].control, descriptor.control_word);
        for slot in &image.slots[1..] {
            assert_eq!(*slot, DebugRegSlot::default());
        }
    }

    #[test]
    fn decode_round_trips_slot_zero() {
        let descriptor = encode(0x4000, 8).unwrap();
        let image = build_image(&descriptor);
        let decoded = decode(&image, std::mem::size_of::<DebugRegSlot>() * HW_WATCH_SLOTS);

        assert_eq!(decoded.len(), HW_WATCH_SLOTS);
        assert_eq!(decoded[0].address, 0x4000);
        assert_eq!(decoded[0].control, descriptor.control_word);
        assert!(decoded[0].enabled);
        assert!(!decoded[1].enabled);
    }

    #[test]
    fn decode_respects_reported_length() {
        let descriptor = encode(0x4000, 8).unwrap();
        let image = build_image(&descriptor);
        let decoded = decode(&image, std::mem::size_of::<DebugRegSlot>() * 4);

        assert_eq!(decoded.len(), 4);
    }
}
