//! # Affinity Mask Resolution
//!
//! Turns the user's optional hex override into the bitmask handed to
//! `SetProcessAffinityMask`. Bit `i` set means "may run on logical CPU `i`".
//!
//! The automatic mask keeps the game off CPU 0, leaving that core to the OS and
//! the shell. A single-CPU machine has nothing to spare, so it gets bit 0.

use std::fmt;

/// Used when the logical CPU count cannot be determined.
pub const FALLBACK_CPU_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityMask(u64);

impl AffinityMask {
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Every logical CPU except CPU 0.
    pub fn all_but_first(cpu_count: usize) -> Self {
        match cpu_count {
            0 | 1 => AffinityMask(1),
            n if n >= u64::BITS as usize => AffinityMask(u64::MAX - 1),
            n => AffinityMask((1u64 << n) - 2),
        }
    }
}

impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// Logical CPUs available to us, if the OS will say.
pub fn logical_cpus() -> Option<usize> {
    std::thread::available_parallelism().ok().map(|n| n.get())
}

/// Resolve `mask_hex` against this machine's logical CPU count.
pub fn resolve(mask_hex: &str) -> AffinityMask {
    resolve_with(mask_hex, logical_cpus())
}

/// Resolve `mask_hex`, falling back to the automatic mask when it is blank or not hex.
pub fn resolve_with(mask_hex: &str, cpu_count: Option<usize>) -> AffinityMask {
    parse_hex(mask_hex)
        .unwrap_or_else(|| AffinityMask::all_but_first(cpu_count.unwrap_or(FALLBACK_CPU_COUNT)))
}

fn parse_hex(mask_hex: &str) -> Option<AffinityMask> {
    let trimmed = mask_hex.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok().map(AffinityMask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn eight_cpus_give_fe() {
        assert_eq!(resolve_with("", Some(8)).bits(), 0xFE);
    }

    #[test]
    fn single_cpu_keeps_bit_zero() {
        assert_eq!(resolve_with("", Some(1)).bits(), 1);
    }

    #[test]
    fn unknown_cpu_count_uses_fallback() {
        assert_eq!(resolve_with("", None).bits(), 0xFE);
    }

    #[test]
    fn more_cpus_than_bits_saturates() {
        assert_eq!(resolve_with("", Some(64)).bits(), u64::MAX - 1);
        assert_eq!(resolve_with("", Some(128)).bits(), u64::MAX - 1);
    }

    #[test]
    fn accepts_prefix_and_whitespace() {
        assert_eq!(resolve_with(" 0xF0 ", Some(8)).bits(), 0xF0);
        assert_eq!(resolve_with("0Xff", Some(8)).bits(), 0xFF);
        assert_eq!(resolve_with("ff", Some(8)).bits(), 0xFF);
    }

    #[test]
    fn bare_prefix_falls_back() {
        assert_eq!(resolve_with("0x", Some(4)).bits(), 0b1110);
    }

    #[test]
    fn displays_as_upper_hex() {
        assert_eq!(AffinityMask::all_but_first(8).to_string(), "0xFE");
    }

    proptest! {
        #[test]
        fn auto_mask_excludes_cpu_zero(n in 2usize..64) {
            let mask = resolve_with("", Some(n)).bits();
            prop_assert_eq!(mask, (1u64 << n) - 2);
            prop_assert_eq!(mask & 1, 0);
            prop_assert_eq!(mask.count_ones() as usize, n - 1);
        }

        #[test]
        fn valid_hex_is_taken_verbatim(value in any::<u64>(), n in 1usize..64) {
            prop_assert_eq!(resolve_with(&format!("{value:x}"), Some(n)).bits(), value);
            prop_assert_eq!(resolve_with(&format!("{value:X}"), Some(n)).bits(), value);
        }

        #[test]
        fn garbage_behaves_like_blank(junk in "[g-zG-Z!@# -]{1,12}", n in 1usize..64) {
            prop_assert_eq!(resolve_with(&junk, Some(n)), resolve_with("", Some(n)));
        }
    }
}
