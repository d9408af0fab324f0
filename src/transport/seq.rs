//! Wrap-safe sequence number comparison.

/// Whether `x` comes before `y` on the 32-bit sequence circle.
///
/// Two numbers compare by their signed distance, so `u32::MAX` is before
/// `0`. Numbers exactly half the circle apart are unordered.
pub fn seq_less(x: u32, y: u32) -> bool {
    (y.wrapping_sub(x) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_order() {
        assert!(seq_less(1, 2));
        assert!(!seq_less(2, 1));
        assert!(!seq_less(5, 5));
    }

    #[test]
    fn test_wrap_boundary() {
        assert!(seq_less(u32::MAX, 0));
        assert!(!seq_less(0, u32::MAX));
        assert!(seq_less(u32::MAX - 3, 2));
        assert!(seq_less(0x7fff_ffff, 0x8000_0000));
    }

    proptest! {
        #[test]
        fn prop_successor_is_after(x in any::<u32>(), step in 1u32..0x7fff_ffff) {
            let y = x.wrapping_add(step);
            prop_assert!(seq_less(x, y));
            prop_assert!(!seq_less(y, x));
        }

        #[test]
        fn prop_irreflexive(x in any::<u32>()) {
            prop_assert!(!seq_less(x, x));
        }
    }
}
