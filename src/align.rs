use std::mem;

/// The alignment unit of the whole heap. Every block size is a multiple of
/// one machine word and every payload address is word aligned, which leaves
/// the low bits of a boundary tag free for the allocation flag. See
/// [`crate::block`].
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// Rounds `size` up to the next multiple of [`WORD`].
///
/// # Examples
///
/// On a 64 bit machine, `align_up(13)` is 16 and `align_up(16)` is 16. On a
/// 32 bit machine `align_up(13)` would be 16 as well, but `align_up(11)`
/// would be 12. Works the same for any power of two word size.
#[inline]
pub(crate) fn align_up(size: usize) -> usize {
    (size + WORD - 1) & !(WORD - 1)
}

/// Whether `value` is a multiple of [`WORD`]. The validator uses this on
/// every address it visits.
#[inline]
pub(crate) fn is_aligned(value: usize) -> bool {
    value & (WORD - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_multiples_round_up() {
        let mut alignments = Vec::new();

        for i in 0..10 {
            // On 64 bit machine: (1..8), (9..16), (17..24) and so on.
            let sizes = (WORD * i + 1)..=(WORD * (i + 1));
            // Matching the sizes above, this would be: 8, 16, 24 and so on.
            let expected_alignment = WORD * (i + 1);
            alignments.push((sizes, expected_alignment));
        }

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align_up(size));
                assert!(is_aligned(align_up(size)));
            }
        }
    }

    #[test]
    fn zero_stays_zero() {
        assert_eq!(align_up(0), 0);
        assert!(is_aligned(0));
    }
}
