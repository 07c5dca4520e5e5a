use crate::shareable::ShareableTable;
use crate::slot::{conflicts, try_range_lock, RangeSlot};
use crate::word::{AddressRange, GlobalLockWord, LockKind, LockWord, ADDRESS_SPACE_END};
use proptest::prelude::*;

fn kind_strategy() -> impl Strategy<Value = LockKind> {
    (0u64..8).prop_map(LockKind::from_code)
}

/// Ranges that stay inside the address space, biased towards small sizes and clustered begins so
/// overlaps are common.
fn range_strategy() -> impl Strategy<Value = AddressRange> {
    let clustered =
        (0u32..0x4000, 1u32..0x200).prop_map(|(begin, size)| AddressRange::new(begin, size));
    let anywhere = (any::<u32>(), 1u32..0x1_0000)
        .prop_map(|(begin, size)| AddressRange::new(begin.min(u32::MAX - size + 1), size));
    prop_oneof![3 => clustered, 1 => anywhere]
}

/// Naive model: byte-wise membership on 64-bit addresses.
fn naive_overlap(a: AddressRange, b: AddressRange) -> bool {
    let a_end = a.begin as u64 + a.size as u64;
    let b_end = b.begin as u64 + b.size as u64;
    (a.begin as u64..a_end).any(|x| x >= b.begin as u64 && x < b_end)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn lock_word_overlap_matches_naive_model(
        lock in (0u32..0x4000, 1u32..0x200),
        access in (0u32..0x4000, 1u32..0x200),
        kind in kind_strategy(),
    ) {
        let lock = AddressRange::new(lock.0, lock.1);
        let access = AddressRange::new(access.0, access.1);
        let word = LockWord::new(lock, kind);

        prop_assert_eq!(word.kind(), kind);
        prop_assert_eq!(word.begin(), lock.begin);
        prop_assert_eq!(word.end(), lock.end());
        prop_assert_eq!(
            word.overlaps(access.begin as u64, access.size),
            naive_overlap(lock, access)
        );
        prop_assert_eq!(lock.overlaps(access), naive_overlap(lock, access));
    }

    #[test]
    fn whole_word_overlaps_everything(access in range_strategy(), kind in kind_strategy()) {
        let word = LockWord::whole(kind);
        prop_assert!(access.end() <= ADDRESS_SPACE_END);
        prop_assert!(word.is_whole());
        prop_assert!(word.overlaps(access.begin as u64, access.size));
    }

    #[test]
    fn fast_path_never_publishes_under_a_conflicting_locked_word(
        lock in range_strategy(),
        access in range_strategy(),
    ) {
        let word = GlobalLockWord::new();
        let table = ShareableTable::new(0x1_0000);
        let slot = RangeSlot::new();
        word.install(LockWord::new(lock, LockKind::Locked));

        let acquired = try_range_lock(&word, &table, None, &slot, access.begin, access.size);
        prop_assert_eq!(acquired, !lock.overlaps(access));
        prop_assert_eq!(slot.load().is_some(), acquired);
    }

    #[test]
    fn folding_makes_mirrors_conflict(
        offset in 0u32..0xff80,
        mirror in 1u32..0x100,
        size in 1u32..0x80,
    ) {
        let table = ShareableTable::new(0x1_0000);
        let base = mirror << 16;
        table.mark(AddressRange::new(base, 1));

        let lock = LockWord::new(AddressRange::new(offset, size), LockKind::Locked);
        prop_assert!(conflicts(lock, &table, base + offset, size));
        // Non-blocking kinds compare raw addresses and never see the alias.
        let sharing = LockWord::new(AddressRange::new(offset, size), LockKind::Sharing);
        prop_assert!(!conflicts(sharing, &table, base + offset, size));
    }

    #[test]
    fn unshared_chunks_are_not_folded(addr in any::<u32>()) {
        let table = ShareableTable::new(0x1_0000);
        prop_assert_eq!(table.fold(addr), addr as u64);
        table.mark(AddressRange::new(addr, 1));
        prop_assert_eq!(table.fold(addr), (addr & 0xffff) as u64);
    }
}
