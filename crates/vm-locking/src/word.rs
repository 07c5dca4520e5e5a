//! The global administrative lock word.
//!
//! The whole administrative lock state is packed into one `u64` so it can be read, compared and
//! replaced with a single atomic instruction:
//!
//! - `bits[31:0]` = begin address of the locked range
//! - `bits[34:32]` = [`LockKind`] code
//! - `bits[63:35]` = size of the locked range in bytes
//!     - 0 = idle (no administrative lock installed)
//!     - all ones = the range extends to the end of the address space
//!
//! Accessor slots use a simpler encoding (`begin | size << 32`, `0` = empty), see
//! [`AddressRange::to_slot_bits`].

use crate::sync::AtomicU64;
use std::fmt;
use std::sync::atomic::Ordering;

/// Bit position of the [`LockKind`] code inside a [`LockWord`].
pub const RANGE_KIND_SHIFT: u32 = 32;
/// Mask selecting the [`LockKind`] code inside a [`LockWord`].
pub const RANGE_KIND_MASK: u64 = 7 << RANGE_KIND_SHIFT;
/// Bit position of the size field inside a [`LockWord`].
pub const RANGE_SIZE_SHIFT: u32 = 35;
/// Largest size (in bytes) a [`LockWord`] can carry explicitly.
pub const RANGE_SIZE_MAX: u32 = (1 << (64 - RANGE_SIZE_SHIFT)) - 2;
/// Size field value meaning "up to the end of the address space".
pub const RANGE_SIZE_WHOLE: u32 = (1 << (64 - RANGE_SIZE_SHIFT)) - 1;

/// Exclusive end of the 32-bit emulated address space.
pub const ADDRESS_SPACE_END: u64 = 1 << 32;

/// A byte range `[begin, begin + size)` inside the 32-bit address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressRange {
    pub begin: u32,
    pub size: u32,
}

impl AddressRange {
    pub const fn new(begin: u32, size: u32) -> Self {
        Self { begin, size }
    }

    /// Exclusive end, widened so ranges touching the top of the address space don't wrap.
    #[inline]
    pub const fn end(self) -> u64 {
        self.begin as u64 + self.size as u64
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.size == 0
    }

    /// Whether `begin + size` stays inside the 32-bit address space.
    #[inline]
    pub const fn is_in_bounds(self) -> bool {
        self.end() <= ADDRESS_SPACE_END
    }

    #[inline]
    pub const fn overlaps(self, other: AddressRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (self.begin as u64) < other.end()
            && (other.begin as u64) < self.end()
    }

    /// Encodes the range as stored in an accessor slot.
    #[inline]
    pub const fn to_slot_bits(self) -> u64 {
        self.begin as u64 | (self.size as u64) << 32
    }

    #[inline]
    pub const fn from_slot_bits(bits: u64) -> Self {
        Self {
            begin: bits as u32,
            size: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:x}, 0x{:x})", self.begin, self.end())
    }
}

/// What an administrative lock is doing to its range.
///
/// Only [`LockKind::Locked`] blocks the fast path by address. The other kinds describe memory
/// being (re)configured; accesses racing with them carry no safety guarantee and are only drained,
/// not excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LockKind {
    /// Memory is being allocated; no safe access.
    Allocation = 0,
    Readable = 1,
    Writable = 2,
    /// Read + write.
    Normal = 3,
    Executable = 4,
    /// The range is being registered as shared; page flags are unchanged.
    Sharing = 5,
    /// Memory is being released; no safe access.
    Deallocation = 6,
    /// Read + write, and the only kind that blocks accessors by address.
    Locked = 7,
}

impl LockKind {
    #[inline]
    pub const fn code(self) -> u64 {
        self as u64
    }

    #[inline]
    pub const fn from_code(code: u64) -> Self {
        match code & 7 {
            0 => LockKind::Allocation,
            1 => LockKind::Readable,
            2 => LockKind::Writable,
            3 => LockKind::Normal,
            4 => LockKind::Executable,
            5 => LockKind::Sharing,
            6 => LockKind::Deallocation,
            _ => LockKind::Locked,
        }
    }

    #[inline]
    pub const fn is_blocking(self) -> bool {
        matches!(self, LockKind::Locked)
    }
}

/// A decoded-on-demand snapshot of the administrative lock state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LockWord(u64);

impl LockWord {
    pub const IDLE: LockWord = LockWord(0);

    /// Packs `range` and `kind`.
    ///
    /// Panics if the range is empty, leaves the address space, or is larger than
    /// [`RANGE_SIZE_MAX`] (use [`LockWord::whole`] for the entire space).
    pub fn new(range: AddressRange, kind: LockKind) -> Self {
        assert!(!range.is_empty(), "administrative lock over an empty range");
        assert!(range.is_in_bounds(), "administrative lock range {range} overflows");
        assert!(
            range.size <= RANGE_SIZE_MAX,
            "administrative lock range {range} is too large to encode"
        );
        Self::pack(range.begin, range.size, kind)
    }

    /// A lock over the entire address space.
    pub const fn whole(kind: LockKind) -> Self {
        Self::pack(0, RANGE_SIZE_WHOLE, kind)
    }

    const fn pack(begin: u32, size: u32, kind: LockKind) -> Self {
        LockWord(begin as u64 | kind.code() << RANGE_KIND_SHIFT | (size as u64) << RANGE_SIZE_SHIFT)
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        LockWord(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn begin(self) -> u32 {
        self.0 as u32
    }

    /// Raw size field; [`RANGE_SIZE_WHOLE`] for whole-space locks.
    #[inline]
    pub const fn size_field(self) -> u32 {
        (self.0 >> RANGE_SIZE_SHIFT) as u32
    }

    #[inline]
    pub const fn kind(self) -> LockKind {
        LockKind::from_code((self.0 & RANGE_KIND_MASK) >> RANGE_KIND_SHIFT)
    }

    #[inline]
    pub const fn is_idle(self) -> bool {
        self.size_field() == 0
    }

    #[inline]
    pub const fn is_whole(self) -> bool {
        self.size_field() == RANGE_SIZE_WHOLE
    }

    /// Exclusive end of the locked range (0 when idle).
    #[inline]
    pub const fn end(self) -> u64 {
        if self.is_whole() {
            ADDRESS_SPACE_END
        } else {
            self.begin() as u64 + self.size_field() as u64
        }
    }

    /// Whether `[addr, addr + size)` intersects the locked range. `addr` is expected to already be
    /// folded (see [`crate::ShareableTable::fold`]).
    #[inline]
    pub const fn overlaps(self, addr: u64, size: u32) -> bool {
        !self.is_idle() && addr + (size as u64) > self.begin() as u64 && addr < self.end()
    }
}

impl fmt::Debug for LockWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_idle() {
            return f.write_str("LockWord(idle)");
        }
        write!(
            f,
            "LockWord({:?} [0x{:x}, 0x{:x}))",
            self.kind(),
            self.begin(),
            self.end()
        )
    }
}

/// The single shared cell holding the current [`LockWord`].
pub struct GlobalLockWord {
    raw: AtomicU64,
}

impl GlobalLockWord {
    pub fn new() -> Self {
        Self {
            raw: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn load(&self) -> LockWord {
        LockWord(self.raw.load(Ordering::SeqCst))
    }

    /// Installs `word` over an idle cell.
    ///
    /// Administrative lockers are serialized by the admin mutex, so finding another word installed
    /// means two administrative locks were granted at once.
    pub fn install(&self, word: LockWord) {
        debug_assert!(!word.is_idle());
        if let Err(current) =
            self.raw
                .compare_exchange(0, word.0, Ordering::SeqCst, Ordering::SeqCst)
        {
            panic!(
                "administrative lock {word:?} granted while {:?} is still installed",
                LockWord(current)
            );
        }
    }

    /// Clears `word`, which must be the installed one.
    pub fn clear(&self, word: LockWord) {
        let previous = self.raw.swap(0, Ordering::SeqCst);
        debug_assert_eq!(
            previous, word.0,
            "administrative lock released by a locker that does not own it"
        );
    }
}

impl Default for GlobalLockWord {
    fn default() -> Self {
        Self::new()
    }
}
