#![allow(dead_code)]

use std::sync::{Arc, Once};
use vm_locking::{AddressSpace, AddressSpaceConfig};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub fn space() -> Arc<AddressSpace> {
    init_tracing();
    AddressSpace::new(AddressSpaceConfig::default()).unwrap()
}

/// xorshift; deterministic per thread.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        ((x.wrapping_mul(0x2545F4914F6CDD1D)) >> 32) as u32
    }

    pub fn gen_range(&mut self, max_exclusive: u32) -> u32 {
        if max_exclusive == 0 {
            return 0;
        }
        self.next_u32() % max_exclusive
    }
}
