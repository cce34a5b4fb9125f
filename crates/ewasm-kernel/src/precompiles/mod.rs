//! Precompiled contracts served by the kernel itself, without a sandbox.
//!
//! A precompile is a pure function of its call: it charges no gas and never mutates the state.
//! The kernel transfers the call value before running it.

use std::sync::Arc;

use alloy_primitives::{map::HashMap, Address, Bytes};
use auto_impl::auto_impl;
use once_cell::race::OnceBox;

use crate::{
    constants::precompiles::{IDENTITY, METERING_INJECTOR, TRANSCOMPILER},
    Call, KernelError, MeteringConfig, State,
};

mod identity;
pub use identity::*;

mod metering;
pub use metering::*;

mod transcompiler;
pub use transcompiler::*;

/// A contract implemented natively by the kernel.
#[auto_impl(&, Box, Arc)]
pub trait Precompile: Send + Sync {
    /// Runs the precompile and returns its output.
    fn run(&self, call: &Call, state: &State) -> Result<Bytes, KernelError>;
}

/// The registry of precompiles, keyed by their reserved addresses.
#[derive(Clone, Default)]
pub struct Precompiles {
    inner: HashMap<Address, Arc<dyn Precompile>>,
}

impl core::fmt::Debug for Precompiles {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.inner.keys()).finish()
    }
}

impl Precompiles {
    /// The standard precompiles with the default metering rules.
    pub fn standard() -> &'static Self {
        static INSTANCE: OnceBox<Precompiles> = OnceBox::new();
        INSTANCE.get_or_init(|| Box::new(Self::with_metering(MeteringConfig::default())))
    }

    /// The standard precompiles with the given metering rules.
    pub fn with_metering(metering: MeteringConfig) -> Self {
        let mut precompiles = Self::default();
        precompiles.insert(IDENTITY, Identity);
        precompiles.insert(METERING_INJECTOR, MeteringInjector::new(metering));
        precompiles.insert(TRANSCOMPILER, Transcompiler);
        precompiles
    }

    /// Registers `precompile` at `address`, replacing any previous one.
    pub fn insert(&mut self, address: Address, precompile: impl Precompile + 'static) {
        self.inner.insert(address, Arc::new(precompile));
    }

    /// Returns the precompile registered at `address`.
    pub fn get(&self, address: &Address) -> Option<&dyn Precompile> {
        self.inner.get(address).map(|precompile| &**precompile)
    }

    /// Whether a precompile is registered at `address`.
    pub fn contains(&self, address: &Address) -> bool {
        self.inner.contains_key(address)
    }

    /// Iterates over the registered addresses.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.inner.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_precompiles() {
        let precompiles = Precompiles::standard();
        assert!(precompiles.contains(&IDENTITY));
        assert!(precompiles.contains(&METERING_INJECTOR));
        assert!(precompiles.contains(&TRANSCOMPILER));
        assert_eq!(precompiles.addresses().count(), 3);
        assert!(!precompiles.contains(&Address::ZERO));
    }
}
