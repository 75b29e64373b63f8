use std::{collections::HashMap, sync::RwLock};

use crate::{
    error::{Error, Result},
    fingerprint::{Address, Couple, Fingerprints},
};

/// Persistent address to couples index.
///
/// Implementations must append couples for an address that already exists,
/// never replace them. Addresses without couples are left out of
/// `get_couples` results.
pub trait FingerprintStore {
    fn store_fingerprints(&self, fingerprints: &Fingerprints) -> Result<()>;

    fn get_couples(&self, addresses: &[Address]) -> Result<HashMap<Address, Vec<Couple>>>;
}

/// Store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<HashMap<Address, Vec<Couple>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::StoreUnavailable("memory store lock poisoned".into())
}

impl FingerprintStore for MemoryStore {
    fn store_fingerprints(&self, fingerprints: &Fingerprints) -> Result<()> {
        let mut index = self.index.write().map_err(poisoned)?;
        for (address, couples) in fingerprints {
            index.entry(*address).or_default().extend_from_slice(couples);
        }
        Ok(())
    }

    fn get_couples(&self, addresses: &[Address]) -> Result<HashMap<Address, Vec<Couple>>> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(addresses
            .iter()
            .filter_map(|address| index.get(address).map(|c| (*address, c.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn couple(anchor_time_ms: u32, song_id: u32) -> Couple {
        Couple {
            anchor_time_ms,
            song_id,
        }
    }

    #[test]
    fn test_store_appends() {
        let store = MemoryStore::new();
        let address = Address::from(7);
        let mut first = Fingerprints::new();
        first.push(address, couple(10, 1));
        let mut second = Fingerprints::new();
        second.push(address, couple(20, 2));

        store.store_fingerprints(&first).unwrap();
        store.store_fingerprints(&second).unwrap();

        let couples = store.get_couples(&[address]).unwrap();
        assert_eq!(couples[&address], vec![couple(10, 1), couple(20, 2)]);
    }

    #[test]
    fn test_missing_addresses_are_absent() {
        let store = MemoryStore::new();
        let couples = store
            .get_couples(&[Address::from(1), Address::from(2)])
            .unwrap();
        assert!(couples.is_empty());
    }
}
