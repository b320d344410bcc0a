//! Bitmap identifier pools.
//!
//! Each class of entity (address entries, TCP records, UDP records) draws
//! small integer ids from its own pool. A pool is a fixed-size bitmap;
//! `allocate` hands out the lowest clear bit and `release` clears it again,
//! so ids are reused as soon as they are freed.

use bitvec::prelude::*;
use core::fmt;
use thiserror::Error;

/// Largest capacity a single pool supports; ids must fit in `u16`.
pub const MAX_CAPACITY: usize = u16::MAX as usize + 1;

/// Small identifier handed out by an [`IdPool`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(u16);

impl Id {
    pub fn get(self) -> u16 {
        self.0
    }

    fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl From<u16> for Id {
    fn from(v: u16) -> Self {
        Id(v)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which pool an id belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IdClass {
    Address,
    Tcp,
    Udp,
}

impl fmt::Display for IdClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdClass::Address => "address",
            IdClass::Tcp => "tcp",
            IdClass::Udp => "udp",
        })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("{class} id pool exhausted ({capacity} ids in use)")]
    Exhausted { class: IdClass, capacity: usize },
    #[error("{class} id {id} is not allocated")]
    NotAllocated { class: IdClass, id: Id },
    #[error("{class} id pool capacity {capacity} exceeds {MAX_CAPACITY}")]
    CapacityTooLarge { class: IdClass, capacity: usize },
}

#[derive(Debug, Clone)]
pub struct IdPool {
    class: IdClass,
    bits: BitVec<u64, Lsb0>,
    in_use: usize,
}

impl IdPool {
    /// Create an empty pool able to hold `capacity` live ids, at most
    /// [`MAX_CAPACITY`].
    pub fn new(class: IdClass, capacity: usize) -> Result<Self, PoolError> {
        if capacity > MAX_CAPACITY {
            return Err(PoolError::CapacityTooLarge { class, capacity });
        }
        Ok(Self::empty(class, capacity))
    }

    // Callers guarantee `capacity <= MAX_CAPACITY`.
    fn empty(class: IdClass, capacity: usize) -> Self {
        Self {
            class,
            bits: bitvec![u64, Lsb0; 0; capacity],
            in_use: 0,
        }
    }

    pub fn class(&self) -> IdClass {
        self.class
    }

    pub fn capacity(&self) -> usize {
        self.bits.len()
    }

    /// Number of ids currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn is_allocated(&self, id: Id) -> bool {
        id.index() < self.bits.len() && self.bits[id.index()]
    }

    /// Mark and return the lowest free id.
    pub fn allocate(&mut self) -> Result<Id, PoolError> {
        let idx = self.bits.first_zero().ok_or(PoolError::Exhausted {
            class: self.class,
            capacity: self.capacity(),
        })?;
        self.bits.set(idx, true);
        self.in_use += 1;
        // capacity <= MAX_CAPACITY, so every index fits.
        Ok(Id(idx as u16))
    }

    /// Return `id` to the pool. Releasing an id that is not allocated is
    /// rejected and leaves the pool unchanged.
    pub fn release(&mut self, id: Id) -> Result<(), PoolError> {
        if !self.is_allocated(id) {
            return Err(PoolError::NotAllocated {
                class: self.class,
                id,
            });
        }
        self.bits.set(id.index(), false);
        self.in_use -= 1;
        Ok(())
    }
}

/// Per-class pool capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub address: usize,
    pub tcp: usize,
    pub udp: usize,
}

impl PoolConfig {
    /// Same capacity for every class.
    pub const fn uniform(capacity: usize) -> Self {
        Self {
            address: capacity,
            tcp: capacity,
            udp: capacity,
        }
    }
}

impl Default for PoolConfig {
    /// 256 ids per class.
    fn default() -> Self {
        Self::uniform(256)
    }
}

/// The three pools a table draws from.
#[derive(Debug, Clone)]
pub struct IdPools {
    address: IdPool,
    tcp: IdPool,
    udp: IdPool,
}

impl IdPools {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            address: IdPool::new(IdClass::Address, config.address)?,
            tcp: IdPool::new(IdClass::Tcp, config.tcp)?,
            udp: IdPool::new(IdClass::Udp, config.udp)?,
        })
    }

    pub fn pool(&self, class: IdClass) -> &IdPool {
        match class {
            IdClass::Address => &self.address,
            IdClass::Tcp => &self.tcp,
            IdClass::Udp => &self.udp,
        }
    }

    pub fn pool_mut(&mut self, class: IdClass) -> &mut IdPool {
        match class {
            IdClass::Address => &mut self.address,
            IdClass::Tcp => &mut self.tcp,
            IdClass::Udp => &mut self.udp,
        }
    }

    pub fn allocate(&mut self, class: IdClass) -> Result<Id, PoolError> {
        self.pool_mut(class).allocate()
    }

    pub fn release(&mut self, class: IdClass, id: Id) -> Result<(), PoolError> {
        self.pool_mut(class).release(id)
    }

    /// Total ids in use across all classes.
    pub fn in_use(&self) -> usize {
        self.address.in_use() + self.tcp.in_use() + self.udp.in_use()
    }
}

impl Default for IdPools {
    fn default() -> Self {
        let config = PoolConfig::default();
        Self {
            address: IdPool::empty(IdClass::Address, config.address),
            tcp: IdPool::empty(IdClass::Tcp, config.tcp),
            udp: IdPool::empty(IdClass::Udp, config.udp),
        }
    }
}
