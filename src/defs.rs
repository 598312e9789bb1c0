use core::fmt;
use std::ops::Add;

use derive_more::From;

/// The address of a cell in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, From)]
pub struct CellRef(pub usize);

impl CellRef {
    pub fn new(idx: usize) -> Self {
        Self(idx)
    }

    pub fn usize(self) -> usize {
        self.0
    }
}

impl Add<usize> for CellRef {
    type Output = CellRef;

    fn add(self, rhs: usize) -> CellRef {
        CellRef(self.0 + rhs)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// An interned symbol. Resolves to its text through [`crate::mem::Mem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sym {
    pub(crate) idx: u32,
}

impl Sym {
    pub fn new(idx: usize) -> Self {
        Self { idx: idx as u32 }
    }

    pub fn usize(self) -> usize {
        self.idx as usize
    }
}

/// The address of an instruction in the code store.
pub type CodeAddr = usize;
