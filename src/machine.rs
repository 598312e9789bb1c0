use crate::{
    bc::instr::{Local, Slot},
    defs::{CellRef, CodeAddr},
    mem::Fault,
};

pub mod exec;

/// Registers preallocated per machine; the file grows on demand beyond
/// this (large ground terms can need thousands of temporaries).
pub const NREGS: usize = 256;

/// Sentinel continuation for the top of a query; control never returns
/// through it.
const NO_CONT: CodeAddr = CodeAddr::MAX;

/// Steers the `unify_*` instructions after a `get_structure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Read,
    Write,
}

/// An environment frame: the continuation, the previous environment, the
/// cut barrier frozen at clause entry, and the permanent-variable slots.
///
/// Frames are only truncated on backtracking, never on `deallocate`; a
/// choice point may still refer into a deallocated frame (no stack
/// trimming).
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) cont: CodeAddr,
    pub(crate) prev_env: Option<usize>,
    pub(crate) b0: usize,
    pub(crate) slots: Vec<CellRef>,
}

/// A snapshot taken by `try`, enough to rewind the machine to the state at
/// predicate entry and resume at the next alternative.
#[derive(Debug, Clone)]
pub(crate) struct ChoicePoint {
    pub(crate) saved_args: Vec<CellRef>,
    pub(crate) num_args: u8,
    pub(crate) env: Option<usize>,
    pub(crate) envs_len: usize,
    pub(crate) cont: CodeAddr,
    pub(crate) next_alt: CodeAddr,
    pub(crate) trail_mark: usize,
    pub(crate) heap_mark: usize,
    pub(crate) b0: usize,
}

/// The mutable machine state of one query. All of it is per-query scratch;
/// the code store and the interner live elsewhere and are shared.
pub struct Machine {
    pub(crate) pc: CodeAddr,
    pub(crate) cont: CodeAddr,
    regs: Vec<CellRef>,
    /// Structure-walk pointer for read mode.
    pub(crate) s: CellRef,
    pub(crate) mode: Mode,
    pub(crate) fail: bool,
    /// Arity of the most recent call; `try` snapshots this many registers.
    pub(crate) num_args: u8,
    /// Choice-point height at entry of the current predicate; the cut
    /// barrier before `allocate` freezes it.
    pub(crate) b0: usize,
    pub(crate) envs: Vec<Frame>,
    pub(crate) cur_env: Option<usize>,
    pub(crate) choices: Vec<ChoicePoint>,
    /// Heap height when the current query started; the backtrack boundary
    /// when no choice point exists, so teardown can restore older cells.
    pub(crate) heap_mark: usize,
    calls: u64,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            pc: NO_CONT,
            cont: NO_CONT,
            regs: vec![CellRef(0); NREGS],
            s: CellRef(0),
            mode: Mode::Read,
            fail: false,
            num_args: 0,
            b0: 0,
            envs: Vec::new(),
            cur_env: None,
            choices: Vec::new(),
            heap_mark: 0,
            calls: 0,
        }
    }

    /// Total `call`/`dynamic_call` transfers executed by the current query.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub(crate) fn bump_calls(&mut self) {
        self.calls += 1;
    }

    /// Reset per-query state and aim the program counter at `entry`.
    pub(crate) fn setup_query(&mut self, entry: CodeAddr, heap_mark: usize) {
        self.pc = entry;
        self.cont = NO_CONT;
        self.regs.clear();
        self.regs.resize(NREGS, CellRef(0));
        self.s = CellRef(0);
        self.mode = Mode::Read;
        self.fail = false;
        self.num_args = 0;
        self.b0 = 0;
        self.envs.clear();
        self.cur_env = None;
        self.choices.clear();
        self.heap_mark = heap_mark;
        self.calls = 0;
    }

    /// Ask the run loop for another answer: fail out of the `done` that
    /// yielded the previous one.
    pub(crate) fn request_next(&mut self) {
        self.fail = true;
    }

    /// Return to the quiescent state between queries.
    pub(crate) fn reset(&mut self) {
        self.setup_query(NO_CONT, 0);
    }

    /// The heap-height boundary below which bindings must be trailed.
    pub(crate) fn hb(&self) -> usize {
        self.choices
            .last()
            .map(|cp| cp.heap_mark)
            .unwrap_or(self.heap_mark)
    }

    /// Read a register; unwritten registers read as the null address.
    pub(crate) fn reg(&self, idx: u16) -> CellRef {
        self.regs.get(idx as usize).copied().unwrap_or_default()
    }

    pub(crate) fn set_reg(&mut self, idx: u16, addr: CellRef) {
        let idx = idx as usize;
        if self.regs.len() <= idx {
            self.regs.resize(idx + 1, CellRef(0));
        }
        self.regs[idx] = addr;
    }

    pub(crate) fn slot_addr(&self, slot: Slot) -> Result<CellRef, Fault> {
        match slot {
            Slot::Reg(r) => Ok(self.reg(r.0)),
            Slot::Local(y) => {
                let e = self.cur_env.ok_or(Fault::NoEnvironment)?;
                Ok(self.envs[e].slots[y.0 as usize])
            }
        }
    }

    pub(crate) fn slot_set(&mut self, slot: Slot, addr: CellRef) -> Result<(), Fault> {
        match slot {
            Slot::Reg(r) => self.set_reg(r.0, addr),
            Slot::Local(y) => {
                let e = self.cur_env.ok_or(Fault::NoEnvironment)?;
                self.envs[e].slots[y.0 as usize] = addr;
            }
        }
        Ok(())
    }

    /// Read a permanent slot of the current environment (the query
    /// environment, when the machine is suspended at `done`).
    pub(crate) fn permanent(&self, local: Local) -> Result<CellRef, Fault> {
        self.slot_addr(Slot::Local(local))
    }
}
