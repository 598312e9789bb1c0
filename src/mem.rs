use core::fmt;
use std::collections::HashMap;

use crate::{
    cell::{Cell, Functor},
    defs::{CellRef, CodeAddr, Sym},
};

/// Cutoff for the term printer so that cyclic structures (possible because
/// unification performs no occurs check) still unparse finitely.
const MAX_DISPLAY_DEPTH: usize = 512;

/// A violated machine invariant. These indicate a bug in the compiler or the
/// machine; they are never reachable from well-formed user input, and they
/// abort the current query only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Attempted to bind a cell which was not an unbound variable.
    BindNonVariable(CellRef),
    /// An `Rcd` cell pointed at something other than a `Sig` cell.
    FunctorExpected(CellRef),
    /// A read past the end of the heap.
    BadCellRead(CellRef),
    /// The program counter left the code store.
    PcOutOfBounds(CodeAddr),
    /// A stack-slot access with no environment frame allocated.
    NoEnvironment,
    /// `retry`/`trust` executed with an empty choice-point stack.
    NoChoicePoint,
    /// `pop_logic_frame` with no frame pushed.
    NoLogicFrame,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::BindNonVariable(r) => write!(f, "cannot bind non-variable cell at {r}"),
            Fault::FunctorExpected(r) => write!(f, "expected a functor cell at {r}"),
            Fault::BadCellRead(r) => write!(f, "heap read out of bounds at {r}"),
            Fault::PcOutOfBounds(pc) => write!(f, "program counter out of bounds: {pc}"),
            Fault::NoEnvironment => write!(f, "stack-slot access with no environment"),
            Fault::NoChoicePoint => write!(f, "retry/trust with no choice point"),
            Fault::NoLogicFrame => write!(f, "no logic frame to pop"),
        }
    }
}

impl std::error::Error for Fault {}

/// The undoable memory of the machine: the heap of tagged cells and the
/// trail of bindings to reset on backtracking, plus the process-wide symbol
/// interner (append-only, constant-time in both directions).
pub struct Mem {
    pub(crate) heap: Vec<Cell>,
    pub(crate) trail: Vec<CellRef>,
    symbols: Vec<String>,
    symbol_ids: HashMap<String, Sym>,
}

impl Default for Mem {
    fn default() -> Self {
        Self::new()
    }
}

impl Mem {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            trail: Vec::new(),
            symbols: Vec::new(),
            symbol_ids: HashMap::new(),
        }
    }

    pub fn intern_sym(&mut self, text: impl AsRef<str>) -> Sym {
        if let Some(&sym) = self.symbol_ids.get(text.as_ref()) {
            sym
        } else {
            let sym = Sym::new(self.symbols.len());
            self.symbols.push(text.as_ref().to_string());
            self.symbol_ids.insert(text.as_ref().to_string(), sym);
            sym
        }
    }

    pub fn intern_functor(&mut self, name: impl AsRef<str>, arity: u8) -> Functor {
        Functor {
            sym: self.intern_sym(name),
            arity,
        }
    }

    /// Look up an already-interned symbol without interning it.
    pub fn lookup_sym(&self, text: &str) -> Option<Sym> {
        self.symbol_ids.get(text).copied()
    }

    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    pub fn push(&mut self, cell: Cell) -> CellRef {
        let r = CellRef::new(self.heap.len());
        self.heap.push(cell);
        r
    }

    /// Push an unbound variable (a self-referring `Ref` cell).
    pub fn push_fresh_var(&mut self) -> CellRef {
        let r = CellRef::new(self.heap.len());
        self.heap.push(Cell::Ref(r));
        r
    }

    pub fn cell_read(&self, r: CellRef) -> Cell {
        self.heap[r.usize()]
    }

    pub fn try_cell_read(&self, r: CellRef) -> Option<Cell> {
        self.heap.get(r.usize()).copied()
    }

    pub fn cell_write(&mut self, r: CellRef, cell: Cell) {
        self.heap[r.usize()] = cell;
    }

    /// Follow a chain of `Ref` cells until reaching either a non-`Ref` cell
    /// or an unbound variable. Returns the address of the final cell along
    /// with the cell itself.
    pub fn resolve_ref_to_ref_and_cell(&self, mut r: CellRef) -> (CellRef, Cell) {
        loop {
            match self.cell_read(r) {
                Cell::Ref(next) if next != r => r = next,
                cell => return (r, cell),
            }
        }
    }

    /// Bind the unbound variable at `r` to `cell`, recording the binding on
    /// the trail iff `r` is older than the backtrack boundary `hb` (the
    /// current choice point's heap-height snapshot, or the query's starting
    /// heap height when no choice point exists).
    pub fn bind(&mut self, r: CellRef, cell: Cell, hb: usize) -> Result<(), Fault> {
        match self.cell_read(r) {
            Cell::Ref(x) if x == r => {}
            _ => return Err(Fault::BindNonVariable(r)),
        }
        self.heap[r.usize()] = cell;
        if r.usize() < hb {
            self.trail.push(r);
        }
        Ok(())
    }

    /// Reset every binding recorded past `trail_mark` and shrink the trail
    /// back to it.
    pub fn unwind_trail(&mut self, trail_mark: usize) {
        for i in trail_mark..self.trail.len() {
            let r = self.trail[i];
            self.heap[r.usize()] = Cell::Ref(r);
        }
        self.trail.truncate(trail_mark);
    }

    pub fn truncate_heap(&mut self, heap_mark: usize) {
        self.heap.truncate(heap_mark);
    }

    /// Create a displayable value for the term rooted at `r`. Unbound
    /// variables print as `_N`; cons chains print with list syntax; the
    /// unparse cuts off at a fixed depth so cyclic terms stay finite.
    pub fn display_term(&self, r: CellRef) -> TermDisplay<'_> {
        TermDisplay { root: r, mem: self }
    }

    pub fn display<'a, T: DisplayViaMem + ?Sized>(&'a self, val: &'a T) -> Displayed<'a, T> {
        Displayed { val, mem: self }
    }
}

impl Sym {
    pub fn resolve<'a>(&self, mem: &'a Mem) -> &'a str {
        &mem.symbols[self.usize()]
    }
}

/// Display for values whose rendering needs the symbol interner.
pub trait DisplayViaMem {
    fn display_via_mem(&self, f: &mut fmt::Formatter<'_>, mem: &Mem) -> fmt::Result;
}

pub struct Displayed<'a, T: ?Sized> {
    val: &'a T,
    mem: &'a Mem,
}

impl<T: DisplayViaMem + ?Sized> fmt::Display for Displayed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.val.display_via_mem(f, self.mem)
    }
}

impl DisplayViaMem for Sym {
    fn display_via_mem(&self, f: &mut fmt::Formatter<'_>, mem: &Mem) -> fmt::Result {
        write!(f, "{}", self.resolve(mem))
    }
}

pub struct TermDisplay<'a> {
    root: CellRef,
    mem: &'a Mem,
}

impl TermDisplay<'_> {
    fn fmt_term(&self, f: &mut fmt::Formatter<'_>, r: CellRef, depth: usize) -> fmt::Result {
        if depth == 0 {
            return write!(f, "…");
        }
        let (r, cell) = self.mem.resolve_ref_to_ref_and_cell(r);
        match cell {
            Cell::Ref(_) => write!(f, "_{}", r.usize()),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Sym(s) => write!(f, "{}", s.resolve(self.mem)),
            Cell::Sig(functor) => {
                write!(f, "{}/{}", functor.sym.resolve(self.mem), functor.arity)
            }
            Cell::Rcd(sig_ref) => {
                let Some(Cell::Sig(functor)) = self.mem.try_cell_read(sig_ref) else {
                    return write!(f, "<corrupt {r}>");
                };
                if functor.sym.resolve(self.mem) == "." && functor.arity == 2 {
                    write!(f, "[")?;
                    self.fmt_term(f, sig_ref + 1, depth - 1)?;
                    self.fmt_list_tail(f, sig_ref + 2, depth - 1)?;
                    return write!(f, "]");
                }
                write!(f, "{}(", functor.sym.resolve(self.mem))?;
                for i in 0..functor.arity as usize {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    self.fmt_term(f, sig_ref + 1 + i, depth - 1)?;
                }
                write!(f, ")")
            }
        }
    }

    fn fmt_list_tail(&self, f: &mut fmt::Formatter<'_>, r: CellRef, depth: usize) -> fmt::Result {
        if depth == 0 {
            return write!(f, "|…");
        }
        let (r, cell) = self.mem.resolve_ref_to_ref_and_cell(r);
        match cell {
            Cell::Sym(s) if s.resolve(self.mem) == "[]" => Ok(()),
            Cell::Rcd(sig_ref) => {
                let Some(Cell::Sig(functor)) = self.mem.try_cell_read(sig_ref) else {
                    return write!(f, "|<corrupt {r}>");
                };
                if functor.sym.resolve(self.mem) == "." && functor.arity == 2 {
                    write!(f, ", ")?;
                    self.fmt_term(f, sig_ref + 1, depth - 1)?;
                    self.fmt_list_tail(f, sig_ref + 2, depth - 1)
                } else {
                    write!(f, "|")?;
                    self.fmt_term(f, r, depth - 1)
                }
            }
            _ => {
                write!(f, "|")?;
                self.fmt_term(f, r, depth - 1)
            }
        }
    }
}

impl fmt::Display for TermDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_term(f, self.root, MAX_DISPLAY_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn display_hand_built_heap() {
        let mut mem = Mem::new();

        let h2 = mem.intern_functor("h", 2);
        let f1 = mem.intern_functor("f", 1);
        let p3 = mem.intern_functor("p", 3);

        mem.heap = vec![
            Cell::Rcd(CellRef(1)),  // 0
            Cell::Sig(h2),          // 1
            Cell::Ref(CellRef(2)),  // 2
            Cell::Ref(CellRef(3)),  // 3
            Cell::Rcd(CellRef(5)),  // 4
            Cell::Sig(f1),          // 5
            Cell::Ref(CellRef(3)),  // 6
            Cell::Rcd(CellRef(8)),  // 7
            Cell::Sig(p3),          // 8
            Cell::Ref(CellRef(2)),  // 9
            Cell::Rcd(CellRef(1)),  // 10
            Cell::Rcd(CellRef(5)),  // 11
        ];

        let s = mem.display_term(CellRef(7));
        assert_eq!(s.to_string(), "p(_2, h(_2, _3), f(_3))");
    }

    #[test]
    fn cyclic_term_unparses_finitely() {
        let mut mem = Mem::new();
        let f1 = mem.intern_functor("f", 1);

        // X = f(X)
        let rcd = mem.push(Cell::Rcd(CellRef(1)));
        mem.push(Cell::Sig(f1));
        mem.push(Cell::Ref(rcd));

        let rendered = mem.display_term(rcd).to_string();
        assert!(rendered.ends_with('…') || rendered.contains('…'));
    }

    #[test]
    fn bind_rejects_bound_cells() {
        let mut mem = Mem::new();
        let a = mem.push_fresh_var();
        let b = mem.push_fresh_var();
        mem.bind(a, Cell::Ref(b), 0).unwrap();
        assert_eq!(mem.bind(a, Cell::Int(1), 0), Err(Fault::BindNonVariable(a)));
    }

    #[test]
    fn conditional_trailing() {
        let mut mem = Mem::new();
        let old = mem.push_fresh_var();
        mem.bind(old, Cell::Int(1), 0).unwrap();
        assert_eq!(mem.trail_len(), 0);

        let young = mem.push_fresh_var();
        mem.bind(young, Cell::Int(2), mem.heap_len()).unwrap();
        assert_eq!(mem.trail_len(), 1);

        mem.unwind_trail(0);
        assert_eq!(mem.cell_read(young), Cell::Ref(young));
        // The untrailed binding is untouched.
        assert_eq!(mem.cell_read(old), Cell::Int(1));
    }
}
