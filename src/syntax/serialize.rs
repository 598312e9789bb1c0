use std::collections::HashMap;

use crate::{
    cell::{Cell, Functor},
    defs::CellRef,
    mem::Mem,
};

use super::Term;

/// Writes surface terms onto the heap in the serialization format the
/// machine expects: an `Rcd` cell per structure, pointing at a `Sig` cell
/// followed by the argument cells.
#[derive(Default, Debug)]
pub struct Serializer {
    term_bodies_remaining: Vec<(CellRef, TermBody)>,
    var_cells: HashMap<String, CellRef>,
}

#[derive(Debug)]
struct TermBody {
    functor: Functor,
    args: Vec<Term>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize one term. Named variables are shared across every call on
    /// the same serializer, so related terms can be written with consistent
    /// variable identity.
    pub fn serialize(&mut self, term: &Term, mem: &mut Mem) -> CellRef {
        let start = CellRef::new(mem.heap_len());
        self.term_bodies_remaining.clear();
        self.serialize_flat(term, mem);
        while !self.term_bodies_remaining.is_empty() {
            self.serialize_remainder(mem);
        }
        start
    }

    fn serialize_flat(&mut self, term: &Term, mem: &mut Mem) {
        match term {
            Term::Int(i) => {
                let _ = mem.push(Cell::Int(*i));
            }
            Term::Sym(s) => {
                let sym = mem.intern_sym(s);
                let _ = mem.push(Cell::Sym(sym));
            }
            Term::NamedVar(v) => {
                if let Some(&cell) = self.var_cells.get(v) {
                    let _ = mem.push(Cell::Ref(cell));
                } else {
                    let cell = mem.push_fresh_var();
                    self.var_cells.insert(v.clone(), cell);
                }
            }
            Term::FreshVar => {
                let _ = mem.push_fresh_var();
            }
            Term::Record(functor, args) => {
                // Patched to the functor's address once the body is written.
                let rcd_addr = mem.push(Cell::Rcd(CellRef(usize::MAX)));
                self.term_bodies_remaining.push((
                    rcd_addr,
                    TermBody {
                        functor: mem.intern_functor(functor, args.len() as u8),
                        args: args.clone(),
                    },
                ));
            }
        }
    }

    fn serialize_remainder(&mut self, mem: &mut Mem) {
        let term_bodies_remaining = self.term_bodies_remaining.drain(..).collect::<Vec<_>>();
        for (rcd_addr, TermBody { functor, args }) in term_bodies_remaining {
            let functor_addr = mem.push(Cell::Sig(functor));
            for arg in args {
                self.serialize_flat(&arg, mem);
            }
            mem.cell_write(rcd_addr, Cell::Rcd(functor_addr));
        }
    }
}

impl Term {
    pub fn serialize(&self, mem: &mut Mem) -> CellRef {
        Serializer::new().serialize(self, mem)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use crate::mem::Mem;
    use crate::syntax::Term;

    #[test]
    fn round_trip_through_heap() {
        let mut mem = Mem::new();
        let input = "f(a123, X64, goblin_stats(123, -99, spear))";
        let root = Term::parse(input).unwrap().serialize(&mut mem);
        // Variables print by heap address, so compare shape, not names.
        assert_eq!(
            mem.display_term(root).to_string(),
            "f(a123, _3, goblin_stats(123, -99, spear))"
        );
    }

    #[test]
    fn shared_variables_share_cells() {
        let mut mem = Mem::new();
        let root = Term::parse("pair(X, X)").unwrap().serialize(&mut mem);
        let rendered = mem.display_term(root).to_string();
        let inner = rendered.trim_start_matches("pair(").trim_end_matches(')');
        let (a, b) = inner.split_once(", ").unwrap();
        assert_eq!(a, b);
    }
}
