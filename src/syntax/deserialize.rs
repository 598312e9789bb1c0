use crate::{
    cell::Cell,
    defs::CellRef,
    mem::{Fault, Mem},
};

use super::Term;

/// Decode cutoff. Cyclic terms are legal (no occurs check), so the decoder
/// must terminate on its own; anything deeper decodes as a fresh variable.
const MAX_DECODE_DEPTH: usize = 2048;

impl Term {
    /// Read the term rooted at `root` back off the heap. Unbound variables
    /// decode as `_N` where `N` is the cell address.
    pub fn deserialize(root: CellRef, mem: &Mem) -> Result<Term, Fault> {
        decode(root, mem, MAX_DECODE_DEPTH)
    }
}

fn resolve(mut r: CellRef, mem: &Mem) -> Result<(CellRef, Cell), Fault> {
    loop {
        match mem.try_cell_read(r).ok_or(Fault::BadCellRead(r))? {
            Cell::Ref(next) if next != r => r = next,
            cell => return Ok((r, cell)),
        }
    }
}

fn decode(r: CellRef, mem: &Mem, depth: usize) -> Result<Term, Fault> {
    if depth == 0 {
        return Ok(Term::FreshVar);
    }
    let (r, cell) = resolve(r, mem)?;
    match cell {
        Cell::Ref(_) => Ok(Term::NamedVar(format!("_{}", r.usize()))),
        Cell::Int(i) => Ok(Term::Int(i)),
        Cell::Sym(s) => Ok(Term::Sym(s.resolve(mem).to_owned())),
        Cell::Sig(_) => Err(Fault::FunctorExpected(r)),
        Cell::Rcd(sig_ref) => {
            let Cell::Sig(functor) = mem
                .try_cell_read(sig_ref)
                .ok_or(Fault::BadCellRead(sig_ref))?
            else {
                return Err(Fault::FunctorExpected(sig_ref));
            };
            let name = functor.sym.resolve(mem).to_owned();
            let mut args = Vec::with_capacity(functor.arity as usize);
            for i in 0..functor.arity as usize {
                args.push(decode(sig_ref + 1 + i, mem, depth - 1)?);
            }
            Ok(Term::Record(name, args))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use test_log::test;

    use crate::mem::Mem;
    use crate::syntax::Term;

    #[test]
    fn ground_terms_survive_the_round_trip() {
        let mut mem = Mem::new();
        for src in ["42", "socrates", "[1, 2, 3]", "f(g(a), [b|c])"] {
            let term = Term::parse(src).unwrap();
            let root = term.serialize(&mut mem);
            check!(Term::deserialize(root, &mem).unwrap() == term, "src: {src}");
        }
    }

    #[test]
    fn unbound_vars_decode_by_address() {
        let mut mem = Mem::new();
        let root = Term::parse("f(X)").unwrap().serialize(&mut mem);
        let Term::Record(_, args) = Term::deserialize(root, &mem).unwrap() else {
            panic!("expected a record")
        };
        check!(args[0] == Term::NamedVar("_2".to_string()));
    }
}
