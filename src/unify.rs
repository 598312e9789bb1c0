use crate::{
    cell::Cell,
    defs::CellRef,
    mem::{Fault, Mem},
};

#[cfg(test)]
mod tests;

/// Structural unification of the terms rooted at `t1_ref` and `t2_ref`.
///
/// Iterative with an explicit worklist so deep terms cannot overflow the
/// call stack. When two unbound variables meet, the younger cell (higher
/// heap address) is bound to the older one; bindings are trailed against
/// the backtrack boundary `hb` (see [`Mem::bind`]).
///
/// There is no occurs check: `unify`ing `X` with `f(X)` builds a cyclic
/// structure, which the printer and decoder tolerate via depth cutoffs.
pub fn unify(mem: &mut Mem, hb: usize, t1_ref: CellRef, t2_ref: CellRef) -> Result<bool, Fault> {
    let mut worklist = vec![(t1_ref, t2_ref)];

    while let Some((t1_ref, t2_ref)) = worklist.pop() {
        let (t1_ref, t1) = mem.resolve_ref_to_ref_and_cell(t1_ref);
        let (t2_ref, t2) = mem.resolve_ref_to_ref_and_cell(t2_ref);

        if t1_ref == t2_ref {
            continue;
        }

        match (t1, t2) {
            (Cell::Int(i1), Cell::Int(i2)) => {
                if i1 != i2 {
                    return Ok(false);
                }
            }
            (Cell::Sym(s1), Cell::Sym(s2)) => {
                if s1 != s2 {
                    return Ok(false);
                }
            }
            // Both unbound: bind the younger to the older so the binding
            // cannot outlive its target on backtracking.
            (Cell::Ref(..), Cell::Ref(..)) => {
                if t1_ref > t2_ref {
                    mem.bind(t1_ref, Cell::Ref(t2_ref), hb)?;
                } else {
                    mem.bind(t2_ref, Cell::Ref(t1_ref), hb)?;
                }
            }
            (Cell::Ref(..), _concrete) => {
                mem.bind(t1_ref, Cell::Ref(t2_ref), hb)?;
            }
            (_concrete, Cell::Ref(..)) => {
                mem.bind(t2_ref, Cell::Ref(t1_ref), hb)?;
            }
            (Cell::Rcd(f1_ref), Cell::Rcd(f2_ref)) => {
                let Cell::Sig(f1) = mem.cell_read(f1_ref) else {
                    return Err(Fault::FunctorExpected(f1_ref));
                };
                let Cell::Sig(f2) = mem.cell_read(f2_ref) else {
                    return Err(Fault::FunctorExpected(f2_ref));
                };

                tracing::trace!(
                    "unifying compound term {} and compound term {}",
                    mem.display(&f1),
                    mem.display(&f2),
                );

                if f1 != f2 {
                    return Ok(false);
                }

                // Add 1 to skip past the functor cell.
                let base1 = f1_ref + 1;
                let base2 = f2_ref + 1;

                for i in 0..f1.arity as usize {
                    worklist.push((base1 + i, base2 + i));
                }
            }
            (Cell::Sig(f1), Cell::Sig(f2)) => {
                tracing::warn!(
                    "unifying bare functor cells {} and {}",
                    mem.display(&f1),
                    mem.display(&f2),
                );
                if f1 != f2 {
                    return Ok(false);
                }
            }
            _ => return Ok(false),
        }
    }

    Ok(true)
}
