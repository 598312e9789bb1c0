use std::collections::HashMap;
use std::fmt::Write as _;

use crate::{
    bc::instr::Instr,
    cell::Functor,
    defs::CodeAddr,
    mem::{Fault, Mem},
    syntax::{
        compile::{self, compile_clause},
        Clause, Term,
    },
};

/// The code-store extent of one predicate's try/retry/trust chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    pub start: CodeAddr,
    pub end: CodeAddr,
}

/// One pushed logic frame: the code-store height at the push plus
/// first-touch saves of everything modified since, enough to retract the
/// whole batch on pop.
#[derive(Debug, Default)]
struct FrameMark {
    code_len: usize,
    saved_labels: HashMap<Functor, Option<CodeRange>>,
    saved_clause_counts: HashMap<Functor, usize>,
}

/// The clause database: source clauses per predicate, the append-only code
/// store, the label table resolving functors to compiled chains, and the
/// logic-frame stack.
pub struct Db {
    code: Vec<Instr>,
    labels: HashMap<Functor, CodeRange>,
    preds: HashMap<Functor, Vec<Clause>>,
    frames: Vec<FrameMark>,
}

impl Db {
    /// An empty database with the builtin predicates installed.
    pub fn new(mem: &mut Mem) -> Self {
        let mut db = Self {
            code: Vec::new(),
            labels: HashMap::new(),
            preds: HashMap::new(),
            frames: Vec::new(),
        };
        db.install_builtins(mem);
        db
    }

    pub(crate) fn code(&self) -> &[Instr] {
        &self.code
    }

    pub(crate) fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn label_of(&self, functor: Functor) -> Option<CodeAddr> {
        self.labels.get(&functor).map(|range| range.start)
    }

    /// Append compiled query code; the caller truncates it back off with
    /// [`Db::truncate_code`] when the query is torn down.
    pub(crate) fn append_query(&mut self, code: &[Instr]) -> CodeAddr {
        let entry = self.code.len();
        self.code.extend_from_slice(code);
        entry
    }

    pub(crate) fn truncate_code(&mut self, len: usize) {
        self.code.truncate(len);
    }

    /// Assert a clause into the current logic frame and recompile the
    /// predicate's chain. A compile error aborts before anything is stored.
    pub fn assert_clause(&mut self, mem: &mut Mem, clause: Clause) -> compile::Result<()> {
        let compiled = compile_clause(mem, &clause)?;
        let functor = compiled.functor;

        self.save_first_touch(functor);
        self.preds.entry(functor).or_default().push(clause);
        self.recompile(mem, functor)?;
        tracing::debug!(
            "asserted clause {} of {}",
            self.preds[&functor].len(),
            mem.display(&functor),
        );
        Ok(())
    }

    /// Recompile a predicate's chain at the top of the code store and
    /// re-aim its label. Single-clause predicates compile to straight code;
    /// otherwise each clause block is prefixed with `try`/`retry`/`trust`
    /// and the jump of the previous block is patched as the next lands.
    fn recompile(&mut self, mem: &mut Mem, functor: Functor) -> compile::Result<()> {
        let clauses = &self.preds[&functor];
        debug_assert!(!clauses.is_empty());

        let mut blocks = Vec::with_capacity(clauses.len());
        for clause in clauses {
            blocks.push(compile_clause(mem, clause)?.code);
        }

        let entry = self.code.len();
        let last = blocks.len() - 1;
        let mut prev_ctrl: Option<usize> = None;
        for (i, block) in blocks.into_iter().enumerate() {
            if last > 0 {
                let ctrl_pos = self.code.len();
                self.code.push(match i {
                    0 => Instr::Try(0),
                    _ if i == last => Instr::Trust,
                    _ => Instr::Retry(0),
                });
                if let Some(prev) = prev_ctrl.take() {
                    self.patch_jump(prev, ctrl_pos);
                }
                if i != last {
                    prev_ctrl = Some(ctrl_pos);
                }
            }
            self.code.extend_from_slice(&block);
        }

        self.labels.insert(
            functor,
            CodeRange {
                start: entry,
                end: self.code.len(),
            },
        );
        Ok(())
    }

    fn patch_jump(&mut self, at: usize, target: CodeAddr) {
        match &mut self.code[at] {
            Instr::Try(lbl) | Instr::Retry(lbl) => *lbl = target,
            other => unreachable!("patching a non-jump instruction {other:?}"),
        }
    }

    /// Record the pre-touch state of `functor` in the innermost frame, once.
    fn save_first_touch(&mut self, functor: Functor) {
        let label = self.labels.get(&functor).copied();
        let count = self.preds.get(&functor).map(Vec::len).unwrap_or(0);
        if let Some(frame) = self.frames.last_mut() {
            frame.saved_labels.entry(functor).or_insert(label);
            frame.saved_clause_counts.entry(functor).or_insert(count);
        }
    }

    pub fn push_logic_frame(&mut self) {
        self.frames.push(FrameMark {
            code_len: self.code.len(),
            ..FrameMark::default()
        });
        tracing::debug!(depth = self.frames.len(), "pushed logic frame");
    }

    /// Retract every clause asserted since the matching push: truncate the
    /// code store and restore the saved label entries and clause counts.
    pub fn pop_logic_frame(&mut self) -> Result<(), Fault> {
        let frame = self.frames.pop().ok_or(Fault::NoLogicFrame)?;
        self.code.truncate(frame.code_len);
        for (functor, saved) in frame.saved_labels {
            match saved {
                Some(range) => {
                    self.labels.insert(functor, range);
                }
                None => {
                    self.labels.remove(&functor);
                }
            }
        }
        for (functor, count) in frame.saved_clause_counts {
            if count == 0 {
                self.preds.remove(&functor);
            } else if let Some(clauses) = self.preds.get_mut(&functor) {
                clauses.truncate(count);
            }
        }
        tracing::debug!(depth = self.frames.len(), "popped logic frame");
        Ok(())
    }

    /// Make the innermost frame's assertions permanent. Its first-touch
    /// saves merge into the parent frame so an enclosing pop still restores
    /// to the parent's own push-state.
    pub fn finalize_logic_frame(&mut self) -> Result<(), Fault> {
        let frame = self.frames.pop().ok_or(Fault::NoLogicFrame)?;
        if let Some(parent) = self.frames.last_mut() {
            for (functor, saved) in frame.saved_labels {
                parent.saved_labels.entry(functor).or_insert(saved);
            }
            for (functor, count) in frame.saved_clause_counts {
                parent.saved_clause_counts.entry(functor).or_insert(count);
            }
        }
        Ok(())
    }

    /// Render a predicate's compiled chain, one instruction per line.
    pub fn disassemble(&self, functor: Functor, mem: &Mem) -> Option<String> {
        let range = *self.labels.get(&functor)?;
        let mut out = String::new();
        for (offset, instr) in self.code[range.start..range.end].iter().enumerate() {
            let _ = writeln!(out, "{:>4}  {}", range.start + offset, mem.display(instr));
        }
        Some(out)
    }

    /// The builtin predicates. `call/1` and `fail/0` are hand-emitted
    /// opcodes; the rest are ordinary library clauses compiled through the
    /// same pipeline as user code.
    fn install_builtins(&mut self, mem: &mut Mem) {
        let call1 = mem.intern_functor("call", 1);
        let start = self.code.len();
        self.code.push(Instr::DynamicCall);
        self.labels.insert(
            call1,
            CodeRange {
                start,
                end: self.code.len(),
            },
        );

        let fail0 = mem.intern_functor("fail", 0);
        let start = self.code.len();
        self.code.push(Instr::Fail);
        self.labels.insert(
            fail0,
            CodeRange {
                start,
                end: self.code.len(),
            },
        );

        let var = |name: &str| Term::NamedVar(name.to_string());
        let sym = |name: &str| Term::Sym(name.to_string());
        let rec = |name: &str, args: Vec<Term>| Term::Record(name.to_string(), args);

        let library = [
            // true.
            Clause {
                head: sym("true"),
                body: vec![],
            },
            // not(G) :- call(G), !, fail.
            Clause {
                head: rec("not", vec![var("G")]),
                body: vec![rec("call", vec![var("G")]), sym("!"), sym("fail")],
            },
            // not(_).
            Clause {
                head: rec("not", vec![Term::FreshVar]),
                body: vec![],
            },
            // or(A, _) :- call(A).
            Clause {
                head: rec("or", vec![var("A"), Term::FreshVar]),
                body: vec![rec("call", vec![var("A")])],
            },
            // or(_, B) :- call(B).
            Clause {
                head: rec("or", vec![Term::FreshVar, var("B")]),
                body: vec![rec("call", vec![var("B")])],
            },
            // distinct(X, X) :- !, fail.
            Clause {
                head: rec("distinct", vec![var("X"), var("X")]),
                body: vec![sym("!"), sym("fail")],
            },
            // distinct(_, _).
            Clause {
                head: rec("distinct", vec![Term::FreshVar, Term::FreshVar]),
                body: vec![],
            },
        ];
        for clause in library {
            self.assert_clause(mem, clause)
                .expect("builtin clauses always compile");
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};
    use test_log::test;

    use super::*;

    fn fact(name: &str, arg: i32) -> Clause {
        Clause {
            head: Term::Record(name.to_string(), vec![Term::Int(arg)]),
            body: vec![],
        }
    }

    #[test]
    fn multi_clause_chain_is_patched() {
        let mut mem = Mem::new();
        let mut db = Db::new(&mut mem);

        for i in 1..=3 {
            let clause = fact("p", i);
            db.assert_clause(&mut mem, clause).unwrap();
        }

        let p1 = mem.intern_functor("p", 1);
        let range = *db.labels.get(&p1).unwrap();
        let_assert!(Instr::Try(first_jump) = db.code[range.start]);
        let_assert!(Instr::Retry(second_jump) = db.code[first_jump]);
        let_assert!(Instr::Trust = db.code[second_jump]);
    }

    #[test]
    fn pop_restores_labels_and_clauses() {
        let mut mem = Mem::new();
        let mut db = Db::new(&mut mem);

        let clause = fact("p", 1);
        db.assert_clause(&mut mem, clause).unwrap();
        let p1 = mem.intern_functor("p", 1);
        let outer_range = *db.labels.get(&p1).unwrap();
        let outer_code_len = db.code_len();

        db.push_logic_frame();
        let clause = fact("p", 2);
        db.assert_clause(&mut mem, clause).unwrap();
        check!(db.preds[&p1].len() == 2);
        check!(*db.labels.get(&p1).unwrap() != outer_range);

        db.pop_logic_frame().unwrap();
        check!(db.preds[&p1].len() == 1);
        check!(*db.labels.get(&p1).unwrap() == outer_range);
        check!(db.code_len() == outer_code_len);
    }

    #[test]
    fn pop_removes_predicates_created_in_frame() {
        let mut mem = Mem::new();
        let mut db = Db::new(&mut mem);

        db.push_logic_frame();
        let clause = fact("q", 1);
        db.assert_clause(&mut mem, clause).unwrap();
        let q1 = mem.intern_functor("q", 1);
        check!(db.label_of(q1).is_some());

        db.pop_logic_frame().unwrap();
        check!(db.label_of(q1).is_none());
        check!(!db.preds.contains_key(&q1));
    }

    #[test]
    fn finalize_merges_into_parent() {
        let mut mem = Mem::new();
        let mut db = Db::new(&mut mem);

        db.push_logic_frame();
        db.push_logic_frame();
        let clause = fact("r", 1);
        db.assert_clause(&mut mem, clause).unwrap();
        db.finalize_logic_frame().unwrap();

        let r1 = mem.intern_functor("r", 1);
        check!(db.label_of(r1).is_some());

        // The parent pop still retracts the finalized child's assertions.
        db.pop_logic_frame().unwrap();
        check!(db.label_of(r1).is_none());
    }

    #[test]
    fn pop_with_no_frame_is_a_fault() {
        let mut mem = Mem::new();
        let mut db = Db::new(&mut mem);
        check!(db.pop_logic_frame() == Err(Fault::NoLogicFrame));
    }
}
