use core::fmt;
use std::collections::HashMap;

use derive_more::From;

use crate::{
    bc::instr::Local,
    cell::Functor,
    db::Db,
    machine::{exec::Outcome, Machine},
    mem::{Fault, Mem},
    syntax::{
        compile::{self, compile_query},
        Clause, Term,
    },
};

#[cfg(test)]
mod tests;

/// One answer: source variable name to the term it is bound to.
pub type Bindings = HashMap<String, Term>;

#[derive(Debug, PartialEq, From)]
pub enum Error {
    /// A malformed assertion or query; reported synchronously, nothing is
    /// stored.
    #[from]
    Compile(compile::Error),
    /// A violated machine invariant; fatal to the current query only.
    #[from]
    Fault(Fault),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(e) => write!(f, "compile error: {e}"),
            Error::Fault(e) => write!(f, "machine fault: {e}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A self-contained Prolog engine: the symbol interner and heap, the clause
/// database with its code store, and one abstract machine. Engines share no
/// process-wide state, so any number can coexist.
pub struct Engine {
    mem: Mem,
    db: Db,
    machine: Machine,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut mem = Mem::new();
        let db = Db::new(&mut mem);
        Self {
            mem,
            db,
            machine: Machine::new(),
        }
    }

    pub fn mem(&self) -> &Mem {
        &self.mem
    }

    /// Drop every clause and every logic frame; the builtins come back.
    pub fn reset_database(&mut self) {
        self.db = Db::new(&mut self.mem);
    }

    pub fn push_logic_frame(&mut self) {
        self.db.push_logic_frame();
    }

    pub fn pop_logic_frame(&mut self) -> Result<()> {
        Ok(self.db.pop_logic_frame()?)
    }

    pub fn finalize_logic_frame(&mut self) -> Result<()> {
        Ok(self.db.finalize_logic_frame()?)
    }

    /// Assert a fact into the current logic frame.
    pub fn invoke_fact(&mut self, fact: Term) -> Result<()> {
        self.db.assert_clause(
            &mut self.mem,
            Clause {
                head: fact,
                body: Vec::new(),
            },
        )?;
        Ok(())
    }

    /// Assert a rule into the current logic frame.
    pub fn invoke_rule(&mut self, head: Term, body: impl IntoIterator<Item = Term>) -> Result<()> {
        self.db.assert_clause(
            &mut self.mem,
            Clause {
                head,
                body: body.into_iter().collect(),
            },
        )?;
        Ok(())
    }

    /// Compile a conjunction of goals and return the answer iterator. Each
    /// `next()` drives the machine to the following `done`; dropping the
    /// iterator (at any point) restores the heap, trail, code store, and
    /// machine to their pre-query state.
    pub fn solve(&mut self, goals: &[Term]) -> Result<Solutions<'_>> {
        let query = compile_query(&mut self.mem, goals)?;
        let code_mark = self.db.code_len();
        let heap_mark = self.mem.heap_len();
        let trail_mark = self.mem.trail_len();
        let entry = self.db.append_query(&query.code);
        self.machine.setup_query(entry, heap_mark);
        Ok(Solutions {
            engine: self,
            vars: query.vars,
            code_mark,
            heap_mark,
            trail_mark,
            state: State::Fresh,
        })
    }

    pub fn query_one(&mut self, goals: &[Term]) -> Result<Option<Bindings>> {
        let mut solutions = self.solve(goals)?;
        match solutions.next() {
            Some(bindings) => Ok(Some(bindings?)),
            None => Ok(None),
        }
    }

    pub fn query_all(&mut self, goals: &[Term]) -> Result<Vec<Bindings>> {
        let solutions = self.solve(goals)?;
        let answers: std::result::Result<Vec<_>, Fault> = solutions.collect();
        Ok(answers?)
    }

    pub fn query_map<T>(
        &mut self,
        goals: &[Term],
        mut f: impl FnMut(&Bindings) -> T,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut solutions = self.solve(goals)?;
        while let Some(bindings) = solutions.next() {
            out.push(f(&bindings?));
        }
        Ok(out)
    }

    /// Success or failure without materializing bindings.
    pub fn prove(&mut self, goals: &[Term]) -> Result<bool> {
        let mut solutions = self.solve(goals)?;
        Ok(solutions.advance()?)
    }

    /// Render a predicate's compiled chain, if it has one.
    pub fn disassemble(&self, name: &str, arity: u8) -> Option<String> {
        let sym = self.mem.lookup_sym(name)?;
        self.db.disassemble(Functor { sym, arity }, &self.mem)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Running,
    Finished,
}

/// The answers of one query, yielded one per `next()`. The machine suspends
/// at each `done`; asking for the next answer fails back into the remaining
/// choice points.
pub struct Solutions<'e> {
    engine: &'e mut Engine,
    vars: Vec<(String, Local)>,
    code_mark: usize,
    heap_mark: usize,
    trail_mark: usize,
    state: State,
}

impl Solutions<'_> {
    /// Drive the machine to the next answer. Returns `false` once the
    /// query is exhausted (at which point the engine is already restored).
    fn advance(&mut self) -> std::result::Result<bool, Fault> {
        match self.state {
            State::Finished => return Ok(false),
            State::Fresh => self.state = State::Running,
            State::Running => self.engine.machine.request_next(),
        }
        let Engine { mem, db, machine } = &mut *self.engine;
        match machine.run(mem, db) {
            Ok(Outcome::Answer) => Ok(true),
            Ok(Outcome::Exhausted) => {
                self.teardown();
                Ok(false)
            }
            Err(fault) => {
                self.teardown();
                Err(fault)
            }
        }
    }

    fn decode_bindings(&self) -> std::result::Result<Bindings, Fault> {
        let mut bindings = Bindings::new();
        for (name, slot) in &self.vars {
            let addr = self.engine.machine.permanent(*slot)?;
            bindings.insert(name.clone(), Term::deserialize(addr, &self.engine.mem)?);
        }
        Ok(bindings)
    }

    /// Restore the engine to its pre-query state: rewind the trail, shrink
    /// the heap and code store, quiesce the machine.
    fn teardown(&mut self) {
        if self.state == State::Finished {
            return;
        }
        self.state = State::Finished;
        let Engine { mem, db, machine } = &mut *self.engine;
        mem.unwind_trail(self.trail_mark);
        mem.truncate_heap(self.heap_mark);
        db.truncate_code(self.code_mark);
        machine.reset();
    }
}

impl Iterator for Solutions<'_> {
    type Item = std::result::Result<Bindings, Fault>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => Some(self.decode_bindings()),
            Ok(false) => None,
            Err(fault) => Some(Err(fault)),
        }
    }
}

impl Drop for Solutions<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}
