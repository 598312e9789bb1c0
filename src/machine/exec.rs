use crate::{
    bc::instr::{Constant, Instr},
    cell::{Cell, Functor},
    db::Db,
    defs::CellRef,
    mem::{Fault, Mem},
    unify::unify,
};

use super::{Frame, Machine, Mode};

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// `done` reached; the machine is suspended with live bindings.
    Answer,
    /// Backtracked with no choice point left; no more answers.
    Exhausted,
}

impl Machine {
    /// Fetch/decode/execute until the next answer or exhaustion. The fail
    /// flag is consumed here: raised by any failing instruction, cleared by
    /// backtracking.
    pub(crate) fn run(&mut self, mem: &mut Mem, db: &Db) -> Result<Outcome, Fault> {
        loop {
            if self.fail {
                if !self.backtrack(mem) {
                    return Ok(Outcome::Exhausted);
                }
                continue;
            }

            let pc = self.pc;
            let instr = *db.code().get(pc).ok_or(Fault::PcOutOfBounds(pc))?;
            self.pc += 1;

            if self.step(mem, db, instr)? {
                return Ok(Outcome::Answer);
            }
        }
    }

    /// Execute one instruction. Returns `true` when the query suspends at
    /// `done`.
    fn step(&mut self, mem: &mut Mem, db: &Db, instr: Instr) -> Result<bool, Fault> {
        match instr {
            Instr::PutStructure(functor, reg) => {
                let rcd = mem.push(Cell::Rcd(CellRef::new(mem.heap_len() + 1)));
                mem.push(Cell::Sig(functor));
                self.set_reg(reg.0, rcd);
            }
            Instr::PutVariable(slot, arg) => {
                let fresh = mem.push_fresh_var();
                self.slot_set(slot, fresh)?;
                self.set_reg(arg.0 as u16, fresh);
            }
            Instr::PutValue(slot, arg) => {
                let addr = self.slot_addr(slot)?;
                self.set_reg(arg.0 as u16, addr);
            }
            Instr::PutConst(constant, reg) => {
                let addr = mem.push(const_cell(constant));
                self.set_reg(reg.0, addr);
            }
            Instr::SetVariable(slot) => {
                let fresh = mem.push_fresh_var();
                self.slot_set(slot, fresh)?;
            }
            Instr::SetValue(slot) => {
                let addr = self.slot_addr(slot)?;
                mem.push(Cell::Ref(addr));
            }
            Instr::SetConst(constant) => {
                mem.push(const_cell(constant));
            }
            Instr::GetStructure(reg, functor) => {
                let (addr, cell) = mem.resolve_ref_to_ref_and_cell(self.reg(reg.0));
                match cell {
                    Cell::Ref(_) => {
                        // Unbound: build the structure and continue writing
                        // its arguments.
                        let rcd = mem.push(Cell::Rcd(CellRef::new(mem.heap_len() + 1)));
                        mem.push(Cell::Sig(functor));
                        mem.bind(addr, Cell::Ref(rcd), self.hb())?;
                        self.mode = Mode::Write;
                    }
                    Cell::Rcd(sig_ref) => {
                        match mem.try_cell_read(sig_ref).ok_or(Fault::BadCellRead(sig_ref))? {
                            Cell::Sig(f) if f == functor => {
                                self.s = sig_ref + 1;
                                self.mode = Mode::Read;
                            }
                            Cell::Sig(_) => self.fail = true,
                            _ => return Err(Fault::FunctorExpected(sig_ref)),
                        }
                    }
                    _ => self.fail = true,
                }
            }
            Instr::GetVariable(slot, arg) => {
                let addr = self.reg(arg.0 as u16);
                self.slot_set(slot, addr)?;
            }
            Instr::GetValue(slot, arg) => {
                let a = self.slot_addr(slot)?;
                let b = self.reg(arg.0 as u16);
                if !unify(mem, self.hb(), a, b)? {
                    self.fail = true;
                }
            }
            Instr::GetConst(reg, constant) => {
                let (addr, cell) = mem.resolve_ref_to_ref_and_cell(self.reg(reg.0));
                self.match_const(mem, addr, cell, constant)?;
            }
            Instr::UnifyVariable(slot) => match self.mode {
                Mode::Read => {
                    let s = self.s;
                    self.slot_set(slot, s)?;
                    self.s = s + 1;
                }
                Mode::Write => {
                    let fresh = mem.push_fresh_var();
                    self.slot_set(slot, fresh)?;
                }
            },
            Instr::UnifyValue(slot) => match self.mode {
                Mode::Read => {
                    let a = self.slot_addr(slot)?;
                    let s = self.s;
                    if !unify(mem, self.hb(), a, s)? {
                        self.fail = true;
                    }
                    self.s = s + 1;
                }
                Mode::Write => {
                    let addr = self.slot_addr(slot)?;
                    mem.push(Cell::Ref(addr));
                }
            },
            Instr::UnifyConst(constant) => match self.mode {
                Mode::Read => {
                    let s = self.s;
                    let (addr, cell) = mem.resolve_ref_to_ref_and_cell(s);
                    self.match_const(mem, addr, cell, constant)?;
                    self.s = s + 1;
                }
                Mode::Write => {
                    mem.push(const_cell(constant));
                }
            },
            Instr::Call(functor) => {
                self.bump_calls();
                self.b0 = self.choices.len();
                self.num_args = functor.arity;
                match db.label_of(functor) {
                    Some(entry) => {
                        self.cont = self.pc;
                        self.pc = entry;
                    }
                    None => {
                        // Predicates with no clauses fail rather than fault:
                        // the harness queries predicates whose facts may
                        // have been retracted.
                        tracing::trace!("call to undefined {}", mem.display(&functor));
                        self.fail = true;
                    }
                }
            }
            Instr::DynamicCall => {
                let (_, cell) = mem.resolve_ref_to_ref_and_cell(self.reg(0));
                let functor = match cell {
                    Cell::Rcd(sig_ref) => {
                        match mem.try_cell_read(sig_ref).ok_or(Fault::BadCellRead(sig_ref))? {
                            Cell::Sig(f) => {
                                for i in 0..f.arity as usize {
                                    self.set_reg(i as u16, sig_ref + 1 + i);
                                }
                                Some(f)
                            }
                            _ => return Err(Fault::FunctorExpected(sig_ref)),
                        }
                    }
                    Cell::Sym(sym) => Some(Functor { sym, arity: 0 }),
                    // An unbound variable or an integer is not callable.
                    Cell::Ref(_) | Cell::Int(_) | Cell::Sig(_) => None,
                };
                match functor.and_then(|f| db.label_of(f).map(|entry| (f, entry))) {
                    Some((f, entry)) => {
                        self.bump_calls();
                        self.b0 = self.choices.len();
                        self.num_args = f.arity;
                        // Tail transfer: the continuation stays the caller's.
                        self.pc = entry;
                    }
                    None => self.fail = true,
                }
            }
            Instr::Proceed => {
                self.pc = self.cont;
            }
            Instr::Allocate(n) => {
                self.envs.push(Frame {
                    cont: self.cont,
                    prev_env: self.cur_env,
                    b0: self.b0,
                    slots: vec![CellRef(0); n as usize],
                });
                self.cur_env = Some(self.envs.len() - 1);
            }
            Instr::Deallocate => {
                let e = self.cur_env.ok_or(Fault::NoEnvironment)?;
                self.cont = self.envs[e].cont;
                self.cur_env = self.envs[e].prev_env;
            }
            Instr::Try(next_alt) => {
                let cp = super::ChoicePoint {
                    saved_args: (0..self.num_args).map(|i| self.reg(i as u16)).collect(),
                    num_args: self.num_args,
                    env: self.cur_env,
                    envs_len: self.envs.len(),
                    cont: self.cont,
                    next_alt,
                    trail_mark: mem.trail_len(),
                    heap_mark: mem.heap_len(),
                    b0: self.b0,
                };
                self.choices.push(cp);
            }
            Instr::Retry(next_alt) => {
                self.choices
                    .last_mut()
                    .ok_or(Fault::NoChoicePoint)?
                    .next_alt = next_alt;
            }
            Instr::Trust => {
                self.choices.pop().ok_or(Fault::NoChoicePoint)?;
            }
            Instr::Cut => {
                let barrier = match self.cur_env {
                    Some(e) => self.envs[e].b0,
                    None => self.b0,
                };
                self.choices.truncate(barrier);
            }
            Instr::Fail => {
                self.fail = true;
            }
            Instr::Done => return Ok(true),
        }
        Ok(false)
    }

    /// Match a dereferenced cell against a constant operand, binding if the
    /// cell is an unbound variable.
    fn match_const(
        &mut self,
        mem: &mut Mem,
        addr: CellRef,
        cell: Cell,
        constant: Constant,
    ) -> Result<(), Fault> {
        match (cell, constant) {
            (Cell::Ref(_), _) => mem.bind(addr, const_cell(constant), self.hb())?,
            (Cell::Sym(s1), Constant::Sym(s2)) if s1 == s2 => {}
            (Cell::Int(i1), Constant::Int(i2)) if i1 == i2 => {}
            _ => self.fail = true,
        }
        Ok(())
    }

    /// Rewind to the most recent choice point. Returns `false` when there
    /// is none, i.e. the query is exhausted.
    fn backtrack(&mut self, mem: &mut Mem) -> bool {
        let Some(idx) = self.choices.len().checked_sub(1) else {
            return false;
        };
        tracing::trace!(next_alt = self.choices[idx].next_alt, "backtracking");

        mem.unwind_trail(self.choices[idx].trail_mark);
        mem.truncate_heap(self.choices[idx].heap_mark);

        let n = self.choices[idx].num_args as usize;
        for i in 0..n {
            let saved = self.choices[idx].saved_args[i];
            self.set_reg(i as u16, saved);
        }
        self.num_args = self.choices[idx].num_args;
        self.cur_env = self.choices[idx].env;
        self.envs.truncate(self.choices[idx].envs_len);
        self.cont = self.choices[idx].cont;
        self.b0 = self.choices[idx].b0;
        self.pc = self.choices[idx].next_alt;
        self.fail = false;
        true
    }
}

fn const_cell(constant: Constant) -> Cell {
    match constant {
        Constant::Sym(sym) => Cell::Sym(sym),
        Constant::Int(i) => Cell::Int(i),
    }
}
