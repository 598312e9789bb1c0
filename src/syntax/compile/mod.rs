use core::fmt;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    bc::instr::{Arg, Constant, Instr, Local, Reg, Slot},
    cell::Functor,
    mem::Mem,
};

use super::{Clause, Term};


pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The term cannot stand as a clause head or a body goal.
    NonCallableTerm(Term),
    /// Functor arity is limited to `u8`.
    TooManyArguments(Term),
    /// The clause needs more registers than the machine has.
    RegisterOverflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NonCallableTerm(t) => write!(f, "term `{t}` is not callable"),
            Error::TooManyArguments(t) => {
                write!(f, "term `{t}` has more than {} arguments", u8::MAX)
            }
            Error::RegisterOverflow => write!(f, "clause does not fit in the register file"),
        }
    }
}

impl std::error::Error for Error {}

/// A clause compiled to bytecode, ready to be linked into a predicate's
/// try/retry/trust chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledClause {
    pub functor: Functor,
    pub code: Vec<Instr>,
}

/// A query compiled to bytecode. `vars` maps each named query variable to
/// the permanent slot its binding lives in at `done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub code: Vec<Instr>,
    pub vars: Vec<(String, Local)>,
}

/// Which side of the instruction table a term is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// Clause heads: `get_*`/`unify_*`, structures walked top-down.
    Program,
    /// Body goals and queries: `put_*`/`set_*`, structures built bottom-up.
    Query,
}

/// A body goal after normalization. `!` and `fail` compile inline; a bare
/// variable goal is sugar for `call/1`.
#[derive(Debug, Clone)]
enum Goal {
    Cut,
    Fail,
    Call(Term),
}

fn normalize_goal(goal: &Term) -> Result<Goal> {
    match goal {
        Term::Sym(s) if s == "!" => Ok(Goal::Cut),
        Term::Sym(s) if s == "fail" => Ok(Goal::Fail),
        Term::Sym(_) | Term::Record(..) => Ok(Goal::Call(goal.clone())),
        Term::NamedVar(_) | Term::FreshVar => Ok(Goal::Call(Term::Record(
            "call".to_string(),
            vec![goal.clone()],
        ))),
        Term::Int(_) => Err(Error::NonCallableTerm(goal.clone())),
    }
}

fn callable_parts(term: &Term) -> Result<(&str, &[Term])> {
    match term {
        Term::Sym(name) => Ok((name, &[])),
        Term::Record(name, args) => Ok((name, args)),
        _ => Err(Error::NonCallableTerm(term.clone())),
    }
}

fn collect_named_vars(term: &Term, out: &mut Vec<String>) {
    match term {
        Term::NamedVar(v) => out.push(v.clone()),
        Term::Record(_, args) => {
            for arg in args {
                collect_named_vars(arg, out);
            }
        }
        Term::Int(_) | Term::Sym(_) | Term::FreshVar => {}
    }
}

/// Variables occurring in more than one chunk must survive calls, so they
/// get permanent slots. The head and the first call goal form one chunk:
/// they share a register allocator, which is what lets head bindings flow
/// into the first goal's argument registers.
fn permanent_vars(head: Option<&Term>, goals: &[Goal]) -> Vec<String> {
    let mut chunks: Vec<Vec<String>> = Vec::new();

    let mut chunk0 = Vec::new();
    if let Some(head) = head {
        collect_named_vars(head, &mut chunk0);
    }
    let mut calls = goals.iter().filter_map(|g| match g {
        Goal::Call(term) => Some(term),
        Goal::Cut | Goal::Fail => None,
    });
    if let Some(first) = calls.next() {
        collect_named_vars(first, &mut chunk0);
    }
    chunks.push(chunk0);
    for goal in calls {
        let mut chunk = Vec::new();
        collect_named_vars(goal, &mut chunk);
        chunks.push(chunk);
    }

    let mut first_seen: Vec<String> = Vec::new();
    let mut chunk_count: HashMap<&str, usize> = HashMap::new();
    for chunk in &chunks {
        let distinct: HashSet<&str> = chunk.iter().map(String::as_str).collect();
        for var in chunk {
            if !first_seen.contains(var) {
                first_seen.push(var.clone());
            }
        }
        for var in distinct {
            *chunk_count.entry(var).or_default() += 1;
        }
    }

    first_seen.retain(|v| chunk_count[v.as_str()] >= 2);
    first_seen
}

/// Register assignment state for one chunk. Permanent homes are fixed for
/// the whole clause; local homes and structure temporaries are handed out
/// from the reserved arity upward.
struct RegAlloc<'a> {
    perm_slots: &'a HashMap<String, Local>,
    var_homes: HashMap<String, Slot>,
    next_local: u32,
}

impl<'a> RegAlloc<'a> {
    fn new(perm_slots: &'a HashMap<String, Local>, reserved_arity: u8) -> Self {
        Self {
            perm_slots,
            var_homes: HashMap::new(),
            next_local: reserved_arity as u32,
        }
    }

    fn fresh_reg(&mut self) -> Result<Reg> {
        if self.next_local > u16::MAX as u32 {
            return Err(Error::RegisterOverflow);
        }
        let reg = Reg(self.next_local as u16);
        self.next_local += 1;
        Ok(reg)
    }

    fn home_of(&mut self, name: &str) -> Result<Slot> {
        if let Some(&local) = self.perm_slots.get(name) {
            return Ok(Slot::Local(local));
        }
        if let Some(&slot) = self.var_homes.get(name) {
            return Ok(slot);
        }
        let slot = Slot::Reg(self.fresh_reg()?);
        self.var_homes.insert(name.to_string(), slot);
        Ok(slot)
    }
}

/// One register assignment produced by the term parser. Argument registers
/// hold either an inline structure/constant or a pointer to the register
/// that is a variable's home; subterm structures get temporaries.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Assign {
    ArgStruct {
        arg: Arg,
        functor: Functor,
        args: Vec<Slot>,
    },
    ArgConst {
        arg: Arg,
        val: Constant,
    },
    ArgVar {
        arg: Arg,
        src: Slot,
    },
    TmpStruct {
        reg: Reg,
        functor: Functor,
        args: Vec<Slot>,
    },
    TmpConst {
        reg: Reg,
        val: Constant,
    },
}

impl Assign {
    /// The register this assignment targets, in the shared register file.
    fn target(&self) -> u16 {
        match self {
            Assign::ArgStruct { arg, .. }
            | Assign::ArgConst { arg, .. }
            | Assign::ArgVar { arg, .. } => arg.0 as u16,
            Assign::TmpStruct { reg, .. } | Assign::TmpConst { reg, .. } => reg.0,
        }
    }
}

/// Parse one callable term into register assignments. Symbols become
/// 0-arity structures (folded into constants later by the peephole);
/// integer literals are constants from the start since they have no
/// functor.
fn parse_callable(
    mem: &mut Mem,
    alloc: &mut RegAlloc<'_>,
    term: &Term,
) -> Result<(Functor, Vec<Assign>)> {
    let (name, args) = callable_parts(term)?;
    if args.len() > u8::MAX as usize {
        return Err(Error::TooManyArguments(term.clone()));
    }
    let functor = mem.intern_functor(name, args.len() as u8);

    let mut assigns = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        let arg_reg = Arg(i as u8);
        match arg {
            Term::NamedVar(v) => assigns.push(Assign::ArgVar {
                arg: arg_reg,
                src: alloc.home_of(v)?,
            }),
            Term::FreshVar => assigns.push(Assign::ArgVar {
                arg: arg_reg,
                src: Slot::Reg(alloc.fresh_reg()?),
            }),
            Term::Sym(s) => assigns.push(Assign::ArgStruct {
                arg: arg_reg,
                functor: mem.intern_functor(s, 0),
                args: Vec::new(),
            }),
            Term::Int(i) => assigns.push(Assign::ArgConst {
                arg: arg_reg,
                val: Constant::Int(*i),
            }),
            Term::Record(rec_name, rec_args) => {
                let mut slots = Vec::with_capacity(rec_args.len());
                for sub in rec_args {
                    slots.push(parse_subterm(mem, alloc, sub, &mut assigns)?);
                }
                if rec_args.len() > u8::MAX as usize {
                    return Err(Error::TooManyArguments(arg.clone()));
                }
                assigns.push(Assign::ArgStruct {
                    arg: arg_reg,
                    functor: mem.intern_functor(rec_name, rec_args.len() as u8),
                    args: slots,
                });
            }
        }
    }
    Ok((functor, assigns))
}

fn parse_subterm(
    mem: &mut Mem,
    alloc: &mut RegAlloc<'_>,
    term: &Term,
    assigns: &mut Vec<Assign>,
) -> Result<Slot> {
    match term {
        Term::NamedVar(v) => alloc.home_of(v),
        Term::FreshVar => Ok(Slot::Reg(alloc.fresh_reg()?)),
        Term::Sym(s) => {
            let reg = alloc.fresh_reg()?;
            assigns.push(Assign::TmpStruct {
                reg,
                functor: mem.intern_functor(s, 0),
                args: Vec::new(),
            });
            Ok(Slot::Reg(reg))
        }
        Term::Int(i) => {
            let reg = alloc.fresh_reg()?;
            assigns.push(Assign::TmpConst {
                reg,
                val: Constant::Int(*i),
            });
            Ok(Slot::Reg(reg))
        }
        Term::Record(name, args) => {
            if args.len() > u8::MAX as usize {
                return Err(Error::TooManyArguments(term.clone()));
            }
            let reg = alloc.fresh_reg()?;
            let mut slots = Vec::with_capacity(args.len());
            for sub in args {
                slots.push(parse_subterm(mem, alloc, sub, assigns)?);
            }
            assigns.push(Assign::TmpStruct {
                reg,
                functor: mem.intern_functor(name, args.len() as u8),
                args: slots,
            });
            Ok(Slot::Reg(reg))
        }
    }
}

/// Order the assignments so that on the query side every structure's
/// subterms come before the structure (they must exist on the heap before
/// `set_value` can reference them), and on the program side the reverse.
/// Topological sort over the register-dependency graph; ties break by
/// register number so output is deterministic.
fn flatten(assigns: Vec<Assign>, side: Side) -> Vec<Assign> {
    let index_of: HashMap<u16, usize> = assigns
        .iter()
        .enumerate()
        .map(|(i, a)| (a.target(), i))
        .collect();

    let producer_deps = |a: &Assign| -> Vec<usize> {
        let args = match a {
            Assign::ArgStruct { args, .. } | Assign::TmpStruct { args, .. } => args,
            _ => return Vec::new(),
        };
        args.iter()
            .filter_map(|slot| match slot {
                Slot::Reg(r) => index_of.get(&r.0).copied(),
                Slot::Local(_) => None,
            })
            .collect()
    };

    // succs[i] must come after i in the output.
    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); assigns.len()];
    let mut in_degree: Vec<usize> = vec![0; assigns.len()];
    for (i, assign) in assigns.iter().enumerate() {
        for dep in producer_deps(assign) {
            let (before, after) = match side {
                Side::Query => (dep, i),
                Side::Program => (i, dep),
            };
            succs[before].push(after);
            in_degree[after] += 1;
        }
    }

    let mut ready: BTreeSet<(u16, usize)> = assigns
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, a)| (a.target(), i))
        .collect();

    let mut ordered = Vec::with_capacity(assigns.len());
    let mut placed = vec![false; assigns.len()];
    while let Some((_, i)) = ready.pop_first() {
        placed[i] = true;
        for &succ in &succs[i] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert((assigns[succ].target(), succ));
            }
        }
        ordered.push(i);
    }
    debug_assert!(placed.iter().all(|&p| p));

    let mut slots: Vec<Option<Assign>> = assigns.into_iter().map(Some).collect();
    ordered
        .into_iter()
        .map(|i| slots[i].take().expect("each assignment placed once"))
        .collect()
}

/// The intermediate token stream between the flattener and the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Structure {
        reg: Reg,
        functor: Functor,
        args: Vec<Slot>,
    },
    Constant {
        reg: Reg,
        val: Constant,
    },
    Argument {
        arg: Arg,
        src: Slot,
    },
    Call(Functor),
}

fn tokenize(ordered: Vec<Assign>) -> Vec<Token> {
    ordered
        .into_iter()
        .map(|assign| match assign {
            Assign::ArgStruct { arg, functor, args } => Token::Structure {
                reg: arg.into(),
                functor,
                args,
            },
            Assign::TmpStruct { reg, functor, args } => Token::Structure { reg, functor, args },
            Assign::ArgConst { arg, val } => Token::Constant {
                reg: arg.into(),
                val,
            },
            Assign::TmpConst { reg, val } => Token::Constant { reg, val },
            Assign::ArgVar { arg, src } => Token::Argument { arg, src },
        })
        .collect()
}

/// Maps tokens to opcodes. The `*_variable`/`*_value` choice is driven by
/// whether the operand register has been seen earlier in the clause; local
/// registers are forgotten at chunk boundaries (their numbers are reused),
/// permanent slots are remembered for the whole clause.
struct Emitter {
    seen: HashSet<Slot>,
    code: Vec<Instr>,
}

impl Emitter {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            code: Vec::new(),
        }
    }

    fn begin_chunk(&mut self) {
        self.seen.retain(|slot| matches!(slot, Slot::Local(_)));
    }

    fn emit(&mut self, tokens: Vec<Token>, side: Side) {
        for token in tokens {
            match token {
                Token::Structure { reg, functor, args } => {
                    self.code.push(match side {
                        Side::Program => Instr::GetStructure(reg, functor),
                        Side::Query => Instr::PutStructure(functor, reg),
                    });
                    self.seen.insert(Slot::reg(reg));
                    for slot in args {
                        let first = self.seen.insert(slot);
                        self.code.push(match (side, first) {
                            (Side::Program, true) => Instr::UnifyVariable(slot),
                            (Side::Program, false) => Instr::UnifyValue(slot),
                            (Side::Query, true) => Instr::SetVariable(slot),
                            (Side::Query, false) => Instr::SetValue(slot),
                        });
                    }
                }
                Token::Constant { reg, val } => {
                    self.code.push(match side {
                        Side::Program => Instr::GetConst(reg, val),
                        Side::Query => Instr::PutConst(val, reg),
                    });
                    self.seen.insert(Slot::reg(reg));
                }
                Token::Argument { arg, src } => {
                    let first = self.seen.insert(src);
                    self.code.push(match (side, first) {
                        (Side::Program, true) => Instr::GetVariable(src, arg),
                        (Side::Program, false) => Instr::GetValue(src, arg),
                        (Side::Query, true) => Instr::PutVariable(src, arg),
                        (Side::Query, false) => Instr::PutValue(src, arg),
                    });
                }
                Token::Call(functor) => self.code.push(Instr::Call(functor)),
            }
        }
    }
}

fn first_call_arity(goals: &[Goal]) -> Result<u8> {
    for goal in goals {
        if let Goal::Call(term) = goal {
            let (_, args) = callable_parts(term)?;
            if args.len() > u8::MAX as usize {
                return Err(Error::TooManyArguments(term.clone()));
            }
            return Ok(args.len() as u8);
        }
    }
    Ok(0)
}

/// Compile one clause to bytecode. Facts compile to head code plus
/// `proceed`; rules wrap the body in `allocate`/`deallocate`.
pub fn compile_clause(mem: &mut Mem, clause: &Clause) -> Result<CompiledClause> {
    let goals = clause
        .body
        .iter()
        .map(normalize_goal)
        .collect::<Result<Vec<_>>>()?;

    let perm_names = permanent_vars(Some(&clause.head), &goals);
    let perm_slots: HashMap<String, Local> = perm_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), Local(i as u16)))
        .collect();

    let (_, head_args) = callable_parts(&clause.head)?;
    if head_args.len() > u8::MAX as usize {
        return Err(Error::TooManyArguments(clause.head.clone()));
    }
    let reserved = (head_args.len() as u8).max(first_call_arity(&goals)?);

    let is_rule = !clause.body.is_empty();
    let mut emitter = Emitter::new();
    if is_rule {
        emitter.code.push(Instr::Allocate(perm_names.len() as u16));
    }

    // The head and the first call goal share this allocator.
    let mut alloc = RegAlloc::new(&perm_slots, reserved);
    let (functor, head_assigns) = parse_callable(mem, &mut alloc, &clause.head)?;
    emitter.emit(tokenize(flatten(head_assigns, Side::Program)), Side::Program);

    let mut in_first_chunk = true;
    for goal in &goals {
        match goal {
            Goal::Cut => emitter.code.push(Instr::Cut),
            Goal::Fail => emitter.code.push(Instr::Fail),
            Goal::Call(term) => {
                if !in_first_chunk {
                    let (_, args) = callable_parts(term)?;
                    if args.len() > u8::MAX as usize {
                        return Err(Error::TooManyArguments(term.clone()));
                    }
                    alloc = RegAlloc::new(&perm_slots, args.len() as u8);
                    emitter.begin_chunk();
                }
                in_first_chunk = false;

                let (goal_functor, assigns) = parse_callable(mem, &mut alloc, term)?;
                let mut tokens = tokenize(flatten(assigns, Side::Query));
                tokens.push(Token::Call(goal_functor));
                emitter.emit(tokens, Side::Query);
            }
        }
    }

    if is_rule {
        emitter.code.push(Instr::Deallocate);
    }
    emitter.code.push(Instr::Proceed);

    Ok(CompiledClause {
        functor,
        code: fold_constants(emitter.code),
    })
}

/// Compile a conjunction of goals as a query. Every named variable is
/// forced into a permanent slot so its binding is still addressable when
/// `done` yields an answer (the query's environment is never deallocated).
pub fn compile_query(mem: &mut Mem, goals: &[Term]) -> Result<CompiledQuery> {
    let goals = goals
        .iter()
        .map(normalize_goal)
        .collect::<Result<Vec<_>>>()?;

    let mut var_order = Vec::new();
    for goal in &goals {
        if let Goal::Call(term) = goal {
            let mut vars = Vec::new();
            collect_named_vars(term, &mut vars);
            for var in vars {
                if !var_order.contains(&var) {
                    var_order.push(var);
                }
            }
        }
    }
    let perm_slots: HashMap<String, Local> = var_order
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), Local(i as u16)))
        .collect();

    let mut emitter = Emitter::new();
    emitter.code.push(Instr::Allocate(var_order.len() as u16));

    for goal in &goals {
        match goal {
            Goal::Cut => emitter.code.push(Instr::Cut),
            Goal::Fail => emitter.code.push(Instr::Fail),
            Goal::Call(term) => {
                let (_, args) = callable_parts(term)?;
                if args.len() > u8::MAX as usize {
                    return Err(Error::TooManyArguments(term.clone()));
                }
                let mut alloc = RegAlloc::new(&perm_slots, args.len() as u8);
                emitter.begin_chunk();

                let (goal_functor, assigns) = parse_callable(mem, &mut alloc, term)?;
                let mut tokens = tokenize(flatten(assigns, Side::Query));
                tokens.push(Token::Call(goal_functor));
                emitter.emit(tokens, Side::Query);
            }
        }
    }
    emitter.code.push(Instr::Done);

    let vars = var_order
        .into_iter()
        .map(|name| {
            let slot = perm_slots[&name];
            (name, slot)
        })
        .collect();

    Ok(CompiledQuery {
        code: fold_constants(emitter.code),
        vars,
    })
}

/// An instruction that delimits the code of one head or one goal. Constant
/// folding never looks across these.
fn is_segment_boundary(instr: &Instr) -> bool {
    matches!(
        instr,
        Instr::Call(_)
            | Instr::DynamicCall
            | Instr::Proceed
            | Instr::Allocate(_)
            | Instr::Deallocate
            | Instr::Done
            | Instr::Try(_)
            | Instr::Retry(_)
            | Instr::Trust
            | Instr::Cut
            | Instr::Fail
    )
}

/// The constant-folding peephole. 0-arity structures collapse into the
/// constant opcodes:
///
/// * `put_structure c/0, Ai`                      → `put_const c, Ai`
/// * `get_structure Ai, c/0`                      → `get_const Ai, c`
/// * `put_structure c/0, Xi` … `set_value Xi`     → `set_const c` (put deleted)
/// * `unify_variable Xi` … `get_structure Xi, c/0` → `unify_const c` (get deleted)
fn fold_constants(code: Vec<Instr>) -> Vec<Instr> {
    let mut slots: Vec<Option<Instr>> = code.into_iter().map(Some).collect();

    for i in 0..slots.len() {
        match slots[i] {
            Some(Instr::PutStructure(functor, reg)) if functor.arity == 0 => {
                let constant = Constant::Sym(functor.sym);
                // A temporary holding a constant subterm is referenced by
                // exactly one later set_value in the same goal.
                let mut folded = false;
                for j in i + 1..slots.len() {
                    match slots[j] {
                        Some(Instr::SetValue(Slot::Reg(r))) if r == reg => {
                            slots[j] = Some(Instr::SetConst(constant));
                            slots[i] = None;
                            folded = true;
                            break;
                        }
                        Some(ref instr) if is_segment_boundary(instr) => break,
                        _ => {}
                    }
                }
                if !folded {
                    slots[i] = Some(Instr::PutConst(constant, reg));
                }
            }
            Some(Instr::GetStructure(reg, functor)) if functor.arity == 0 => {
                let constant = Constant::Sym(functor.sym);
                let mut folded = false;
                for j in (0..i).rev() {
                    match slots[j] {
                        Some(Instr::UnifyVariable(Slot::Reg(r))) if r == reg => {
                            slots[j] = Some(Instr::UnifyConst(constant));
                            slots[i] = None;
                            folded = true;
                            break;
                        }
                        Some(ref instr) if is_segment_boundary(instr) => break,
                        _ => {}
                    }
                }
                if !folded {
                    slots[i] = Some(Instr::GetConst(reg, constant));
                }
            }
            _ => {}
        }
    }

    slots.into_iter().flatten().collect()
}
