use core::fmt;

use derive_more::From;

use crate::{
    cell::Functor,
    defs::{CodeAddr, Sym},
};

/// An index into the shared argument/local register file. Argument
/// registers occupy the low indices; temporaries are handed out above the
/// reserved arity, so large ground terms can use thousands of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From)]
pub struct Reg(pub u16);

impl From<Arg> for Reg {
    fn from(arg: Arg) -> Self {
        Self(arg.0 as u16)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{}", self.0)
    }
}

/// An argument register of the current call; arity is limited to `u8`, so
/// `u8` suffices. Physically the same file as [`Reg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From)]
pub struct Arg(pub u8);

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// A permanent-variable slot in the current environment frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From)]
pub struct Local(pub u16);

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Y{}", self.0)
    }
}

/// A variable's home: either a local register or a stack slot. This is the
/// register-kind axis of the instruction table; each `*_variable`/`*_value`
/// opcode covers both kinds through its `Slot` operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From)]
pub enum Slot {
    #[from]
    Reg(Reg),
    #[from]
    Local(Local),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Reg(reg) => write!(f, "{reg}"),
            Slot::Local(local) => write!(f, "{local}"),
        }
    }
}

impl From<Arg> for Slot {
    fn from(value: Arg) -> Self {
        Self::Reg(value.into())
    }
}

impl Slot {
    pub fn reg(r: impl Into<Reg>) -> Self {
        r.into().into()
    }

    pub fn local(l: impl Into<Local>) -> Self {
        Self::Local(l.into())
    }
}

#[derive(Debug, Clone, Copy, From, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constant {
    #[from]
    Sym(Sym),
    #[from]
    Int(i32),
}

/// One instruction word of the code store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// Allocate a structure frame on the heap (an `Rcd` cell followed by the
    /// functor cell) and put its address into the register. The argument
    /// cells are filled in by the following `set_*` instructions.
    PutStructure(Functor, Reg),

    /// A goal argument that is an unbound variable: create a fresh heap
    /// variable and make both the variable's home and the argument register
    /// point at it.
    PutVariable(Slot, Arg),

    /// A goal argument that is an already-seen variable: copy its home into
    /// the argument register.
    PutValue(Slot, Arg),

    /// A constant in a register, either a goal argument or a subterm.
    PutConst(Constant, Reg),

    /// Push a fresh unbound variable onto the heap and record it in the
    /// variable's home.
    SetVariable(Slot),

    /// Push a reference to an already-seen register's cell onto the heap.
    SetValue(Slot),

    SetConst(Constant),

    /// Dereference the register. Unbound: build a fresh structure frame,
    /// bind the variable to it, and continue in *write* mode. Bound to a
    /// structure with the same functor: point `S` at its first argument and
    /// continue in *read* mode. Anything else fails.
    GetStructure(Reg, Functor),

    /// A head argument that is a first-occurrence variable: record the
    /// argument register's address in the variable's home.
    GetVariable(Slot, Arg),

    /// A head argument that is an already-seen variable: unify the home with
    /// the argument register.
    GetValue(Slot, Arg),

    GetConst(Reg, Constant),

    /// In read mode, capture the cell at `S` as the variable's home; in
    /// write mode, push a fresh variable for it.
    UnifyVariable(Slot),

    /// In read mode, unify the home with the cell at `S`; in write mode,
    /// push a reference to the home's cell.
    UnifyValue(Slot),

    UnifyConst(Constant),

    /// Set the continuation to the next instruction and jump to the
    /// predicate's chain. The label is resolved through the label table at
    /// run time so that reasserted predicates rebind every call site.
    Call(Functor),

    /// The meta-call behind `call/1`: dereference `A0`, spread its arguments
    /// into the argument registers, and transfer like a tail call.
    DynamicCall,

    Proceed,

    /// Push an environment frame with `n` permanent slots.
    Allocate(u16),

    Deallocate,

    /// Push a choice point whose next alternative is `L`.
    Try(CodeAddr),

    /// Re-aim the current choice point's next alternative at `L`.
    Retry(CodeAddr),

    /// Discard the current choice point; this was the last alternative.
    Trust,

    /// Discard every choice point created since the current clause's
    /// predicate was entered.
    Cut,

    /// Raise the fail flag; the run loop backtracks.
    Fail,

    /// Suspend the query and yield the current bindings.
    Done,
}
