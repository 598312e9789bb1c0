use core::fmt;

use heck::ToSnakeCase;

use crate::{
    bc::instr::{Constant, Instr},
    cell::Functor,
    mem::{DisplayViaMem, Mem},
};

impl DisplayViaMem for Functor {
    fn display_via_mem(&self, f: &mut fmt::Formatter<'_>, mem: &Mem) -> fmt::Result {
        write!(f, "{}/{}", mem.display(&self.sym), self.arity)
    }
}

impl DisplayViaMem for Constant {
    fn display_via_mem(&self, f: &mut fmt::Formatter<'_>, mem: &Mem) -> fmt::Result {
        match self {
            Constant::Sym(sym) => write!(f, "{}", mem.display(sym)),
            Constant::Int(i) => write!(f, "{i}"),
        }
    }
}

impl Instr {
    /// The mnemonic, derived from the variant name.
    pub fn instr_name(&self) -> String {
        let dbg = format!("{self:?}");
        let variant = dbg
            .split(|c: char| !c.is_ascii_alphanumeric())
            .next()
            .unwrap_or_default();
        variant.to_snake_case()
    }
}

impl DisplayViaMem for Instr {
    fn display_via_mem(&self, f: &mut fmt::Formatter<'_>, mem: &Mem) -> fmt::Result {
        let name = self.instr_name();
        match self {
            Instr::PutStructure(functor, reg) => {
                write!(f, "{name} {}, {}", mem.display(functor), reg)
            }
            Instr::PutVariable(slot, arg) => write!(f, "{name} {slot}, {arg}"),
            Instr::PutValue(slot, arg) => write!(f, "{name} {slot}, {arg}"),
            Instr::PutConst(constant, reg) => {
                write!(f, "{name} {}, {}", mem.display(constant), reg)
            }
            Instr::SetVariable(slot) => write!(f, "{name} {slot}"),
            Instr::SetValue(slot) => write!(f, "{name} {slot}"),
            Instr::SetConst(constant) => write!(f, "{name} {}", mem.display(constant)),
            Instr::GetStructure(reg, functor) => {
                write!(f, "{name} {}, {}", reg, mem.display(functor))
            }
            Instr::GetVariable(slot, arg) => write!(f, "{name} {slot}, {arg}"),
            Instr::GetValue(slot, arg) => write!(f, "{name} {slot}, {arg}"),
            Instr::GetConst(reg, constant) => {
                write!(f, "{name} {}, {}", reg, mem.display(constant))
            }
            Instr::UnifyVariable(slot) => write!(f, "{name} {slot}"),
            Instr::UnifyValue(slot) => write!(f, "{name} {slot}"),
            Instr::UnifyConst(constant) => write!(f, "{name} {}", mem.display(constant)),
            Instr::Call(functor) => write!(f, "{name} {}", mem.display(functor)),
            Instr::Allocate(n) => write!(f, "{name} {n}"),
            Instr::Try(lbl) => write!(f, "{name} {lbl}"),
            Instr::Retry(lbl) => write!(f, "{name} {lbl}"),
            Instr::DynamicCall
            | Instr::Proceed
            | Instr::Deallocate
            | Instr::Trust
            | Instr::Cut
            | Instr::Fail
            | Instr::Done => write!(f, "{name}"),
        }
    }
}
