use core::fmt;

use chumsky::prelude::*;
use serde::{Deserialize, Serialize};

pub mod compile;
pub mod deserialize;
pub mod serialize;

/// Surface syntax of terms. Atoms with a leading uppercase letter or
/// underscore are variables; `_` on its own is an anonymous variable; list
/// syntax is sugar for `'.'/2` chains ending in the `[]` atom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    Int(i32),
    Sym(String),
    NamedVar(String),
    FreshVar,
    Record(String, Vec<Term>),
}

/// One asserted clause: a head and zero or more body goals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub head: Term,
    pub body: Vec<Term>,
}

impl Term {
    pub fn nil() -> Term {
        Term::Sym("[]".to_string())
    }

    pub fn cons(head: Term, tail: Term) -> Term {
        Term::Record(".".to_string(), vec![head, tail])
    }

    pub fn list(items: impl IntoIterator<Item = Term>) -> Term {
        Term::list_with_tail(items, None)
    }

    pub fn list_with_tail(items: impl IntoIterator<Item = Term>, tail: Option<Term>) -> Term {
        let items: Vec<Term> = items.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(tail.unwrap_or_else(Term::nil), |acc, item| {
                Term::cons(item, acc)
            })
    }

    pub fn parser() -> impl Parser<char, Term, Error = Simple<char>> {
        let sym = text::ident::<char, Simple<char>>().padded();

        recursive::<char, Term, _, _, _>(move |term| {
            let int = just('-')
                .labelled("negative int")
                .or_not()
                .then(text::int(10))
                .labelled("int")
                .map(|(sign, digits): (Option<_>, String)| {
                    let sign = if sign.is_some() { -1 } else { 1 };
                    let number = sign * digits.parse::<i32>().unwrap();
                    Term::Int(number)
                });

            let record = sym
                .then(
                    term.clone()
                        .separated_by(just(',').padded())
                        .allow_trailing()
                        .collect::<Vec<_>>()
                        .delimited_by(just('('), just(')')),
                )
                .map(move |(functor, args)| Term::Record(functor, args))
                .boxed();

            let list = term
                .clone()
                .separated_by(just(',').padded())
                .allow_trailing()
                .collect::<Vec<_>>()
                .then(just('|').padded().ignore_then(term.clone()).or_not())
                .delimited_by(just('['), just(']'))
                .map(|(items, tail)| Term::list_with_tail(items, tail))
                .boxed();

            let cut = just('!').to(Term::Sym("!".to_string()));

            let var_or_sym: BoxedParser<'static, _, Term, _> = chumsky::text::ident()
                .validate(move |name: String, _span, _emit_err| {
                    let first_char = name.chars().next().unwrap();
                    if first_char.is_uppercase() || first_char == '_' {
                        if name == "_" {
                            Term::FreshVar
                        } else {
                            Term::NamedVar(name)
                        }
                    } else {
                        Term::Sym(name)
                    }
                })
                .boxed();

            term.delimited_by(just('('), just(')'))
                .or(int)
                .or(list)
                .or(record)
                .or(cut)
                .or(var_or_sym)
        })
        .padded()
        .then_ignore(end())
    }

    pub fn parse(src: &str) -> Result<Term, Vec<Simple<char>>> {
        Self::parser().parse(src)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Int(i) => write!(f, "{i}"),
            Term::Sym(s) => write!(f, "{s}"),
            Term::NamedVar(v) => write!(f, "{v}"),
            Term::FreshVar => write!(f, "_"),
            Term::Record(name, args) if name == "." && args.len() == 2 => {
                write!(f, "[{}", args[0])?;
                let mut tail = &args[1];
                loop {
                    match tail {
                        Term::Sym(s) if s == "[]" => break,
                        Term::Record(n, a) if n == "." && a.len() == 2 => {
                            write!(f, ", {}", a[0])?;
                            tail = &a[1];
                        }
                        other => {
                            write!(f, "|{other}")?;
                            break;
                        }
                    }
                }
                write!(f, "]")
            }
            Term::Record(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
