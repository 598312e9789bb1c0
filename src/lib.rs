//! A Prolog engine built around a Warren Abstract Machine: clauses compile
//! to a flat bytecode stream, and an abstract machine executes it against a
//! tagged-cell heap with backtracking via a trail and choice-point stack.
//!
//! [`engine::Engine`] is the front door:
//!
//! ```
//! use wamble::{engine::Engine, syntax::Term};
//!
//! let mut engine = Engine::new();
//! engine
//!     .invoke_fact(Term::parse("likes(ada, logic)").unwrap())
//!     .unwrap();
//! let answers = engine
//!     .query_all(&[Term::parse("likes(ada, X)").unwrap()])
//!     .unwrap();
//! assert_eq!(answers[0]["X"], Term::Sym("logic".to_string()));
//! ```

pub mod bc;
pub mod cell;
pub mod db;
pub mod defs;
pub mod engine;
pub mod machine;
pub mod mem;
pub mod syntax;
pub mod unify;
