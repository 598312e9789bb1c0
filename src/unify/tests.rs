#![allow(non_snake_case)]

use assert2::check;
use test_log::test;

use crate::{mem::Mem, syntax::serialize::Serializer, syntax::Term, unify::unify};

#[track_caller]
fn parse_and_unify(t1_src: &str, t2_src: &str) -> bool {
    let mut mem = Mem::new();
    let t1 = tracing::trace_span!("parsing", src = t1_src)
        .in_scope(|| Term::parse(t1_src).unwrap().serialize(&mut mem));
    let t2 = tracing::trace_span!("parsing", src = t2_src)
        .in_scope(|| Term::parse(t2_src).unwrap().serialize(&mut mem));
    tracing::trace_span!(
        "unifying",
        t1 = %mem.display_term(t1),
        t2 = %mem.display_term(t2),
    )
    .in_scope(|| unify(&mut mem, 0, t1, t2).unwrap())
}

#[test]
fn unify_ints() {
    let mut mem = Mem::new();
    let t1 = Term::Int(42).serialize(&mut mem);
    let t2 = Term::Int(42).serialize(&mut mem);
    check!(unify(&mut mem, 0, t1, t2).unwrap());
}

#[test]
fn unify_syms() {
    let mut mem = Mem::new();
    let t1 = Term::Sym("socrates".into()).serialize(&mut mem);
    let t2 = Term::Sym("socrates".into()).serialize(&mut mem);
    check!(unify(&mut mem, 0, t1, t2).unwrap());

    let t3 = Term::Sym("aristotle".into()).serialize(&mut mem);
    check!(!unify(&mut mem, 0, t1, t3).unwrap());
}

#[test]
fn unify_identical_compound_terms() {
    check!(parse_and_unify("person(alice, 29)", "person(alice, 29)"));
}

#[test]
fn unify_different_compound_terms() {
    check!(!parse_and_unify("person(alice, 29)", "person(bob, 94)"));
}

#[test]
fn unify_compound_terms_with_different_functors() {
    check!(!parse_and_unify(
        "person(alice, 29)",
        "inventory_item(adze, tool, weight(2, kg))"
    ));
}

#[test]
fn unify_compound_terms_with_different_arity() {
    check!(!parse_and_unify("person(alice, 29)", "person(alice)"));
}

#[test]
fn unify_vars() {
    check!(parse_and_unify("A", "A"));
    check!(parse_and_unify("A", "Z"));
}

#[test]
fn unify_var_and_concrete() {
    check!(parse_and_unify("X", "42"));
    check!(parse_and_unify("f(X)", "f(42)"));
    check!(parse_and_unify("f(X, 42)", "f(99, Y)"));
}

#[test]
fn unify_shared_var_mismatch() {
    check!(!parse_and_unify("f(X, 42)", "f(99, X)"));
}

#[test]
fn unify_lists() {
    check!(parse_and_unify("[1, 2, 3]", "[1|T]"));
    check!(!parse_and_unify("[1, 2]", "[1]"));
    check!(parse_and_unify("[]", "[]"));
}

#[test]
fn unify_is_symmetric_on_ground_terms() {
    let cases = [
        ("f(a, b)", "f(a, b)"),
        ("f(a, b)", "f(a, c)"),
        ("[1, 2, 3]", "[1, 2, 3]"),
        ("g(h(i))", "g(h(j))"),
        ("42", "42"),
        ("42", "43"),
    ];
    for (a, b) in cases {
        check!(
            parse_and_unify(a, b) == parse_and_unify(b, a),
            "symmetry violated for {a} / {b}"
        );
    }
}

#[test]
fn unify_without_occurs_check_builds_a_cycle() {
    let mut mem = Mem::new();
    let mut serializer = Serializer::new();
    let x = serializer.serialize(&Term::parse("X").unwrap(), &mut mem);
    let fx = serializer.serialize(&Term::parse("f(X)").unwrap(), &mut mem);

    // `X = f(X)` succeeds (no occurs check) and must still unparse finitely.
    check!(unify(&mut mem, 0, x, fx).unwrap());
    let rendered = mem.display_term(fx).to_string();
    check!(rendered.contains('…'));
}

#[test]
fn deep_terms_do_not_overflow_the_stack() {
    let mut depth = 0;
    let mut lhs = Term::Sym("leaf".into());
    let mut rhs = Term::NamedVar("V".into());
    while depth < 10_000 {
        lhs = Term::Record("f".into(), vec![lhs]);
        rhs = Term::Record("f".into(), vec![rhs]);
        depth += 1;
    }
    let mut mem = Mem::new();
    let t1 = lhs.serialize(&mut mem);
    let t2 = rhs.serialize(&mut mem);
    check!(unify(&mut mem, 0, t1, t2).unwrap());
}
