use assert2::{check, let_assert};
use test_log::test;

use crate::syntax::Term;

use super::{Bindings, Engine, Error};

fn var(name: &str) -> Term {
    Term::NamedVar(name.to_owned())
}

fn sym(name: &str) -> Term {
    Term::Sym(name.to_owned())
}

fn rec(name: &str, args: Vec<Term>) -> Term {
    Term::Record(name.to_owned(), args)
}

fn ints(items: &[i32]) -> Term {
    Term::list(items.iter().map(|&i| Term::Int(i)))
}

fn syms(items: &[&str]) -> Term {
    Term::list(items.iter().map(|&s| sym(s)))
}

fn binding(pairs: &[(&str, Term)]) -> Bindings {
    pairs
        .iter()
        .map(|(name, term)| (name.to_string(), term.clone()))
        .collect()
}

fn define_append(engine: &mut Engine) {
    // append([], Ys, Ys).
    engine
        .invoke_fact(rec("append", vec![Term::nil(), var("Ys"), var("Ys")]))
        .unwrap();
    // append([X|Xs], Ys, [X|Zs]) :- append(Xs, Ys, Zs).
    engine
        .invoke_rule(
            rec(
                "append",
                vec![
                    Term::cons(var("X"), var("Xs")),
                    var("Ys"),
                    Term::cons(var("X"), var("Zs")),
                ],
            ),
            [rec("append", vec![var("Xs"), var("Ys"), var("Zs")])],
        )
        .unwrap();
}

fn define_member(engine: &mut Engine) {
    // member(X, [X|_]).
    engine
        .invoke_fact(rec(
            "member",
            vec![var("X"), Term::cons(var("X"), Term::FreshVar)],
        ))
        .unwrap();
    // member(X, [_|T]) :- member(X, T).
    engine
        .invoke_rule(
            rec("member", vec![var("X"), Term::cons(Term::FreshVar, var("T"))]),
            [rec("member", vec![var("X"), var("T")])],
        )
        .unwrap();
}

/// Order-insensitive view of an answer sequence.
fn answer_set(answers: Vec<Bindings>) -> Vec<Vec<(String, Term)>> {
    let mut set: Vec<Vec<(String, Term)>> = answers
        .into_iter()
        .map(|bindings| {
            let mut pairs: Vec<_> = bindings.into_iter().collect();
            pairs.sort();
            pairs
        })
        .collect();
    set.sort();
    set
}

#[test]
fn append_enumerates_every_split_in_order() {
    let mut engine = Engine::new();
    define_append(&mut engine);

    let answers = engine
        .query_all(&[rec("append", vec![var("A"), var("B"), ints(&[1, 2, 3])])])
        .unwrap();

    check!(
        answers
            == vec![
                binding(&[("A", ints(&[])), ("B", ints(&[1, 2, 3]))]),
                binding(&[("A", ints(&[1])), ("B", ints(&[2, 3]))]),
                binding(&[("A", ints(&[1, 2])), ("B", ints(&[3]))]),
                binding(&[("A", ints(&[1, 2, 3])), ("B", ints(&[]))]),
            ]
    );
}

#[test]
fn member_enumerates_in_list_order() {
    let mut engine = Engine::new();
    define_member(&mut engine);

    let answers = engine
        .query_all(&[rec("member", vec![var("X"), syms(&["a", "b", "c"])])])
        .unwrap();

    check!(
        answers
            == vec![
                binding(&[("X", sym("a"))]),
                binding(&[("X", sym("b"))]),
                binding(&[("X", sym("c"))]),
            ]
    );
}

#[test]
fn constant_facts_compile_to_constant_opcodes() {
    let mut engine = Engine::new();
    engine.invoke_fact(rec("color", vec![sym("red")])).unwrap();
    engine.invoke_fact(rec("color", vec![sym("blue")])).unwrap();

    let answers = engine.query_all(&[rec("color", vec![var("X")])]).unwrap();
    check!(answers == vec![binding(&[("X", sym("red"))]), binding(&[("X", sym("blue"))])]);

    // The peephole must have folded the 0-arity structures.
    let listing = engine.disassemble("color", 1).unwrap();
    check!(listing.contains("get_const"));
    check!(!listing.contains("get_structure"));
}

#[test]
fn cut_commits_to_the_first_solution() {
    let mut engine = Engine::new();
    for i in 1..=3 {
        engine.invoke_fact(rec("p", vec![Term::Int(i)])).unwrap();
    }
    // q(X) :- p(X), !.
    engine
        .invoke_rule(
            rec("q", vec![var("X")]),
            [rec("p", vec![var("X")]), sym("!")],
        )
        .unwrap();

    let answers = engine.query_all(&[rec("q", vec![var("X")])]).unwrap();
    check!(answers == vec![binding(&[("X", Term::Int(1))])]);
}

#[test]
fn nested_backtracking_enumerates_lexicographically() {
    let mut engine = Engine::new();
    define_member(&mut engine);
    // p(X, Y) :- member(X, [1, 2]), member(Y, [a, b]).
    engine
        .invoke_rule(
            rec("p", vec![var("X"), var("Y")]),
            [
                rec("member", vec![var("X"), ints(&[1, 2])]),
                rec("member", vec![var("Y"), syms(&["a", "b"])]),
            ],
        )
        .unwrap();

    let answers = engine
        .query_all(&[rec("p", vec![var("X"), var("Y")])])
        .unwrap();
    check!(
        answers
            == vec![
                binding(&[("X", Term::Int(1)), ("Y", sym("a"))]),
                binding(&[("X", Term::Int(1)), ("Y", sym("b"))]),
                binding(&[("X", Term::Int(2)), ("Y", sym("a"))]),
                binding(&[("X", Term::Int(2)), ("Y", sym("b"))]),
            ]
    );
}

#[test]
fn logic_frame_rollback_retracts_facts() {
    let mut engine = Engine::new();

    engine.push_logic_frame();
    engine
        .invoke_fact(rec("true", vec![sym("at_home")]))
        .unwrap();
    check!(engine.prove(&[rec("true", vec![sym("at_home")])]).unwrap());

    engine.pop_logic_frame().unwrap();
    check!(!engine.prove(&[rec("true", vec![sym("at_home")])]).unwrap());
}

#[test]
fn finalized_frames_survive() {
    let mut engine = Engine::new();

    engine.push_logic_frame();
    engine.invoke_fact(rec("role", vec![sym("white")])).unwrap();
    engine.finalize_logic_frame().unwrap();

    check!(engine.prove(&[rec("role", vec![sym("white")])]).unwrap());
    // The frame is gone: there is nothing left to pop.
    let_assert!(Err(Error::Fault(_)) = engine.pop_logic_frame());
    check!(engine.prove(&[rec("role", vec![sym("white")])]).unwrap());
}

#[test]
fn queries_restore_heap_and_trail() {
    let mut engine = Engine::new();
    define_append(&mut engine);

    // Pre-existing heap state must be bit-identical after the query.
    let seed = Term::parse("seed(X, f(Y))").unwrap();
    seed.serialize(&mut engine.mem);
    let heap_before = engine.mem.heap.clone();
    let trail_before = engine.mem.trail_len();

    let answers = engine
        .query_all(&[rec("append", vec![var("A"), var("B"), ints(&[1, 2])])])
        .unwrap();
    check!(answers.len() == 3);

    check!(engine.mem.heap == heap_before);
    check!(engine.mem.trail_len() == trail_before);
}

#[test]
fn abandoned_queries_restore_the_engine() {
    let mut engine = Engine::new();
    define_member(&mut engine);

    let heap_before = engine.mem.heap.clone();
    let code_before = engine.db.code_len();

    {
        let mut solutions = engine
            .solve(&[rec("member", vec![var("X"), ints(&[1, 2, 3])])])
            .unwrap();
        let first = solutions.next().unwrap().unwrap();
        check!(first == binding(&[("X", Term::Int(1))]));
        // Abandon the rest.
    }

    check!(engine.mem.heap == heap_before);
    check!(engine.mem.trail_len() == 0);
    check!(engine.db.code_len() == code_before);
}

#[test]
fn clause_order_changes_answer_order_not_answer_set() {
    let mut engine = Engine::new();
    define_member(&mut engine);
    // Same relation with the clauses swapped.
    engine
        .invoke_rule(
            rec("rmember", vec![var("X"), Term::cons(Term::FreshVar, var("T"))]),
            [rec("rmember", vec![var("X"), var("T")])],
        )
        .unwrap();
    engine
        .invoke_fact(rec(
            "rmember",
            vec![var("X"), Term::cons(var("X"), Term::FreshVar)],
        ))
        .unwrap();

    let forward = engine
        .query_all(&[rec("member", vec![var("X"), ints(&[1, 2, 3])])])
        .unwrap();
    let reversed = engine
        .query_all(&[rec("rmember", vec![var("X"), ints(&[1, 2, 3])])])
        .unwrap();

    check!(forward != reversed);
    check!(answer_set(forward) == answer_set(reversed));
}

#[test]
fn builtin_or_enumerates_both_branches() {
    let mut engine = Engine::new();
    define_member(&mut engine);

    let answers = engine
        .query_all(&[rec(
            "or",
            vec![
                rec("member", vec![var("X"), ints(&[1])]),
                rec("member", vec![var("X"), ints(&[2])]),
            ],
        )])
        .unwrap();
    check!(answers == vec![binding(&[("X", Term::Int(1))]), binding(&[("X", Term::Int(2))])]);

    check!(engine.prove(&[rec("or", vec![sym("fail"), sym("true")])]).unwrap());
    check!(!engine.prove(&[rec("or", vec![sym("fail"), sym("fail")])]).unwrap());
}

#[test]
fn builtin_not_negates_by_failure() {
    let mut engine = Engine::new();
    define_member(&mut engine);

    check!(engine.prove(&[rec("not", vec![sym("fail")])]).unwrap());
    check!(!engine.prove(&[rec("not", vec![sym("true")])]).unwrap());

    // not(member(X, [1, 2])) fails because member succeeds.
    check!(!engine
        .prove(&[rec(
            "not",
            vec![rec("member", vec![var("X"), ints(&[1, 2])])],
        )])
        .unwrap());
    // ...and leaves no choice points behind: the enclosing query fails once.
    let answers = engine
        .query_all(&[rec(
            "not",
            vec![rec("member", vec![var("X"), ints(&[1, 2])])],
        )])
        .unwrap();
    check!(answers.is_empty());
}

#[test]
fn builtin_distinct_compares_by_unification() {
    let mut engine = Engine::new();

    check!(engine.prove(&[rec("distinct", vec![sym("a"), sym("b")])]).unwrap());
    check!(!engine.prove(&[rec("distinct", vec![sym("a"), sym("a")])]).unwrap());
    check!(!engine
        .prove(&[rec("distinct", vec![ints(&[1, 2]), ints(&[1, 2])])])
        .unwrap());
    // An unbound variable unifies with anything.
    check!(!engine.prove(&[rec("distinct", vec![var("X"), sym("a")])]).unwrap());
}

#[test]
fn call_dispatches_on_a_bound_goal() {
    let mut engine = Engine::new();
    define_member(&mut engine);

    let answers = engine
        .query_all(&[rec(
            "call",
            vec![rec("member", vec![var("X"), ints(&[7])])],
        )])
        .unwrap();
    check!(answers == vec![binding(&[("X", Term::Int(7))])]);

    // Calling an unbound variable fails rather than faulting.
    check!(!engine.prove(&[rec("call", vec![var("G")])]).unwrap());
}

#[test]
fn cut_in_a_query_body_drops_earlier_choice_points() {
    let mut engine = Engine::new();
    define_member(&mut engine);

    let answers = engine
        .query_all(&[
            rec("member", vec![var("X"), ints(&[1, 2, 3])]),
            sym("!"),
        ])
        .unwrap();
    check!(answers == vec![binding(&[("X", Term::Int(1))])]);
}

#[test]
fn undefined_predicates_fail() {
    let mut engine = Engine::new();
    check!(!engine.prove(&[rec("no_such_thing", vec![var("X")])]).unwrap());
}

#[test]
fn empty_queries_succeed_once() {
    let mut engine = Engine::new();
    let answers = engine.query_all(&[]).unwrap();
    check!(answers == vec![Bindings::new()]);
}

#[test]
fn query_map_applies_the_projection() {
    let mut engine = Engine::new();
    define_member(&mut engine);

    let xs = engine
        .query_map(
            &[rec("member", vec![var("X"), ints(&[4, 5])])],
            |bindings| bindings["X"].clone(),
        )
        .unwrap();
    check!(xs == vec![Term::Int(4), Term::Int(5)]);
}

#[test]
fn reset_database_reinstalls_builtins() {
    let mut engine = Engine::new();
    engine.invoke_fact(rec("p", vec![sym("a")])).unwrap();
    check!(engine.prove(&[rec("p", vec![sym("a")])]).unwrap());

    engine.reset_database();
    check!(!engine.prove(&[rec("p", vec![sym("a")])]).unwrap());
    check!(engine.prove(&[sym("true")]).unwrap());
    check!(engine.prove(&[rec("not", vec![sym("fail")])]).unwrap());
}

#[test]
fn non_callable_goals_are_reported_with_the_term() {
    let mut engine = Engine::new();
    let_assert!(Err(Error::Compile(e)) = engine.query_all(&[Term::Int(9)]));
    check!(e == crate::syntax::compile::Error::NonCallableTerm(Term::Int(9)));
}

#[test]
fn large_ground_terms_compile_and_decode() {
    let mut engine = Engine::new();
    define_append(&mut engine);

    // Needs far more temporaries than the register file's initial size.
    let long = ints(&(0..1_000).collect::<Vec<_>>());
    let answers = engine
        .query_all(&[rec("append", vec![ints(&[]), var("B"), long.clone()])])
        .unwrap();
    check!(answers == vec![binding(&[("B", long)])]);
}

#[test]
fn bindings_share_structure_between_variables() {
    let mut engine = Engine::new();
    define_append(&mut engine);

    // append([1], X, Y) leaves Y = [1|X] with X unbound; both must decode.
    let answers = engine
        .query_all(&[rec("append", vec![ints(&[1]), var("X"), var("Y")])])
        .unwrap();
    check!(answers.len() == 1);
    let_assert!(Term::Record(cons, parts) = &answers[0]["Y"]);
    check!(cons == ".");
    check!(parts[0] == Term::Int(1));
    // The tail is the same unbound variable X decodes to.
    check!(parts[1] == answers[0]["X"]);
}
