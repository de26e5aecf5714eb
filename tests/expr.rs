//! Expression compiler and evaluator tests.

use binblock::{compile, CompiledBlock, EvalContext, EvalError, Expression, ExternalValueProvider, NamedValueMap};

fn no_fields(_: &str) -> Result<Option<(usize, String)>, EvalError> {
    Ok(None)
}

fn empty_block() -> CompiledBlock {
    compile("", None).expect("empty script compiles")
}

/// Resolves every external name from a fixed table.
struct Table(Vec<(&'static str, i32)>);

impl ExternalValueProvider for Table {
    fn provide_value(&self, name: &str, _values: &NamedValueMap, _block: &CompiledBlock) -> Option<i32> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

fn eval_with(text: &str, external: &Table) -> Result<i32, EvalError> {
    let block = empty_block();
    let values = NamedValueMap::default();
    let ctx = EvalContext {
        stream_offset: 0,
        block: &block,
        values: &values,
        external: Some(external),
    };
    Expression::compile(text, no_fields)?.eval(&ctx)
}

fn eval(text: &str) -> Result<i32, EvalError> {
    eval_with(text, &Table(Vec::new()))
}

// ==================== Arithmetic ====================

#[test]
fn mixed_precedence_matches_native() {
    let hello = 8i32;
    #[allow(clippy::precedence)]
    let expected = 2 * hello * 6 / 4 + 3 * 2 - 11 % 3 & hello - !hello;
    let got = eval_with("2*hello*6/4+3*2-11%3&hello-~hello", &Table(vec![("hello", hello)])).unwrap();
    assert_eq!(got, expected);
    assert_eq!(got, 16);
}

#[test]
fn left_to_right_for_equal_precedence() {
    assert_eq!(eval("100/10/5").unwrap(), 2);
    assert_eq!(eval("10-4-3").unwrap(), 3);
    assert_eq!(eval("2*3%4").unwrap(), 2);
}

#[test]
fn parentheses_override_precedence() {
    assert_eq!(eval("(1+2)*3").unwrap(), 9);
    assert_eq!(eval("((((7))))").unwrap(), 7);
    assert_eq!(eval("-(2+3)*2").unwrap(), -10);
}

#[test]
fn bitwise_and_shifts() {
    assert_eq!(eval("1|2^3&6").unwrap(), 1 | 2 ^ 3 & 6);
    assert_eq!(eval("1<<4>>2").unwrap(), 4);
    assert_eq!(eval("-16>>2").unwrap(), -4);
    assert_eq!(eval("-16>>>28").unwrap(), 0xF);
    assert_eq!(eval("1<<31").unwrap(), i32::MIN);
}

#[test]
fn unary_operators() {
    assert_eq!(eval("~0").unwrap(), -1);
    assert_eq!(eval("+5").unwrap(), 5);
    assert_eq!(eval("--5").unwrap(), 5);
    assert_eq!(eval("3*-2").unwrap(), -6);
}

#[test]
fn arithmetic_wraps_at_32_bits() {
    assert_eq!(eval("2147483647+1").unwrap(), i32::MIN);
    assert_eq!(eval("65536*65536").unwrap(), 0);
}

#[test]
fn division_by_zero() {
    assert_eq!(eval("10/0"), Err(EvalError::DivisionByZero));
    assert_eq!(eval("10%(2-2)"), Err(EvalError::DivisionByZero));
}

// ==================== Compile-time vs eval-time failures ====================

#[test]
fn trailing_operator_fails_only_at_eval() {
    let expr = Expression::compile("123*", no_fields).expect("compiles");
    let block = empty_block();
    let values = NamedValueMap::default();
    let ctx = EvalContext {
        stream_offset: 0,
        block: &block,
        values: &values,
        external: None,
    };
    assert!(matches!(expr.eval(&ctx), Err(EvalError::MissingOperand(_))));
}

#[test]
fn malformed_expressions_rejected_at_compile() {
    assert_eq!(Expression::compile("", no_fields).unwrap_err(), EvalError::Empty);
    assert_eq!(Expression::compile("   ", no_fields).unwrap_err(), EvalError::Empty);
    assert_eq!(
        Expression::compile("(1+2", no_fields).unwrap_err(),
        EvalError::UnmatchedParenthesis
    );
    assert_eq!(
        Expression::compile("1+2)", no_fields).unwrap_err(),
        EvalError::UnmatchedParenthesis
    );
    assert!(Expression::compile("()", no_fields).is_err());
    assert!(matches!(
        Expression::compile("(1+)", no_fields),
        Err(EvalError::MissingOperand("+"))
    ));
    assert!(matches!(
        Expression::compile("1 2", no_fields),
        Err(EvalError::MissingOperator(_))
    ));
    assert!(matches!(
        Expression::compile("*3", no_fields),
        Err(EvalError::MissingLeftOperand("*"))
    ));
    assert!(matches!(
        Expression::compile("1#2", no_fields),
        Err(EvalError::UnexpectedChar('#'))
    ));
}

#[test]
fn literal_overflow_carries_parse_error() {
    match Expression::compile("2147483648", no_fields) {
        Err(EvalError::InvalidLiteral { literal, .. }) => assert_eq!(literal, "2147483648"),
        other => panic!("expected invalid literal, got {:?}", other),
    }
    assert_eq!(eval("2147483647").unwrap(), i32::MAX);
}

// ==================== Operands ====================

#[test]
fn stream_offset_token() {
    let block = empty_block();
    let values = NamedValueMap::default();
    let ctx = EvalContext {
        stream_offset: 17,
        block: &block,
        values: &values,
        external: None,
    };
    let expr = Expression::compile("$$+1", no_fields).unwrap();
    assert_eq!(expr.eval(&ctx).unwrap(), 18);
    assert!(!expr.is_constant());
}

#[test]
fn external_values_by_name() {
    let table = Table(vec![("ext", 40), ("other", 2)]);
    assert_eq!(eval_with("$ext+other", &table).unwrap(), 42);
    assert_eq!(
        eval_with("missing", &table),
        Err(EvalError::UnknownExternal("missing".to_string()))
    );
}

#[test]
fn resolved_fields_read_value_map() {
    let resolve = |name: &str| -> Result<Option<(usize, String)>, EvalError> {
        Ok((name == "hdr.len").then(|| (5, "hdr.len".to_string())))
    };
    let expr = Expression::compile("HDR.LEN*2", resolve).unwrap();
    let block = empty_block();
    let mut values = NamedValueMap::default();
    let ctx = EvalContext {
        stream_offset: 0,
        block: &block,
        values: &values,
        external: None,
    };
    assert_eq!(expr.eval(&ctx), Err(EvalError::UnresolvedField("hdr.len".to_string())));
    values.set(5, 21);
    let ctx = EvalContext {
        stream_offset: 0,
        block: &block,
        values: &values,
        external: None,
    };
    assert_eq!(expr.eval(&ctx).unwrap(), 42);
}

#[test]
fn max_stack_depth_is_static() {
    assert_eq!(Expression::compile("1*2+3", no_fields).unwrap().max_stack_depth(), 2);
    assert_eq!(Expression::compile("1+2*3", no_fields).unwrap().max_stack_depth(), 3);
    assert_eq!(Expression::compile("1+(2+(3+(4+5)))", no_fields).unwrap().max_stack_depth(), 5);
    assert_eq!(Expression::compile("-~7", no_fields).unwrap().max_stack_depth(), 1);
}

#[test]
fn text_is_kept() {
    let expr = Expression::compile(" a + 1 ", no_fields).unwrap();
    assert_eq!(expr.text(), "a + 1");
    assert_eq!(expr.to_string(), "a + 1");
}
