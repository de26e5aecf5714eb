//! Script compiler tests: syntax, per-type constraints, names and bytecode layout.

use binblock::bytecode::{
    unpack_int, ArrayKind, Header, Instruction, Opcode, CODE_INT, CODE_STRUCT_END, CODE_STRUCT_START,
    CODE_UBYTE, FLAG_ARRAY, FLAG_LITTLE_ENDIAN, FLAG_NAMED, FLAG_WIDE,
};
use binblock::{
    compile, CompileError, CustomFieldTypeProcessor, DynBitReader, BitOrder, FieldNode, FieldTypeParameters,
    NamedFieldInfo, ParseError, ParserFlags,
};

fn instructions(code: &[u8]) -> Vec<Instruction> {
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < code.len() {
        out.push(Instruction::decode(code, &mut pos).expect("decode"));
    }
    out
}

// ==================== Syntax: valid scripts ====================

#[test]
fn empty_script() {
    let block = compile("", None).expect("empty script");
    assert!(block.bytecode().is_empty());
    assert!(block.named_fields().is_empty());
}

#[test]
fn comments_and_whitespace() {
    let src = r#"
// leading comment
byte a; // trailing
  ubyte   b ;
"#;
    let block = compile(src, None).expect("compile");
    assert_eq!(block.named_fields().len(), 2);
}

#[test]
fn all_builtin_types() {
    let src = r#"
bit:3 a; bool b; byte c; ubyte d; short e; ushort f; int g; uint h; long i;
floatj j; doublej k; stringj l; float m; double n; string o;
align:4; skip:2; val:7 p; reset$$;
"#;
    let block = compile(src, None).expect("compile");
    assert_eq!(block.named_fields().len(), 16);
    assert!(!block.has_var_fields());
}

#[test]
fn names_and_types_are_case_insensitive() {
    let block = compile("INT Count; Byte [COUNT] Data;", None).expect("compile");
    let paths: Vec<&str> = block.named_fields().iter().map(NamedFieldInfo::path).collect();
    assert_eq!(paths, vec!["count", "data"]);
    assert!(block.find_field_for_path("DATA").is_some());
}

#[test]
fn anonymous_fields_and_structures() {
    let block = compile("int; { byte; } byte [2];", None).expect("compile");
    assert!(block.named_fields().is_empty());
    assert_eq!(instructions(block.bytecode()).len(), 5);
}

// ==================== Syntax: invalid scripts ====================

#[test]
fn missing_semicolon_is_syntax_error() {
    let err = compile("int a", None).unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }));
}

#[test]
fn unknown_type_reports_position() {
    let err = compile("int a;\nfoo b;", None).unwrap_err();
    match &err {
        CompileError::UnknownType { type_name, position } => {
            assert_eq!(type_name, "foo");
            assert_eq!(*position, 7);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(err.position(), 7);
}

#[test]
fn unbalanced_structures() {
    assert!(matches!(
        compile("a { int x;", None),
        Err(CompileError::UnclosedStructure { position: 0 })
    ));
    assert!(matches!(
        compile("int x; }", None),
        Err(CompileError::UnexpectedStructEnd { position: 7 })
    ));
}

// ==================== Names ====================

#[test]
fn duplicate_name_in_same_scope() {
    assert!(matches!(
        compile("int a; byte a;", None),
        Err(CompileError::DuplicateName { .. })
    ));
    assert!(matches!(
        compile("s { int a; byte A; }", None),
        Err(CompileError::DuplicateName { .. })
    ));
}

#[test]
fn same_name_in_different_scopes() {
    let block = compile("int a; s { int a; t { int a; } } int b;", None).expect("compile");
    let paths: Vec<&str> = block.named_fields().iter().map(NamedFieldInfo::path).collect();
    assert_eq!(paths, vec!["a", "s", "s.a", "s.t", "s.t.a", "b"]);
}

#[test]
fn nested_name_doesnt_clash_with_sibling() {
    compile("s { t { int a; } int a; }", None).expect("compile");
}

#[test]
fn invalid_names() {
    for src in ["int a.b;", "int 1a;", "int a-b;"] {
        assert!(
            matches!(compile(src, None), Err(CompileError::InvalidName { .. })),
            "{src}"
        );
    }
}

// ==================== Per-type constraints ====================

#[test]
fn directives_cant_be_arrays_or_named() {
    for src in ["align [2];", "skip [2];", "reset$$ [2];", "align a;", "skip:3 s;", "reset$$ r;"] {
        assert!(matches!(compile(src, None), Err(CompileError::Invalid { .. })), "{src}");
    }
}

#[test]
fn val_must_be_named_with_value() {
    assert!(matches!(compile("val:3;", None), Err(CompileError::Invalid { .. })));
    assert!(matches!(compile("val v;", None), Err(CompileError::Invalid { .. })));
    assert!(matches!(compile("val:3 [2] v;", None), Err(CompileError::Invalid { .. })));
    compile("val:3 v;", None).expect("val");
}

#[test]
fn bit_width_range() {
    compile("bit:1 a; bit:8 b; bit c;", None).expect("widths");
    assert!(matches!(compile("bit:0 a;", None), Err(CompileError::Invalid { .. })));
    assert!(matches!(compile("bit:9 a;", None), Err(CompileError::Invalid { .. })));
}

#[test]
fn align_and_array_sizes_must_be_positive() {
    assert!(matches!(compile("align:0;", None), Err(CompileError::Invalid { .. })));
    assert!(matches!(compile("byte [0] a;", None), Err(CompileError::Invalid { .. })));
    assert!(matches!(compile("s [0] { byte a; }", None), Err(CompileError::Invalid { .. })));
}

#[test]
fn extra_on_type_without_one() {
    assert!(matches!(compile("int:3 a;", None), Err(CompileError::Invalid { .. })));
}

#[test]
fn two_whole_stream_arrays_rejected() {
    let err = compile("byte [_] a; int [_] b;", None).unwrap_err();
    assert!(matches!(err, CompileError::MultipleWholeStreamArrays { position: 12 }));
    compile("byte [_] a;", None).expect("one is fine");
}

#[test]
fn whole_stream_inside_repeated_structure_rejected() {
    assert!(matches!(
        compile("s [2] { byte [_] a; }", None),
        Err(CompileError::WholeStreamInRepeatedStruct { .. })
    ));
    compile("s { byte [_] a; }", None).expect("plain struct may hold one");
    compile("s [_] { byte a; }", None).expect("whole-stream struct array");
}

#[test]
fn bad_expressions() {
    assert!(matches!(
        compile("byte [(1+] a;", None),
        Err(CompileError::Expression { .. })
    ));
    assert!(matches!(
        compile("bool f; byte [f] a;", None),
        Err(CompileError::Expression { .. })
    ));
    assert!(matches!(
        compile("byte [2] arr; byte [arr] a;", None),
        Err(CompileError::Expression { .. })
    ));
}

#[test]
fn trailing_operator_compiles() {
    compile("int n; byte [n*] a;", None).expect("fails only when evaluated");
}

// ==================== Bytecode layout ====================

#[test]
fn simple_field_headers() {
    let block = compile("ubyte a; <int b; int;", None).expect("compile");
    assert_eq!(
        block.bytecode(),
        &[
            CODE_UBYTE | FLAG_NAMED,
            CODE_INT | FLAG_NAMED | FLAG_LITTLE_ENDIAN,
            CODE_INT
        ]
    );
    assert_eq!(block.named_fields()[0].offset(), 0);
    assert_eq!(block.named_fields()[1].offset(), 1);
}

#[test]
fn fixed_array_length_is_packed() {
    let block = compile("ubyte [200] a;", None).expect("compile");
    assert_eq!(block.bytecode(), &[CODE_UBYTE | FLAG_NAMED | FLAG_ARRAY, 0x80, 0x00, 200]);
}

#[test]
fn expression_and_whole_stream_arrays_are_wide() {
    let block = compile("ubyte n; byte [n] a; byte [_] b;", None).expect("compile");
    let insns = instructions(block.bytecode());
    assert_eq!(insns[1].header.array_kind(), ArrayKind::Expression);
    assert!(insns[1].header.is_wide());
    assert_eq!(insns[2].header.array_kind(), ArrayKind::WholeStream);
    assert_eq!(block.bytecode()[insns[2].offset] & FLAG_WIDE, FLAG_WIDE);
    assert_eq!(block.evaluators().len(), 1);
    assert_eq!(block.evaluators()[0].text(), "n");
}

#[test]
fn alternate_types_use_diff_flag() {
    let block = compile("floatj f; doublej d; uint u; stringj s; val:5 v; int i;", None).expect("compile");
    let insns = instructions(block.bytecode());
    let ops: Vec<(Opcode, bool)> = insns.iter().map(|i| (i.header.opcode, i.header.is_diff_type())).collect();
    assert_eq!(
        ops,
        vec![
            (Opcode::Int, true),
            (Opcode::Long, true),
            (Opcode::Byte, true),
            (Opcode::Bool, true),
            (Opcode::Skip, true),
            (Opcode::Int, false),
        ]
    );
    assert_eq!(insns[4].extra, Some(5));
}

#[test]
fn extra_defaults_and_expressions() {
    let block = compile("ubyte w; bit a; bit:(w) b; skip; align:8;", None).expect("compile");
    let insns = instructions(block.bytecode());
    assert_eq!(insns[1].extra, Some(1));
    assert!(insns[2].header.extra_is_expression());
    assert_eq!(insns[2].extra, None);
    assert_eq!(insns[3].extra, Some(1));
    assert_eq!(insns[4].extra, Some(8));
}

#[test]
fn evaluators_ordered_length_then_extra() {
    let block = compile("ubyte w; ubyte n; bit:(w) [n+1] a;", None).expect("compile");
    let texts: Vec<&str> = block.evaluators().iter().map(|e| e.text()).collect();
    assert_eq!(texts, vec!["n+1", "w"]);
}

#[test]
fn struct_end_points_back_to_start() {
    let block = compile("int x; s [2] { byte y; }", None).expect("compile");
    let code = block.bytecode();
    let start = block.find_field_for_path("s").expect("s").offset();
    assert_eq!(code[start] & 0x0F, CODE_STRUCT_START);
    let mut pos = start;
    let header = Header::decode(code, &mut pos).unwrap();
    assert_eq!(header.array_kind(), ArrayKind::Fixed);
    assert_eq!(unpack_int(code, &mut pos).unwrap(), 2);
    let end = code.len() - 2;
    assert_eq!(code[end], CODE_STRUCT_END);
    let mut pos = end + 1;
    assert_eq!(unpack_int(code, &mut pos).unwrap() as usize, start);
}

#[test]
fn expressions_resolve_innermost_scope_first() {
    let block = compile("ubyte n; s { ubyte n; byte [n] a; } byte [s.n] b; byte [n] c;", None).expect("compile");
    let inner = block.find_field_for_path("s.n").unwrap().offset();
    let outer = block.find_field_for_path("n").unwrap().offset();
    let fields: Vec<String> = block
        .evaluators()
        .iter()
        .map(|e| format!("{:?}", e.tokens()))
        .collect();
    assert!(fields[0].contains(&format!("offset: {}", inner)));
    assert!(fields[1].contains(&format!("offset: {}", inner)));
    assert!(fields[2].contains(&format!("offset: {}", outer)));
}

#[test]
fn disassembly_lists_every_instruction() {
    let block = compile("ubyte n; hdr { <ushort [n] v; } skip:(n*2); byte [_] rest;", None).unwrap();
    let text = block.disassemble();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[0].contains("UBYTE") && lines[0].ends_with(" n"));
    assert!(lines[1].contains("STRUCT_START") && lines[1].ends_with(" hdr"));
    assert!(lines[2].contains("USHORT <") && lines[2].contains("[n]") && lines[2].ends_with("hdr.v"));
    assert!(lines[3].contains("STRUCT_END"));
    assert!(lines[4].contains("SKIP") && lines[4].contains(":(n*2)"));
    assert!(lines[5].contains("[_]"));
}

// ==================== Custom types ====================

struct ThreeByteInts;

impl CustomFieldTypeProcessor for ThreeByteInts {
    fn custom_field_types(&self) -> &[&str] {
        &["int24"]
    }

    fn is_allowed(&self, _: &FieldTypeParameters, _: Option<&str>, extra: Option<i32>, _: bool) -> bool {
        extra.map_or(true, |e| e == 0)
    }

    fn read_custom_field_type(
        &self,
        _: &mut DynBitReader<'_>,
        _: BitOrder,
        _: ParserFlags,
        _: &FieldTypeParameters,
        _: Option<&NamedFieldInfo>,
        _: i32,
        _: bool,
        _: Option<usize>,
    ) -> Result<FieldNode, ParseError> {
        unreachable!("compile-only test")
    }
}

#[test]
fn custom_types_are_checked_against_processor() {
    assert!(matches!(compile("int24 a;", None), Err(CompileError::UnknownType { .. })));
    let block = compile("INT24 a; <int24 [2] b;", Some(&ThreeByteInts)).expect("compile");
    assert_eq!(block.custom_fields().len(), 2);
    assert_eq!(block.custom_fields()[0].type_name, "int24");
    assert_eq!(block.custom_fields()[1].byte_order, binblock::Endianness::Little);
    let insns = instructions(block.bytecode());
    assert_eq!(insns[1].custom_index, Some(1));
    assert!(matches!(
        compile("int24:5 a;", Some(&ThreeByteInts)),
        Err(CompileError::Invalid { .. })
    ));
}

#[test]
fn var_fields_flag_block() {
    let block = compile("var:3 v; var [4] w;", None).expect("compile");
    assert!(block.has_var_fields());
}
