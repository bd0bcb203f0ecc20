use super::*;
use serde_json::json;

fn mgr() -> ValidatorMgr {
    ValidatorMgr::new()
}

#[test]
fn parse_basic_forms() {
    let rule = Rule::parse("@int[0,120]").unwrap();
    assert_eq!(rule.name, "int");
    let range = rule.range.unwrap();
    assert_eq!(range.lo.as_deref(), Some("0"));
    assert_eq!(range.hi.as_deref(), Some("120"));
    assert!(!range.lo_exclusive);

    let rule = Rule::parse("@string[2,]").unwrap();
    assert_eq!(rule.raw, "@string[2,]");
    assert_eq!(rule.range.unwrap().hi, None);

    let rule = Rule::parse("@float(0,1]").unwrap();
    let range = rule.range.unwrap();
    assert!(range.lo_exclusive);
    assert!(!range.hi_exclusive);

    let rule = Rule::parse("@string{a,b,c}").unwrap();
    assert_eq!(rule.choices, vec!["a", "b", "c"]);

    let rule = Rule::parse("uuid").unwrap();
    assert!(!rule.tagged);
    assert_eq!(rule.name, "uuid");

    assert!(Rule::parse("").unwrap().is_empty());
}

#[test]
fn parse_nested_params() {
    let rule = Rule::parse("@slice<@int[0,10]>[1,3]").unwrap();
    assert_eq!(rule.params.len(), 1);
    match &rule.params[0] {
        RuleParam::Rule(inner) => {
            assert_eq!(inner.name, "int");
            assert_eq!(inner.raw, "@int[0,10]");
        }
        other => panic!("unexpected param {other:?}"),
    }

    let rule = Rule::parse("@struct<name=@string[2,],age=@int[0,120]>").unwrap();
    assert_eq!(rule.params.len(), 2);
    match &rule.params[1] {
        RuleParam::Named { key, rule } => {
            assert_eq!(key, "age");
            assert_eq!(rule.raw, "@int[0,120]");
        }
        other => panic!("unexpected param {other:?}"),
    }

    let rule = Rule::parse("@map<@string[1,],@int[0,]>[,8]").unwrap();
    assert_eq!(rule.params.len(), 2);
}

#[test]
fn parser_is_total_on_junk() {
    for junk in [
        "@", "@<", "@int[", "@int[0", "@int[0,", "@int[0,}", "@slice<@int",
        "@string{a", "@@int", "hello world", "@int]", "@int[0,120] ",
    ] {
        assert!(Rule::parse(junk).is_err(), "{junk:?} should not parse");
    }
}

#[test]
fn int_bounds_and_choices() {
    let m = mgr();
    let v = m.get("@int[0,120]").unwrap();
    assert!(v.validate(&json!(0)).is_ok());
    assert!(v.validate(&json!(120)).is_ok());

    let err = v.validate(&json!(121)).unwrap_err();
    assert!(err.msg.contains("121"), "{err}");
    assert!(err.msg.contains("120"), "{err}");
    assert_eq!(err.rule, "@int[0,120]");

    let err = v.validate(&json!("x")).unwrap_err();
    assert!(err.msg.contains("not an integer"));

    let v = m.get("@int{1,2,3}").unwrap();
    assert!(v.validate(&json!(2)).is_ok());
    assert!(v.validate(&json!(4)).is_err());
}

#[test]
fn exclusive_bounds_fold() {
    let m = mgr();
    let v = m.get("@int(0,10)").unwrap();
    assert!(v.validate(&json!(0)).is_err());
    assert!(v.validate(&json!(1)).is_ok());
    assert!(v.validate(&json!(9)).is_ok());
    assert!(v.validate(&json!(10)).is_err());
}

#[test]
fn uint_rejects_negative() {
    let m = mgr();
    let v = m.get("@uint[1,]").unwrap();
    assert!(v.validate(&json!(1)).is_ok());
    assert!(v.validate(&json!(-1)).is_err());
    assert!(v.validate(&json!(0)).is_err());
}

#[test]
fn float_bounds() {
    let m = mgr();
    let v = m.get("@float(0,1]").unwrap();
    assert!(v.validate(&json!(0.0)).is_err());
    assert!(v.validate(&json!(0.5)).is_ok());
    assert!(v.validate(&json!(1.0)).is_ok());
    assert!(v.validate(&json!(1.1)).is_err());
}

#[test]
fn string_rune_count() {
    let m = mgr();
    let v = m.get("@string[2,4]").unwrap();
    assert!(v.validate(&json!("a")).is_err());
    assert!(v.validate(&json!("ab")).is_ok());
    // rune count, not byte count
    assert!(v.validate(&json!("日本語道")).is_ok());
    assert!(v.validate(&json!("abcde")).is_err());
}

#[test]
fn string_pattern_param() {
    let m = mgr();
    let v = m.get("@string<^[a-z]+$>").unwrap();
    assert!(v.validate(&json!("abc")).is_ok());
    assert!(v.validate(&json!("Abc")).is_err());
}

#[test]
fn slice_and_map_compose() {
    let m = mgr();
    let v = m.get("@slice<@int[0,10]>[1,3]").unwrap();
    assert!(v.validate(&json!([1, 2])).is_ok());
    assert!(v.validate(&json!([])).is_err());
    assert!(v.validate(&json!([1, 2, 3, 4])).is_err());
    let err = v.validate(&json!([1, 99])).unwrap_err();
    assert!(err.msg.contains("[1]"), "{err}");

    let v = m.get("@map<@string[1,],@int[0,]>").unwrap();
    assert!(v.validate(&json!({"a": 1})).is_ok());
    assert!(v.validate(&json!({"a": -1})).is_err());
}

#[test]
fn struct_members_are_exhaustive() {
    let m = mgr();
    let v = m.get("@struct<name=@string[2,],age=@int[0,120]>").unwrap();
    assert!(v.validate(&json!({"name": "al", "age": 7})).is_ok());

    let err = v.validate(&json!({"name": "a"})).unwrap_err();
    assert!(err.msg.contains("name"), "{err}");
    assert!(err.msg.contains("@string[2,]"), "{err}");
    assert!(err.msg.contains("age"), "{err}");
}

#[test]
fn string_formats() {
    let m = mgr();
    let v = m.get("uuid").unwrap();
    assert!(v.validate(&json!("123e4567-e89b-12d3-a456-426614174000")).is_ok());
    assert!(v.validate(&json!("nope")).is_err());

    let v = m.get("email").unwrap();
    assert!(v.validate(&json!("a@b.co")).is_ok());
    assert!(v.validate(&json!("a@b")).is_err());

    // alias resolves to the same format
    let v = m.get("e-mail").unwrap();
    assert!(v.validate(&json!("a@b.co")).is_ok());

    let v = m.get("hex-color").unwrap();
    assert!(v.validate(&json!("#a1b2c3")).is_ok());
    assert!(v.validate(&json!("a1b2c3")).is_err());

    assert!(matches!(m.get("no-such-format"), Err(CompileError::UnknownKind(_))));
}

#[test]
fn register_format_extends() {
    let m = mgr();
    m.register_format("postcode", &["zip"], r"^\d{5}$").unwrap();
    let v = m.get("zip").unwrap();
    assert!(v.validate(&json!("12345")).is_ok());
    assert!(v.validate(&json!("1234")).is_err());
}

#[test]
fn layered_mgr_falls_back_to_parent() {
    let parent = Arc::new(ValidatorMgr::new());
    parent.register_format("slug", &[], r"^[a-z0-9-]+$").unwrap();

    let child = ValidatorMgr::with_parent(parent);
    let v = child.get("slug").unwrap();
    assert!(v.validate(&json!("a-slug")).is_ok());

    // builtin formats also resolve through the parent
    assert!(child.get("uuid").is_ok());
}

#[test]
fn cache_hits_after_first_compile() {
    let m = mgr();
    let a = m.get("@int[0,120]").unwrap();
    let b = m.get("@int[0,120]").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn empty_rule_accepts_everything() {
    let m = mgr();
    let v = m.get("").unwrap();
    for value in [json!(null), json!(1), json!("x"), json!([1]), json!({"a": 1})] {
        assert!(v.validate(&value).is_ok());
    }
}

#[test]
fn coerce_atom_follows_kind() {
    let m = mgr();
    assert_eq!(m.get("@int[0,120]").unwrap().coerce_atom("7").unwrap(), json!(7));
    assert_eq!(m.get("@string[2,]").unwrap().coerce_atom("7").unwrap(), json!("7"));
    assert_eq!(m.get("@float[0,]").unwrap().coerce_atom("1.5").unwrap(), json!(1.5));
    assert_eq!(m.get("@slice<@int[0,]>").unwrap().coerce_atom("3").unwrap(), json!(3));
    assert!(m.get("@int[0,120]").unwrap().coerce_atom("x").is_err());
}
