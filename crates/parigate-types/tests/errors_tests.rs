//! Tests for the error taxonomy

use parigate_types::ParigateError;

#[test]
fn display_includes_message() {
    let err = ParigateError::model_instantiation("unknown source `missing`");
    assert_eq!(
        err.to_string(),
        "Model instantiation error: unknown source `missing`"
    );

    let err = ParigateError::unsupported_architecture("gptX");
    assert_eq!(err.to_string(), "Unsupported architecture: gptX");
}

#[test]
fn every_variant_is_fatal() {
    let errors = vec![
        ParigateError::model_instantiation("m"),
        ParigateError::unsupported_architecture("a"),
        ParigateError::shape_mismatch("s"),
        ParigateError::collective_timeout("c"),
        ParigateError::config("c"),
        ParigateError::tokenizer("t"),
        ParigateError::backend("b"),
        ParigateError::io("i"),
        ParigateError::serialization("s"),
        ParigateError::internal("i"),
    ];
    for err in errors {
        assert!(err.is_fatal());
    }
}

#[test]
fn io_errors_convert() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
    let err: ParigateError = io_err.into();
    assert!(matches!(err, ParigateError::Io { .. }));
}
