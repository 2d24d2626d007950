#[cfg(test)]
mod tests {
    use crate::diagnostic::*;
    use crate::error::*;
    use crate::id::MuId;
    use crate::ir::EntityKind;
    use std::io;

    fn id(n: u32) -> MuId {
        MuId::new(n).unwrap()
    }

    // ===== Error Creation Tests =====

    #[test]
    fn test_duplicate_id_error() {
        let err = Error::DuplicateId(id(7));
        assert_eq!(err.to_string(), "Duplicate identifier: #7 is already defined");
    }

    #[test]
    fn test_duplicate_name_error() {
        let err = Error::DuplicateName {
            name: "@i64".to_string(),
            existing: id(3),
        };
        assert_eq!(
            err.to_string(),
            "Duplicate name in bundle: @i64 is already reserved for #3"
        );
    }

    #[test]
    fn test_config_error() {
        let err = Error::Config("unexpected argument '--bogus'".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: unexpected argument '--bogus'"
        );
    }

    #[test]
    fn test_load_error_lists_every_diagnostic() {
        let failure = LoadFailure {
            diagnostics: vec![
                Diagnostic {
                    node: id(2),
                    name: Some("@c".to_string()),
                    reference: Some(id(1)),
                    reason: Reason::KindMismatch {
                        expected: "type",
                        found: EntityKind::FuncSig,
                    },
                },
                Diagnostic {
                    node: id(5),
                    name: None,
                    reference: None,
                    reason: Reason::MalformedShape(ShapeError::MissingTerminator),
                },
            ],
        };
        let err = Error::Load(failure.clone());
        let text = err.to_string();
        assert!(text.starts_with("Bundle rejected: 2 problem(s)"));
        assert!(text.contains("#2 (@c) -> #1: expected type, found function signature"));
        assert!(text.contains("#5: malformed code: basic block does not end with a terminator"));
        assert!(failure.mentions(id(5)));
        assert!(!failure.mentions(id(1)));
        assert_eq!(
            failure
                .matching(|r| matches!(r, Reason::KindMismatch { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_compile_error_names_versions() {
        let err = Error::Compile(vec![CompileFailure {
            func_ver: id(9),
            name: Some("@f_v1".to_string()),
            message: "FREM is not supported".to_string(),
        }]);
        assert_eq!(
            err.to_string(),
            "Compilation failed for 1 function version(s): #9 (@f_v1): FREM is not supported"
        );
    }

    #[test]
    fn test_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("IO error:"));
    }

    #[test]
    fn test_other_error() {
        let anyhow_err = anyhow::anyhow!("custom error");
        let err = Error::Other(anyhow_err);
        assert_eq!(err.to_string(), "custom error");
    }

    // ===== Error Conversion Tests =====

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_result_propagation() {
        fn fails() -> Result<()> {
            Err(Error::IdSpaceExhausted)
        }
        fn outer() -> Result<u32> {
            fails()?;
            Ok(1)
        }
        assert!(matches!(outer(), Err(Error::IdSpaceExhausted)));
    }
}
