//! Prototypes of the host primitives.
//!
//! The order of this table is the function-index order: external functions
//! occupy continuum indices `0..external_prototypes().len()`. The virtual
//! machine binds callables to the same names in the same order; a driver
//! test pins the two tables together.

use porkchop_sem::Type;

/// Names and prototypes of the fixed external function table.
pub fn external_prototypes() -> Vec<(&'static str, Type)> {
    vec![
        ("print", Type::func(vec![Type::STRING], Type::NONE)),
        ("println", Type::func(vec![Type::STRING], Type::NONE)),
        ("readLine", Type::func(vec![], Type::STRING)),
        ("i2s", Type::func(vec![Type::INT], Type::STRING)),
        ("f2s", Type::func(vec![Type::FLOAT], Type::STRING)),
        ("s2i", Type::func(vec![Type::STRING], Type::INT)),
        ("s2f", Type::func(vec![Type::STRING], Type::FLOAT)),
        ("exit", Type::func(vec![Type::INT], Type::NEVER)),
        ("millis", Type::func(vec![], Type::INT)),
        ("nanos", Type::func(vec![], Type::INT)),
        ("getargs", Type::func(vec![], Type::list(Type::STRING))),
        ("output", Type::func(vec![Type::STRING], Type::NONE)),
        ("input", Type::func(vec![Type::STRING], Type::NONE)),
        ("flush", Type::func(vec![], Type::NONE)),
        ("eof", Type::func(vec![], Type::BOOL)),
        ("typename", Type::func(vec![Type::ANY], Type::STRING)),
        ("gc", Type::func(vec![], Type::NONE)),
        ("toBytes", Type::func(vec![Type::STRING], Type::list(Type::BYTE))),
        ("toChars", Type::func(vec![Type::STRING], Type::list(Type::CHAR))),
        ("fromBytes", Type::func(vec![Type::list(Type::BYTE)], Type::STRING)),
        ("fromChars", Type::func(vec![Type::list(Type::CHAR)], Type::STRING)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let table = external_prototypes();
        for (i, (name, _)) in table.iter().enumerate() {
            assert!(
                table[i + 1..].iter().all(|(other, _)| other != name),
                "duplicate external {name}"
            );
        }
    }

    #[test]
    fn test_exit_never_returns() {
        let table = external_prototypes();
        let (_, exit) = table.iter().find(|(name, _)| *name == "exit").unwrap();
        assert_eq!(exit, &Type::func(vec![Type::INT], Type::NEVER));
    }
}
