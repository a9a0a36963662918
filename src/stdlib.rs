// Standard library loader
// The library text is parsed once per thread into the default global
// environment every program is evaluated in.

use std::cell::OnceCell;
use std::rc::Rc;

use crate::ast::{ExprKind, SourceInfo};
use crate::context::Env;
use crate::error::Error;
use crate::parser::parse_source;

const SOURCE: &str = include_str!("stdlib.jq");

/// Source id reserved for the library text; programs use 0.
pub const LIBRARY_SOURCE_ID: u32 = 1;
const LIBRARY_NAME: &str = "<stdlib>";

/// The library's definitions and the source table its nodes point into.
pub struct Library {
    pub env: Env,
    pub source: Rc<SourceInfo>,
}

thread_local! {
    static LIBRARY: OnceCell<Result<Rc<Library>, Error>> = const { OnceCell::new() };
}

/// The parsed library for this thread.
pub fn library() -> Result<Rc<Library>, Error> {
    LIBRARY.with(|cell| cell.get_or_init(load).clone())
}

fn load() -> Result<Rc<Library>, Error> {
    let (root, source) = parse_source(SOURCE, LIBRARY_SOURCE_ID, LIBRARY_NAME).map_err(|e| {
        Error::from_parse(&e, &SourceInfo::new(LIBRARY_SOURCE_ID, LIBRARY_NAME, SOURCE))
    })?;

    // def a: ..; def b: ..; . parses as Compose(def a, Compose(def b, .))
    let mut env = Env::new();
    let mut definitions = 0;
    let mut cursor = &root;
    while let ExprKind::Compose(lhs, rest) = &cursor.kind {
        match &lhs.kind {
            ExprKind::FunctionDefinition(def) => {
                env = env.bind_function(def.clone());
                definitions += 1;
            }
            _ => break,
        }
        cursor = rest;
    }

    log::debug!(
        "loaded {} library definitions ({} nodes)",
        definitions,
        source.node_count()
    );
    Ok(Rc::new(Library {
        env,
        source: Rc::new(source),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_loads() {
        let library = library().unwrap();
        assert!(library.env.function("map", 1).is_some());
        assert!(library.env.function("limit", 2).is_some());
        assert!(library.env.function("select", 2).is_none());
        assert_eq!(library.source.id, LIBRARY_SOURCE_ID);
    }

    #[test]
    fn test_library_is_cached() {
        let a = library().unwrap();
        let b = library().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_library_names_are_public() {
        let library = library().unwrap();
        assert!(library
            .env
            .function_signatures()
            .iter()
            .all(|(name, _)| !name.starts_with('_')));
    }
}
