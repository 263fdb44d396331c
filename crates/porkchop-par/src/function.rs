//! The continuum: the table of every function in the program.
//!
//! Functions are addressed by stable small indices that appear as
//! bytecode constants. Externals occupy the leading indices, the
//! synthetic `main` sits right after them, and named functions and
//! lambdas follow in order of declaration.

use porkchop_sem::Type;
use porkchop_util::Segment;

use crate::ast::Expr;
use crate::externals::external_prototypes;

/// A fully analysed function body.
#[derive(Debug)]
pub struct FunctionDefinition {
    /// Parameter names; for a lambda the captures come first.
    pub parameters: Vec<String>,
    /// The underlying prototype, captures included.
    pub prototype: Type,
    /// Types of all locals by slot index; parameters are the leading
    /// slots.
    pub locals: Vec<Type>,
    pub body: Expr,
    /// True when the body yields: calling the function creates a
    /// coroutine.
    pub generator: bool,
}

/// One slot of the continuum.
#[derive(Debug)]
pub enum FunctionReference {
    External {
        name: &'static str,
        prototype: Type,
    },
    Named {
        name: String,
        segment: Segment,
        /// Known from the declaration when the return type was spelled
        /// out; otherwise filled in at definition time.
        prototype: Option<Type>,
        definition: Option<FunctionDefinition>,
    },
    Lambda {
        definition: FunctionDefinition,
    },
    Main {
        definition: Option<FunctionDefinition>,
    },
}

impl FunctionReference {
    /// The prototype recorded in the shared prototype table.
    pub fn prototype(&self) -> &Type {
        match self {
            FunctionReference::External { prototype, .. } => prototype,
            FunctionReference::Named {
                prototype,
                definition,
                ..
            } => prototype
                .as_ref()
                .or_else(|| definition.as_ref().map(|def| &def.prototype))
                .expect("function prototype is not resolved"),
            FunctionReference::Lambda { definition } => &definition.prototype,
            FunctionReference::Main { definition } => {
                &definition
                    .as_ref()
                    .expect("main is not defined")
                    .prototype
            }
        }
    }
}

/// The ordered function table.
#[derive(Debug)]
pub struct Continuum {
    pub functions: Vec<FunctionReference>,
    entry: usize,
}

impl Continuum {
    /// Creates the table with the external slots and the reserved `main`
    /// slot.
    pub fn new() -> Self {
        let mut functions: Vec<FunctionReference> = external_prototypes()
            .into_iter()
            .map(|(name, prototype)| FunctionReference::External { name, prototype })
            .collect();
        let entry = functions.len();
        functions.push(FunctionReference::Main { definition: None });
        Self { functions, entry }
    }

    /// Index of the synthetic `main` function.
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Number of external functions (and the index `main` lives at).
    pub fn external_count(&self) -> usize {
        self.entry
    }

    /// Reserves a slot for a named function.
    pub fn declare_named(
        &mut self,
        name: &str,
        segment: Segment,
        prototype: Option<Type>,
    ) -> usize {
        let index = self.functions.len();
        self.functions.push(FunctionReference::Named {
            name: name.to_owned(),
            segment,
            prototype,
            definition: None,
        });
        index
    }

    /// Fills a named slot with its analysed definition.
    pub fn define_named(&mut self, index: usize, def: FunctionDefinition) {
        match &mut self.functions[index] {
            FunctionReference::Named {
                prototype,
                definition,
                ..
            } => {
                if prototype.is_none() {
                    *prototype = Some(def.prototype.clone());
                }
                *definition = Some(def);
            }
            _ => unreachable!("index {index} is not a named function"),
        }
    }

    pub fn add_lambda(&mut self, definition: FunctionDefinition) -> usize {
        let index = self.functions.len();
        self.functions
            .push(FunctionReference::Lambda { definition });
        index
    }

    pub fn define_main(&mut self, def: FunctionDefinition) {
        match &mut self.functions[self.entry] {
            FunctionReference::Main { definition } => *definition = Some(def),
            _ => unreachable!("entry slot is not main"),
        }
    }
}

impl Default for Continuum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprKind;

    fn dummy_def(prototype: Type) -> FunctionDefinition {
        FunctionDefinition {
            parameters: vec![],
            prototype,
            locals: vec![],
            body: Expr {
                kind: ExprKind::IntConst(0),
                segment: Segment::default(),
                typ: Type::INT,
                constant: None,
            },
            generator: false,
        }
    }

    #[test]
    fn test_layout() {
        let continuum = Continuum::new();
        assert_eq!(continuum.entry(), external_prototypes().len());
        assert!(matches!(
            continuum.functions[0],
            FunctionReference::External { name: "print", .. }
        ));
    }

    #[test]
    fn test_declare_define() {
        let mut continuum = Continuum::new();
        let proto = Type::func(vec![], Type::INT);
        let index = continuum.declare_named("f", Segment::default(), None);
        assert_eq!(index, continuum.entry() + 1);
        continuum.define_named(index, dummy_def(proto.clone()));
        assert_eq!(continuum.functions[index].prototype(), &proto);
    }
}
