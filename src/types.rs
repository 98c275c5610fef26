use std::fmt;

use crate::{ast::TypeExpr, config::RootTypes};

/// Resolved static type. Structural equality for primitives and generics,
/// nominal for classes. `Unknown` unifies with everything.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Float,
    Bool,
    Str,
    Null,
    Unknown,
    Generic { base: String, args: Vec<Type> },
    Class(String),
    Function { params: Vec<Type>, ret: Box<Type> },
}

impl Type {
    pub fn list(element: Type) -> Type {
        Type::Generic {
            base: "List".into(),
            args: vec![element],
        }
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Generic {
            base: "Map".into(),
            args: vec![key, value],
        }
    }

    pub fn set(element: Type) -> Type {
        Type::Generic {
            base: "Set".into(),
            args: vec![element],
        }
    }

    pub fn task(result: Type) -> Type {
        Type::Generic {
            base: "Task".into(),
            args: vec![result],
        }
    }

    /// Resolves an annotation as written against the configured root-type
    /// spellings. Unrecognized names become class types.
    pub fn from_annotation(expr: &TypeExpr, roots: &RootTypes) -> Type {
        let name = expr.name.as_str();
        if name == roots.int {
            Type::Int
        } else if name == roots.float {
            Type::Float
        } else if name == roots.bool {
            Type::Bool
        } else if name == roots.string {
            Type::Str
        } else if name == roots.null {
            Type::Null
        } else if name == roots.any {
            Type::Unknown
        } else if name == roots.list {
            Type::Generic {
                base: "List".into(),
                args: Self::resolve_args(expr, roots),
            }
        } else if name == roots.map {
            Type::Generic {
                base: "Map".into(),
                args: Self::resolve_args(expr, roots),
            }
        } else if name == roots.set {
            Type::Generic {
                base: "Set".into(),
                args: Self::resolve_args(expr, roots),
            }
        } else if name == roots.task {
            Type::Generic {
                base: "Task".into(),
                args: Self::resolve_args(expr, roots),
            }
        } else {
            Type::Class(expr.name.clone())
        }
    }

    fn resolve_args(expr: &TypeExpr, roots: &RootTypes) -> Vec<Type> {
        expr.args
            .iter()
            .map(|arg| Type::from_annotation(arg, roots))
            .collect()
    }

    /// Whether a value of type `other` is acceptable where `self` is
    /// expected. Ints coerce to floats; a generic written without arguments
    /// accepts any parameterization of the same base.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Float, Type::Int) => true,
            (
                Type::Generic { base, args },
                Type::Generic {
                    base: other_base,
                    args: other_args,
                },
            ) => {
                if base != other_base {
                    return false;
                }
                if args.is_empty() || other_args.is_empty() {
                    return true;
                }
                args.len() == other_args.len()
                    && args
                        .iter()
                        .zip(other_args.iter())
                        .all(|(a, b)| a.accepts(b))
            }
            (
                Type::Function { params, ret },
                Type::Function {
                    params: other_params,
                    ret: other_ret,
                },
            ) => {
                params.len() == other_params.len()
                    && params
                        .iter()
                        .zip(other_params.iter())
                        .all(|(a, b)| a.accepts(b))
                    && ret.accepts(other_ret)
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "string"),
            Type::Null => write!(f, "null"),
            Type::Unknown => write!(f, "any"),
            Type::Generic { base, args } => {
                write!(f, "{base}")?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (idx, arg) in args.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Class(name) => write!(f, "{name}"),
            Type::Function { params, ret } => {
                write!(f, "fn(")?;
                for (idx, param) in params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, "): {ret}")
            }
        }
    }
}
