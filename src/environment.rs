use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{exception::Exception, types::Type, value::Value};

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// A lexical scope: name-to-binding table plus a non-owning back-reference
/// to the enclosing scope. Chains are acyclic by construction; a scope only
/// outlives its call frame when captured by a closure.
#[derive(Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Binding>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: None,
            bindings: IndexMap::new(),
        }))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Unconditional binding used for builtins, parameters, and loop
    /// variables. Does not participate in redeclaration checks.
    pub fn define(&mut self, name: String, value: Value, declared: Option<Type>) {
        self.bindings.insert(name, Binding { value, declared });
    }

    /// User-level declaration: raises `RedeclarationError` when the name
    /// already exists in this scope, and records the declared type for later
    /// assignment checks.
    pub fn declare(
        &mut self,
        name: &str,
        value: Value,
        declared: Option<Type>,
    ) -> Result<(), Exception> {
        if self.bindings.contains_key(name) {
            return Err(Exception::redeclaration(name));
        }
        if let Some(expected) = &declared {
            let actual = value.runtime_type();
            if !expected.accepts(&actual) {
                return Err(Exception::type_error(format!(
                    "cannot initialize `{name}`: expected {expected}, found {actual}"
                )));
            }
        }
        self.bindings.insert(
            name.to_string(),
            Binding { value, declared },
        );
        Ok(())
    }

    /// Assignment walks outward and mutates the nearest declaring scope, or
    /// raises `NameError` when the name is undeclared anywhere.
    pub fn assign(env: &EnvironmentRef, name: &str, value: Value) -> Result<(), Exception> {
        if env.borrow().bindings.contains_key(name) {
            let mut env_mut = env.borrow_mut();
            let binding = env_mut
                .bindings
                .get_mut(name)
                .ok_or_else(|| Exception::name_error(format!("undefined variable `{name}`")))?;
            if let Some(expected) = &binding.declared {
                let actual = value.runtime_type();
                if !expected.accepts(&actual) {
                    return Err(Exception::type_error(format!(
                        "cannot assign to `{name}`: expected {expected}, found {actual}"
                    )));
                }
            }
            binding.value = value;
            return Ok(());
        }
        if let Some(parent) = env.borrow().parent.clone() {
            return Environment::assign(&parent, name, value);
        }
        Err(Exception::name_error(format!(
            "undefined variable `{name}`"
        )))
    }

    /// Owned copy of this scope's direct bindings, used when a module
    /// overlay's top-level names become the module's exports.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.bindings
            .iter()
            .map(|(name, binding)| (name.clone(), binding.value.clone()))
            .collect()
    }

    pub fn get(env: &EnvironmentRef, name: &str) -> Result<Value, Exception> {
        if let Some(binding) = env.borrow().bindings.get(name) {
            return Ok(binding.value.clone());
        }
        if let Some(parent) = env.borrow().parent.clone() {
            return Environment::get(&parent, name);
        }
        Err(Exception::name_error(format!(
            "undefined variable `{name}`"
        )))
    }
}

#[derive(Clone)]
pub struct Binding {
    pub value: Value,
    pub declared: Option<Type>,
}
