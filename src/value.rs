use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{Param, Stmt},
    environment::EnvironmentRef,
    exception::Exception,
    scheduler::TaskHandle,
    types::Type,
};

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::Str(value.into()))
    }

    pub fn list(element: Type, items: Vec<Value>) -> Self {
        Self::new(ValueKind::List(ListValue {
            element,
            items: Rc::new(RefCell::new(items)),
        }))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Self::new(ValueKind::Map(MapValue {
            key,
            value,
            entries: Rc::new(RefCell::new(IndexMap::new())),
        }))
    }

    pub fn set(element: Type) -> Self {
        Self::new(ValueKind::Set(SetValue {
            element,
            items: Rc::new(RefCell::new(IndexSet::new())),
        }))
    }

    pub fn exception(exc: Exception) -> Self {
        Self::new(ValueKind::Exception(exc))
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::Null => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Float(f) => *f != 0.0,
            ValueKind::Str(s) => !s.is_empty(),
            ValueKind::List(list) => !list.items.borrow().is_empty(),
            ValueKind::Map(map) => !map.entries.borrow().is_empty(),
            ValueKind::Set(set) => !set.items.borrow().is_empty(),
            ValueKind::Instance(_)
            | ValueKind::Function(_)
            | ValueKind::NativeFunction(_)
            | ValueKind::Module(_)
            | ValueKind::Task(_)
            | ValueKind::Exception(_) => true,
        }
    }

    pub fn type_name(&self) -> String {
        match &*self.0 {
            ValueKind::Null => "null".into(),
            ValueKind::Bool(_) => "bool".into(),
            ValueKind::Int(_) => "int".into(),
            ValueKind::Float(_) => "float".into(),
            ValueKind::Str(_) => "string".into(),
            ValueKind::List(_) => "List".into(),
            ValueKind::Map(_) => "Map".into(),
            ValueKind::Set(_) => "Set".into(),
            ValueKind::Instance(instance) => instance.borrow().class.clone(),
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => "function".into(),
            ValueKind::Module(module) => format!("module {}", module.name),
            ValueKind::Task(_) => "Task".into(),
            ValueKind::Exception(exc) => exc.kind.clone(),
        }
    }

    /// The runtime type used for declared-type enforcement on bindings and
    /// collection mutations.
    pub fn runtime_type(&self) -> Type {
        match &*self.0 {
            ValueKind::Null => Type::Null,
            ValueKind::Bool(_) => Type::Bool,
            ValueKind::Int(_) => Type::Int,
            ValueKind::Float(_) => Type::Float,
            ValueKind::Str(_) => Type::Str,
            ValueKind::List(list) => Type::list(list.element.clone()),
            ValueKind::Map(map) => Type::map(map.key.clone(), map.value.clone()),
            ValueKind::Set(set) => Type::set(set.element.clone()),
            ValueKind::Instance(instance) => Type::Class(instance.borrow().class.clone()),
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => Type::Unknown,
            ValueKind::Module(_) => Type::Unknown,
            ValueKind::Task(_) => Type::task(Type::Unknown),
            ValueKind::Exception(_) => Type::Class("Exception".into()),
        }
    }

    pub fn equals(&self, other: &Value) -> bool {
        match (&*self.0, &*other.0) {
            (ValueKind::Null, ValueKind::Null) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Float(a), ValueKind::Float(b)) => (*a - *b).abs() < f64::EPSILON,
            (ValueKind::Int(a), ValueKind::Float(b)) | (ValueKind::Float(b), ValueKind::Int(a)) => {
                (*a as f64 - *b).abs() < f64::EPSILON
            }
            (ValueKind::Str(a), ValueKind::Str(b)) => a == b,
            (ValueKind::List(a), ValueKind::List(b)) => {
                let a = a.items.borrow();
                let b = b.items.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(l, r)| l.equals(r))
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                let a = a.entries.borrow();
                let b = b.entries.borrow();
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).map(|rhs| value.equals(rhs)).unwrap_or(false))
            }
            (ValueKind::Set(a), ValueKind::Set(b)) => {
                let a = a.items.borrow();
                let b = b.items.borrow();
                a.len() == b.len() && a.iter().all(|key| b.contains(key))
            }
            (ValueKind::Instance(a), ValueKind::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n}"),
            ValueKind::Str(s) => write!(f, "{s}"),
            ValueKind::List(list) => {
                write!(f, "[")?;
                for (idx, item) in list.items.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ValueKind::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.entries.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            ValueKind::Set(set) => {
                write!(f, "{{")?;
                for (idx, item) in set.items.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
            ValueKind::Instance(instance) => {
                let instance = instance.borrow();
                write!(f, "<{} instance>", instance.class)
            }
            ValueKind::Function(fun) => write!(
                f,
                "<fn {}>",
                fun.name.clone().unwrap_or_else(|| "anonymous".into())
            ),
            ValueKind::NativeFunction(fun) => write!(f, "<native fn {}>", fun.name),
            ValueKind::Module(module) => write!(f, "<module {}>", module.name),
            ValueKind::Task(task) => write!(f, "<task #{}>", task.id),
            ValueKind::Exception(exc) => write!(f, "<{}: {}>", exc.kind, exc.message),
        }
    }
}

pub enum ValueKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListValue),
    Map(MapValue),
    Set(SetValue),
    Instance(InstanceRef),
    Function(UserFunction),
    NativeFunction(NativeFunction),
    Module(ModuleValue),
    Task(TaskHandle),
    Exception(Exception),
}

/// A typed, shared-by-reference list. Cloning the value shares the storage,
/// so two async tasks holding the same list observe each other's mutations.
#[derive(Clone)]
pub struct ListValue {
    pub element: Type,
    pub items: Rc<RefCell<Vec<Value>>>,
}

impl ListValue {
    /// Declared-element-type check applied on every mutating insert.
    pub fn admit(&self, value: &Value) -> Result<(), Exception> {
        let actual = value.runtime_type();
        if self.element.accepts(&actual) {
            Ok(())
        } else {
            Err(Exception::type_error(format!(
                "List<{}> cannot hold a value of type {actual}",
                self.element
            )))
        }
    }
}

#[derive(Clone)]
pub struct MapValue {
    pub key: Type,
    pub value: Type,
    pub entries: Rc<RefCell<IndexMap<MapKey, Value>>>,
}

impl MapValue {
    pub fn admit(&self, key: &Value, value: &Value) -> Result<(), Exception> {
        let key_type = key.runtime_type();
        if !self.key.accepts(&key_type) {
            return Err(Exception::type_error(format!(
                "Map<{}, {}> cannot use a key of type {key_type}",
                self.key, self.value
            )));
        }
        let value_type = value.runtime_type();
        if !self.value.accepts(&value_type) {
            return Err(Exception::type_error(format!(
                "Map<{}, {}> cannot hold a value of type {value_type}",
                self.key, self.value
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct SetValue {
    pub element: Type,
    pub items: Rc<RefCell<IndexSet<MapKey>>>,
}

impl SetValue {
    pub fn admit(&self, value: &Value) -> Result<(), Exception> {
        let actual = value.runtime_type();
        if self.element.accepts(&actual) {
            Ok(())
        } else {
            Err(Exception::type_error(format!(
                "Set<{}> cannot hold a value of type {actual}",
                self.element
            )))
        }
    }
}

/// Hashable key for maps and sets. Only scalar keys are permitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl MapKey {
    pub fn from_value(value: &Value) -> Result<MapKey, Exception> {
        match &*value.0 {
            ValueKind::Int(n) => Ok(MapKey::Int(*n)),
            ValueKind::Str(s) => Ok(MapKey::Str(s.clone())),
            ValueKind::Bool(b) => Ok(MapKey::Bool(*b)),
            _ => Err(Exception::type_error(format!(
                "map and set keys must be int, string, or bool, found {}",
                value.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Int(n) => Value::int(*n),
            MapKey::Str(s) => Value::string(s.clone()),
            MapKey::Bool(b) => Value::bool(*b),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Int(n) => write!(f, "{n}"),
            MapKey::Str(s) => write!(f, "{s}"),
            MapKey::Bool(b) => write!(f, "{b}"),
        }
    }
}

pub type InstanceRef = Rc<RefCell<Instance>>;

pub struct Instance {
    pub class: String,
    pub fields: IndexMap<String, Value>,
}

#[derive(Clone)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub env: EnvironmentRef,
    pub is_async: bool,
    /// Bound receiver for methods.
    pub this: Option<InstanceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Pure,
    Io,
    Mutates,
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub params: Vec<Type>,
    pub ret: Type,
    pub effect: Effect,
    pub variadic: bool,
    pub callback: fn(&[Value]) -> Result<Value, Exception>,
}

impl NativeFunction {
    pub fn call(&self, args: &[Value]) -> Result<Value, Exception> {
        if !self.variadic && args.len() != self.params.len() {
            return Err(Exception::type_error(format!(
                "`{}` expected {} arguments but received {}",
                self.name,
                self.params.len(),
                args.len()
            )));
        }
        (self.callback)(args)
    }
}

#[derive(Clone)]
pub struct ModuleValue {
    pub name: String,
    pub exports: IndexMap<String, Value>,
}
