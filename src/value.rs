//! Dynamically typed argument values and receiver objects.
//!
//! Deferred calls capture their arguments as an ordered [`Args`] sequence so
//! that calls of any arity share one record type. [`Arg`] equality is strict:
//! scalars and strings compare by value, while functions, objects and opaque
//! values compare by identity.

use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
};

use crate::{Error, function::CallError, function::Function};

/// Captured argument list of a call.
pub type Args = Vec<Arg>;

/// Builds an [`Args`] list, converting each element with [`Arg::from`].
///
/// ```
/// # use callstack::{args, Arg};
/// let a = args![1, "two", true];
/// assert_eq!(a, vec![Arg::Int(1), Arg::from("two"), Arg::Bool(true)]);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($x:expr),+ $(,)?) => {
        <$crate::Args>::from([$($crate::Arg::from($x)),+])
    };
}

/// A single argument value.
#[derive(Clone, Default)]
pub enum Arg {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Func(Function),
    Obj(Rc<Object>),
    Opaque(Rc<dyn Any>),
}

impl Arg {
    /// Wraps an arbitrary value; it will compare equal only to its own clones.
    pub fn opaque<T: Any>(value: T) -> Self {
        Arg::Opaque(Rc::new(value))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Arg::Float(x) => Some(*x),
            Arg::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Arg::Func(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Arg::Obj(o) => Some(o),
            _ => None,
        }
    }

    /// Downcasts an opaque value.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Arg::Opaque(v) => v.downcast_ref(),
            _ => None,
        }
    }
}

impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Unit, Arg::Unit) => true,
            (Arg::Bool(a), Arg::Bool(b)) => a == b,
            (Arg::Int(a), Arg::Int(b)) => a == b,
            (Arg::Float(a), Arg::Float(b)) => a == b,
            (Arg::Str(a), Arg::Str(b)) => a == b,
            (Arg::Func(a), Arg::Func(b)) => a.ptr_eq(b),
            (Arg::Obj(a), Arg::Obj(b)) => Rc::ptr_eq(a, b),
            (Arg::Opaque(a), Arg::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Unit => f.write_str("Unit"),
            Arg::Bool(b) => write!(f, "Bool({b})"),
            Arg::Int(i) => write!(f, "Int({i})"),
            Arg::Float(x) => write!(f, "Float({x})"),
            Arg::Str(s) => write!(f, "Str({s:?})"),
            Arg::Func(func) => write!(f, "Func({func:?})"),
            Arg::Obj(o) => write!(f, "Obj({:p})", Rc::as_ptr(o)),
            Arg::Opaque(v) => write!(f, "Opaque({:p})", Rc::as_ptr(v)),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Unit => Ok(()),
            Arg::Bool(b) => write!(f, "{b}"),
            Arg::Int(i) => write!(f, "{i}"),
            Arg::Float(x) => write!(f, "{x}"),
            Arg::Str(s) => f.write_str(s),
            Arg::Func(_) => f.write_str("[function]"),
            Arg::Obj(_) => f.write_str("[object]"),
            Arg::Opaque(_) => f.write_str("[opaque]"),
        }
    }
}

impl From<()> for Arg {
    fn from((): ()) -> Self {
        Arg::Unit
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(value: $t) -> Self {
                    Arg::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, u8, i16, u16, i32, u32, i64);

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(Rc::from(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(Rc::from(value))
    }
}

impl From<Function> for Arg {
    fn from(value: Function) -> Self {
        Arg::Func(value)
    }
}

impl From<Rc<Object>> for Arg {
    fn from(value: Rc<Object>) -> Self {
        Arg::Obj(value)
    }
}

/// A receiver with named, interior-mutable fields.
///
/// Methods are fields holding [`Arg::Func`]. Replacing a field in place is
/// how [`CallStack::wrap_method`](crate::CallStack::wrap_method) and
/// [`CallStack::decorate_method`](crate::CallStack::decorate_method) reroute
/// every later call made through the object.
#[derive(Default)]
pub struct Object {
    fields: RefCell<HashMap<String, Arg>>,
}

impl Object {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Builder-style field initialisation, used before the object is shared.
    #[must_use]
    pub fn with(self: Rc<Self>, name: &str, value: impl Into<Arg>) -> Rc<Self> {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arg> {
        self.fields.borrow().get(name).cloned()
    }

    /// Sets a field, returning the previous value.
    pub fn set(&self, name: &str, value: impl Into<Arg>) -> Option<Arg> {
        self.fields.borrow_mut().insert(name.to_owned(), value.into())
    }

    /// Returns the function stored under `name`, if that field is callable.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<Function> {
        self.get(name).and_then(|v| v.as_function().cloned())
    }

    /// Looks up `name` like [`method`](Self::method) but reports a missing or
    /// non-callable field as an error.
    pub(crate) fn require_method(&self, name: &str) -> Result<Function, Error> {
        self.method(name).ok_or_else(|| Error::MethodNotFound {
            name: name.to_owned(),
        })
    }

    /// Invokes the current method `name` with this object as receiver.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::MethodNotFound`] when no callable field exists,
    /// otherwise returns whatever the method body produced.
    pub fn call(self: &Rc<Self>, name: &str, args: impl Into<Args>) -> Result<(), CallError> {
        let method = self.require_method(name)?;
        method.call_on(self, args)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields.borrow();
        let mut names: Vec<_> = fields.keys().collect();
        names.sort();
        f.debug_struct("Object").field("fields", &names).finish()
    }
}
