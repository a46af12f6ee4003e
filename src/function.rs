//! Callable values that can be queued, wrapped and decorated.
//!
//! A [`Function`] is a reference-counted closure compared by identity: two
//! handles are equal only when they point to the same closure. The scheduler
//! relies on this to recognise repeated invocations of the same target when
//! deduplicating pending calls.

use std::{fmt, rc::Rc};

use crate::value::{Arg, Object};

/// Error produced by a failing call body.
pub type CallError = Box<dyn std::error::Error + 'static>;

type Body = dyn Fn(&Invocation<'_>) -> Result<(), CallError>;

/// Borrowed view of a single invocation: the receiver (if any) and the
/// captured arguments, in call order.
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    receiver: Option<&'a Rc<Object>>,
    args: &'a [Arg],
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(receiver: Option<&'a Rc<Object>>, args: &'a [Arg]) -> Self {
        Self { receiver, args }
    }

    /// The object the function was invoked on, if any.
    #[must_use]
    pub fn receiver(&self) -> Option<&'a Rc<Object>> {
        self.receiver
    }

    /// All arguments of this invocation.
    #[must_use]
    pub fn args(&self) -> &'a [Arg] {
        self.args
    }

    /// Argument at `index`, or `None` when fewer arguments were passed.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&'a Arg> {
        self.args.get(index)
    }

    /// Reads a field of the receiver.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Arg> {
        self.receiver.and_then(|r| r.get(name))
    }
}

/// A callable with identity semantics.
///
/// Cloning a `Function` is cheap and yields a handle to the same closure, so
/// clones compare equal. Two separately constructed functions never compare
/// equal, even when their bodies are identical.
#[derive(Clone)]
pub struct Function {
    body: Rc<Body>,
}

impl Function {
    /// Creates a function from an infallible body.
    pub fn new(body: impl Fn(&Invocation<'_>) + 'static) -> Self {
        Self {
            body: Rc::new(move |inv: &Invocation<'_>| {
                body(inv);
                Ok(())
            }),
        }
    }

    /// Creates a function whose body may fail.
    ///
    /// Failures surface from [`call`](Self::call) when invoked directly, or
    /// are reported by the scheduler when the call is executed during a drain.
    pub fn try_new<E>(body: impl Fn(&Invocation<'_>) -> Result<(), E> + 'static) -> Self
    where
        E: Into<CallError>,
    {
        Self {
            body: Rc::new(move |inv: &Invocation<'_>| body(inv).map_err(Into::into)),
        }
    }

    /// Invokes the function without a receiver.
    ///
    /// # Errors
    ///
    /// Returns whatever error the body produced.
    pub fn call(&self, args: impl Into<Vec<Arg>>) -> Result<(), CallError> {
        let args = args.into();
        self.invoke(None, &args)
    }

    /// Invokes the function with `receiver` bound as its receiver.
    ///
    /// # Errors
    ///
    /// Returns whatever error the body produced.
    pub fn call_on(&self, receiver: &Rc<Object>, args: impl Into<Vec<Arg>>) -> Result<(), CallError> {
        let args = args.into();
        self.invoke(Some(receiver), &args)
    }

    pub(crate) fn invoke(&self, receiver: Option<&Rc<Object>>, args: &[Arg]) -> Result<(), CallError> {
        (self.body)(&Invocation::new(receiver, args))
    }

    /// Returns `true` when both handles refer to the same closure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Function {}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:p})", Rc::as_ptr(&self.body))
    }
}
