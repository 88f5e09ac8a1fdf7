use std::panic::{self, AssertUnwindSafe, UnwindSafe};

/// An error detected by the engine while a transaction was settling.
///
/// Errors are raised by unwinding with the `Error` itself as the panic
/// payload, and are intercepted at the [`atomically`](crate::atomically)
/// boundary after the scope has been rolled back. Use
/// [`try_atomically`](crate::try_atomically) (or [`Error::catch`]) to
/// receive them as a `Result`; panics carrying any other payload resume
/// unwinding untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Two or more listeners mutually invalidated each other's reads
    /// within a single pass: no recalculation order can satisfy both.
    /// Carries the labels of the participating listeners.
    Circularity { participants: Vec<String> },

    /// A write was attempted during the read-only phase, when only
    /// observers run and all state is settled.
    ReadOnly { label: String },
}

impl Error {
    /// Aborts the enclosing transaction by unwinding with `self` as the
    /// panic payload.
    pub(crate) fn throw(self) -> ! {
        tracing::debug!("throwing error: {:?}", self);
        panic::resume_unwind(Box::new(self))
    }

    /// Runs `f`, converting an unwind carrying an [`Error`] payload into
    /// `Err`. Any other panic resumes unwinding.
    pub fn catch<F, T>(f: F) -> Result<T, Error>
    where
        F: FnOnce() -> T + UnwindSafe,
    {
        match panic::catch_unwind(f) {
            Ok(t) => Ok(t),
            Err(payload) => match payload.downcast::<Error>() {
                Ok(error) => Err(*error),
                Err(payload) => panic::resume_unwind(payload),
            },
        }
    }

    /// Like [`Error::catch`], without the unwind-safety obligation; used
    /// internally where the engine re-establishes its own invariants
    /// during rollback.
    pub(crate) fn catch_unchecked<F, T>(f: F) -> Result<T, Error>
    where
        F: FnOnce() -> T,
    {
        Self::catch(AssertUnwindSafe(f))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Circularity { participants } => {
                write!(fmt, "circular dependency among listeners: ")?;
                for (i, label) in participants.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, ", ")?;
                    }
                    write!(fmt, "{label}")?;
                }
                Ok(())
            }
            Error::ReadOnly { label } => {
                write!(fmt, "{label}: cannot change state during the read-only phase")
            }
        }
    }
}

impl std::error::Error for Error {}
