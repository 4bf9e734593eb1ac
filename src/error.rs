// Error kinds for the engine
//
// Allocation failures are recoverable and handed back to the caller.
// Assertion failures carry a severity tier; which tiers are compiled
// in is a cargo feature choice. Critical checks cannot be disabled.
// Fault is what a failed coroutine carries up its chain.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// checks that may cost O(n), `assertions-full`
    Full,
    /// cheap precondition checks, `assertions-o1`
    O1,
    /// always compiled in
    Critical,
}

impl Severity {
    pub const fn enabled(self) -> bool {
        match self {
            Severity::Critical => true,
            Severity::O1 => cfg!(feature = "assertions-o1"),
            Severity::Full => cfg!(feature = "assertions-full"),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Full => write!(f, "full"),
            Severity::O1 => write!(f, "o1"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Precondition that was broken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    ResumeTerminated,
    NotResumable,
    DoubleRegistration,
    DeallocationOrder,
    ForeignRegion,
    FooterCorrupt,
    UnsupportedAlignment,
    DoubleWrite,
    ValueConsumed,
    NotJoinable,
    SchedulerFull,
    QueueOrder,
}

impl Violation {
    pub const fn severity(self) -> Severity {
        match self {
            Violation::ResumeTerminated
            | Violation::DeallocationOrder
            | Violation::ForeignRegion
            | Violation::UnsupportedAlignment
            | Violation::DoubleWrite
            | Violation::DoubleRegistration
            | Violation::ValueConsumed
            | Violation::NotJoinable
            | Violation::SchedulerFull => Severity::Critical,
            Violation::NotResumable => Severity::O1,
            Violation::FooterCorrupt | Violation::QueueOrder => Severity::Full,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Violation::ResumeTerminated => "resume on a terminated chain",
            Violation::NotResumable => "resume while the leaf is still waiting",
            Violation::DoubleRegistration => "second suspension registered in one step",
            Violation::DeallocationOrder => "stack deallocation out of order",
            Violation::ForeignRegion => "region does not belong to this arena",
            Violation::FooterCorrupt => "allocation footer overwritten",
            Violation::UnsupportedAlignment => "alignment above arena alignment",
            Violation::DoubleWrite => "promise written twice",
            Violation::ValueConsumed => "future polled after its value was taken",
            Violation::NotJoinable => "join on a child that has not completed",
            Violation::SchedulerFull => "scheduler at capacity",
            Violation::QueueOrder => "priority queue out of order",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertionFailure {
    pub severity: Severity,
    pub violation: Violation,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.violation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationFailure {
    /// bytes (or slots) asked for
    pub requested: usize,
    pub capacity: usize,
    /// what was left when the request was refused
    pub available: usize,
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot allocate {} of {} ({} available)",
            self.requested, self.capacity, self.available
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Allocation(AllocationFailure),
    Assertion(AssertionFailure),
}

impl Error {
    /// Raise an assertion failure for `violation`. Logged at error level.
    pub fn assertion(violation: Violation) -> Self {
        let failure = AssertionFailure {
            severity: violation.severity(),
            violation,
        };
        log::error!("assertion failed: {}", failure);
        Error::Assertion(failure)
    }

    pub const fn severity(&self) -> Severity {
        match self {
            Error::Allocation(_) => Severity::Critical,
            Error::Assertion(failure) => failure.severity,
        }
    }
}

impl From<AllocationFailure> for Error {
    fn from(failure: AllocationFailure) -> Self {
        Error::Allocation(failure)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Allocation(failure) => write!(f, "allocation failure: {}", failure),
            Error::Assertion(failure) => write!(f, "assertion failure: {}", failure),
        }
    }
}

impl core::error::Error for Error {}

/// Failure carried up a suspension chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// the promise half was dropped before writing
    BrokenChannel,
    Allocation(AllocationFailure),
    Assertion(AssertionFailure),
    /// application-defined failure code
    Raised(u32),
}

impl From<Error> for Fault {
    fn from(err: Error) -> Self {
        match err {
            Error::Allocation(failure) => Fault::Allocation(failure),
            Error::Assertion(failure) => Fault::Assertion(failure),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::BrokenChannel => write!(f, "broken channel"),
            Fault::Allocation(failure) => write!(f, "allocation failure: {}", failure),
            Fault::Assertion(failure) => write!(f, "assertion failure: {}", failure),
            Fault::Raised(code) => write!(f, "raised {}", code),
        }
    }
}

/// Return an assertion failure from the enclosing fn when `$cond` is
/// false and the violation's tier is compiled in. The error is converted
/// with `Into`, so fns returning `Result<_, Fault>` work too.
macro_rules! ensure {
    ($cond:expr, $violation:expr) => {{
        let violation: $crate::error::Violation = $violation;
        if violation.severity().enabled() && !($cond) {
            return Err($crate::error::Error::assertion(violation).into());
        }
    }};
}

pub(crate) use ensure;
