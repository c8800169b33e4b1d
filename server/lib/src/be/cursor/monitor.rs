//! Closure monitors track whether a cursor has been closed, and why.

use std::time::Instant;

use crate::prelude::*;

pub trait ClosureMonitor: Send {
    /// Fail if the cursor is closed. This is called on every cursor advance.
    fn check_not_closed(&mut self) -> Result<(), OperationError>;

    fn is_closed(&self) -> bool;

    /// Close with an optional cause that later checks report.
    fn close(&mut self, cause: Option<OperationError>);

    fn cause(&self) -> Option<&OperationError>;
}

#[derive(Debug, Default)]
pub struct DefaultClosureMonitor {
    closed: bool,
    cause: Option<OperationError>,
}

impl ClosureMonitor for DefaultClosureMonitor {
    fn check_not_closed(&mut self) -> Result<(), OperationError> {
        if self.closed {
            Err(self.cause.clone().unwrap_or(OperationError::CursorClosed))
        } else {
            Ok(())
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self, cause: Option<OperationError>) {
        // The first cause wins.
        if !self.closed {
            self.closed = true;
            self.cause = cause;
        }
    }

    fn cause(&self) -> Option<&OperationError> {
        self.cause.as_ref()
    }
}

/// Closes the cursor with `TimeLimitExceeded` once the limit has elapsed. The limit is
/// only noticed when the cursor is advanced or polled, the monitor never interrupts.
#[derive(Debug)]
pub struct TimeLimitMonitor {
    started: Instant,
    limit: Duration,
    inner: DefaultClosureMonitor,
}

impl TimeLimitMonitor {
    pub fn new(limit: Duration) -> Self {
        TimeLimitMonitor {
            started: Instant::now(),
            limit,
            inner: DefaultClosureMonitor::default(),
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() > self.limit
    }
}

impl ClosureMonitor for TimeLimitMonitor {
    fn check_not_closed(&mut self) -> Result<(), OperationError> {
        if !self.inner.is_closed() && self.expired() {
            request_warn!(limit = ?self.limit, "search time limit exceeded");
            self.inner.close(Some(OperationError::TimeLimitExceeded));
        }
        self.inner.check_not_closed()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed() || self.expired()
    }

    fn close(&mut self, cause: Option<OperationError>) {
        self.inner.close(cause)
    }

    fn cause(&self) -> Option<&OperationError> {
        self.inner.cause()
    }
}

#[cfg(test)]
mod tests {
    use super::{ClosureMonitor, DefaultClosureMonitor, TimeLimitMonitor};
    use crate::prelude::*;

    #[test]
    fn test_default_monitor() {
        let mut m = DefaultClosureMonitor::default();
        assert!(m.check_not_closed().is_ok());
        m.close(None);
        m.close(Some(OperationError::SizeLimitExceeded));
        assert!(m.is_closed());
        assert_eq!(m.check_not_closed(), Err(OperationError::CursorClosed));
    }

    #[test]
    fn test_time_limit_monitor() {
        let mut m = TimeLimitMonitor::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(m.is_closed());
        assert_eq!(m.check_not_closed(), Err(OperationError::TimeLimitExceeded));
        assert_eq!(m.cause(), Some(&OperationError::TimeLimitExceeded));

        let mut m = TimeLimitMonitor::new(Duration::from_secs(60));
        assert!(m.check_not_closed().is_ok());
    }
}
