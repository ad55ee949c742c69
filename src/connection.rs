//! Idle connection bookkeeping

use crossbeam::queue::ArrayQueue;
use std::time::{Duration, Instant};

/// A connection parked in the pool together with the instant it was returned
///
/// Expiry is measured from the last return, not from creation: a handle that
/// keeps being used never expires.
#[derive(Debug)]
pub(crate) struct IdleConnection<C> {
    pub conn: C,
    pub returned_at: Instant,
}

impl<C> IdleConnection<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            returned_at: Instant::now(),
        }
    }

    /// A zero `idle_timeout` disables expiry.
    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.is_expired_at(idle_timeout, Instant::now())
    }

    pub fn is_expired_at(&self, idle_timeout: Duration, now: Instant) -> bool {
        if idle_timeout.is_zero() {
            return false;
        }
        now.saturating_duration_since(self.returned_at) >= idle_timeout
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

/// Bounded lock-free buffer of idle connections
///
/// Push and pop are safe without the pool's state lock. A capacity of zero is
/// allowed and rejects every push.
pub(crate) struct IdleBuffer<C> {
    queue: ArrayQueue<IdleConnection<C>>,
    capacity: usize,
}

impl<C> IdleBuffer<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            // ArrayQueue panics on a zero capacity
            queue: ArrayQueue::new(capacity.max(1)),
            capacity,
        }
    }

    pub fn push(&self, conn: IdleConnection<C>) -> Result<(), IdleConnection<C>> {
        if self.capacity == 0 {
            return Err(conn);
        }
        self.queue.push(conn)
    }

    pub fn pop(&self) -> Option<IdleConnection<C>> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_rejects_past_capacity() {
        let buffer = IdleBuffer::new(2);
        assert!(buffer.push(IdleConnection::new(1)).is_ok());
        assert!(buffer.push(IdleConnection::new(2)).is_ok());

        let rejected = buffer.push(IdleConnection::new(3));
        assert!(matches!(rejected, Err(idle) if idle.conn == 3));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pop().map(IdleConnection::into_inner), Some(1));
    }

    #[test]
    fn test_zero_capacity_buffer_holds_nothing() {
        let buffer = IdleBuffer::new(0);
        assert!(buffer.push(IdleConnection::new("conn")).is_err());
        assert!(buffer.is_empty());
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let idle = IdleConnection::new(1);
        let later = idle.returned_at + Duration::from_secs(86_400);
        assert!(!idle.is_expired_at(Duration::ZERO, later));
    }

    #[test]
    fn test_expires_exactly_at_timeout() {
        let idle = IdleConnection::new("conn");
        let timeout = Duration::from_millis(50);

        assert!(!idle.is_expired_at(timeout, idle.returned_at + Duration::from_millis(49)));
        assert!(idle.is_expired_at(timeout, idle.returned_at + timeout));
    }

    #[test]
    fn test_clock_before_return_is_not_expired() {
        let idle = IdleConnection::new(7);
        let earlier = idle.returned_at.checked_sub(Duration::from_millis(5));
        if let Some(earlier) = earlier {
            assert!(!idle.is_expired_at(Duration::from_millis(1), earlier));
        }
        assert_eq!(idle.into_inner(), 7);
    }
}
