//! Injected connection behaviors

use crate::errors::BoxError;
use std::sync::Arc;

pub(crate) type CreateFn<C> = Arc<dyn Fn() -> Result<C, BoxError> + Send + Sync>;
pub(crate) type DestroyFn<C> = Arc<dyn Fn(C) -> Result<(), BoxError> + Send + Sync>;
pub(crate) type ProbeFn<C> = Arc<dyn Fn(&C) -> Result<(), BoxError> + Send + Sync>;

/// Knows how to dial, tear down and health-check one kind of connection
///
/// The pool never inspects a connection itself; everything it needs to know
/// goes through these three calls. Implement it once per connection type and
/// hand it to [`PoolConfiguration::with_connection_factory`].
///
/// # Examples
///
/// ```
/// use grpc_connpool::{BoxError, ConnectionFactory};
///
/// struct Loopback;
///
/// impl ConnectionFactory for Loopback {
///     type Connection = String;
///
///     fn create(&self) -> Result<String, BoxError> {
///         Ok("127.0.0.1:50051".to_string())
///     }
///
///     fn destroy(&self, _conn: String) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
/// ```
///
/// [`PoolConfiguration::with_connection_factory`]: crate::PoolConfiguration::with_connection_factory
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Establish a new connection
    fn create(&self) -> Result<Self::Connection, BoxError>;

    /// Tear a connection down for good
    fn destroy(&self, conn: Self::Connection) -> Result<(), BoxError>;

    /// Whether [`probe`](Self::probe) does anything; `false` disables liveness checks
    fn supports_probe(&self) -> bool {
        false
    }

    /// Check that an idle connection is still usable
    fn probe(&self, _conn: &Self::Connection) -> Result<(), BoxError> {
        Ok(())
    }
}

pub(crate) fn split<F>(factory: F) -> (CreateFn<F::Connection>, DestroyFn<F::Connection>, Option<ProbeFn<F::Connection>>)
where
    F: ConnectionFactory,
{
    let factory = Arc::new(factory);

    let create: CreateFn<F::Connection> = {
        let factory = Arc::clone(&factory);
        Arc::new(move || factory.create())
    };
    let destroy: DestroyFn<F::Connection> = {
        let factory = Arc::clone(&factory);
        Arc::new(move |conn| factory.destroy(conn))
    };
    let probe: Option<ProbeFn<F::Connection>> = if factory.supports_probe() {
        Some(Arc::new(move |conn: &F::Connection| factory.probe(conn)))
    } else {
        None
    };

    (create, destroy, probe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl ConnectionFactory for Arc<Counting> {
        type Connection = usize;

        fn create(&self) -> Result<usize, BoxError> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        fn destroy(&self, _conn: usize) -> Result<(), BoxError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Probing;

    impl ConnectionFactory for Probing {
        type Connection = bool;

        fn create(&self) -> Result<bool, BoxError> {
            Ok(true)
        }

        fn destroy(&self, _conn: bool) -> Result<(), BoxError> {
            Ok(())
        }

        fn supports_probe(&self) -> bool {
            true
        }

        fn probe(&self, conn: &bool) -> Result<(), BoxError> {
            if *conn { Ok(()) } else { Err("transport is broken".into()) }
        }
    }

    #[test]
    fn test_split_routes_calls_to_factory() {
        let counting = Arc::new(Counting::default());
        let (create, destroy, probe) = split(Arc::clone(&counting));

        assert_eq!(create().unwrap(), 0);
        assert_eq!(create().unwrap(), 1);
        destroy(0).unwrap();

        assert!(probe.is_none());
        assert_eq!(counting.created.load(Ordering::SeqCst), 2);
        assert_eq!(counting.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_split_keeps_probe_when_supported() {
        let (_, _, probe) = split(Probing);
        let probe = probe.expect("probe should be present");

        assert!(probe(&true).is_ok());
        assert!(probe(&false).is_err());
    }
}
