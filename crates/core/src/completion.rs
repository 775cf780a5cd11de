//! The one-shot callback handed to producers.

use std::fmt;

type Deliver<T, E> = Box<dyn FnOnce(Option<Result<T, E>>) + Send>;

/// Completion callback for a unit of asynchronous work.
///
/// Consuming methods make a second delivery impossible. Dropping the
/// completion without calling any of them delivers `None` instead, so a
/// waiter is always released once the producer lets go of it.
pub struct Completion<T, E> {
    deliver: Option<Deliver<T, E>>,
}

impl<T, E> Completion<T, E> {
    /// Build a completion around the function that receives the outcome.
    pub fn new<D>(deliver: D) -> Self
    where
        D: FnOnce(Option<Result<T, E>>) + Send + 'static,
    {
        Self {
            deliver: Some(Box::new(deliver)),
        }
    }

    /// Deliver the outcome.
    pub fn complete(mut self, result: Result<T, E>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Some(result));
        }
    }

    /// Deliver a success.
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// Deliver a failure.
    pub fn fail(self, error: E) {
        self.complete(Err(error));
    }
}

impl<T, E> Drop for Completion<T, E> {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            tracing::debug!("completion dropped without a result");
            deliver(None);
        }
    }
}

impl<T, E> fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.deliver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording() -> (Arc<Mutex<Vec<Option<Result<i32, String>>>>>, Completion<i32, String>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let completion = Completion::new(move |outcome| sink.lock().unwrap().push(outcome));
        (seen, completion)
    }

    #[test]
    fn test_succeed_delivers_once() {
        let (seen, completion) = recording();
        completion.succeed(3);
        assert_eq!(*seen.lock().unwrap(), vec![Some(Ok(3))]);
    }

    #[test]
    fn test_fail_delivers_error() {
        let (seen, completion) = recording();
        completion.fail("bad".to_string());
        assert_eq!(*seen.lock().unwrap(), vec![Some(Err("bad".to_string()))]);
    }

    #[test]
    fn test_drop_delivers_none() {
        let (seen, completion) = recording();
        drop(completion);
        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }
}
