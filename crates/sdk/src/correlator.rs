//! Matches indexed responses to callers waiting on them.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use kappa_rpc_types::{Error, MessageId, ResponseResult};
use pin_project::pin_project;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub(crate) struct Correlator {
    subscriptions: HashMap<MessageId, Vec<oneshot::Sender<ResponseResult>>>,
    closed: bool,
}

impl Correlator {
    /// Subscribes to the response of `request`. When `existing` is already
    /// known the future resolves right away.
    pub fn subscribe(&mut self, request: MessageId, existing: Option<&ResponseResult>) -> ResponseFuture {
        let (tx, rx) = oneshot::channel();
        match existing {
            Some(result) => {
                let _ = tx.send(result.clone());
            }
            None if self.closed => {}
            None => {
                self.prune();
                self.subscriptions.entry(request).or_default().push(tx);
            }
        }
        ResponseFuture { request, rx }
    }

    /// Delivers `result` to every live subscription of `request`.
    pub fn resolve(&mut self, request: &MessageId, result: &ResponseResult) -> usize {
        let Some(waiting) = self.subscriptions.remove(request) else {
            return 0;
        };
        waiting
            .into_iter()
            .filter_map(|tx| tx.send(result.clone()).ok())
            .count()
    }

    /// Forgets callers that stopped waiting, and requests nobody waits on.
    fn prune(&mut self) {
        self.subscriptions.retain(|_, waiting| {
            waiting.retain(|tx| !tx.is_closed());
            !waiting.is_empty()
        });
    }

    /// Drops every subscription. Their futures resolve with [`Error::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
        self.subscriptions.clear();
    }

    pub fn len(&self) -> usize {
        self.subscriptions.values().map(Vec::len).sum()
    }
}

/// Resolves once with the response to a request.
///
/// Dropping it cancels nothing but the wait: the request stays logged and may
/// still be executed and answered.
///
/// An untargeted request may be answered by several peers. A future waiting
/// while the answers arrive resolves with the first one indexed. A future
/// created once they are all indexed, including after a restart, resolves
/// with the answer carrying the lowest message id, which is the one every
/// peer keeps. Use a targeted call when one answer per request id matters.
#[must_use = "futures do nothing unless polled"]
#[pin_project]
#[derive(Debug)]
pub struct ResponseFuture {
    request: MessageId,
    #[pin]
    rx: oneshot::Receiver<ResponseResult>,
}

impl ResponseFuture {
    pub fn request_id(&self) -> MessageId {
        self.request
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        Poll::Ready(match ready!(this.rx.poll(cx)) {
            Ok(ResponseResult::Success(value)) => Ok(value),
            Ok(ResponseResult::Failure(failure)) => Err(Error::ExecutionFailure(failure)),
            Err(_) => Err(Error::Closed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kappa_rpc_types::{InvocationError, PeerId};
    use serde_json::json;
    use tokio_test::{assert_pending, task};

    fn request() -> MessageId {
        MessageId::new(PeerId::from_bytes([7; 32]), 1)
    }

    #[test]
    fn live_subscription_resolves_once() {
        let mut correlator = Correlator::default();
        let mut first = task::spawn(correlator.subscribe(request(), None));
        let mut second = task::spawn(correlator.subscribe(request(), None));
        assert_pending!(first.poll());
        assert_eq!(correlator.len(), 2);

        let delivered = correlator.resolve(&request(), &ResponseResult::Success(json!({"signature": "ab"})));
        assert_eq!(delivered, 2);
        assert!(first.is_woken());
        assert!(matches!(first.poll(), Poll::Ready(Ok(value)) if value == json!({"signature": "ab"})));
        assert!(matches!(second.poll(), Poll::Ready(Ok(value)) if value == json!({"signature": "ab"})));
        assert_eq!(correlator.resolve(&request(), &ResponseResult::Success(json!(1))), 0);
    }

    #[test]
    fn known_response_resolves_immediately() {
        let mut correlator = Correlator::default();
        let known = ResponseResult::Failure(InvocationError::interrupted());
        let mut fut = task::spawn(correlator.subscribe(request(), Some(&known)));
        let result = match fut.poll() {
            Poll::Ready(result) => result,
            Poll::Pending => panic!("expected a resolved future"),
        };
        assert!(matches!(result, Err(Error::ExecutionFailure(e)) if e == InvocationError::interrupted()));
        assert_eq!(correlator.len(), 0);
    }

    #[test]
    fn close_fails_waiting_callers() {
        let mut correlator = Correlator::default();
        let mut fut = task::spawn(correlator.subscribe(request(), None));
        correlator.close();
        assert!(matches!(fut.poll(), Poll::Ready(Err(Error::Closed))));
        let mut late = task::spawn(correlator.subscribe(request(), None));
        assert!(matches!(late.poll(), Poll::Ready(Err(Error::Closed))));
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let mut correlator = Correlator::default();
        drop(correlator.subscribe(request(), None));
        let _kept = correlator.subscribe(request(), None);
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn abandoned_requests_are_forgotten() {
        let mut correlator = Correlator::default();
        let other = MessageId::new(PeerId::from_bytes([7; 32]), 2);
        drop(correlator.subscribe(request(), None));
        let _kept = correlator.subscribe(other, None);
        assert!(!correlator.subscriptions.contains_key(&request()));
        assert_eq!(correlator.subscriptions.len(), 1);
        assert_eq!(correlator.len(), 1);
    }
}
