//! Long-running operation polling.
//!
//! A [`Poller`] drives a service-specific [`PollOperation`] from the moment
//! the activation request succeeds until the operation reaches a terminal
//! [`LongRunningOperationStatus`]. It can be driven step by step with
//! [`Poller::poll`], awaited with [`Poller::wait_for_completion`], or
//! consumed as a stream of poll responses with [`Poller::into_stream`].
//!
//! Terminal states are absorbing: once reached, further calls return the
//! cached response without contacting the service.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Default interval between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Status of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LongRunningOperationStatus {
    NotStarted,
    InProgress,
    SuccessfullyCompleted,
    Failed,
    UserCancelled,
}

impl LongRunningOperationStatus {
    /// Whether this status is terminal.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            Self::SuccessfullyCompleted | Self::Failed | Self::UserCancelled
        )
    }
}

impl fmt::Display for LongRunningOperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::SuccessfullyCompleted => "SUCCESSFULLY_COMPLETED",
            Self::Failed => "FAILED",
            Self::UserCancelled => "USER_CANCELLED",
        };
        f.write_str(s)
    }
}

/// One observation of the operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResponse<T> {
    status: LongRunningOperationStatus,
    value: Option<T>,
    retry_after: Option<Duration>,
}

impl<T> PollResponse<T> {
    pub fn new(status: LongRunningOperationStatus, value: Option<T>) -> Self {
        Self {
            status,
            value,
            retry_after: None,
        }
    }

    /// Ask the poller to wait `delay` before the next check instead of its
    /// configured interval.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn status(&self) -> LongRunningOperationStatus {
        self.status
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// What a [`PollOperation`] can see: the activation response, the most
/// recent response and every status observed so far.
#[derive(Debug, Clone)]
pub struct PollingContext<T> {
    activation: PollResponse<T>,
    latest: PollResponse<T>,
    history: Vec<LongRunningOperationStatus>,
}

impl<T: Clone> PollingContext<T> {
    fn new(activation: PollResponse<T>) -> Self {
        Self {
            history: vec![activation.status],
            latest: activation.clone(),
            activation,
        }
    }

    fn record(&mut self, response: PollResponse<T>) {
        self.history.push(response.status);
        self.latest = response;
    }
}

impl<T> PollingContext<T> {
    pub fn activation_response(&self) -> &PollResponse<T> {
        &self.activation
    }

    pub fn latest_response(&self) -> &PollResponse<T> {
        &self.latest
    }

    /// The last value any response carried, falling back to the
    /// activation value.
    pub fn last_known_value(&self) -> Option<&T> {
        self.latest.value().or_else(|| self.activation.value())
    }

    /// Every status recorded, starting with the activation's.
    pub fn history(&self) -> &[LongRunningOperationStatus] {
        &self.history
    }
}

/// Service-specific status check for a long-running operation.
#[async_trait]
pub trait PollOperation<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Perform one status check.
    async fn poll(&self, ctx: &PollingContext<T>) -> Result<PollResponse<T>>;

    /// Request cancellation of the operation on the service.
    async fn cancel(&self, _ctx: &PollingContext<T>) -> Result<T> {
        Err(Error::UnsupportedOperation(
            "this operation cannot be cancelled".into(),
        ))
    }

    /// Retrieve the final result once the operation succeeded.
    async fn fetch_result(&self, ctx: &PollingContext<T>) -> Result<Option<T>> {
        Ok(ctx.last_known_value().cloned())
    }
}

/// Drives a long-running operation to completion.
pub struct Poller<T, P> {
    operation: P,
    context: PollingContext<T>,
    interval: Duration,
    failure: Option<String>,
}

impl<T: fmt::Debug, P> fmt::Debug for Poller<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("status", &self.context.latest.status)
            .field("interval", &self.interval)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl<T, P> Poller<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: PollOperation<T>,
{
    /// Await the activation request and start tracking the operation.
    ///
    /// Activation errors are returned as-is; no polling happens.
    pub async fn begin<F>(activation: F, operation: P, interval: Option<Duration>) -> Result<Self>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let value = activation.await?;
        tracing::debug!("long-running operation activated");
        Ok(Self {
            operation,
            context: PollingContext::new(PollResponse::new(
                LongRunningOperationStatus::NotStarted,
                Some(value),
            )),
            interval: interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            failure: None,
        })
    }

    pub fn status(&self) -> LongRunningOperationStatus {
        self.context.latest.status
    }

    pub fn latest_response(&self) -> &PollResponse<T> {
        &self.context.latest
    }

    pub fn context(&self) -> &PollingContext<T> {
        &self.context
    }

    /// Perform at most one status check.
    ///
    /// Once the operation is terminal this returns the cached response
    /// without I/O. If the status check itself fails, the operation is
    /// recorded as [`LongRunningOperationStatus::Failed`] and the error is
    /// returned.
    pub async fn poll(&mut self) -> Result<&PollResponse<T>> {
        if self.status().is_complete() {
            return Ok(&self.context.latest);
        }

        match self.operation.poll(&self.context).await {
            Ok(response) => {
                tracing::trace!(status = %response.status, "poll response");
                self.context.record(response);
                Ok(&self.context.latest)
            }
            Err(e) => {
                tracing::warn!(error = %e, "status check failed, marking operation failed");
                let value = self.context.last_known_value().cloned();
                self.context
                    .record(PollResponse::new(LongRunningOperationStatus::Failed, value));
                self.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn next_delay(&self) -> Duration {
        self.context.latest.retry_after.unwrap_or(self.interval)
    }

    /// Poll until the operation reaches a terminal state.
    pub async fn wait_for_completion(&mut self) -> Result<&PollResponse<T>> {
        self.wait_until_matches(|s| s.is_complete()).await
    }

    /// Poll until the operation reaches `status` or a terminal state.
    pub async fn wait_until(
        &mut self,
        status: LongRunningOperationStatus,
    ) -> Result<&PollResponse<T>> {
        self.wait_until_matches(|s| s == status || s.is_complete())
            .await
    }

    async fn wait_until_matches(
        &mut self,
        done: impl Fn(LongRunningOperationStatus) -> bool,
    ) -> Result<&PollResponse<T>> {
        loop {
            let status = self.poll().await?.status();
            if done(status) {
                return Ok(&self.context.latest);
            }
            tokio::time::sleep(self.next_delay()).await;
        }
    }

    /// Like [`wait_for_completion`](Self::wait_for_completion), but stops
    /// with [`Error::Cancelled`] once `token` fires.
    ///
    /// A status check in flight when the token fires is abandoned; state
    /// recorded before that point is kept.
    pub async fn wait_for_completion_with_cancellation(
        &mut self,
        token: CancellationToken,
    ) -> Result<&PollResponse<T>> {
        loop {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let status = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                response = self.poll() => response?.status(),
            };
            if status.is_complete() {
                return Ok(&self.context.latest);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.next_delay()) => {}
            }
        }
    }

    /// Ask the service to cancel the operation.
    ///
    /// Fails with [`Error::InvalidArgument`] once the operation has ended;
    /// the terminal response is left as recorded.
    pub async fn cancel_operation(&mut self) -> Result<T> {
        let status = self.status();
        if status.is_complete() {
            return Err(Error::InvalidArgument(format!(
                "operation already ended as {status}"
            )));
        }
        let value = self.operation.cancel(&self.context).await?;
        self.context.record(PollResponse::new(
            LongRunningOperationStatus::UserCancelled,
            Some(value.clone()),
        ));
        Ok(value)
    }

    /// Wait for completion and return the operation's result.
    pub async fn final_result(&mut self) -> Result<T> {
        if let Some(failure) = &self.failure {
            return Err(Error::OperationFailed(failure.clone()));
        }
        let status = self.wait_for_completion().await?.status();
        match status {
            LongRunningOperationStatus::SuccessfullyCompleted => self
                .operation
                .fetch_result(&self.context)
                .await?
                .ok_or_else(|| {
                    Error::OperationFailed("operation completed without a result".into())
                }),
            other => Err(Error::OperationFailed(format!("operation ended as {other}"))),
        }
    }

    /// Turn the poller into a stream of poll responses ending with the
    /// terminal one. A failed status check is yielded as the last item.
    pub fn into_stream(self) -> impl Stream<Item = Result<PollResponse<T>>> + Send
    where
        P: 'static,
    {
        futures::stream::unfold(Some((self, false)), |state| async move {
            let (mut poller, waited) = state?;
            if poller.status().is_complete() {
                return None;
            }
            if waited {
                tokio::time::sleep(poller.next_delay()).await;
            }
            let item = poller.poll().await.cloned();
            match item {
                Ok(response) => Some((Ok(response), Some((poller, true)))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use LongRunningOperationStatus::*;

    /// Replays scripted outcomes and counts status checks.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<PollResponse<String>>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<PollResponse<String>>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollOperation<String> for Scripted {
        async fn poll(&self, _ctx: &PollingContext<String>) -> Result<PollResponse<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PollResponse::new(InProgress, None)))
        }
    }

    #[async_trait]
    impl PollOperation<String> for std::sync::Arc<Scripted> {
        async fn poll(&self, ctx: &PollingContext<String>) -> Result<PollResponse<String>> {
            self.as_ref().poll(ctx).await
        }
    }

    fn in_progress() -> Result<PollResponse<String>> {
        Ok(PollResponse::new(InProgress, None))
    }

    fn done(value: &str) -> Result<PollResponse<String>> {
        Ok(PollResponse::new(SuccessfullyCompleted, Some(value.to_string())))
    }

    async fn begin(
        outcomes: Vec<Result<PollResponse<String>>>,
    ) -> (Poller<String, std::sync::Arc<Scripted>>, std::sync::Arc<Scripted>) {
        let op = std::sync::Arc::new(Scripted::new(outcomes));
        let poller = Poller::begin(
            async { Ok("activated".to_string()) },
            op.clone(),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();
        (poller, op)
    }

    #[tokio::test(start_paused = true)]
    async fn progresses_through_states_to_completion() {
        let (mut poller, op) = begin(vec![in_progress(), in_progress(), done("final")]).await;
        assert_eq!(poller.status(), NotStarted);
        assert_eq!(poller.latest_response().value().map(String::as_str), Some("activated"));

        let response = poller.wait_for_completion().await.unwrap();
        assert_eq!(response.status(), SuccessfullyCompleted);
        assert_eq!(response.value().map(String::as_str), Some("final"));
        assert_eq!(
            poller.context().history(),
            [NotStarted, InProgress, InProgress, SuccessfullyCompleted]
        );
        assert_eq!(op.calls(), 3);
    }

    #[tokio::test]
    async fn terminal_state_is_absorbing() {
        let (mut poller, op) = begin(vec![done("v")]).await;

        poller.poll().await.unwrap();
        poller.poll().await.unwrap();
        let response = poller.poll().await.unwrap();

        assert_eq!(response.status(), SuccessfullyCompleted);
        assert_eq!(op.calls(), 1);
    }

    #[tokio::test]
    async fn activation_error_propagates_without_polling() {
        let op = Scripted::new(vec![]);
        let result: Result<Poller<String, Scripted>> = Poller::begin(
            async { Err(Error::Http(crate::error::HttpError::new(409, "conflict"))) },
            op,
            None,
        )
        .await;

        assert_eq!(result.unwrap_err().status_code(), Some(409));
    }

    #[tokio::test]
    async fn status_check_error_marks_operation_failed() {
        let (mut poller, op) = begin(vec![
            in_progress(),
            Err(Error::transport("connection reset")),
        ])
        .await;

        poller.poll().await.unwrap();
        let err = poller.poll().await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(poller.status(), Failed);
        assert_eq!(
            poller.latest_response().value().map(String::as_str),
            Some("activated")
        );

        // Terminal: no further I/O.
        assert_eq!(poller.poll().await.unwrap().status(), Failed);
        assert_eq!(op.calls(), 2);

        match poller.final_result().await.unwrap_err() {
            Error::OperationFailed(msg) => assert!(msg.contains("connection reset")),
            other => panic!("Expected OperationFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn final_result_waits_and_returns_value() {
        let (mut poller, _op) = begin(vec![in_progress(), done("key")]).await;
        assert_eq!(poller.final_result().await.unwrap(), "key");
    }

    #[tokio::test(start_paused = true)]
    async fn final_result_falls_back_to_activation_value() {
        let (mut poller, _op) = begin(vec![Ok(PollResponse::new(SuccessfullyCompleted, None))]).await;
        assert_eq!(poller.final_result().await.unwrap(), "activated");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_interval() {
        let (mut poller, _op) = begin(vec![
            Ok(PollResponse::new(InProgress, None).with_retry_after(Duration::from_secs(30))),
            done("v"),
        ])
        .await;

        let start = tokio::time::Instant::now();
        poller.wait_for_completion().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_stops_at_requested_status() {
        let (mut poller, op) = begin(vec![in_progress(), done("v")]).await;

        let response = poller.wait_until(InProgress).await.unwrap();
        assert_eq!(response.status(), InProgress);
        assert_eq!(op.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_token_stops_polling_and_keeps_state() {
        let (mut poller, op) = begin(vec![]).await;
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                token.cancel();
            })
        };

        let err = poller
            .wait_for_completion_with_cancellation(token)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(poller.status(), InProgress);
        assert_eq!(poller.context().history().len(), 1 + op.calls());
    }

    #[tokio::test]
    async fn already_cancelled_token_does_not_poll() {
        let (mut poller, op) = begin(vec![done("v")]).await;
        let token = CancellationToken::new();
        token.cancel();

        let err = poller
            .wait_for_completion_with_cancellation(token)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(op.calls(), 0);
        assert_eq!(poller.status(), NotStarted);
    }

    #[tokio::test]
    async fn cancel_is_unsupported_by_default() {
        let (mut poller, _op) = begin(vec![]).await;
        let err = poller.cancel_operation().await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
        assert_eq!(poller.status(), NotStarted);
    }

    #[tokio::test]
    async fn cancel_after_completion_keeps_terminal_state() {
        let (mut poller, op) = begin(vec![done("v")]).await;
        poller.poll().await.unwrap();

        let err = poller.cancel_operation().await.unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(poller.status(), SuccessfullyCompleted);
        assert_eq!(poller.context().history(), &[NotStarted, SuccessfullyCompleted]);
        assert_eq!(op.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_each_response_until_terminal() {
        let (poller, _op) = begin(vec![in_progress(), in_progress(), done("v")]).await;

        let statuses: Vec<_> = poller
            .into_stream()
            .map(|r| r.unwrap().status())
            .collect()
            .await;

        assert_eq!(statuses, vec![InProgress, InProgress, SuccessfullyCompleted]);
    }

    #[tokio::test]
    async fn stream_ends_with_status_check_error() {
        let (poller, _op) = begin(vec![Err(Error::transport("reset"))]).await;

        let items: Vec<_> = poller.into_stream().collect().await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn status_display_and_completion() {
        assert_eq!(SuccessfullyCompleted.to_string(), "SUCCESSFULLY_COMPLETED");
        assert!(UserCancelled.is_complete());
        assert!(!InProgress.is_complete());
    }
}
