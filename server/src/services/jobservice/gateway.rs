//! Relays one job's live output to one streaming client.

use super::wire_status;
use futures::{stream, Stream};
use joblib::{EndReason, Job, Subscription};
use jobproto::{stream_response::Event, Finished, StreamResponse};
use std::sync::Arc;
use tonic::Status;
use tracing::debug;
use uuid::Uuid;

/// Keeps a subscription registered for as long as the client stream is alive.
///
/// tonic drops the response stream when the client goes away; dropping the
/// guard then unsubscribes instead of waiting for the broadcaster to notice.
struct Relay {
    job: Arc<Job>,
    subscription: Subscription,
}

impl Drop for Relay {
    fn drop(&mut self) {
        let job = self.job.clone();
        let id = self.subscription.id().to_string();
        // drop can run outside the runtime during shutdown
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if job.unsubscribe(&id).await {
                    debug!(job = %job.name(), subscriber = %id, "client disconnected");
                }
            });
        }
    }
}

/// Subscribe to `job` and turn its chunks into stream messages.
///
/// The final message is `finished` with the job's terminal status. A client
/// that fell behind gets `RESOURCE_EXHAUSTED` instead.
pub(super) async fn relay(
    job: Arc<Job>,
    from_start: bool,
) -> joblib::Result<impl Stream<Item = Result<StreamResponse, Status>> + Send> {
    let subscriber = Uuid::new_v4().to_string();
    let subscription = if from_start {
        job.subscribe_from_start(subscriber).await?
    } else {
        job.subscribe(subscriber).await?
    };
    debug!(job = %job.name(), subscriber = %subscription.id(), from_start, "new subscriber");

    let relay = Relay { job, subscription };
    Ok(stream::unfold(Some(relay), |state| async move {
        let mut relay = state?;
        if let Some(data) = relay.subscription.recv().await {
            let message = StreamResponse {
                event: Some(Event::Data(data.to_vec())),
            };
            return Some((Ok(message), Some(relay)));
        }

        let item = match relay.subscription.end_reason() {
            Some(EndReason::Evicted) => Err(Status::resource_exhausted(
                "stream fell too far behind the job's output",
            )),
            _ => {
                // the broadcaster closes just before the final status is settled
                let status = relay.job.wait().await;
                let error = relay.job.snapshot().await.error.unwrap_or_default();
                let mut finished = Finished {
                    status: 0,
                    error,
                };
                finished.set_status(wire_status(status));
                Ok(StreamResponse {
                    event: Some(Event::Finished(finished)),
                })
            }
        };
        Some((item, None))
    }))
}
