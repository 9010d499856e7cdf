//! Job progress subscriptions.
//!
//! The backend publishes job updates on `job:<id>` and failures on
//! `job:<id>:error`, and only starts streaming them after the client sends
//! `{"type":"subscribe","payload":{"jobId":"<id>"}}`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nano_core::ids::JobId;
use serde_json::json;
use tracing::debug;

use crate::manager::ConnectionManager;
use crate::message::Message;
use crate::subscriptions::Subscription;
use crate::topic::Topic;

/// Control message kind that starts a job stream.
pub const SUBSCRIBE_KIND: &str = "subscribe";
/// Control message kind that stops a job stream.
pub const UNSUBSCRIBE_KIND: &str = "unsubscribe";

/// An update for a watched job.
#[derive(Clone, Copy, Debug)]
pub enum JobEvent<'a> {
    /// Progress or result, from `job:<id>`.
    Update(&'a Message),
    /// Failure, from `job:<id>:error`.
    Error(&'a Message),
}

impl<'a> JobEvent<'a> {
    /// The underlying message.
    pub fn message(self) -> &'a Message {
        match self {
            Self::Update(m) | Self::Error(m) => m,
        }
    }

    /// Whether this reports a failure.
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Both job topics plus the server-side subscription, released together.
pub struct JobSubscription {
    job_id: JobId,
    manager: ConnectionManager,
    updates: Subscription,
    errors: Subscription,
    active: AtomicBool,
}

impl JobSubscription {
    /// Watch `job_id`, invoking `callback` for updates and failures.
    ///
    /// The subscribe control message goes through the normal send path, so
    /// it is queued if the connection is not open yet.
    pub fn subscribe<F>(manager: &ConnectionManager, job_id: JobId, callback: F) -> Self
    where
        F: Fn(JobEvent<'_>) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let on_update = Arc::clone(&callback);
        let updates = manager.subscribe(Topic::Job(job_id.clone()), move |m| {
            on_update(JobEvent::Update(m));
        });
        let errors = manager.subscribe(Topic::JobError(job_id.clone()), move |m| {
            callback(JobEvent::Error(m));
        });
        manager.send(SUBSCRIBE_KIND, json!({ "jobId": job_id }));
        debug!(job_id = %job_id, "watching job");
        Self {
            job_id,
            manager: manager.clone(),
            updates,
            errors,
            active: AtomicBool::new(true),
        }
    }

    /// Stop watching. Idempotent: only the first call removes the
    /// callbacks and sends the unsubscribe control message.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let _ = self.updates.unsubscribe();
        let _ = self.errors.unsubscribe();
        self.manager
            .send(UNSUBSCRIBE_KIND, json!({ "jobId": self.job_id }));
        debug!(job_id = %self.job_id, "stopped watching job");
        true
    }

    /// The watched job.
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Whether still watching.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for JobSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubscription")
            .field("job_id", &self.job_id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
