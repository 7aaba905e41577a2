//! Progress reporting for walks and scheduler ticks.
//!
//! The walker, the scheduler and the ingest task emit [`SyncProgress`] events
//! through an optional callback so frontends can render them without the
//! library knowing about terminals.

/// Progress events emitted while walking and ingesting.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A walk resolved its starting cursor.
    WalkStarted {
        /// Scope being walked (`repos` or `commits:<name>`).
        scope: String,
        /// Starting cursor, rendered.
        cursor: String,
    },

    /// A non-empty page was published.
    PagePublished {
        scope: String,
        /// Page number carried by the envelope.
        page: u32,
        /// Records on this page.
        count: usize,
        /// Running total for this walk.
        items_total: usize,
    },

    /// The walk reached an empty page.
    WalkComplete {
        scope: String,
        /// Pages published during the walk.
        pages: u32,
        /// Records published during the walk.
        items_total: usize,
    },

    /// The walk aborted; the cursor was not advanced past `page`.
    WalkFailed {
        scope: String,
        page: u32,
        error: String,
    },

    /// A repository metadata snapshot was published.
    RepositoryRefreshed { name: String },

    /// A scheduler tick is fanning out.
    TickStarted {
        /// Scheduler label, e.g. "repos" or "commits".
        label: String,
        /// Number of scopes in this tick.
        scopes: usize,
    },

    /// A scheduler tick joined all of its walks.
    TickComplete {
        label: String,
        succeeded: usize,
        failed: usize,
        panicked: usize,
    },

    /// An envelope was applied to the database.
    Ingested {
        /// Envelope kind (`repos`, `repo`, `commits`).
        kind: String,
        /// Records written.
        count: usize,
        /// Page number carried by the envelope.
        page: u32,
    },

    /// An envelope could not be applied.
    IngestError { error: String },

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Callback for progress updates.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
