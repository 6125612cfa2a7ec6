//! Error types for the loader and its collaborators.

use thiserror::Error;

/// Boxed error returned by graphs, codecs, adapters and backends.
///
/// The loader never inspects these; it only wraps them so the caller
/// can see which lifecycle point produced them.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure the loader can report.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad construction arguments: failing adapters, invalid config
    /// values, unparseable log levels.
    #[error("invalid loader configuration: {0}")]
    Configuration(String),

    #[error("loader has already been shut down")]
    Terminated,

    #[error("no pipeline graph attached; build with a graph or restore from a checkpoint")]
    MissingGraph,

    /// Backend state must be restored but the backend can't do it.
    #[error("backend can not restore checkpointed state: {0}")]
    IncompatibleBackend(String),

    #[error("attached backend does not support checkpointing")]
    NotCheckpointable,

    #[error("invalid loader state: {0}")]
    InvalidState(String),

    #[error("expected an unsigned 64-bit seed, got {0}")]
    SeedOutOfRange(String),

    #[error(
        "this iterator has been invalidated because another session was started on the same loader"
    )]
    StaleIterator,

    /// Delegation was attempted without a live iterator behind the proxy.
    #[error("no live iterator to delegate to")]
    NotReady,

    #[error("backend hook `{hook}` failed: {source}")]
    Backend {
        hook: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("pipeline stage failed: {0}")]
    Stage(#[source] BoxError),

    #[error("codec error: {0}")]
    Codec(#[source] BoxError),

    #[error("checkpoint store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("checkpoint store migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attach the name of the backend hook that produced an error.
///
/// Example:
///     backend.finalize_iteration().hook("finalize_iteration")?;
pub(crate) trait HookResult<T> {
    fn hook(self, name: &'static str) -> Result<T>;
}

impl<T> HookResult<T> for std::result::Result<T, BoxError> {
    fn hook(self, name: &'static str) -> Result<T> {
        self.map_err(|source| Error::Backend { hook: name, source })
    }
}

/// Render a panic payload the way it was most likely raised.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else {
        // Give up; the `Any` debug output is just `Any { .. }`.
        "unknown panic payload".to_string()
    }
}

#[test]
fn hook_names_the_failing_hook() {
    let res: std::result::Result<(), BoxError> = Err("disk full".into());
    let err = res.hook("finalize").unwrap_err();
    assert!(matches!(err, Error::Backend { hook: "finalize", .. }));
    assert_eq!(err.to_string(), "backend hook `finalize` failed: disk full");
}

#[test]
fn panic_message_downcasts_common_payloads() {
    let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
    let borrowed: Box<dyn std::any::Any + Send> = Box::new("borrowed");
    let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);
    assert_eq!(panic_message(owned.as_ref()), "owned");
    assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
    assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
}
