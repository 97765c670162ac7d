use std::sync::Arc;

use kelpie_error::Result;

use crate::traits::{KvEngine, KvSession};

/// The per-operation context the index layer threads through every call.
///
/// Wraps the engine handle and the session bound to the enclosing
/// transaction. Cursors created against a context must be detached before
/// the transaction is torn down and reattached to the replacement context
/// on retry.
#[derive(Clone)]
pub struct OpContext {
    engine: Arc<dyn KvEngine>,
    session: Arc<dyn KvSession>,
}

impl OpContext {
    /// Open a fresh session on `engine` and wrap it.
    pub fn new(engine: Arc<dyn KvEngine>) -> Result<Self> {
        let session = engine.open_session()?;
        Ok(Self { engine, session })
    }

    /// The engine, for callers that need a private session (bulk load).
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    /// The session bound to this operation.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn KvSession> {
        &self.session
    }
}

impl std::fmt::Debug for OpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpContext").finish_non_exhaustive()
    }
}
