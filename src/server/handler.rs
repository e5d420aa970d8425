//! Connection handler seam
//!
//! The server owns the listening socket and the accept loop; everything
//! after accept belongs to the handler. `serve` is invoked once per
//! accepted connection on its own task and fully owns that connection's
//! protocol and lifetime.

use async_trait::async_trait;

use crate::registry::Endpoint;

use super::connection::Connection;

/// Per-connection protocol handler supplied by the hosting process
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Endpoints advertised to the discovery directory
    fn endpoints(&self) -> Vec<Endpoint> {
        Vec::new()
    }

    /// Handle one accepted connection. The server never inspects the
    /// connection after dispatch and does not track completion.
    async fn serve(&self, conn: Connection);
}
