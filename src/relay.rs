//! Bidirectional byte relay
//!
//! Once a request has been answered with a success reply, the two live
//! streams are joined here and bytes are forwarded in both directions
//! until either side closes or errors.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, copy_bidirectional};
use tracing::debug;

/// relay_tcp copies data between the two streams in both directions
/// concurrently. EOF on one side is propagated as a write shutdown to
/// the other; both streams are closed when the relay returns. Returns
/// the byte counts (client -> destination, destination -> client).
pub async fn relay_tcp<A, B>(client: &mut A, destination: &mut B) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let (from_client, from_destination) = copy_bidirectional(client, destination).await?;

    debug!(
        "relay finished: {} bytes from client, {} bytes from destination",
        from_client, from_destination
    );

    Ok((from_client, from_destination))
}
