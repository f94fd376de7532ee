//! Child side of the isolated backend.
//!
//! A worker process connects to the address it was given, reads a single
//! [`ExecutionRequest`], resolves the computation in its [`Registry`], runs
//! it and answers with one [`ExecutionResponse`].

use super::protocol::{ExecutionRequest, ExecutionResponse};
use crate::computation::{Registry, apply_task};
use crate::{Error, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// Serve one request from the parent listening at `address`.
///
/// Computation failures are reported to the parent, not returned here.
///
/// # Errors
///
/// Returns an error only when the channel itself fails.
pub async fn serve(address: &Path, registry: &Registry) -> Result<()> {
    let mut stream = UnixStream::connect(address)
        .await
        .map_err(|e| Error::io(e, format!("connect to {}", address.display())))?;

    let request = ExecutionRequest::read_from(&mut stream)
        .await
        .map_err(|e| Error::protocol(format!("cannot read request: {e}")))?;
    tracing::debug!(
        request_id = %request.request_id,
        computation = %request.name,
        "Worker received request"
    );

    let response = execute(registry, request).await;
    response
        .write_to(&mut stream)
        .await
        .map_err(|e| Error::io(e, "write response"))?;
    stream
        .shutdown()
        .await
        .map_err(|e| Error::io(e, "close worker channel"))?;
    Ok(())
}

/// Resolve and run a request, capturing every failure as a response
pub async fn execute(registry: &Registry, request: ExecutionRequest) -> ExecutionResponse {
    let ExecutionRequest {
        request_id,
        module,
        name,
        version,
        args,
    } = request;

    let computation = match registry.resolve(&module, &name, &version) {
        Ok(computation) => computation,
        Err(e) => {
            return ExecutionResponse::Failed {
                request_id,
                diagnostic: e.to_string(),
            };
        }
    };

    let joined =
        tokio::task::spawn_blocking(move || apply_task(computation.as_ref(), &args)).await;
    match joined {
        Ok(Ok(result)) => ExecutionResponse::Completed {
            request_id,
            value: result.value,
            elapsed: result.elapsed,
        },
        Ok(Err(e)) => ExecutionResponse::Failed {
            request_id,
            diagnostic: e.to_string(),
        },
        Err(e) => ExecutionResponse::Failed {
            request_id,
            diagnostic: format!("worker thread failed: {e}"),
        },
    }
}
