//! The synchronous HTTP entry point.
//!
//! Pipeline: parse the model out of the body, check it exists, trigger
//! scale-from-zero, wait for a backend address, then forward with bounded
//! retries. Retries replay the buffered body against the address selected
//! for the first attempt; the inflight slot is released when the handler
//! returns, whatever the exit path.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{request::Parts, StatusCode, Uri};
use axum::response::Response;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::client::HttpClient;
use crate::errors::ErrorResponse;
use crate::load_balancer::{AddressError, AddressRequest};
use crate::metrics::{self, RequestKind};
use crate::request::ProxyRequest;
use crate::{AppState, ProxyRewrite};

#[instrument(skip(state, req))]
pub async fn proxy_handler<C: HttpClient>(
    State(state): State<AppState<C>>,
    req: axum::extract::Request,
) -> Result<Response, ErrorResponse> {
    debug!(uri = %req.uri(), "incoming request");

    let (parts, body) = req.into_parts();
    // Buffer the whole body up front so retries can replay it.
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| ErrorResponse::new(StatusCode::BAD_REQUEST, "unable to read request body"))?;

    let pr = ProxyRequest::parse(&parts.headers, body_bytes).map_err(|err| {
        ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            format!("unable to parse model: {err}"),
        )
    })?;
    debug!(id = %pr.id, model = %pr.model, adapter = %pr.adapter, "parsed request");

    let _active = metrics::active_request(&pr.requested_model, RequestKind::Http);

    let exists = state
        .resolver
        .lookup_model(&pr.model, &pr.adapter, &pr.selectors)
        .await
        .map_err(|err| {
            ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("unable to resolve model: {err:#}"),
            )
        })?;
    if !exists {
        return Err(ErrorResponse::new(
            StatusCode::NOT_FOUND,
            format!("model not found: {}", pr.requested_model),
        ));
    }

    // Make sure the backend has at least one replica on the way up before
    // blocking on an address.
    state
        .resolver
        .scale_at_least_one_replica(&pr.model)
        .await
        .map_err(|err| {
            ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("unable to scale model: {err:#}"),
            )
        })?;

    debug!(id = %pr.id, "waiting for host");
    let addr_request = AddressRequest {
        model: pr.model.clone(),
        adapter: pr.adapter.clone(),
        prefix: String::new(),
    };
    let (addr, _completion) = match timeout(
        state.host_wait,
        state.balancer.await_best_address(&state.shutdown, &addr_request),
    )
    .await
    {
        Ok(Ok(handout)) => handout,
        Ok(Err(AddressError::Cancelled)) => {
            return Err(ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "request cancelled while finding host",
            ));
        }
        Ok(Err(err @ AddressError::Closed)) => {
            return Err(ErrorResponse::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!("unable to find host: {err}"),
            ));
        }
        Err(_) => {
            return Err(ErrorResponse::new(
                StatusCode::GATEWAY_TIMEOUT,
                "request timeout while finding host",
            ));
        }
    };
    debug!(id = %pr.id, addr = %addr, "proxying request");

    // The completion guard stays alive across every retry; retries go to the
    // address selected above rather than re-entering selection.
    let mut attempt = 0;
    loop {
        let forward = build_forward_request(&parts, &pr, &addr, state.rewrite.as_ref())?;
        match state.http_client.request(forward).await {
            Ok(response) => {
                let status = response.status().as_u16();
                if state.retry.retry_codes.contains(&status) && attempt < state.retry.max_retries {
                    attempt += 1;
                    debug!(id = %pr.id, status, attempt, max = state.retry.max_retries, "retrying request");
                    continue;
                }
                // Final answer: stream it through, retryable or not.
                return Ok(response);
            }
            Err(err) => {
                if attempt < state.retry.max_retries {
                    attempt += 1;
                    debug!(id = %pr.id, attempt, max = state.retry.max_retries, "retrying request after connection error: {err}");
                    continue;
                }
                error!(id = %pr.id, "exceeded retries ({attempt}/{}): {err}", state.retry.max_retries);
                return Err(ErrorResponse::bad_gateway());
            }
        }
    }
}

/// One forwarding attempt: the inbound request re-targeted at `addr` with the
/// buffered (possibly rewritten) body. The original `Host` header is left in
/// place for the backend.
fn build_forward_request(
    parts: &Parts,
    pr: &ProxyRequest,
    addr: &str,
    rewrite: Option<&ProxyRewrite>,
) -> Result<axum::extract::Request, ErrorResponse> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("http://{addr}{path_and_query}")
        .parse()
        .map_err(|_| {
            ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("invalid backend address: {addr}"),
            )
        })?;

    let mut headers = parts.headers.clone();
    headers.insert(CONTENT_LENGTH, pr.body.len().into());
    headers.remove(TRANSFER_ENCODING);

    let mut forward = axum::extract::Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(Body::from(pr.body.clone()))
        .map_err(|_| ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "invalid request"))?;
    *forward.headers_mut() = headers;

    if let Some(rewrite) = rewrite {
        rewrite(&mut forward);
    }
    Ok(forward)
}
