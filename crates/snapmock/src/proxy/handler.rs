//! Per-request dispatch: CONNECT interception, the CA download endpoint and
//! plain forward-proxy requests.

use super::context::ProxyContext;
use super::forwarding::{error_response, forward};
use super::headers::VALUE_REQUEST;
use super::tls::accept_intercepted;
use crate::error::{Error, Result};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE, HOST};
use hyper::http::uri::{Authority, Scheme};
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pseudo-host serving the root certificate over plain HTTP.
pub const CA_DOWNLOAD_HOST: &str = "snapmock.ca";

/// Handle one request arriving on the proxy listener.
pub(crate) async fn handle_request(
    ctx: Arc<ProxyContext>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    if req.method() == Method::CONNECT {
        return Ok(start_tunnel(ctx, req));
    }

    if is_ca_download(&req) {
        return Ok(ca_download(&ctx));
    }

    // Origin-form requests are addressed to the proxy itself
    let Some(authority) = req.uri().authority().cloned() else {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            &VALUE_REQUEST,
            "expected an absolute-form proxy request",
        ));
    };
    let scheme = req.uri().scheme().cloned().unwrap_or(Scheme::HTTP);
    Ok(forward(&ctx, req, scheme, Some(authority)).await)
}

/// Answer `200` and intercept the tunnel once hyper hands it over.
fn start_tunnel(ctx: Arc<ProxyContext>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let Some(authority) = req.uri().authority().cloned() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &VALUE_REQUEST,
            "CONNECT target must be host:port",
        );
    };

    let tunnel_ctx = ctx.clone();
    ctx.tasks.spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = intercept(tunnel_ctx, upgraded, authority.clone()).await {
                    warn!("Tunnel to {} closed: {}", authority, e);
                }
            }
            Err(e) => warn!("CONNECT upgrade for {} failed: {}", authority, e),
        }
    });
    Response::new(Full::new(Bytes::new()))
}

/// Terminate TLS with a minted leaf and serve the decrypted requests.
async fn intercept(ctx: Arc<ProxyContext>, upgraded: Upgraded, authority: Authority) -> Result<()> {
    let (tls, host) =
        accept_intercepted(TokioIo::new(upgraded), ctx.ca.clone(), authority.host()).await?;
    debug!("Intercepting TLS for {} ({})", host, authority);

    let shutdown = ctx.shutdown.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        let authority = authority.clone();
        async move {
            if req.method() == Method::CONNECT {
                return Ok::<_, Infallible>(error_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &VALUE_REQUEST,
                    "nested CONNECT is not supported",
                ));
            }
            Ok(forward(&ctx, req, Scheme::HTTPS, Some(authority)).await)
        }
    });

    let builder = AutoConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls), service);
    tokio::pin!(conn);
    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    result.map_err(|e| Error::proxy(format!("intercepted connection for {host}: {e}")))
}

fn is_ca_download<B>(req: &Request<B>) -> bool {
    if req.method() != Method::GET {
        return false;
    }
    let host = req.uri().host().or_else(|| {
        req.headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.split(':').next().unwrap_or(h))
    });
    host.is_some_and(|h| h.eq_ignore_ascii_case(CA_DOWNLOAD_HOST))
}

fn ca_download(ctx: &ProxyContext) -> Response<Full<Bytes>> {
    match ctx.ca.ca_cert_pem() {
        Ok(pem) => {
            info!("Serving root certificate to a client");
            let mut response = Response::new(Full::new(Bytes::from(pem)));
            let headers = response.headers_mut();
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-pem-file"),
            );
            headers.insert(
                CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"snapmock-ca.pem\""),
            );
            response
        }
        Err(e) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &VALUE_REQUEST,
            &e.to_string(),
        ),
    }
}
