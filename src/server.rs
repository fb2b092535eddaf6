//! HTTP/1 front end for the dispatcher.

use crate::context::RequestParts;
use crate::dispatcher::Dispatcher;
use crate::error::FatalError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Translate a hyper request into the parts the pipeline reads.
pub fn request_parts<B>(req: &Request<B>) -> RequestParts {
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().to_string());
    RequestParts::new(req.method().clone(), url, req.headers().clone())
}

/// Serve until Ctrl-C, or until a request reports a [`FatalError`].
pub async fn serve(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    dispatcher.check_ready()?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %addr,
        dev = dispatcher.config().dev,
        base = %dispatcher.config().base,
        "listening on http://{}",
        addr
    );

    let (fatal_tx, mut fatal_rx) = mpsc::channel::<FatalError>(1);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let dispatcher = dispatcher.clone();
                let fatal_tx = fatal_tx.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        handle(dispatcher.clone(), fatal_tx.clone(), req)
                    });
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!(peer = %peer, error = %err, "connection closed with error");
                    }
                });
            }
            Some(fatal) = fatal_rx.recv() => {
                tracing::error!(error = %fatal, "stopping server");
                return Err(fatal.into());
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle(
    dispatcher: Arc<Dispatcher>,
    fatal: mpsc::Sender<FatalError>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let parts = request_parts(&req);
    let started = std::time::Instant::now();

    match dispatcher.handle(parts.clone()).await {
        Ok(response) => {
            tracing::info!(
                method = %parts.method,
                url = %parts.url,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request"
            );
            Ok(response.into_hyper())
        }
        Err(err) => {
            let _ = fatal.try_send(err);
            let mut res = Response::new(Full::new(Bytes::new()));
            *res.status_mut() = http::StatusCode::SERVICE_UNAVAILABLE;
            Ok(res)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_request_parts_keeps_query() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://example.com/foo/bar?page=2")
            .header("accept-language", "en")
            .body(())
            .unwrap();

        let parts = request_parts(&req);
        assert_eq!(parts.method, Method::GET);
        assert_eq!(parts.url, "/foo/bar?page=2");
        assert_eq!(parts.headers["accept-language"], "en");
    }

    #[test]
    fn test_request_parts_origin_form() {
        let req = Request::builder().uri("/about").body(()).unwrap();
        assert_eq!(request_parts(&req).url, "/about");
    }
}
