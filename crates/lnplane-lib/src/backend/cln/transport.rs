//! Mutual-TLS HTTP/2 transport for the CLN gRPC plugin, in place of
//! `tonic::transport::Channel`.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use hyper::{
    client::HttpConnector,
    http::uri::{Authority, Scheme},
    Body, Client, Request, Response, Uri,
};
use hyper_openssl::HttpsConnector;
use openssl::{
    error::ErrorStack,
    pkey::PKey,
    ssl::{SslConnector, SslMethod},
    x509::X509,
};
use tonic::{
    body::BoxBody,
    codec::ProstCodec,
    codegen::{http::uri::PathAndQuery, Service},
};
use tonic_openssl::ALPN_H2_WIRE;

use crate::{
    backend::{rpc_error, BackendError, BackendResult},
    types::ConnectionMaterial,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn tls_error(err: ErrorStack) -> BackendError {
    BackendError::Connection(format!("TLS setup failed: {}", err))
}

/// Sends every request to the configured origin over one pooled HTTP/2 client.
#[derive(Clone, Debug)]
pub struct TlsTransport {
    scheme: Scheme,
    authority: Authority,
    client: Client<HttpsConnector<HttpConnector>, BoxBody>,
}

impl TlsTransport {
    /// The plugin presents a certificate issued for `cln`, so the host name is not verified
    /// against the endpoint; the configured CA pins the server instead.
    pub fn new(uri: Uri, material: &ConnectionMaterial) -> BackendResult<Self> {
        let parts = uri.into_parts();
        let (Some(scheme), Some(authority)) = (parts.scheme, parts.authority) else {
            return Err(BackendError::Connection(
                "endpoint needs a host and port".to_string(),
            ));
        };

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let mut connector = SslConnector::builder(SslMethod::tls()).map_err(tls_error)?;
        if let Some(pem) = material.ca_cert.as_deref() {
            let ca = X509::from_pem(pem).map_err(tls_error)?;
            connector.cert_store_mut().add_cert(ca).map_err(tls_error)?;
        }
        if let Some(pem) = material.client_cert.as_deref() {
            let cert = X509::from_pem(pem).map_err(tls_error)?;
            connector.set_certificate(&cert).map_err(tls_error)?;
        }
        if let Some(pem) = material.client_key.as_deref() {
            let key = PKey::private_key_from_pem(pem).map_err(tls_error)?;
            connector.set_private_key(&key).map_err(tls_error)?;
        }
        connector.set_alpn_protos(ALPN_H2_WIRE).map_err(tls_error)?;
        let mut https = HttpsConnector::with_connector(http, connector).map_err(tls_error)?;
        https.set_callback(|config, _| {
            config.set_verify_hostname(false);
            Ok(())
        });
        Ok(Self {
            scheme,
            authority,
            client: Client::builder().http2_only(true).build(https),
        })
    }
}

impl Service<Request<BoxBody>> for TlsTransport {
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut request: Request<BoxBody>) -> Self::Future {
        let mut parts = request.uri().clone().into_parts();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        match Uri::from_parts(parts) {
            Ok(uri) => {
                *request.uri_mut() = uri;
                let response = self.client.request(request);
                Box::pin(async move { response.await.map_err(BoxError::from) })
            }
            Err(err) => Box::pin(async move { Err(BoxError::from(err)) }),
        }
    }
}

/// Unary calls of the `cln.Node` service.
#[derive(Clone, Debug)]
pub struct NodeRpc {
    grpc: tonic::client::Grpc<TlsTransport>,
}

impl NodeRpc {
    pub fn new(transport: TlsTransport) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(transport),
        }
    }

    pub async fn call<Req, Resp>(&self, method: &'static str, request: Req) -> BackendResult<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let codec = ProstCodec::<Req, Resp>::default();
        grpc.unary(
            tonic::Request::new(request),
            PathAndQuery::from_static(method),
            codec,
        )
        .await
        .map(tonic::Response::into_inner)
        .map_err(rpc_error)
    }
}
