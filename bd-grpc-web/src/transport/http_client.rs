// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{HttpResponse, UnaryTransport};
use crate::error::{Error, Result};
use crate::status::Status;
use bd_grpc_web_codec::Code;
use bytes::Bytes;
use futures::TryStreamExt;
use http::{HeaderMap, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::io::ErrorKind;
use time::Duration;
use tokio_util::io::StreamReader;

//
// HttpTransport
//

// Unary transport backed by a hyper client. Every call is a single POST to
// <scheme>://<host>/<service>/<method>.
#[derive(Debug)]
pub struct HttpTransport<C> {
  client: hyper_util::client::legacy::Client<C, Full<Bytes>>,
  address: Uri,
}

fn make_connector(connect_timeout: Duration) -> HttpConnector {
  let mut connector = HttpConnector::new();
  connector.set_nodelay(true);
  connector.set_connect_timeout(Some(connect_timeout.unsigned_abs()));
  connector
}

impl HttpTransport<HttpConnector> {
  // Plaintext HTTP to the host.
  pub fn new_http(host: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
    Self::new_with_client(
      format!("http://{host}"),
      hyper_util::client::legacy::Client::builder(TokioExecutor::new())
        .build(make_connector(connect_timeout)),
    )
  }
}

impl HttpTransport<HttpsConnector<HttpConnector>> {
  // HTTPS to the host, verified against the webpki roots.
  pub fn new_https(host: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
    let mut connector = make_connector(connect_timeout);
    connector.enforce_http(false);

    let connector = HttpsConnectorBuilder::new()
      .with_webpki_roots()
      .https_or_http()
      .enable_http1()
      .enable_http2()
      .wrap_connector(connector);

    Self::new_with_client(
      format!("https://{host}"),
      hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(connector),
    )
  }
}

impl<C: Connect + Clone + Send + Sync + 'static> HttpTransport<C> {
  pub fn new_with_client<E: Send + Sync + std::error::Error + 'static>(
    address: impl TryInto<Uri, Error = E>,
    client: hyper_util::client::legacy::Client<C, Full<Bytes>>,
  ) -> anyhow::Result<Self> {
    let address: Uri = address.try_into()?;

    if address.scheme().is_none() {
      anyhow::bail!("missing scheme in address");
    }

    if address.authority().is_none() {
      anyhow::bail!("missing authority in address");
    }

    // Method paths are appended later so a base path would be silently dropped.
    if address.path() != "/" {
      anyhow::bail!(
        "extra path parameter not supported in address: {}",
        address.path()
      );
    }

    Ok(Self { client, address })
  }

  fn build_uri(&self, method: &str) -> Result<Uri> {
    let mut builder = Uri::builder().path_and_query(method);
    if let Some(scheme) = self.address.scheme() {
      builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = self.address.authority() {
      builder = builder.authority(authority.clone());
    }
    Ok(builder.build()?)
  }
}

#[async_trait::async_trait]
impl<C: Connect + Clone + Send + Sync + 'static> UnaryTransport for HttpTransport<C> {
  async fn send(&self, method: &str, headers: HeaderMap, body: Bytes) -> Result<HttpResponse> {
    let mut request = hyper::Request::builder()
      .method(hyper::Method::POST)
      .uri(self.build_uri(method)?)
      .body(Full::new(body))?;
    *request.headers_mut() = headers;
    log::debug!("sending grpc-web request: {}", request.uri());

    let response = match self.client.request(request).await {
      Ok(response) => response,
      Err(e) => {
        // The connect timeout is only visible as a nested io error.
        if e
          .source()
          .and_then(std::error::Error::source)
          .and_then(|e| e.downcast_ref::<std::io::Error>())
          .is_some_and(|e| e.kind() == ErrorKind::TimedOut)
        {
          return Err(Error::ConnectionTimeout);
        }

        return Err(e.into());
      },
    };

    if !response.status().is_success() {
      return Err(
        Status::new(
          Code::Unavailable,
          format!("received invalid response code: {}", response.status()),
        )
        .into(),
      );
    }

    let (parts, body) = response.into_parts();
    log::trace!("received grpc-web response headers: {:?}", parts.headers);
    Ok(HttpResponse {
      headers: parts.headers,
      body: Box::new(StreamReader::new(
        body.into_data_stream().map_err(std::io::Error::other),
      )),
    })
  }
}
