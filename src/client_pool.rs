//! HttpClientPool: two pre-built clients, plain and TLS, chosen by upstream
//! scheme. Neither client follows redirects — 3xx responses are handed back
//! to the engine untouched.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::upstream::Scheme;

/// A rustls `ServerCertVerifier` that accepts any certificate without
/// validation. Used when `tls_insecure` is set on the owning instance.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA1,
            ECDSA_SHA1_Legacy,
            RSA_PKCS1_SHA256,
            ECDSA_NISTP256_SHA256,
            RSA_PKCS1_SHA384,
            ECDSA_NISTP384_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
        ]
    }
}

pub type ProxyClient = Client<HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

/// Two pre-constructed HTTP clients sharing no transport state.
pub struct HttpClientPool {
    plain: ProxyClient,
    tls: ProxyClient,
}

impl HttpClientPool {
    pub fn new(dial_timeout: Duration, tls_insecure: bool) -> Self {
        Self {
            plain: build_client(dial_timeout, false, false),
            tls: build_client(dial_timeout, true, tls_insecure),
        }
    }

    pub fn for_scheme(&self, scheme: Scheme) -> &ProxyClient {
        match scheme {
            Scheme::Plain => &self.plain,
            Scheme::Tls => &self.tls,
        }
    }
}

fn build_connector(with_tls: bool, tls_insecure: bool, dial_timeout: Duration) -> HttpsConnector<HttpConnector> {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.set_connect_timeout(Some(dial_timeout));
    http.enforce_http(!with_tls);

    if !with_tls {
        return hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);
    }

    if tls_insecure {
        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http)
    }
}

fn build_client(dial_timeout: Duration, with_tls: bool, tls_insecure: bool) -> ProxyClient {
    let connector = build_connector(with_tls, tls_insecure, dial_timeout);
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .build(connector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_both_clients_without_panicking() {
        let pool = HttpClientPool::new(Duration::from_secs(2), false);
        let _ = pool.for_scheme(Scheme::Plain);
        let _ = pool.for_scheme(Scheme::Tls);
    }

    #[test]
    fn builds_insecure_tls_client() {
        let pool = HttpClientPool::new(Duration::from_secs(2), true);
        let _ = pool.for_scheme(Scheme::Tls);
    }
}
