//! Information about a live connection.
//!
//! TLS information is only available once the handshake has completed, so it
//! is captured at that point rather than read from the stream on demand.

use std::net::SocketAddr;

use crate::resolve::ResolvedEndpoint;

/// Addresses and security details of a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// The endpoint the connection was made to.
    pub endpoint: ResolvedEndpoint,

    /// Local socket address.
    pub local_addr: SocketAddr,

    /// Remote socket address.
    pub remote_addr: SocketAddr,

    /// Present when the connection was upgraded to TLS.
    pub tls: Option<TlsConnectionInfo>,
}

/// Information about a TLS session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConnectionInfo {
    /// The name the server's identity was checked against.
    pub server_name: String,

    /// Negotiated protocol version, e.g. `TLSv1_3`.
    pub protocol_version: Option<String>,

    /// Negotiated cipher suite, e.g. `TLS13_AES_256_GCM_SHA384`.
    pub cipher_suite: Option<String>,

    /// Negotiated application protocol.
    pub alpn: Option<Vec<u8>>,
}

impl TlsConnectionInfo {
    pub(crate) fn client(server_name: String, session: &rustls::ClientConnection) -> Self {
        Self {
            server_name,
            protocol_version: session.protocol_version().map(|v| format!("{v:?}")),
            cipher_suite: session
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite())),
            alpn: session.alpn_protocol().map(<[u8]>::to_vec),
        }
    }
}
