//! gRPC channel to the chain node

use crate::config::ChainConfig;
use crate::error::{CompounderError, CompounderResult};

use std::time::Duration;
use tokio::time::sleep;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::{error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Open the channel shared by every query and broadcast.
///
/// Retries with backoff until the node answers or `connect_timeout_secs`
/// elapses. A malformed endpoint fails at once.
pub async fn connect(config: &ChainConfig) -> CompounderResult<Channel> {
    let uri = endpoint_uri(&config.grpc_endpoint, config.insecure);
    let timeout = Duration::from_secs(config.connect_timeout_secs);

    let connection_error = |message: String| CompounderError::Connection {
        endpoint: uri.clone(),
        message,
    };

    let mut endpoint = Endpoint::from_shared(uri.clone())
        .map_err(|e| connection_error(format!("invalid endpoint: {}", e)))?
        .connect_timeout(timeout);

    if !config.insecure {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new())
            .map_err(|e| connection_error(format!("TLS setup failed: {}", e)))?;
    }

    // Dial until the node answers
    let mut last_error: Option<String> = None;
    let dial = async {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match endpoint.connect().await {
                Ok(channel) => return channel,
                Err(e) => {
                    warn!(
                        "gRPC endpoint {} not reachable (attempt {}): {}, retrying in {:?}",
                        uri, attempt, e, backoff
                    );
                    last_error = Some(e.to_string());
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    };

    let dialed = tokio::time::timeout(timeout, dial).await;
    let channel = match dialed {
        Ok(channel) => channel,
        Err(_) => {
            let reason = last_error.unwrap_or_else(|| "no response".to_string());
            error!(
                "Cannot connect to gRPC endpoint {} within {:?}: {}",
                uri, timeout, reason
            );
            return Err(connection_error(format!(
                "no connection after {:?}: {}",
                timeout, reason
            )));
        }
    };

    info!(
        "Connected to {} ({})",
        uri,
        if config.insecure { "insecure" } else { "tls" }
    );
    Ok(channel)
}

/// Bare `host:port` endpoints get a scheme matching the transport security
fn endpoint_uri(endpoint: &str, insecure: bool) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if insecure {
        format!("http://{}", endpoint)
    } else {
        format!("https://{}", endpoint)
    }
}
