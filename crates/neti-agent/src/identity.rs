//! Host identity from cloud metadata
//!
//! Everything Neti knows about the host it runs on comes from the cloud
//! metadata service: the instance id, the public and private addresses,
//! and — via the VPC probe on the primary interface's hardware address —
//! which realm the host lives in. All of it is fetched once at startup,
//! and any missing field is fatal.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, instrument};

use neti_core::{InstanceId, Realm};

use crate::error::{AgentError, AgentResult};

/// Fixed link-local metadata base URL on a deployed host
pub const METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/";

const INSTANCE_ID_PATH: &str = "instance-id";
const PUBLIC_ADDRESS_PATH: &str = "public-ipv4";
const PRIVATE_ADDRESS_PATH: &str = "local-ipv4";
const MAC_PATH: &str = "mac";

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// This host's identity: instance id, addresses and realm
#[derive(Debug, Clone)]
pub struct HostIdentity {
    instance_id: InstanceId,
    public_ip: Ipv4Addr,
    private_ip: Ipv4Addr,
    realm: Realm,
}

impl HostIdentity {
    /// Fetch the full identity from the metadata service at `base_url`
    /// (injectable for tests; production passes [`METADATA_URL`])
    #[instrument(skip_all)]
    pub async fn discover(base_url: &str) -> AgentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|err| AgentError::MetadataUnavailable(err.to_string()))?;
        let base = base_url.trim_end_matches('/');

        let instance_id = InstanceId::new(fetch(&http, base, INSTANCE_ID_PATH).await?);
        let public_ip = fetch_addr(&http, base, PUBLIC_ADDRESS_PATH).await?;
        let private_ip = fetch_addr(&http, base, PRIVATE_ADDRESS_PATH).await?;

        let mac = fetch(&http, base, MAC_PATH).await?;
        let realm = probe_realm(&http, base, &mac).await?;
        debug!(instance = %instance_id, %realm, "host identity discovered");

        Ok(Self {
            instance_id,
            public_ip,
            private_ip,
            realm,
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn public_address(&self) -> Ipv4Addr {
        self.public_ip
    }

    pub fn private_address(&self) -> Ipv4Addr {
        self.private_ip
    }

    pub fn realm(&self) -> Realm {
        self.realm
    }

    pub fn is_vpc(&self) -> bool {
        self.realm.is_vpc()
    }
}

async fn fetch(http: &reqwest::Client, base: &str, path: &str) -> AgentResult<String> {
    let url = format!("{base}/{path}");
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|err| AgentError::MetadataUnavailable(format!("{path}: {err}")))?;
    if !response.status().is_success() {
        return Err(AgentError::MetadataUnavailable(format!(
            "{path}: status {}",
            response.status()
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|err| AgentError::MetadataUnavailable(format!("{path}: {err}")))?;
    Ok(body.trim().to_string())
}

async fn fetch_addr(http: &reqwest::Client, base: &str, path: &str) -> AgentResult<Ipv4Addr> {
    let raw = fetch(http, base, path).await?;
    raw.parse()
        .map_err(|_| AgentError::MetadataUnavailable(format!("{path}: not an IPv4 address: {raw}")))
}

/// A 200 from the VPC-id endpoint for our interface means the host is in
/// the VPC realm; any other response means legacy. Only a transport-level
/// failure (the service itself unreachable) is an error.
async fn probe_realm(http: &reqwest::Client, base: &str, mac: &str) -> AgentResult<Realm> {
    let url = format!("{base}/network/interfaces/macs/{mac}/vpc-id");
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|err| AgentError::MetadataUnavailable(format!("vpc-id: {err}")))?;
    if response.status().is_success() {
        Ok(Realm::Vpc)
    } else {
        Ok(Realm::Legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/latest/meta-data/")
    }

    fn metadata_routes() -> Router {
        Router::new()
            .route("/latest/meta-data/instance-id", get(|| async { "i-abc123" }))
            .route("/latest/meta-data/public-ipv4", get(|| async { "1.2.3.4" }))
            .route("/latest/meta-data/local-ipv4", get(|| async { "10.0.0.5" }))
            .route("/latest/meta-data/mac", get(|| async { "0a:1b:2c:3d:4e:5f" }))
    }

    #[tokio::test]
    async fn test_discover_vpc_host() {
        let app = metadata_routes().route(
            "/latest/meta-data/network/interfaces/macs/0a:1b:2c:3d:4e:5f/vpc-id",
            get(|| async { "vpc-1234" }),
        );
        let base = serve(app).await;

        let identity = HostIdentity::discover(&base).await.unwrap();
        assert_eq!(identity.instance_id().as_str(), "i-abc123");
        assert_eq!(identity.public_address(), "1.2.3.4".parse::<Ipv4Addr>().unwrap());
        assert_eq!(identity.private_address(), "10.0.0.5".parse::<Ipv4Addr>().unwrap());
        assert!(identity.is_vpc());
    }

    #[tokio::test]
    async fn test_discover_legacy_host() {
        // No vpc-id route: the probe sees a 404 and lands in the legacy realm.
        let base = serve(metadata_routes()).await;

        let identity = HostIdentity::discover(&base).await.unwrap();
        assert_eq!(identity.realm(), Realm::Legacy);
    }

    #[tokio::test]
    async fn test_missing_field_is_fatal() {
        let app = Router::new()
            .route("/latest/meta-data/instance-id", get(|| async { "i-abc123" }));
        let base = serve(app).await;

        let err = HostIdentity::discover(&base).await.unwrap_err();
        assert!(matches!(err, AgentError::MetadataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_malformed_address_is_fatal() {
        let app = Router::new()
            .route("/latest/meta-data/instance-id", get(|| async { "i-abc123" }))
            .route("/latest/meta-data/public-ipv4", get(|| async { "not-an-ip" }))
            .route("/latest/meta-data/local-ipv4", get(|| async { "10.0.0.5" }))
            .route("/latest/meta-data/mac", get(|| async { "aa:bb" }));
        let base = serve(app).await;

        let err = HostIdentity::discover(&base).await.unwrap_err();
        assert!(matches!(err, AgentError::MetadataUnavailable(_)));
    }
}
