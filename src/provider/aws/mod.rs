//! AWS provider: classic ELB for instance groups, Route53 for record sets.
//!
//! # Data Flow
//! ```text
//! ProviderFactory::membership_backend(region)
//!     → ElbClient   POST elasticloadbalancing.<region> (Query API, SigV4)
//! ProviderFactory::record_set_backend(region)
//!     → Route53Client  GET/POST route53 /2013-04-01/hostedzone/<zone>/rrset
//! ```
//!
//! # Design Decisions
//! - Plain signed HTTP through the shared reqwest client; responses are read
//!   with a streaming XML reader, only the fields the manager needs
//! - Route53 is global and always signed for us-east-1
//! - Missing load balancers and hosted zones map to `ProviderError::NotFound`

pub mod elb;
pub mod route53;
pub mod signing;

use std::sync::Arc;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Request, Response};

use crate::config::{ProviderConfig, Route53Config};
use crate::provider::{
    MembershipBackend, ProviderError, ProviderFactory, ProviderResult, RecordSetBackend,
};

pub use elb::ElbClient;
pub use route53::Route53Client;
pub use signing::{Credentials, Signer};

/// Error codes meaning the target does not exist.
const NOT_FOUND_CODES: &[&str] = &["LoadBalancerNotFound", "NoSuchHostedZone"];

/// Builds signed ELB and Route53 clients over one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct AwsProvider {
    http: Client,
    credentials: Credentials,
    elb_endpoint: Option<String>,
    route53_endpoint: Option<String>,
    record_type: String,
}

impl AwsProvider {
    pub fn new(config: &ProviderConfig, route53: &Route53Config) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        Ok(Self {
            http,
            credentials: Credentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
            },
            elb_endpoint: config.elb_endpoint.clone(),
            route53_endpoint: config.route53_endpoint.clone(),
            record_type: route53.record_type.clone(),
        })
    }
}

impl ProviderFactory for AwsProvider {
    fn membership_backend(&self, region: &str) -> Arc<dyn MembershipBackend> {
        let endpoint = self
            .elb_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://elasticloadbalancing.{}.amazonaws.com/", region));
        tracing::debug!(region, endpoint = %endpoint, "ELB client");
        Arc::new(ElbClient::new(
            self.http.clone(),
            endpoint,
            Signer::new(self.credentials.clone(), region, "elasticloadbalancing"),
        ))
    }

    fn record_set_backend(&self, _region: &str) -> Arc<dyn RecordSetBackend> {
        let endpoint = self
            .route53_endpoint
            .clone()
            .unwrap_or_else(|| "https://route53.amazonaws.com".to_string());
        Arc::new(Route53Client::new(
            self.http.clone(),
            endpoint,
            Signer::new(self.credentials.clone(), "us-east-1", "route53"),
            &self.record_type,
        ))
    }
}

/// Sign and send `request`, returning the body of a successful response.
async fn execute(http: &Client, signer: &Signer, mut request: Request, target: &str) -> ProviderResult<String> {
    signer.sign(&mut request, chrono::Utc::now())?;
    let response: Response = http
        .execute(request)
        .await
        .map_err(|e| ProviderError::Api(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::Api(e.to_string()))?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(error_from(status.as_u16(), &body, target))
    }
}

/// Map an AWS error document (`<Error><Code>..<Message>..`) to a provider error.
fn error_from(status: u16, body: &str, target: &str) -> ProviderError {
    let code = first_text(body, &["Error", "Code"]);
    let message = first_text(body, &["Error", "Message"]).unwrap_or_default();
    match code {
        Some(code) if NOT_FOUND_CODES.contains(&code.as_str()) => {
            ProviderError::NotFound(target.to_string())
        }
        Some(code) => ProviderError::Api(format!("{} ({}): {}", code, status, message)),
        None => ProviderError::Api(format!("HTTP {}: {}", status, body.trim())),
    }
}

/// Text of every element whose innermost path ends with `path`, in document
/// order. Unparseable documents yield what was read before the error.
pub(crate) fn texts_at(xml: &str, path: &[&str]) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut found = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(start.local_name().as_ref().to_vec()),
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(text)) => {
                let matches = stack.len() >= path.len()
                    && stack[stack.len() - path.len()..]
                        .iter()
                        .zip(path)
                        .all(|(name, want)| name.as_slice() == want.as_bytes());
                if matches {
                    if let Ok(text) = text.unescape() {
                        found.push(text.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Malformed XML response");
                break;
            }
        }
    }
    found
}

pub(crate) fn first_text(xml: &str, path: &[&str]) -> Option<String> {
    texts_at(xml, path).into_iter().next()
}
