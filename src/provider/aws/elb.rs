//! Classic Elastic Load Balancing over the Query API.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::provider::aws::{execute, texts_at, Signer};
use crate::provider::{MembershipBackend, ProviderError, ProviderResult};

const API_VERSION: &str = "2012-06-01";

/// Registers and deregisters instances of classic load balancers in one region.
#[derive(Debug, Clone)]
pub struct ElbClient {
    http: Client,
    endpoint: String,
    signer: Signer,
}

impl ElbClient {
    pub fn new(http: Client, endpoint: String, signer: Signer) -> Self {
        Self {
            http,
            endpoint,
            signer,
        }
    }

    async fn call(&self, action: &str, params: &[(&str, &str)], target: &str) -> ProviderResult<String> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", action)
            .append_pair("Version", API_VERSION)
            .extend_pairs(params)
            .finish();
        let request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
            .body(body)
            .build()
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        tracing::debug!(action, target, region = self.signer.region(), "ELB request");
        execute(&self.http, &self.signer, request, target).await
    }
}

/// Instance ids of the first load balancer in a DescribeLoadBalancers response.
fn parse_instances(xml: &str) -> Vec<String> {
    texts_at(xml, &["Instances", "member", "InstanceId"])
}

#[async_trait]
impl MembershipBackend for ElbClient {
    async fn list_members(&self, load_balancer: &str) -> ProviderResult<Vec<String>> {
        let body = self
            .call(
                "DescribeLoadBalancers",
                &[("LoadBalancerNames.member.1", load_balancer)],
                load_balancer,
            )
            .await?;
        Ok(parse_instances(&body))
    }

    async fn add_member(&self, load_balancer: &str, member: &str) -> ProviderResult<()> {
        self.call(
            "RegisterInstancesWithLoadBalancer",
            &[
                ("LoadBalancerName", load_balancer),
                ("Instances.member.1.InstanceId", member),
            ],
            load_balancer,
        )
        .await
        .map(|_| ())
    }

    async fn remove_member(&self, load_balancer: &str, member: &str) -> ProviderResult<()> {
        self.call(
            "DeregisterInstancesFromLoadBalancer",
            &[
                ("LoadBalancerName", load_balancer),
                ("Instances.member.1.InstanceId", member),
            ],
            load_balancer,
        )
        .await
        .map(|_| ())
    }
}
