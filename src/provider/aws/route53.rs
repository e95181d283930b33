//! Route53 record sets over the REST API.

use async_trait::async_trait;
use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::provider::aws::{execute, first_text, texts_at, Signer};
use crate::provider::{ProviderError, ProviderResult, RecordSet, RecordSetBackend};

const API_VERSION: &str = "2013-04-01";
const XMLNS: &str = "https://route53.amazonaws.com/doc/2013-04-01/";

/// Reads and upserts record sets of hosted zones.
#[derive(Debug, Clone)]
pub struct Route53Client {
    http: Client,
    endpoint: String,
    signer: Signer,
    record_type: String,
}

/// Zone ids are accepted with or without the `/hostedzone/` prefix.
fn zone_id(zone: &str) -> &str {
    zone.trim_start_matches("/hostedzone/")
}

/// Route53 returns fully qualified names with a trailing dot.
fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}

fn change_batch(record: &RecordSet) -> String {
    let values: String = record
        .values
        .iter()
        .map(|value| format!("<ResourceRecord><Value>{}</Value></ResourceRecord>", escape(value)))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ChangeResourceRecordSetsRequest xmlns="{}"><ChangeBatch><Changes><Change><Action>UPSERT</Action><ResourceRecordSet><Name>{}</Name><Type>{}</Type><TTL>{}</TTL><ResourceRecords>{}</ResourceRecords></ResourceRecordSet></Change></Changes></ChangeBatch></ChangeResourceRecordSetsRequest>"#,
        XMLNS,
        escape(&record.name),
        escape(&record.record_type),
        record.ttl,
        values
    )
}

/// Values of the first record set in a listing, if it is `name` of `record_type`.
fn parse_record(xml: &str, name: &str, record_type: &str) -> Vec<String> {
    let listed_name = first_text(xml, &["ResourceRecordSet", "Name"]);
    let listed_type = first_text(xml, &["ResourceRecordSet", "Type"]);
    match (listed_name, listed_type) {
        (Some(listed_name), Some(listed_type))
            if same_name(&listed_name, name) && listed_type == record_type =>
        {
            texts_at(xml, &["ResourceRecord", "Value"])
        }
        _ => Vec::new(),
    }
}

impl Route53Client {
    pub fn new(http: Client, endpoint: String, signer: Signer, record_type: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            signer,
            record_type: record_type.to_string(),
        }
    }

    fn rrset_url(&self, zone: &str) -> String {
        format!(
            "{}/{}/hostedzone/{}/rrset",
            self.endpoint,
            API_VERSION,
            zone_id(zone)
        )
    }
}

#[async_trait]
impl RecordSetBackend for Route53Client {
    async fn get_record(&self, zone: &str, name: &str) -> ProviderResult<Vec<String>> {
        // Listing starts at the given name and type; the first entry may be a neighbour.
        let request = self
            .http
            .get(self.rrset_url(zone))
            .query(&[
                ("name", name),
                ("type", self.record_type.as_str()),
                ("maxitems", "1"),
            ])
            .build()
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        let body = execute(&self.http, &self.signer, request, zone).await?;
        Ok(parse_record(&body, name, &self.record_type))
    }

    async fn upsert_record(&self, zone: &str, record: &RecordSet) -> ProviderResult<()> {
        let request = self
            .http
            .post(self.rrset_url(zone))
            .header(CONTENT_TYPE, "text/xml")
            .body(change_batch(record))
            .build()
            .map_err(|e| ProviderError::Api(e.to_string()))?;
        tracing::debug!(zone, name = %record.name, values = ?record.values, "Route53 upsert");
        execute(&self.http, &self.signer, request, zone).await.map(|_| ())
    }
}
