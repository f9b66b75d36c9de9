//! S3 summary persistence over SigV4-signed REST calls.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::persistence::SummaryPersistence;
use crate::error::PersistenceError;
use crate::models::SummaryConfig;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials read from the standard environment variables.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, PersistenceError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| PersistenceError::Credentials("AWS_ACCESS_KEY_ID not set".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            PersistenceError::Credentials("AWS_SECRET_ACCESS_KEY not set".to_string())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Summary stores under `s3://{bucket}/{prefix}`.
#[derive(Debug, Clone)]
pub struct S3Persistence {
    client: Client,
    bucket: String,
    prefix: String,
    region: String,
    endpoint: Option<String>,
    credentials: AwsCredentials,
}

impl S3Persistence {
    pub fn from_config(config: &SummaryConfig) -> Result<Self, PersistenceError> {
        let bucket = config
            .s3_bucket
            .clone()
            .ok_or_else(|| PersistenceError::Request("summary.s3_bucket is not configured".to_string()))?;
        Ok(Self::new(
            bucket,
            config.s3_prefix.clone(),
            config.s3_region.clone(),
            config.s3_endpoint.clone(),
            AwsCredentials::from_env()?,
        ))
    }

    pub fn new(
        bucket: String,
        prefix: String,
        region: String,
        endpoint: Option<String>,
        credentials: AwsCredentials,
    ) -> Self {
        Self {
            client: Client::new(),
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
            region,
            endpoint,
            credentials,
        }
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    /// Scheme, host and bucket path prefix. Custom endpoints (MinIO, LocalStack) use
    /// path-style addressing, AWS uses virtual-hosted style.
    fn addressing(&self) -> (&str, String, String) {
        match self.endpoint {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") { "http" } else { "https" };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (scheme, host, format!("/{}", uri_encode(&self.bucket)))
            }
            None => (
                "https",
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                String::new(),
            ),
        }
    }

    async fn send(
        &self,
        method: Method,
        object_key: Option<&str>,
        query_params: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response, PersistenceError> {
        let (scheme, host, bucket_path) = self.addressing();
        let encoded_key = object_key
            .map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"))
            .unwrap_or_default();
        let canonical_uri = format!("{}/{}", bucket_path, encoded_key);

        let mut sorted_params: Vec<(&str, &str)> = query_params.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(b.0));
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url = format!("{}?{}", url, canonical_querystring);
        }

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .body(body);
        if let Some(ref token) = self.credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }

        request
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))
    }

    async fn error_from(response: reqwest::Response) -> PersistenceError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        PersistenceError::ObjectStore {
            status,
            message: body.chars().take(500).collect(),
        }
    }

    /// List every key under `prefix`, following continuation tokens.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut params = vec![("list-type", "2"), ("max-keys", "1000"), ("prefix", prefix)];
            if let Some(ref token) = continuation_token {
                params.push(("continuation-token", token.as_str()));
            }

            let response = self.send(Method::GET, None, &params, Vec::new()).await?;
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }
            let xml = response
                .text()
                .await
                .map_err(|e| PersistenceError::Request(e.to_string()))?;
            let page = parse_list_response(&xml);
            keys.extend(page.keys);

            match page.next_token {
                Some(token) if page.truncated => continuation_token = Some(token),
                _ => break,
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl SummaryPersistence for S3Persistence {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let object_key = self.object_key(key);
        let response = self.send(Method::GET, Some(&object_key), &[], Vec::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let object_key = self.object_key(key);
        let response = self.send(Method::PUT, Some(&object_key), &[], bytes).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), PersistenceError> {
        let prefix = format!("{}/", self.object_key(prefix.trim_end_matches('/')));
        let keys = self.list_keys(&prefix).await?;
        debug!(prefix = %prefix, objects = keys.len(), "deleting summary objects");
        for key in keys {
            let response = self.send(Method::DELETE, Some(&key), &[], Vec::new()).await?;
            if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
                return Err(Self::error_from(response).await);
            }
        }
        Ok(())
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }
}

#[derive(Debug, Default, PartialEq)]
struct ListPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

/// Pull `Key`, `IsTruncated` and `NextContinuationToken` out of a ListObjectsV2 response.
fn parse_list_response(xml: &str) -> ListPage {
    let mut reader = Reader::from_str(xml);
    let mut page = ListPage::default();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
            }
            Ok(Event::Text(t)) => {
                let Ok(text) = t.unescape() else { continue };
                match current.as_deref() {
                    Some("Key") => page.keys.push(text.to_string()),
                    Some("IsTruncated") => page.truncated = text.trim() == "true",
                    Some("NextContinuationToken") => page.next_token = Some(text.to_string()),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    page
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` unescaped.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("doc_summary_index_1"), "doc_summary_index_1");
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_signing_key_matches_aws_example() {
        // Example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_addressing_styles() {
        let aws = S3Persistence::new("kb".into(), "/rag/".into(), "eu-west-1".into(), None, credentials());
        assert_eq!(aws.addressing().1, "kb.s3.eu-west-1.amazonaws.com");
        assert_eq!(aws.object_key("doc_summary_index_global/docstore.json"), "rag/doc_summary_index_global/docstore.json");

        let minio = S3Persistence::new(
            "kb".into(),
            String::new(),
            "us-east-1".into(),
            Some("http://localhost:9000/".into()),
            credentials(),
        );
        let (scheme, host, path) = minio.addressing();
        assert_eq!((scheme, host.as_str(), path.as_str()), ("http", "localhost:9000", "/kb"));
        assert_eq!(minio.location(), "s3://kb/");
    }

    #[test]
    fn test_parse_list_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <IsTruncated>true</IsTruncated>
  <Contents><Key>rag/doc_summary_index_1/docstore.json</Key><Size>10</Size></Contents>
  <Contents><Key>rag/doc_summary_index_1/other.json</Key></Contents>
  <NextContinuationToken>abc==</NextContinuationToken>
</ListBucketResult>"#;
        let page = parse_list_response(xml);
        assert_eq!(page.keys.len(), 2);
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("abc=="));
    }
}
