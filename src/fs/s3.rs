use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use opendal::{services::S3, Operator};
use reqsign::{AwsConfig, AwsCredential, AwsDefaultLoader, AwsV4Signer};
use reqwest::header::{
    HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES,
};
use reqwest::{Body, Client, Method, Request, Url};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::SyncOptions;
use crate::fs::store::{ObjectStore, PutRequest, RemoteObject};

const X_AMZ_ACL: HeaderName = HeaderName::from_static("x-amz-acl");

/// Where upload signing credentials come from.
enum CredentialSource {
    Static(AwsCredential),
    /// Environment, shared config files, then instance metadata.
    Chain(AwsDefaultLoader),
}

/// S3 and S3-compatible object store.
///
/// Listing, stat and delete go through OpenDAL. Uploads are signed PUTs so
/// they can carry the canned ACL and `Expires` header OpenDAL's writer
/// does not expose.
pub struct S3Store {
    operator: Operator,
    http: Client,
    signer: AwsV4Signer,
    credentials: CredentialSource,
    endpoint: String,
    bucket: String,
    prefix: String,
}

impl S3Store {
    /// Build a store from validated sync options.
    ///
    /// Without explicit credentials the standard AWS chain is used
    /// (environment, shared credentials file, instance profile).
    pub fn from_options(options: &SyncOptions) -> Result<Self> {
        let prefix = options.prefix.clone().unwrap_or_default();
        let endpoint = options
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", options.region));
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let mut builder = S3::default()
            .bucket(&options.bucket)
            .region(&options.region)
            .endpoint(&endpoint)
            .root(&format!("/{}", prefix.trim_matches('/')));

        let http = Client::new();
        let credentials = match &options.credentials {
            Some(credentials) => {
                builder = builder
                    .access_key_id(&credentials.access_key_id)
                    .secret_access_key(&credentials.secret_access_key);
                CredentialSource::Static(AwsCredential {
                    access_key_id: credentials.access_key_id.clone(),
                    secret_access_key: credentials.secret_access_key.clone(),
                    ..Default::default()
                })
            }
            None => {
                let config = AwsConfig::default().from_profile().from_env();
                CredentialSource::Chain(AwsDefaultLoader::new(http.clone(), config))
            }
        };

        let operator = Operator::new(builder)
            .context("Failed to configure S3 client")?
            .finish();

        Ok(Self {
            operator,
            http,
            signer: AwsV4Signer::new("s3", &options.region),
            credentials,
            endpoint,
            bucket: options.bucket.clone(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    fn to_remote(key: &str, metadata: &opendal::Metadata) -> RemoteObject {
        RemoteObject {
            key: key.trim_start_matches('/').to_string(),
            last_modified: metadata
                .last_modified()
                .and_then(|t| parse_timestamp(&t.to_string())),
            etag: metadata.etag().map(|e| e.trim_matches('"').to_string()),
        }
    }

    /// Path-style URL of `key`, prefix included.
    fn object_url(&self, key: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid S3 endpoint {}", self.endpoint))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("S3 endpoint {} cannot hold a path", self.endpoint))?;
            segments.pop_if_empty().push(&self.bucket);
            for part in self.prefix.split('/').chain(key.split('/')).filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }
        Ok(url)
    }

    /// Unsigned PUT for `request` with every upload header attached.
    fn put_request(&self, request: &PutRequest, body: Body) -> Result<Request> {
        let mut put = Request::new(Method::PUT, self.object_url(&request.key)?);

        let headers = put.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(&request.content_type)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(request.content_length));
        headers.insert(X_AMZ_ACL, HeaderValue::from_static(request.acl.as_str()));
        if let Some(cache_control) = &request.cache_control {
            headers.insert(CACHE_CONTROL, HeaderValue::from_str(cache_control)?);
        }
        if let Some(expires) = &request.expires {
            headers.insert(EXPIRES, HeaderValue::from_str(expires)?);
        }
        if let Some(encoding) = &request.content_encoding {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_str(encoding)?);
        }

        *put.body_mut() = Some(body);
        Ok(put)
    }

    async fn credential(&self) -> Result<AwsCredential> {
        match &self.credentials {
            CredentialSource::Static(credential) => Ok(credential.clone()),
            CredentialSource::Chain(loader) => loader
                .load()
                .await?
                .ok_or_else(|| anyhow!("No AWS credentials found in environment or profile")),
        }
    }
}

/// OpenDAL timestamps render as RFC 3339; older releases used chrono's
/// `2024-01-01 00:00:00 UTC` form.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw.trim_end_matches(" UTC"), "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|n| n.and_utc())
        })
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let entries = self
            .operator
            .list_with("")
            .recursive(true)
            .await
            .context("Failed to list S3 objects")?;

        let mut result = Vec::with_capacity(entries.len());
        for entry in entries {
            let metadata = entry.metadata();
            if metadata.mode().is_dir() || entry.path().is_empty() {
                continue;
            }
            result.push(Self::to_remote(entry.path(), metadata));
        }

        Ok(result)
    }

    async fn stat(&self, key: &str) -> Result<RemoteObject> {
        let metadata = self
            .operator
            .stat(key)
            .await
            .with_context(|| format!("Failed to stat S3 object {}", key))?;
        Ok(Self::to_remote(key, &metadata))
    }

    async fn put(&self, request: PutRequest) -> Result<()> {
        let file = tokio::fs::File::open(&request.source)
            .await
            .with_context(|| format!("Failed to open {}", request.source.display()))?;
        let body = Body::wrap_stream(ReaderStream::new(file));

        let mut put = self.put_request(&request, body)?;
        let credential = self.credential().await?;
        self.signer
            .sign(&mut put, &credential)
            .context("Failed to sign S3 upload")?;

        debug!(key = %request.key, bytes = request.content_length, acl = request.acl.as_str(), "PUT");
        let response = self
            .http
            .execute(put)
            .await
            .with_context(|| format!("Failed to upload {} to S3", request.key))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("S3 rejected upload of {}: {} {}", request.key, status, detail.trim());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.operator
            .delete(key)
            .await
            .with_context(|| format!("Failed to delete S3 object {}", key))?;
        Ok(())
    }

    fn display_name(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }
}
