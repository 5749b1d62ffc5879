//! AWS S3 (and S3-compatible) object store

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::{
    ByteStream, CompletedPart, DeleteFailure, ListPage, MultipartSession, ObjectStore,
    ObjectSummary, Payload, PendingUpload,
};
use crate::uri::ObjectRef;
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream as AwsByteStream, DateTime};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as AwsCompletedPart, Delete, ObjectCannedAcl,
    ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Object store backed by the AWS SDK
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

fn aws_error<E: std::error::Error>(e: E) -> Error {
    Error::Aws {
        message: DisplayErrorContext(&e).to_string(),
    }
}

fn system_time(t: &DateTime) -> Option<SystemTime> {
    UNIX_EPOCH.checked_add(Duration::from_secs(t.secs().max(0) as u64))
}

fn delimiter_opt(delimiter: &str) -> Option<String> {
    (!delimiter.is_empty()).then(|| delimiter.to_string())
}

impl S3Store {
    /// Build a client from the AWS environment chain plus config overrides
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "bucketsync-config",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            tracing::debug!(endpoint = %endpoint, "Using custom S3 endpoint");
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let output = self
            .client
            .list_objects()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter_opt(delimiter))
            .set_marker(marker.map(str::to_string))
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| Error::Listing {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                    last_modified: obj.last_modified().and_then(system_time),
                })
            })
            .collect();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        Ok(ListPage {
            objects,
            common_prefixes,
            next_marker: output.next_marker().map(str::to_string),
            truncated: output.is_truncated().unwrap_or(false),
        })
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<ByteStream> {
        use tokio_util::io::ReaderStream;

        let output = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(aws_error)?;

        // Stream the body instead of collecting it
        let async_read = output.body.into_async_read();
        let stream = ReaderStream::new(async_read).map(|result| {
            result.map(Bytes::from).map_err(|e| Error::Aws {
                message: format!("Error reading S3 stream: {}", e),
            })
        });

        Ok(stream.boxed())
    }

    async fn put_object(
        &self,
        object: &ObjectRef,
        payload: Payload,
        content_type: &str,
        acl: Option<&str>,
    ) -> Result<()> {
        let size = payload.len();
        let body = match payload {
            Payload::Bytes(data) => AwsByteStream::from(data),
            Payload::File { path, .. } => AwsByteStream::from_path(&path)
                .await
                .map_err(|e| Error::storage(format!("opening {}: {}", path.display(), e)))?,
        };

        self.client
            .put_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .content_type(content_type)
            .content_length(size as i64)
            .set_acl(acl.map(ObjectCannedAcl::from))
            .body(body)
            .send()
            .await
            .map_err(aws_error)?;

        Ok(())
    }

    async fn copy_object(
        &self,
        dest: &ObjectRef,
        source: &ObjectRef,
        acl: Option<&str>,
    ) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .copy_source(source.copy_source())
            .set_acl(acl.map(ObjectCannedAcl::from))
            .send()
            .await
            .map_err(aws_error)?;

        Ok(())
    }

    async fn initiate_multipart(
        &self,
        object: &ObjectRef,
        content_type: &str,
        acl: Option<&str>,
    ) -> Result<MultipartSession> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&object.bucket)
            .key(&object.key)
            .content_type(content_type)
            .set_acl(acl.map(ObjectCannedAcl::from))
            .send()
            .await
            .map_err(aws_error)?;

        let upload_id = output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::multipart("no upload ID returned", None))?;

        Ok(MultipartSession {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart> {
        let size = data.len() as u64;
        let output = self
            .client
            .upload_part()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number)
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(aws_error)?;

        let etag = output.e_tag().map(str::to_string).ok_or_else(|| {
            Error::multipart("no ETag returned for part", Some(session.upload_id.as_str()))
        })?;

        Ok(CompletedPart {
            part_number,
            etag,
            size,
        })
    }

    async fn copy_part(
        &self,
        session: &MultipartSession,
        part_number: i32,
        source: &ObjectRef,
        source_size: u64,
    ) -> Result<CompletedPart> {
        let output = self
            .client
            .upload_part_copy()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number)
            .copy_source(source.copy_source())
            .send()
            .await
            .map_err(aws_error)?;

        let etag = output
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::multipart(
                    "no ETag returned for copied part",
                    Some(session.upload_id.as_str()),
                )
            })?;

        Ok(CompletedPart {
            part_number,
            etag,
            size: source_size,
        })
    }

    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let aws_parts: Vec<AwsCompletedPart> = parts
            .iter()
            .map(|p| {
                AwsCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(aws_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                Error::multipart(
                    DisplayErrorContext(&e).to_string(),
                    Some(session.upload_id.as_str()),
                )
            })?;

        Ok(())
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .send()
            .await
            .map_err(|e| {
                Error::multipart(
                    DisplayErrorContext(&e).to_string(),
                    Some(session.upload_id.as_str()),
                )
            })?;

        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
        quiet: bool,
    ) -> Result<Vec<DeleteFailure>> {
        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build().map_err(aws_error))
            .collect::<Result<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(quiet)
            .build()
            .map_err(aws_error)?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(aws_error)?;

        Ok(output
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or_default().to_string(),
                message: format!(
                    "{}: {}",
                    e.code().unwrap_or("Unknown"),
                    e.message().unwrap_or_default()
                ),
            })
            .collect())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<(Vec<PendingUpload>, Vec<String>)> {
        let mut uploads = Vec::new();
        let mut prefixes = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .prefix(prefix)
                .set_delimiter(delimiter_opt(delimiter))
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .map_err(aws_error)?;

            for upload in output.uploads() {
                let (Some(key), Some(upload_id)) = (upload.key(), upload.upload_id()) else {
                    continue;
                };
                uploads.push(PendingUpload {
                    session: MultipartSession {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    },
                    initiated: upload.initiated().and_then(system_time),
                });
            }
            prefixes.extend(
                output
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix().map(str::to_string)),
            );

            if !output.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = output.next_key_marker().map(str::to_string);
            upload_id_marker = output.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }

        Ok((uploads, prefixes))
    }

    async fn list_parts(&self, session: &MultipartSession) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_parts()
                .bucket(&session.bucket)
                .key(&session.key)
                .upload_id(&session.upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await
                .map_err(aws_error)?;

            parts.extend(output.parts().iter().filter_map(|p| {
                Some(CompletedPart {
                    part_number: p.part_number()?,
                    etag: p.e_tag()?.to_string(),
                    size: p.size().unwrap_or(0).max(0) as u64,
                })
            }));

            if !output.is_truncated().unwrap_or(false) {
                break;
            }
            marker = output.next_part_number_marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }

        Ok(parts)
    }
}
