//! S3 as a range source.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{error::SdkError, primitives::ByteStream, Client};
use burst::{
	error::{Error, ErrorKind},
	source::{parse_content_range, ChunkStream, RangeSource, SuffixFetch},
};
use tracing::{debug, instrument};

/// Ranged GetObject reads against one S3 object.
pub struct S3RangeSource {
	client: Client,
	bucket: String,
	key: String,
}

impl S3RangeSource {
	/// Resolve credentials and region, and build the client.
	///
	/// Profile resolution is the SDK's: an explicit `--profile` wins,
	/// otherwise `AWS_PROFILE` and the default chain apply.
	// TODO: size the smithy HTTP connector pool from `connections` once the
	// SDK exposes pool limits; for now the flag only caps concurrency at
	// the coordinator.
	#[instrument(level = "debug", skip(connections))]
	pub async fn connect(
		bucket: String,
		key: String,
		region: Option<String>,
		profile: Option<String>,
		connections: u16,
	) -> Result<Self, Error> {
		let mut loader = aws_config::defaults(BehaviorVersion::latest());
		if let Some(profile) = profile {
			loader = loader.profile_name(profile);
		}
		if let Some(region) = region {
			loader = loader.region(Region::new(region));
		}
		let config = loader.load().await;
		debug!(region = ?config.region(), %connections, "s3 client configured");

		Ok(Self {
			client: Client::new(&config),
			bucket,
			key,
		})
	}

	async fn get(&self, range: String) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput, Error> {
		self.client
			.get_object()
			.bucket(&self.bucket)
			.key(&self.key)
			.range(range)
			.send()
			.await
			.map_err(map_sdk_error)
	}
}

#[async_trait]
impl RangeSource for S3RangeSource {
	async fn read_range(&self, start: u64, end: u64) -> Result<ChunkStream, Error> {
		let response = self.get(format!("bytes={start}-{end}")).await?;
		Ok(chunk_stream(response.body))
	}

	async fn read_suffix(&self, length: u64) -> Result<SuffixFetch, Error> {
		let response = self.get(format!("bytes=-{length}")).await?;
		let content_range = response.content_range().ok_or_else(|| {
			Error::new(ErrorKind::Network)
				.with_message("suffix response without a Content-Range header")
		})?;
		let (start, _, total_size) = parse_content_range(content_range)?;

		Ok(SuffixFetch {
			start,
			total_size,
			chunks: chunk_stream(response.body),
		})
	}
}

fn chunk_stream(body: ByteStream) -> ChunkStream {
	Box::pin(futures::stream::try_unfold(body, |mut body| async move {
		match body.try_next().await {
			Ok(next) => Ok(next.map(|chunk| (chunk, body))),
			Err(err) => Err(Error::new(ErrorKind::Network)
				.with_message(format!("response body: {err}"))),
		}
	}))
}

fn map_sdk_error<E>(err: SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> Error
where
	E: std::error::Error + Send + Sync + 'static,
{
	let message = format!("{}", aws_sdk_s3::error::DisplayErrorContext(&err));
	match &err {
		SdkError::ServiceError(context) => match context.raw().status().as_u16() {
			401 | 403 => Error::new(ErrorKind::Auth).with_message(message),
			code => Error::new(ErrorKind::HttpStatus(code)).with_message(message),
		},
		SdkError::TimeoutError(_) => Error::new(ErrorKind::Timeout),
		SdkError::ConstructionFailure(_) => {
			Error::new(ErrorKind::Auth).with_message(message)
		}
		_ => Error::new(ErrorKind::Network).with_message(message),
	}
}
