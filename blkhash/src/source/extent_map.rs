//! Extent-map driver over a gRPC image-server connection (spec.md §4.5c,
//! §6.3).
//!
//! The connector is the same lazy-dial-over-`UnixStream` pattern as
//! `castore`'s `grpc+unix://` support; the read scheduler is the same
//! `buffered(n)` shape as `castore::import::fs::dir_entries_to_ingestion_stream`,
//! which gives us in-order completion commitment for free — `buffered`
//! yields items in input order regardless of which future finishes first.

use std::path::PathBuf;

use futures::stream::StreamExt;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};

use crate::cancel::CancellationToken;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::extent::{Extent, ExtentKind};
use crate::imgserver::image_server_client::ImageServerClient;
use crate::imgserver::{ExtentKindProto, ListExtentsRequest, ReadBlockRequest};
use crate::source::DEFAULT_READ_SIZE;

/// Default in-flight read count (spec.md §4.5c, "default 16, floor-raised
/// to match thread count").
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

pub struct ExtentMapSource {
    client: ImageServerClient<Channel>,
    queue_depth: usize,
    read_size: usize,
}

impl ExtentMapSource {
    /// Connect lazily to an image server listening on a Unix socket, e.g.
    /// the path carried by an `nbd+unix:///?socket=…` CLI argument.
    pub async fn connect_unix(socket_path: PathBuf, queue_depth: usize) -> Result<Self> {
        let channel = Endpoint::from_static("http://[::]:50051")
            .connect_with_connector_lazy(tower::service_fn(move |_: Uri| {
                UnixStream::connect(socket_path.clone())
            }));

        Ok(Self {
            client: ImageServerClient::new(channel),
            queue_depth: queue_depth.max(1),
            read_size: DEFAULT_READ_SIZE,
        })
    }

    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    /// Drive `engine` to completion: list the whole extent map, then for
    /// every `data` extent issue up to `queue_depth` reads in flight,
    /// committing strictly in image order (spec.md §4.5c).
    pub async fn run(mut self, engine: &mut Engine, cancel: &CancellationToken) -> Result<()> {
        let extents = self.list_extents().await?;

        for extent in extents {
            cancel.check()?;

            match extent.kind {
                ExtentKind::Zero | ExtentKind::Hole => {
                    engine.update_zeros(extent.length)?;
                }
                ExtentKind::Data => {
                    self.run_data_extent(engine, cancel, extent).await?;
                }
            }
        }

        Ok(())
    }

    async fn list_extents(&mut self) -> Result<Vec<Extent>> {
        let mut stream = self
            .client
            .list_extents(ListExtentsRequest {})
            .await?
            .into_inner();

        let mut extents = Vec::new();
        while let Some(proto) = stream.message().await? {
            let kind = match ExtentKindProto::try_from(proto.kind) {
                Ok(ExtentKindProto::Data) => ExtentKind::Data,
                Ok(ExtentKindProto::Zero) => ExtentKind::Zero,
                Ok(ExtentKindProto::Hole) | Err(_) => ExtentKind::Hole,
            };
            extents.push(Extent::new(proto.offset, proto.length, kind));
        }
        Ok(extents)
    }

    async fn run_data_extent(
        &mut self,
        engine: &mut Engine,
        cancel: &CancellationToken,
        extent: Extent,
    ) -> Result<()> {
        let mut reads = Vec::new();
        let mut offset = extent.offset;
        while offset < extent.end() {
            let length = (self.read_size as u64).min(extent.end() - offset);
            reads.push((offset, length));
            offset += length;
        }

        let client = self.client.clone();
        let mut completions = futures::stream::iter(reads)
            .map(|(offset, length)| {
                let mut client = client.clone();
                async move {
                    let response = client
                        .read_block(ReadBlockRequest { offset, length })
                        .await?;
                    Ok::<_, Error>((length, response.into_inner().data))
                }
            })
            .buffered(self.queue_depth);

        while let Some(completion) = completions.next().await {
            cancel.check()?;
            let (expected, data) = completion?;
            if data.len() as u64 != expected {
                return Err(Error::UnexpectedEOF {
                    offset: extent.offset,
                    expected: extent.length,
                });
            }
            engine.update(data)?;
        }

        Ok(())
    }
}
