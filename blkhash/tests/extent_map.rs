//! Extent-map driver against an in-process image server (spec.md §4.5c,
//! §6.3), grounded on the same gRPC-over-`UnixStream` test shape as
//! `castore::utils::gen_directorysvc_grpc_client`: bind a `UnixListener`
//! in a tempdir, serve the contract, and drive a real client against it.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{Request, Response, Status};

use blkhash::cancel::CancellationToken;
use blkhash::engine::{Config, Engine};
use blkhash::imgserver::image_server_server::{ImageServer, ImageServerServer};
use blkhash::imgserver::{
    ExtentKindProto, ExtentProto, ListExtentsRequest, ReadBlockRequest, ReadBlockResponse,
};
use blkhash::source::extent_map::ExtentMapSource;

/// Serves `head` as one `data` extent, `hole_len` zero bytes as a `hole`
/// extent, then `tail` as a second `data` extent.
struct TestServer {
    head: Bytes,
    hole_len: u64,
    tail: Bytes,
}

impl TestServer {
    fn read(&self, offset: u64, length: u64) -> Bytes {
        let offset = offset as usize;
        let length = length as usize;
        let head_end = self.head.len();
        let tail_start = head_end + self.hole_len as usize;

        if offset + length <= head_end {
            self.head.slice(offset..offset + length)
        } else {
            let rel = offset - tail_start;
            self.tail.slice(rel..rel + length)
        }
    }
}

#[tonic::async_trait]
impl ImageServer for TestServer {
    type ListExtentsStream =
        Pin<Box<dyn Stream<Item = Result<ExtentProto, Status>> + Send + 'static>>;

    async fn list_extents(
        &self,
        _request: Request<ListExtentsRequest>,
    ) -> Result<Response<Self::ListExtentsStream>, Status> {
        let extents = vec![
            Ok(ExtentProto {
                offset: 0,
                length: self.head.len() as u64,
                kind: ExtentKindProto::Data as i32,
            }),
            Ok(ExtentProto {
                offset: self.head.len() as u64,
                length: self.hole_len,
                kind: ExtentKindProto::Hole as i32,
            }),
            Ok(ExtentProto {
                offset: self.head.len() as u64 + self.hole_len,
                length: self.tail.len() as u64,
                kind: ExtentKindProto::Data as i32,
            }),
        ];
        Ok(Response::new(Box::pin(futures::stream::iter(extents))))
    }

    async fn read_block(
        &self,
        request: Request<ReadBlockRequest>,
    ) -> Result<Response<ReadBlockResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(ReadBlockResponse {
            data: self.read(req.offset, req.length),
        }))
    }
}

async fn spawn_server(socket_path: std::path::PathBuf, server: TestServer) {
    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
    let incoming = UnixListenerStream::new(listener);
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(ImageServerServer::new(server))
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    for _ in 0..50 {
        if socket_path.exists() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("image server socket was never created");
}

#[tokio::test]
async fn extent_map_matches_flat_equivalent() {
    let tmpdir = tempfile::tempdir().unwrap();
    let socket_path = tmpdir.path().join("imgserver.sock");

    let head = Bytes::from_static(&[0xAAu8; 32 * 1024]);
    let tail = Bytes::from_static(&[0xBBu8; 32 * 1024]);
    let hole_len = 64 * 1024u64;

    spawn_server(
        socket_path.clone(),
        TestServer {
            head: head.clone(),
            hole_len,
            tail: tail.clone(),
        },
    )
    .await;

    let mut via_extent_map = Engine::new(Config::default()).unwrap();
    let source = ExtentMapSource::connect_unix(socket_path, 4).await.unwrap();
    source
        .run(&mut via_extent_map, &CancellationToken::new())
        .await
        .unwrap();
    let via_extent_map_digest = via_extent_map.finalize().unwrap();

    let mut via_flat = Engine::new(Config::default()).unwrap();
    via_flat.update(head).unwrap();
    via_flat.update_zeros(hole_len).unwrap();
    via_flat.update(tail).unwrap();
    let via_flat_digest = via_flat.finalize().unwrap();

    assert_eq!(via_extent_map_digest, via_flat_digest);
}
