use std::io::Result;

fn main() -> Result<()> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        // Read block payloads as `bytes::Bytes` rather than `Vec<u8>` so
        // the extent-map driver can hand them to the engine without a
        // copy.
        .bytes(["."])
        .compile(&["protos/imgserver.proto"], &["protos"])
}
