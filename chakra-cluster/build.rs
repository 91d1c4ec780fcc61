fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Control-plane service shared by every node
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/chakra.proto"], &["proto"])?;
    Ok(())
}
