// Code generation for the monitor gRPC protocol

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/monitor.proto"], &["proto"])?;
    Ok(())
}
