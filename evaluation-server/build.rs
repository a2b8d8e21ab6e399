fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&["proto/evaluation/v1/evaluation.proto"], &["proto"])?;

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/orchestrator/v1/orchestrator.proto"], &["proto"])?;

    Ok(())
}
