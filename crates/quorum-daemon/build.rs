fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_file = "proto/backend.proto";
    let proto_dir = "proto";

    println!("cargo:rerun-if-changed={}", proto_file);
    println!("cargo:rerun-if-changed={}", proto_dir);

    // the daemon only ever calls the backend
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile(&[proto_file], &[proto_dir])?;

    Ok(())
}
