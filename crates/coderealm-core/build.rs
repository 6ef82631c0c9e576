/// Generates the `code_execution` messages and the `CodeExecutionService`
/// client from `proto/code_execution.proto` into `OUT_DIR`.
///
/// Only the client is built; the execution engine implements the server side.
///
/// # Panics
///
/// Panics if `protoc` is missing or the proto file does not compile.
fn main() {
    let config = tonic_prost_build::Config::new();

    tonic_prost_build::configure()
        .build_server(false)
        .compile_with_config(config, &["proto/code_execution.proto"], &["proto"])
        .unwrap();
}
