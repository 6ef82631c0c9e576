//! Bindings for the `code_execution.CodeExecutionService` gRPC service,
//! generated from `proto/code_execution.proto` at build time.

tonic::include_proto!("code_execution");

/// Client for the execution engine over a tonic [`Channel`].
///
/// Cloning is cheap: clones share the underlying channel, which multiplexes
/// concurrent calls over one HTTP/2 connection.
///
/// [`Channel`]: tonic::transport::Channel
pub type CodeExecutionClient =
    code_execution_service_client::CodeExecutionServiceClient<tonic::transport::Channel>;
