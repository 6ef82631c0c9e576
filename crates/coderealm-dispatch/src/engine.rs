use async_trait::async_trait;
use coderealm_core::{
    Error, Result,
    proto::{CodeExecutionClient, ExecuteCodeRequest},
};
use tonic::transport::Endpoint;

/// The remote compile-and-run service.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Runs `code` and returns its raw output.
    async fn execute(&self, language: &str, code: &str) -> Result<String>;
}

/// [`ExecutionEngine`] over the `CodeExecutionService` gRPC API.
///
/// No deadline is set on the call; timeouts come from the channel
/// configuration only.
#[derive(Debug, Clone)]
pub struct GrpcEngine {
    client: CodeExecutionClient,
}

impl GrpcEngine {
    pub fn new(client: CodeExecutionClient) -> Self {
        Self { client }
    }

    /// Builds an engine whose connection is opened on the first call.
    pub fn connect_lazy(uri: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(uri.to_string())
            .map_err(|e| Error::Execution {
                reason: format!("invalid engine endpoint {uri:?}: {e}"),
            })?
            .connect_lazy();
        Ok(Self::new(CodeExecutionClient::new(channel)))
    }
}

#[async_trait]
impl ExecutionEngine for GrpcEngine {
    async fn execute(&self, language: &str, code: &str) -> Result<String> {
        let mut client = self.client.clone();
        let response = client
            .execute_code(ExecuteCodeRequest {
                language: language.to_string(),
                code: code.to_string(),
            })
            .await?;

        Ok(response.into_inner().output)
    }
}
