use async_trait::async_trait;

use super::types::{GeneratorError, Reply, ReplyRequest};

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, request: ReplyRequest) -> Result<Reply, GeneratorError>;
}
