//! JSON-RPC dispatch.

pub mod engine;
pub mod protocol;

pub use engine::{executor_fn, Executor, FnExecutor, RpcEngine};
pub use protocol::{
    id_to_string, join_batch_responses, parse_worker_response, RpcRequest, RpcResponse,
    WorkerRequest,
};
