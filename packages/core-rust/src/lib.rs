//! `Offload` Core: request/response envelopes, system vocabulary, and wire codec
//! shared by the host orchestrator and the worker dispatcher.

pub mod codec;
pub mod codes;
pub mod id;
pub mod messages;

pub use codec::{decode, encode, CodecError};
pub use id::generate_operation_id;
pub use messages::{
    now_millis, HealthReport, Metadata, OperationRequest, Request, Response, ResponseType,
    WorkerError, SYSTEM_MODULE,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
