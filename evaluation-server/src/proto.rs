//! Generated protobuf and gRPC code.

pub mod evaluation {
    pub mod v1 {
        tonic::include_proto!("evaluation.v1");
    }
}

pub mod orchestrator {
    pub mod v1 {
        tonic::include_proto!("orchestrator.v1");
    }
}
