//! Generated gRPC bindings for the job-worker service.

tonic::include_proto!("jobworker.v1");
