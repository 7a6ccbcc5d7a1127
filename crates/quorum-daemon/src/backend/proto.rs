//! Wire messages and clients of the signature backend service, generated
//! from `proto/backend.proto` by the build script

tonic::include_proto!("quorum.backend.v1");
