//! topic_bus integration tests.

mod registry;
mod publisher;
mod subscription;
mod sessions;
mod in_process;
