pub mod api_server;
pub mod command_exec;
pub mod docker_rest;
pub mod heartbeat;
pub mod memory;
pub mod postgres;

pub use api_server::start_api_server;
pub use command_exec::CommandExec;
pub use docker_rest::{DockerClient, DockerClientSettings, DockerConnector};
pub use heartbeat::HeartbeatClient;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
