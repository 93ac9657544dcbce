use std::{fs, io, path::Path};

use log::{info, warn};
use serde_derive::Deserialize;

use crate::world::mesh::BoundaryPolicy;

pub const MIN_CONNECTIONS: usize = 2;
pub const MAX_CONNECTIONS: usize = 16;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LaunchType {
    Server,
    Client,
    Both,
    TwoPlayer,
}

impl Default for LaunchType {
    fn default() -> Self {
        LaunchType::TwoPlayer
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub server_address: String,
    pub server_port: u16,
    pub username: String,
    /// Chunks loaded around the player, inclusive, on the x and z axes.
    pub view_radius: i32,
    /// Vertical world extent in chunks, starting at y = 0.
    pub world_height: i32,
    pub max_loaded_chunks: usize,
    pub max_requests_per_frame: usize,
    pub request_retry_frames: u64,
    pub mesh_workers: u32,
    pub boundary_policy: BoundaryPolicy,
    pub fps_limit: u32,
    /// Blocks per frame along +x; 0 keeps the headless player still.
    pub auto_walk: f64,
    pub server_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_address: "127.0.0.1".to_string(),
            server_port: 7777,
            username: "player".to_string(),
            view_radius: 4,
            world_height: 4,
            max_loaded_chunks: 1024,
            max_requests_per_frame: 64,
            request_retry_frames: 120,
            mesh_workers: 2,
            boundary_policy: BoundaryPolicy::AssumeSolid,
            fps_limit: 60,
            auto_walk: 0.0,
            server_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_connections: usize,
    pub world_height: i32,
    /// Chunks from the origin on x and z that contain terrain.
    pub world_size: i32,
    pub ground_level: i32,
    /// Seconds without connected peers before the server exits.
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 7777,
            max_connections: 4,
            world_height: 4,
            world_size: 16,
            ground_level: 20,
            timeout_secs: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub launch: LaunchType,
    pub client: ClientConfig,
    pub server: ServerConfig,
}

impl Config {
    /// A missing file gives the defaults.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Config> {
        let path = path.as_ref();
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(e),
        };
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> io::Result<Config> {
        let mut config = toml::from_str::<Config>(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        config.sanitize();
        Ok(config)
    }

    pub fn set_max_connections(&mut self, max_connections: usize) {
        if (MIN_CONNECTIONS..=MAX_CONNECTIONS).contains(&max_connections) {
            self.server.max_connections = max_connections;
        } else {
            warn!(
                "Max connections must be between {} and {}, defaulting to 4",
                MIN_CONNECTIONS, MAX_CONNECTIONS
            );
            self.server.max_connections = 4;
        }
    }

    /// Applies `-flag value` overrides. Returns false if usage was requested.
    pub fn apply_args(&mut self, args: &[(String, String)]) -> bool {
        for (flag, value) in args {
            match flag.as_str() {
                "-server" => {
                    self.launch = LaunchType::Server;
                    match value.parse::<usize>() {
                        Ok(max_connections) => self.set_max_connections(max_connections),
                        Err(_) => {
                            warn!("Unable to set max connections from {:?}, defaulting to 4", value);
                            self.server.max_connections = 4;
                        }
                    }
                }
                "-client" => self.launch = LaunchType::Client,
                "-both" => self.launch = LaunchType::Both,
                "-skin" => self.client.username = value.clone(),
                "-config" => {}
                "-help" => return false,
                _ => warn!("Ignoring unknown option {}", flag),
            }
        }
        true
    }

    fn sanitize(&mut self) {
        self.set_max_connections(self.server.max_connections);

        if self.client.view_radius < 0 {
            warn!("Negative view radius, using 0");
            self.client.view_radius = 0;
        }
        if self.client.world_height < 1 {
            warn!("World height must be at least one chunk");
            self.client.world_height = 1;
        }
        if self.client.fps_limit == 0 {
            warn!("FPS limit of 0, using 60");
            self.client.fps_limit = 60;
        }
    }
}

/// Pairs every `-flag` with the argument after it. A trailing flag without a
/// value is dropped.
pub fn arg_pairs(args: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if arg.starts_with('-') {
            if let Some(value) = args.get(i + 1) {
                pairs.push((arg.clone(), value.clone()));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<(String, String)> {
        let owned: Vec<String> = list.iter().map(|s| s.to_string()).collect();
        arg_pairs(&owned)
    }

    #[test]
    fn flags_pair_with_next_argument() {
        let pairs = args(&["-skin", "steve", "-client", "1", "-both"]);
        assert_eq!(
            pairs,
            vec![
                ("-skin".to_string(), "steve".to_string()),
                ("-client".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn server_flag_sets_launch_and_connections() {
        let mut config = Config::default();
        assert!(config.apply_args(&args(&["-server", "8", "-skin", "alex"])));
        assert_eq!(config.launch, LaunchType::Server);
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.client.username, "alex");

        let mut config = Config::default();
        config.server.max_connections = 10;
        config.apply_args(&args(&["-server", "lots"]));
        assert_eq!(config.server.max_connections, 4);

        config.apply_args(&args(&["-server", "17"]));
        assert_eq!(config.server.max_connections, 4);
    }

    #[test]
    fn help_stops_parsing() {
        let mut config = Config::default();
        assert!(!config.apply_args(&args(&["-help", "x", "-client", "x"])));
        assert_eq!(config.launch, LaunchType::TwoPlayer);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.launch, LaunchType::TwoPlayer);
        assert_eq!(config.client.view_radius, 4);
        assert_eq!(config.client.boundary_policy, BoundaryPolicy::AssumeSolid);
        assert_eq!(config.server.max_connections, 4);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            launch = "Both"

            [client]
            view_radius = 8
            boundary_policy = "AssumeAir"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.launch, LaunchType::Both);
        assert_eq!(config.client.view_radius, 8);
        assert_eq!(config.client.boundary_policy, BoundaryPolicy::AssumeAir);
        assert_eq!(config.client.server_port, 7777);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn out_of_range_connections_fall_back() {
        let config = Config::parse("[server]\nmax_connections = 40").unwrap();
        assert_eq!(config.server.max_connections, 4);

        let mut config = Config::default();
        config.set_max_connections(16);
        assert_eq!(config.server.max_connections, 16);
        config.set_max_connections(1);
        assert_eq!(config.server.max_connections, 4);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = Config::parse("launch = 5").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
