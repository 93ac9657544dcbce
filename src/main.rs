use std::{env, process, sync::Arc};

use indoc::indoc;
use log::{error, info};
use open_builder::{
    client::{run_client, EngineStatus},
    config::{arg_pairs, ClientConfig, Config, LaunchType, ServerConfig},
    server,
};

const USAGE: &str = indoc! {"
    Usage: open-builder [-flag value]...

      -server <max connections>  Run a dedicated server (2 to 16 connections)
      -client <any>              Connect to the server in config.toml
      -both <any>                Run a server and one client in this process
      -skin <name>               Username to join with
      -config <path>             Config file (default: config.toml)
      -help <any>                Show this message

    Without a launch flag a server and two clients are started.
"};

fn exit_success(message: &str) -> i32 {
    info!("Engine exited successfully: {}", message);
    0
}

fn exit_failure(message: &str) -> i32 {
    error!("Engine exited with error: {}", message);
    1
}

async fn launch_server(config: ServerConfig) -> i32 {
    info!("Launching server");
    let listener = match server::bind(&config).await {
        Ok(listener) => listener,
        Err(err) => return exit_failure(&format!("Could not bind server: {}", err)),
    };
    match server::serve(listener, Arc::new(config)).await {
        Ok(()) => exit_success("Server has exited"),
        Err(err) => exit_failure(&format!("Server failed: {}", err)),
    }
}

async fn launch_client(config: ClientConfig) -> i32 {
    info!("Launching client {}", config.username);
    match run_client(Arc::new(config), None).await {
        EngineStatus::Ok | EngineStatus::Exit => exit_success("Normal exit"),
        EngineStatus::ExitServerDisconnect => {
            exit_success("Client was disconnected from the server")
        }
        EngineStatus::ExitServerTimeout => {
            exit_success("Server timeout, client was forcefully disconnected")
        }
        EngineStatus::CouldNotConnect => {
            exit_failure("Connection to server could not be established")
        }
    }
}

/// Starts the server in this process, then `players` clients that connect to
/// it over TCP once it is listening.
async fn launch_with_server(config: Config, players: usize) -> i32 {
    let listener = match server::bind(&config.server).await {
        Ok(listener) => listener,
        Err(err) => return exit_failure(&format!("Could not bind server: {}", err)),
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(err) => return exit_failure(&format!("Server has no address: {}", err)),
    };
    info!("Launching server on port {}", port);
    let server = tokio::spawn(server::serve(listener, Arc::new(config.server.clone())));

    let clients = (0..players).map(|i| {
        let mut client = config.client.clone();
        client.server_address = config.server.bind_address.clone();
        client.server_port = port;
        if i > 0 {
            client.username = format!("{}{}", client.username, i + 1);
        }
        launch_client(client)
    });
    let exits = futures::future::join_all(clients).await;

    match server.await {
        Ok(Ok(())) => info!("Server has exited"),
        Ok(Err(err)) => error!("Server failed: {}", err),
        Err(err) => error!("Server task panicked: {}", err),
    }
    exits.into_iter().max().unwrap_or(0)
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let pairs = arg_pairs(&args);
    let config_path = pairs
        .iter()
        .find(|(flag, _)| flag == "-config")
        .map(|(_, path)| path.as_str())
        .unwrap_or("config.toml");

    let mut config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            let code = exit_failure(&format!("Could not load {}: {}", config_path, err));
            process::exit(code);
        }
    };
    if !config.apply_args(&pairs) {
        println!("{}", USAGE);
        return;
    }

    let code = match config.launch {
        LaunchType::Server => launch_server(config.server).await,
        LaunchType::Client => launch_client(config.client).await,
        LaunchType::Both => launch_with_server(config, 1).await,
        LaunchType::TwoPlayer => launch_with_server(config, 2).await,
    };
    process::exit(code);
}
