use async_http_server::{
    add_static_file_routes, create_client, echo_handler, BufferedLogger, Method, Server, ServerConfig,
    ServerError, ServerResult, StaticFileConfig,
};
use log::LevelFilter;
use std::env;
use std::path::Path;

fn main() -> ServerResult<()> {
    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();

    if args.len() > 2 && args[1] == "fetch" {
        return fetch(&args[2]);
    }

    let config = if args.len() > 1 && Path::new(&args[1]).exists() {
        // Load configuration from file
        ServerConfig::from_json_file(&args[1])?
    } else {
        // Use default configuration
        ServerConfig::new()
    };

    let level: LevelFilter = config
        .log_level
        .parse()
        .map_err(|_| ServerError::Config(format!("unknown log level {:?}", config.log_level)))?;
    BufferedLogger::install(&config.log_file, config.log_queue_size, level)?;

    println!(
        "Starting server on {}:{} with {} worker threads, logging to {}",
        config.listen_address,
        config.port,
        config.effective_worker_threads(),
        config.log_file.display()
    );

    let mut server = Server::new(config)?;
    server.set_specific_logical("^/?(.*)$", Method::Post, echo_handler)?;
    add_static_file_routes(&mut server, StaticFileConfig::default())?;

    #[cfg(unix)]
    for signum in [libc::SIGINT, libc::SIGQUIT] {
        server.set_signal_handler(signum, |sig| {
            eprintln!(" catch signal {}", sig);
            log::logger().flush();
            std::process::exit(sig);
        })?;
    }

    server.start()
}

// One-off fetch printing the response head and content size
fn fetch(url: &str) -> ServerResult<()> {
    let client = create_client(url, "GET")?.with_timeout(30);
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    let ok = runtime.block_on(client.run(|url, response| {
        println!("{}\n{}\ncontent size: {}", url, response.head.replace('\r', ""), response.content.len());
    }));
    if ok {
        Ok(())
    } else {
        Err(ServerError::Client(format!("fetch of {} failed", url)))
    }
}
