use crate::buffer::ResponseBuffer;
use crate::cache::{CachedResponse, ResponseCache};
use crate::error::ServerResult;
use crate::fileio::{self, FileStamp, MappedFile};
use crate::http::{Method, Request, Response, Status};
use crate::server::Server;
use crate::templates;
use log::{debug, error, warn};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static CONTENT_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(content_type_map);

/// A map of file extensions to content types
fn content_type_map() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();

    // Text types
    map.insert("html", "text/html");
    map.insert("htm", "text/html");
    map.insert("css", "text/css");
    map.insert("js", "text/javascript");
    map.insert("txt", "text/plain");
    map.insert("csv", "text/csv");

    map.insert("json", "application/json");
    map.insert("xml", "application/xml");
    map.insert("pdf", "application/pdf");
    map.insert("wasm", "application/wasm");

    // Image types
    map.insert("png", "image/png");
    map.insert("jpg", "image/jpeg");
    map.insert("jpeg", "image/jpeg");
    map.insert("gif", "image/gif");
    map.insert("svg", "image/svg+xml");
    map.insert("ico", "image/x-icon");

    map
}

/// Get the content type for a file based on its extension
pub fn content_type(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    CONTENT_TYPES.get(ext).copied().unwrap_or("text/plain")
}

/// Configuration for the static file server
#[derive(Clone, Debug)]
pub struct StaticFileConfig {
    /// The root directory to serve files from
    pub root_dir: PathBuf,

    /// Literal URL prefix in front of the file path
    pub path_prefix: String,

    /// Appended to request paths that name no file extension
    pub index_file: String,
}

impl Default for StaticFileConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("web"),
            path_prefix: "/123".to_string(),
            index_file: "index.html".to_string(),
        }
    }
}

impl StaticFileConfig {
    /// The default-tier route pattern for this prefix; the first group is the file path
    pub fn pattern(&self) -> String {
        let prefix = self.path_prefix.trim_start_matches('/');
        format!("^/?{}(.*)$", regex::escape(prefix))
    }

    /// Map a captured request path below the root directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        let mut fs_path = self.root_dir.clone();
        for segment in path.split('/') {
            // Skip empty segments and prevent directory traversal
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            fs_path.push(segment);
        }
        if fs_path == self.root_dir || fs_path.extension().is_none() {
            fs_path.push(&self.index_file);
        }
        fs_path
    }
}

fn write_not_found(out: &mut ResponseBuffer, request: &Request) {
    let address = request
        .address
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let content = format!("<html><h1>404 Not Found</h1>\n<h3>Your IP: {}</h3></html>", address);
    out.put(&templates::render(templates::NOT_FOUND, &[], content.as_bytes()));
}

/// Build the GET handler serving files below `config.root_dir` through `cache`
pub fn static_file_handler(
    config: StaticFileConfig,
    cache: Arc<ResponseCache>,
) -> impl Fn(&mut ResponseBuffer, &Request) + Send + Sync + 'static {
    move |out, request| {
        let fs_path = config.resolve(request.capture(0));
        debug!("{:?} {} -> {}", request.address, request.path, fs_path.display());

        if !fileio::exists_and_is_file(&fs_path) {
            write_not_found(out, request);
            return;
        }
        let stamp = match FileStamp::of(&fs_path) {
            Ok(stamp) => stamp,
            Err(e) => {
                warn!("cannot stat {}: {}", fs_path.display(), e);
                write_not_found(out, request);
                return;
            }
        };

        let key = fs_path.to_string_lossy();
        if let Some(cached) = cache.get(&key) {
            if cached.is_current(&stamp) {
                cached.write_to(out);
                return;
            }
            debug!("{} changed on disk, reloading", key);
        }

        let file = match MappedFile::open(&fs_path) {
            Ok(file) => file,
            Err(e) => {
                error!("cannot map {}: {}", fs_path.display(), e);
                let mut response = Response::new(Status::InternalServerError);
                response.set_body(b"");
                response.write_to(out);
                return;
            }
        };

        let rendered = templates::render(
            templates::OK,
            &[("$type", content_type(&fs_path))],
            file.as_bytes(),
        );
        out.put(&rendered);
        let entry = CachedResponse::from_rendered(&rendered).with_source(file.stamp());
        cache.set(&key, Arc::new(entry));
    }
}

/// Echo the request body back in a 200 response
pub fn echo_handler(out: &mut ResponseBuffer, request: &Request) {
    out.put(&templates::render(
        templates::OK,
        &[("$type", templates::DEFAULT_CONTENT_TYPE)],
        request.content(),
    ));
}

/// Register the static file handler as a default-tier GET route
pub fn add_static_file_routes(server: &mut Server, config: StaticFileConfig) -> ServerResult<()> {
    let pattern = config.pattern();
    let handler = static_file_handler(config, server.cache());
    server.set_default_logical(&pattern, Method::Get, handler)
}
