//! Local preview server for a built site.
//!
//! Serves the output directory through the same [`Router`] the publisher
//! verifies against, so redirects behave locally the way the redirect table
//! says they should:
//!
//! - a matching redirect rule answers with its status and a `Location` header
//! - otherwise the file is served (exact path, `<path>/index.html`, `<path>.html`)
//! - otherwise `404.html` is served with status 404
//!
//! Single-threaded: one request at a time, no reloading. Rebuild and refresh.

use crate::redirect::{ContentLookup, OutputDir, RedirectTable, Resolution, Router};
use percent_encoding::percent_decode_str;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Redirect table: {0}")]
    Redirect(#[from] crate::redirect::RedirectError),
    #[error("Cannot listen on {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
    #[error("Output directory {0} does not exist; run `quire build` first")]
    MissingOutput(String),
}

/// A response, decided before anything is written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

const HTML: &str = "text/html; charset=utf-8";
const PLAIN: &str = "text/plain; charset=utf-8";

/// MIME type by file extension.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => HTML,
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => PLAIN,
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Decide the reply for a request path.
pub fn respond<C: ContentLookup>(router: &Router<'_, C>, not_found: &Path, url: &str) -> Reply {
    let path = percent_decode(url);
    match router.resolve(&path) {
        Resolution::Redirect { location, status } => Reply {
            status,
            content_type: PLAIN,
            body: format!("Redirecting to {location}\n").into_bytes(),
            location: Some(location),
        },
        Resolution::Content(file) => match fs::read(&file) {
            Ok(body) => Reply {
                status: 200,
                content_type: content_type(&file),
                location: None,
                body,
            },
            Err(e) => {
                tracing::error!(path = %file.display(), error = %e, "read failed");
                Reply {
                    status: 500,
                    content_type: PLAIN,
                    location: None,
                    body: b"500 Internal Server Error\n".to_vec(),
                }
            }
        },
        Resolution::NotFound => match fs::read(not_found) {
            Ok(body) => Reply {
                status: 404,
                content_type: HTML,
                location: None,
                body,
            },
            Err(_) => Reply {
                status: 404,
                content_type: PLAIN,
                location: None,
                body: b"404 Not Found\n".to_vec(),
            },
        },
    }
}

/// Serve `output_dir` on `addr` until the process is stopped.
pub fn serve(output_dir: &Path, addr: SocketAddr) -> Result<(), ServeError> {
    if !output_dir.is_dir() {
        return Err(ServeError::MissingOutput(output_dir.display().to_string()));
    }
    let table = RedirectTable::load(&output_dir.join("_redirects"))?;
    let router = Router::new(&table, OutputDir::new(output_dir));
    let not_found = output_dir.join("404.html");

    let server = Server::http(addr).map_err(|e| ServeError::Bind {
        addr,
        reason: e.to_string(),
    })?;
    tracing::info!(%addr, redirects = table.len(), "serving {}", output_dir.display());

    for request in server.incoming_requests() {
        let reply = respond(&router, &not_found, request.url());
        tracing::debug!(method = %request.method(), url = request.url(), status = reply.status);
        if let Err(e) = send(request, reply) {
            tracing::warn!(error = %e, "failed to send response");
        }
    }
    Ok(())
}

fn send(request: Request, reply: Reply) -> io::Result<()> {
    let head = request.method() == &Method::Head;
    let mut headers = Vec::with_capacity(2);
    headers.extend(header("Content-Type", reply.content_type));
    if let Some(location) = &reply.location {
        headers.extend(header("Location", location));
    }
    let body = if head { Vec::new() } else { reply.body };
    let length = body.len();
    let response = Response::new(
        StatusCode(reply.status),
        headers,
        io::Cursor::new(body),
        Some(length),
        None,
    );
    request.respond(response)
}

/// `None` for values tiny_http refuses (e.g. containing newlines).
fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

/// Decode `%XX` escapes in a request path. Malformed escapes pass through.
fn percent_decode(url: &str) -> String {
    percent_decode_str(url).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site() -> (TempDir, RedirectTable) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("blog/hello")).unwrap();
        fs::create_dir_all(tmp.path().join("img")).unwrap();
        fs::write(tmp.path().join("blog/hello/index.html"), "<h1>hello</h1>").unwrap();
        fs::write(tmp.path().join("img/logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
        fs::write(tmp.path().join("404.html"), "<h1>missing</h1>").unwrap();
        let table = RedirectTable::parse("/assets/img/:filename /img/:filename 301\n").unwrap();
        (tmp, table)
    }

    #[test]
    fn redirect_reply_has_location() {
        let (tmp, table) = site();
        let router = Router::new(&table, OutputDir::new(tmp.path()));
        let reply = respond(&router, &tmp.path().join("404.html"), "/assets/img/logo.png");
        assert_eq!(reply.status, 301);
        assert_eq!(reply.location.as_deref(), Some("/img/logo.png"));
    }

    #[test]
    fn content_served_with_mime() {
        let (tmp, table) = site();
        let router = Router::new(&table, OutputDir::new(tmp.path()));
        let reply = respond(&router, &tmp.path().join("404.html"), "/img/logo.png");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type, "image/png");

        let reply = respond(&router, &tmp.path().join("404.html"), "/blog/hello/");
        assert_eq!(reply.content_type, HTML);
        assert_eq!(reply.body, b"<h1>hello</h1>");
    }

    #[test]
    fn miss_serves_not_found_page() {
        let (tmp, table) = site();
        let router = Router::new(&table, OutputDir::new(tmp.path()));
        let reply = respond(&router, &tmp.path().join("404.html"), "/nope");
        assert_eq!(reply.status, 404);
        assert_eq!(reply.body, b"<h1>missing</h1>");
    }

    #[test]
    fn miss_without_not_found_page() {
        let (tmp, table) = site();
        fs::remove_file(tmp.path().join("404.html")).unwrap();
        let router = Router::new(&table, OutputDir::new(tmp.path()));
        let reply = respond(&router, &tmp.path().join("404.html"), "/nope");
        assert_eq!(reply.status, 404);
        assert_eq!(reply.content_type, PLAIN);
    }

    #[test]
    fn traversal_is_not_found() {
        let (tmp, table) = site();
        let router = Router::new(&table, OutputDir::new(tmp.path().join("blog")));
        let reply = respond(&router, &tmp.path().join("404.html"), "/../img/logo.png");
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn percent_escapes_decoded() {
        assert_eq!(percent_decode("/a%20b/c%2"), "/a b/c%2");
        assert_eq!(percent_decode("/plain"), "/plain");
        assert_eq!(percent_decode("/caf%C3%A9"), "/caf\u{e9}");
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        assert_eq!(content_type(Path::new("a.bin")), "application/octet-stream");
        assert_eq!(content_type(Path::new("feed.XML")), "application/xml");
    }
}
