//! Remote trees against a minimal in-process HTTP responder.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use grove_kernel::{GroveConfig, Key, SiteTree, Tree, TreeError, TreeRef, Value, ops};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the responder sends back for a path.
enum Reply {
    /// 200 with a content type and body.
    Body(&'static str, &'static [u8]),
    /// 301 to another location.
    Redirect(&'static str),
}

/// Anything not routed is a 404.
type Routes = HashMap<&'static str, Reply>;

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0xff];

/// Serve `routes` on a local port until the test ends.
async fn serve(routes: Routes) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/");
                let (head, body): (String, &[u8]) = match routes.get(path) {
                    Some(Reply::Body(content_type, body)) => (
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n",
                            body.len()
                        ),
                        *body,
                    ),
                    Some(Reply::Redirect(location)) => (
                        format!("HTTP/1.1 301 Moved Permanently\r\nLocation: {location}\r\nContent-Length: 0\r\n"),
                        &[],
                    ),
                    None => ("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n".to_string(), &[]),
                };
                let mut response = format!("{head}Connection: close\r\n\r\n").into_bytes();
                response.extend_from_slice(body);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

async fn explorable_site() -> TreeRef {
    let routes: Routes = HashMap::from([
        ("/.keys.json", Reply::Body("application/json", br#"["index.html", "about.md", "blog/", "logo.png"]"#)),
        ("/index.html", Reply::Body("text/html; charset=utf-8", b"home")),
        ("/about.md", Reply::Body("text/markdown", b"about")),
        ("/blog/.keys.json", Reply::Body("application/json", br#"["post.md"]"#)),
        ("/blog/post.md", Reply::Body("text/markdown", b"post")),
        ("/logo.png", Reply::Body("image/png", PNG)),
        ("/docs", Reply::Redirect("/docs/")),
        ("/docs/", Reply::Body("text/html", b"docs")),
        ("/docs/.keys.json", Reply::Body("application/json", br#"["intro.md"]"#)),
        ("/docs/intro.md", Reply::Body("text/markdown", b"intro")),
    ]);
    let addr = serve(routes).await;
    SiteTree::new(&format!("http://{addr}"), &GroveConfig::default()).unwrap()
}

async fn text_at(tree: &TreeRef, path: &str) -> Option<String> {
    ops::traverse_path(tree, path)
        .await
        .unwrap()
        .and_then(|value| value.to_text())
}

// ============================================================================
// Explorable sites
// ============================================================================

#[tokio::test]
async fn test_manifest_lists_keys() {
    let site = explorable_site().await;
    assert_eq!(site.keys().await.unwrap(), ["index.html", "about.md", "blog/", "logo.png"]);
    assert!(site.is_key_for_subtree("blog").await.unwrap());
    assert!(!site.is_key_for_subtree("about.md").await.unwrap());
}

#[tokio::test]
async fn test_text_and_subtrees() {
    let site = explorable_site().await;
    assert_eq!(text_at(&site, "about.md").await.as_deref(), Some("about"));
    assert_eq!(text_at(&site, "blog/post.md").await.as_deref(), Some("post"));

    let Some(Value::Tree(blog)) = site.get(&Key::from("blog/")).await.unwrap() else {
        panic!("blog should be a subtree");
    };
    assert_eq!(blog.keys().await.unwrap(), ["post.md"]);
    assert!(blog.parent().is_some());
}

#[tokio::test]
async fn test_redirect_to_directory_is_a_subtree() {
    let site = explorable_site().await;
    let Some(Value::Tree(docs)) = site.get(&Key::from("docs")).await.unwrap() else {
        panic!("a redirect ending in a slash should come back as a subtree");
    };
    assert_eq!(docs.kind(), "SiteTree");
    assert_eq!(docs.keys().await.unwrap(), ["intro.md"]);
    let intro = docs.get(&Key::from("intro.md")).await.unwrap();
    assert_eq!(intro.and_then(|v| v.to_text()).as_deref(), Some("intro"));
}

#[tokio::test]
async fn test_binary_media_type_is_bytes() {
    let site = explorable_site().await;
    assert!(matches!(
        site.get(&Key::from("logo.png")).await.unwrap(),
        Some(Value::Bytes(bytes)) if bytes == PNG
    ));
}

#[tokio::test]
async fn test_empty_key_is_index() {
    let site = explorable_site().await;
    let index = site.get(&Key::from("")).await.unwrap();
    assert_eq!(index.and_then(|v| v.to_text()).as_deref(), Some("home"));
}

#[tokio::test]
async fn test_missing_resource_is_absent() {
    let site = explorable_site().await;
    assert!(site.get(&Key::from("nope.html")).await.unwrap().is_none());
    assert!(text_at(&site, "blog/nope.md").await.is_none());
}

#[tokio::test]
async fn test_null_key_is_an_error() {
    let site = explorable_site().await;
    let err = site.get(&Key::Default).await.unwrap_err();
    assert!(matches!(err, TreeError::NullKey { .. }));
}

// ============================================================================
// Plain sites
// ============================================================================

#[tokio::test]
async fn test_plain_site_has_no_keys_but_serves_values() {
    let routes: Routes = HashMap::from([
        ("/data.bin", Reply::Body("application/octet-stream", &[1, 2])),
        ("/page.html", Reply::Body("text/html", b"page")),
    ]);
    let addr = serve(routes).await;
    let site: TreeRef = SiteTree::new(&format!("http://{addr}/"), &GroveConfig::default()).unwrap();

    assert!(site.keys().await.unwrap().is_empty());
    assert!(matches!(
        site.get(&Key::from("data.bin")).await.unwrap(),
        Some(Value::Bytes(bytes)) if bytes == [1, 2]
    ));
    assert_eq!(text_at(&site, "page.html").await.as_deref(), Some("page"));
}

#[tokio::test]
async fn test_unreachable_host_is_a_fetch_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let site: TreeRef = SiteTree::new(&format!("http://{addr}/"), &GroveConfig::default()).unwrap();
    let err = site.get(&Key::from("page.html")).await.unwrap_err();
    assert!(matches!(err, TreeError::Fetch { .. }), "{err}");
}
